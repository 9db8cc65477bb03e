use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topic {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassInfo {
    pub id: Uuid,
    pub code: String,
    pub name: String,
}

/// Aggregated answer counts for one (student, topic) pair.
///
/// Built through [`InteractionCounts::new`], which keeps `errors <= attempts`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InteractionCounts {
    attempts: u32,
    errors: u32,
}

impl InteractionCounts {
    pub fn new(attempts: u32, errors: u32) -> Result<Self, crate::error::InputError> {
        if errors > attempts {
            return Err(crate::error::InputError::ErrorsExceedAttempts { attempts, errors });
        }
        Ok(Self { attempts, errors })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }

    pub fn error_rate(&self) -> Option<f64> {
        if self.attempts == 0 {
            None
        } else {
            Some(self.errors as f64 / self.attempts as f64)
        }
    }
}

pub type InteractionTable = HashMap<(Uuid, Uuid), InteractionCounts>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSeries {
    pub group: usize,
    pub label: String,
    pub member_count: usize,
    /// Mean error rate per topic column, in [0, 1].
    pub mean_error_rates: Vec<f64>,
    /// `mean_error_rates` scaled to percent and rounded to 2 decimals.
    pub percentages: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportResult {
    pub k_effective: usize,
    pub topic_labels: Vec<String>,
    pub groups: Vec<GroupSeries>,
    /// Every student under consideration; `None` for students without data.
    pub assignments: BTreeMap<Uuid, Option<usize>>,
    /// Imputed error-rate row per grouped student, aligned with `topic_labels`.
    pub student_rates: BTreeMap<Uuid, Vec<f64>>,
}

impl ReportResult {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn rates_of(&self, student_id: Uuid) -> Option<&[f64]> {
        self.student_rates.get(&student_id).map(Vec::as_slice)
    }

    pub fn group_of(&self, student_id: Uuid) -> Option<usize> {
        self.assignments.get(&student_id).copied().flatten()
    }

    pub fn active_count(&self) -> usize {
        self.assignments.values().filter(|g| g.is_some()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicSummary {
    pub topic_id: Uuid,
    pub topic_name: String,
    pub attempts: u64,
    pub errors: u64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeTotals {
    pub correct: u64,
    pub errors: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentCard {
    pub student_id: Uuid,
    pub name: String,
    pub email: String,
    pub attempts: u64,
    pub error_rate: f64,
    pub group: Option<usize>,
}
