use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::info;
use uuid::Uuid;

use crate::clustering::{self, KMeansParams, DEFAULT_MAX_ITERATIONS};
use crate::models::{GroupSeries, InteractionTable, ReportResult, Student, Topic};

/// Dense per-student error-rate rows over a fixed, name-sorted topic order.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRateMatrix {
    pub student_ids: Vec<Uuid>,
    pub topics: Vec<Topic>,
    pub rows: Vec<Vec<f64>>,
}

/// Groups students by their per-topic error-rate profile.
#[derive(Debug, Clone, Copy)]
pub struct GroupingReportBuilder {
    max_iterations: usize,
}

impl Default for GroupingReportBuilder {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl GroupingReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn build(
        &self,
        students: &[Student],
        topics: &[Topic],
        interactions: &InteractionTable,
        k: usize,
        seed: u64,
    ) -> ReportResult {
        let mut assignments: BTreeMap<Uuid, Option<usize>> =
            students.iter().map(|s| (s.id, None)).collect();

        let matrix = build_matrix(students, topics, interactions);
        if matrix.rows.is_empty() {
            info!(
                students = students.len(),
                "no student has recorded interactions; returning empty grouping report"
            );
            return ReportResult {
                assignments,
                ..ReportResult::default()
            };
        }

        let k_effective = effective_k(k, matrix.rows.len());
        let outcome = clustering::kmeans(
            &matrix.rows,
            k_effective,
            KMeansParams {
                max_iterations: self.max_iterations,
                seed,
            },
        );

        info!(
            active = matrix.rows.len(),
            inactive = assignments.len() - matrix.rows.len(),
            topics = matrix.topics.len(),
            k_requested = k,
            k_effective,
            iterations = outcome.iterations,
            converged = outcome.converged,
            "grouping report built"
        );

        for (student_id, &label) in matrix.student_ids.iter().zip(&outcome.labels) {
            assignments.insert(*student_id, Some(label + 1));
        }

        ReportResult {
            k_effective,
            topic_labels: matrix.topics.iter().map(|t| t.name.clone()).collect(),
            groups: group_profiles(&matrix.rows, &outcome.labels, k_effective),
            assignments,
            student_rates: matrix.student_ids.into_iter().zip(matrix.rows).collect(),
        }
    }
}

pub fn effective_k(requested: usize, active: usize) -> usize {
    requested.min(active).max(1)
}

/// Builds the imputed error-rate matrix for students with at least one attempt.
///
/// Missing cells take the topic's mean rate over students who answered it.
pub fn build_matrix(
    students: &[Student],
    topics: &[Topic],
    interactions: &InteractionTable,
) -> ErrorRateMatrix {
    let population: HashSet<Uuid> = students.iter().map(|s| s.id).collect();

    let mut rates: HashMap<(Uuid, Uuid), f64> = HashMap::new();
    for (&(student_id, topic_id), counts) in interactions {
        if !population.contains(&student_id) {
            continue;
        }
        if let Some(rate) = counts.error_rate() {
            rates.insert((student_id, topic_id), rate);
        }
    }

    let active_ids: HashSet<Uuid> = rates.keys().map(|(s, _)| *s).collect();
    let mut seen = HashSet::new();
    let student_ids: Vec<Uuid> = students
        .iter()
        .map(|s| s.id)
        .filter(|id| active_ids.contains(id) && seen.insert(*id))
        .collect();

    let names: HashMap<Uuid, &str> = topics.iter().map(|t| (t.id, t.name.as_str())).collect();
    let topic_ids: HashSet<Uuid> = rates.keys().map(|(_, t)| *t).collect();
    let mut columns: Vec<Topic> = topic_ids
        .into_iter()
        .map(|id| Topic {
            id,
            name: names
                .get(&id)
                .map(|n| n.to_string())
                .unwrap_or_else(|| format!("Topic {id}")),
        })
        .collect();
    columns.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });

    let column_means: Vec<f64> = columns
        .iter()
        .map(|topic| {
            // Walk students in input order so the float sum is reproducible.
            let values: Vec<f64> = student_ids
                .iter()
                .filter_map(|student_id| rates.get(&(*student_id, topic.id)).copied())
                .collect();
            mean(&values)
        })
        .collect();

    let rows = student_ids
        .iter()
        .map(|student_id| {
            columns
                .iter()
                .zip(&column_means)
                .map(|(topic, fallback)| {
                    rates
                        .get(&(*student_id, topic.id))
                        .copied()
                        .unwrap_or(*fallback)
                })
                .collect()
        })
        .collect();

    ErrorRateMatrix {
        student_ids,
        topics: columns,
        rows,
    }
}

fn group_profiles(rows: &[Vec<f64>], labels: &[usize], k: usize) -> Vec<GroupSeries> {
    let dims = rows.first().map(Vec::len).unwrap_or(0);
    let mut sums = vec![vec![0.0; dims]; k];
    let mut counts = vec![0usize; k];

    for (row, &label) in rows.iter().zip(labels) {
        counts[label] += 1;
        for (sum, value) in sums[label].iter_mut().zip(row) {
            *sum += value;
        }
    }

    sums.into_iter()
        .zip(counts)
        .enumerate()
        .map(|(index, (sum, count))| {
            let denominator = count.max(1) as f64;
            let mean_error_rates: Vec<f64> = sum.iter().map(|s| s / denominator).collect();
            let group = index + 1;
            GroupSeries {
                group,
                label: format!("Group {group} (n={count})"),
                member_count: count,
                percentages: mean_error_rates.iter().map(|r| to_percentage(*r)).collect(),
                mean_error_rates,
            }
        })
        .collect()
}

pub fn to_percentage(rate: f64) -> f64 {
    (rate * 100.0 * 100.0).round() / 100.0
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
