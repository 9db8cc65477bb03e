use std::collections::HashMap;

use uuid::Uuid;

use crate::models::{
    InteractionTable, OutcomeTotals, ReportResult, Student, StudentCard, Topic, TopicSummary,
};

fn rate(errors: u64, attempts: u64) -> f64 {
    if attempts == 0 {
        0.0
    } else {
        errors as f64 / attempts as f64
    }
}

/// Per-topic totals for the whole class, or for one student when `student` is set.
pub fn topic_breakdown(
    topics: &[Topic],
    interactions: &InteractionTable,
    student: Option<Uuid>,
) -> Vec<TopicSummary> {
    let mut map: HashMap<Uuid, (u64, u64)> = HashMap::new();

    for (&(student_id, topic_id), counts) in interactions {
        if student.is_some_and(|wanted| wanted != student_id) {
            continue;
        }
        let entry = map.entry(topic_id).or_insert((0, 0));
        entry.0 += u64::from(counts.attempts());
        entry.1 += u64::from(counts.errors());
    }

    let names: HashMap<Uuid, &str> = topics.iter().map(|t| (t.id, t.name.as_str())).collect();
    let mut summaries: Vec<TopicSummary> = map
        .into_iter()
        .filter(|(_, (attempts, _))| *attempts > 0)
        .map(|(topic_id, (attempts, errors))| TopicSummary {
            topic_id,
            topic_name: names
                .get(&topic_id)
                .map(|n| n.to_string())
                .unwrap_or_else(|| format!("Topic {topic_id}")),
            attempts,
            errors,
            error_rate: rate(errors, attempts),
        })
        .collect();

    summaries.sort_by_key(|s| (s.topic_name.to_lowercase(), s.topic_id));
    summaries
}

pub fn outcome_totals(interactions: &InteractionTable, student: Option<Uuid>) -> OutcomeTotals {
    let (total, errors) = interactions
        .iter()
        .filter(|((student_id, _), _)| student.map_or(true, |wanted| wanted == *student_id))
        .fold((0u64, 0u64), |(total, errors), (_, counts)| {
            (
                total + u64::from(counts.attempts()),
                errors + u64::from(counts.errors()),
            )
        });

    OutcomeTotals {
        correct: total.saturating_sub(errors),
        errors,
        total,
    }
}

/// Roster rows ordered by group (unassigned last), then by name.
pub fn student_cards(
    students: &[Student],
    interactions: &InteractionTable,
    report: &ReportResult,
) -> Vec<StudentCard> {
    let mut cards: Vec<StudentCard> = students
        .iter()
        .map(|student| {
            let totals = outcome_totals(interactions, Some(student.id));
            StudentCard {
                student_id: student.id,
                name: student.name.clone(),
                email: student.email.clone(),
                attempts: totals.total,
                error_rate: rate(totals.errors, totals.total),
                group: report.group_of(student.id),
            }
        })
        .collect();

    cards.sort_by_key(|c| (c.group.unwrap_or(usize::MAX), c.name.to_lowercase()));
    cards
}

/// One entry per class topic for a single student, zero-filled where the
/// student has not answered anything on that topic.
pub fn student_topic_matrix(
    topics: &[Topic],
    interactions: &InteractionTable,
    student: Uuid,
) -> Vec<TopicSummary> {
    let mut rows: Vec<TopicSummary> = topics
        .iter()
        .map(|topic| {
            let counts = interactions
                .get(&(student, topic.id))
                .copied()
                .unwrap_or_default();
            let attempts = u64::from(counts.attempts());
            let errors = u64::from(counts.errors());
            TopicSummary {
                topic_id: topic.id,
                topic_name: topic.name.clone(),
                attempts,
                errors,
                error_rate: rate(errors, attempts),
            }
        })
        .collect();

    rows.sort_by_key(|s| (s.topic_name.to_lowercase(), s.topic_id));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InteractionCounts;
    use std::collections::BTreeMap;

    fn fixture() -> (Vec<Student>, Vec<Topic>, InteractionTable) {
        let students = vec![
            Student {
                id: Uuid::from_u128(1),
                name: "zoe".to_string(),
                email: "zoe@example.com".to_string(),
            },
            Student {
                id: Uuid::from_u128(2),
                name: "Ana".to_string(),
                email: "ana@example.com".to_string(),
            },
            Student {
                id: Uuid::from_u128(3),
                name: "Bruno".to_string(),
                email: "bruno@example.com".to_string(),
            },
        ];
        let topics = vec![
            Topic {
                id: Uuid::from_u128(10),
                name: "Substitution".to_string(),
            },
            Topic {
                id: Uuid::from_u128(11),
                name: "factoring".to_string(),
            },
        ];
        let mut table = InteractionTable::new();
        table.insert(
            (students[0].id, topics[0].id),
            InteractionCounts::new(4, 1).unwrap(),
        );
        table.insert(
            (students[0].id, topics[1].id),
            InteractionCounts::new(6, 3).unwrap(),
        );
        table.insert(
            (students[1].id, topics[1].id),
            InteractionCounts::new(2, 2).unwrap(),
        );
        (students, topics, table)
    }

    #[test]
    fn breakdown_sums_and_sorts_case_insensitively() {
        let (_, topics, table) = fixture();
        let breakdown = topic_breakdown(&topics, &table, None);
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[0].topic_name, "factoring");
        assert_eq!(breakdown[0].attempts, 8);
        assert_eq!(breakdown[0].errors, 5);
        assert!((breakdown[0].error_rate - 0.625).abs() < 1e-12);
        assert_eq!(breakdown[1].topic_name, "Substitution");
    }

    #[test]
    fn breakdown_can_focus_on_one_student() {
        let (students, topics, table) = fixture();
        let breakdown = topic_breakdown(&topics, &table, Some(students[1].id));
        assert_eq!(breakdown.len(), 1);
        assert_eq!(breakdown[0].error_rate, 1.0);
    }

    #[test]
    fn totals_split_correct_and_errors() {
        let (students, _, table) = fixture();
        let class = outcome_totals(&table, None);
        assert_eq!(
            class,
            OutcomeTotals {
                correct: 6,
                errors: 6,
                total: 12
            }
        );
        assert_eq!(outcome_totals(&table, Some(students[2].id)), OutcomeTotals::default());
    }

    #[test]
    fn cards_order_by_group_then_name() {
        let (students, _, table) = fixture();
        let mut assignments = BTreeMap::new();
        assignments.insert(students[0].id, Some(1));
        assignments.insert(students[1].id, Some(1));
        assignments.insert(students[2].id, None);
        let report = ReportResult {
            k_effective: 1,
            assignments,
            ..ReportResult::default()
        };

        let cards = student_cards(&students, &table, &report);
        let names: Vec<&str> = cards.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Ana", "zoe", "Bruno"]);
        assert_eq!(cards[2].group, None);
        assert_eq!(cards[2].attempts, 0);
        assert_eq!(cards[2].error_rate, 0.0);
        assert_eq!(cards[1].attempts, 10);
    }

    #[test]
    fn matrix_zero_fills_unanswered_topics() {
        let (students, topics, table) = fixture();
        let rows = student_topic_matrix(&topics, &table, students[1].id);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].topic_name, "factoring");
        assert_eq!(rows[0].attempts, 2);
        assert_eq!(rows[1].attempts, 0);
        assert_eq!(rows[1].error_rate, 0.0);
    }
}
