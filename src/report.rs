use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use crate::models::{ClassInfo, OutcomeTotals, ReportResult, StudentCard, TopicSummary};

/// Detail block for a single student selected alongside the class report.
#[derive(Serialize)]
pub struct StudentFocus<'a> {
    pub card: &'a StudentCard,
    pub topics: &'a [TopicSummary],
    pub totals: OutcomeTotals,
}

/// Everything the markdown report shows, shaped for JSON consumers.
#[derive(Serialize)]
pub struct ClassReportView<'a> {
    pub class: &'a ClassInfo,
    pub report: &'a ReportResult,
    pub cards: &'a [StudentCard],
    pub breakdown: &'a [TopicSummary],
    pub totals: OutcomeTotals,
    pub focus: Option<&'a StudentFocus<'a>>,
}

pub fn build_json(view: &ClassReportView<'_>) -> anyhow::Result<String> {
    serde_json::to_string_pretty(view).context("failed to serialize class report")
}

pub fn build_report(
    class: &ClassInfo,
    report: &ReportResult,
    cards: &[StudentCard],
    breakdown: &[TopicSummary],
    totals: OutcomeTotals,
    focus: Option<&StudentFocus<'_>>,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Student Grouping Report");
    let _ = writeln!(output, "Generated for {} ({})", class.name, class.code);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Answer Outcomes");

    if totals.total == 0 {
        let _ = writeln!(output, "No answers recorded for this class.");
    } else {
        let _ = writeln!(
            output,
            "- {} answers: {} correct, {} wrong ({:.1}% error rate)",
            totals.total,
            totals.correct,
            totals.errors,
            totals.errors as f64 * 100.0 / totals.total as f64
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Error Rate by Topic");
    write_topic_lines(&mut output, breakdown);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Group Profiles");

    if report.is_empty() {
        let _ = writeln!(output, "No students with recorded answers to group.");
    } else {
        let _ = writeln!(output, "| Group | {} |", report.topic_labels.join(" | "));
        let _ = writeln!(
            output,
            "|---|{}",
            "---|".repeat(report.topic_labels.len())
        );
        for group in &report.groups {
            let cells: Vec<String> = group
                .percentages
                .iter()
                .map(|p| format!("{p:.2}%"))
                .collect();
            let _ = writeln!(output, "| {} | {} |", group.label, cells.join(" | "));
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students");

    if cards.is_empty() {
        let _ = writeln!(output, "No students enrolled in this class.");
    } else {
        for card in cards {
            let _ = writeln!(
                output,
                "- {} ({}) {} across {} answers, error rate {:.1}%",
                card.name,
                card.email,
                group_label(card.group),
                card.attempts,
                card.error_rate * 100.0
            );
        }
    }

    if let Some(focus) = focus {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Student Detail: {}", focus.card.name);
        let _ = writeln!(output, "- {}", group_label(focus.card.group));
        let _ = writeln!(
            output,
            "- {} answers: {} correct, {} wrong",
            focus.totals.total, focus.totals.correct, focus.totals.errors
        );
        write_topic_lines(&mut output, focus.topics);
    }

    output
}

fn write_topic_lines(output: &mut String, topics: &[TopicSummary]) {
    if topics.is_empty() {
        let _ = writeln!(output, "No topic activity recorded.");
        return;
    }
    for topic in topics {
        let _ = writeln!(
            output,
            "- {}: {} errors in {} answers ({:.2}%)",
            topic.topic_name,
            topic.errors,
            topic.attempts,
            topic.error_rate * 100.0
        );
    }
}

fn group_label(group: Option<usize>) -> String {
    match group {
        Some(g) => format!("group {g}"),
        None => "no group".to_string(),
    }
}

/// Writes `students_<code>.csv` and `groups_<code>.csv` into `dir`.
pub fn export_csv(
    dir: &Path,
    class_code: &str,
    report: &ReportResult,
    cards: &[StudentCard],
) -> anyhow::Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create report directory {}", dir.display()))?;

    let students_path = dir.join(format!("students_{class_code}.csv"));
    let groups_path = dir.join(format!("groups_{class_code}.csv"));

    let mut writer = csv::Writer::from_path(&students_path)
        .with_context(|| format!("failed to open {}", students_path.display()))?;
    let mut header: Vec<String> = ["student_id", "name", "email", "group", "answers", "error_rate"]
        .iter()
        .map(|h| h.to_string())
        .collect();
    header.extend(report.topic_labels.iter().cloned());
    writer.write_record(&header)?;
    for card in cards {
        let mut record = vec![
            card.student_id.to_string(),
            card.name.clone(),
            card.email.clone(),
            card.group.map(|g| g.to_string()).unwrap_or_default(),
            card.attempts.to_string(),
            format!("{:.4}", card.error_rate),
        ];
        // Ungrouped students have no row in the matrix; their topic cells stay blank.
        match report.rates_of(card.student_id) {
            Some(rates) => record.extend(rates.iter().map(|r| format!("{r:.4}"))),
            None => record.extend(report.topic_labels.iter().map(|_| String::new())),
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;

    let mut writer = csv::Writer::from_path(&groups_path)
        .with_context(|| format!("failed to open {}", groups_path.display()))?;
    let mut header = vec!["group".to_string(), "members".to_string()];
    header.extend(report.topic_labels.iter().cloned());
    writer.write_record(&header)?;
    for group in &report.groups {
        let mut record = vec![group.group.to_string(), group.member_count.to_string()];
        record.extend(group.mean_error_rates.iter().map(|r| format!("{r:.4}")));
        writer.write_record(&record)?;
    }
    writer.flush()?;

    info!(
        students = %students_path.display(),
        groups = %groups_path.display(),
        "exported grouping report"
    );
    Ok((students_path, groups_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GroupSeries;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn class() -> ClassInfo {
        ClassInfo {
            id: Uuid::from_u128(1),
            code: "CALC1".to_string(),
            name: "Calculus I".to_string(),
        }
    }

    fn sample() -> (ReportResult, Vec<StudentCard>) {
        let ana = Uuid::from_u128(10);
        let idle = Uuid::from_u128(11);
        let mut assignments = BTreeMap::new();
        assignments.insert(ana, Some(1));
        assignments.insert(idle, None);
        let report = ReportResult {
            k_effective: 1,
            topic_labels: vec!["Factoring".to_string(), "L'Hopital".to_string()],
            groups: vec![GroupSeries {
                group: 1,
                label: "Group 1 (n=1)".to_string(),
                member_count: 1,
                mean_error_rates: vec![0.25, 0.5],
                percentages: vec![25.0, 50.0],
            }],
            assignments,
            student_rates: BTreeMap::from([(ana, vec![0.25, 0.5])]),
        };
        let cards = vec![
            StudentCard {
                student_id: ana,
                name: "Ana".to_string(),
                email: "ana@example.com".to_string(),
                attempts: 8,
                error_rate: 0.375,
                group: Some(1),
            },
            StudentCard {
                student_id: idle,
                name: "Idle".to_string(),
                email: "idle@example.com".to_string(),
                attempts: 0,
                error_rate: 0.0,
                group: None,
            },
        ];
        (report, cards)
    }

    #[test]
    fn report_lists_groups_and_students() {
        let (report, cards) = sample();
        let totals = OutcomeTotals {
            correct: 5,
            errors: 3,
            total: 8,
        };
        let output = build_report(&class(), &report, &cards, &[], totals, None);

        assert!(output.contains("Generated for Calculus I (CALC1)"));
        assert!(output.contains("| Group | Factoring | L'Hopital |"));
        assert!(output.contains("| Group 1 (n=1) | 25.00% | 50.00% |"));
        assert!(output.contains("- Ana (ana@example.com) group 1 across 8 answers"));
        assert!(output.contains("- Idle (idle@example.com) no group"));
        assert!(output.contains("37.5% error rate"));
    }

    #[test]
    fn empty_report_prints_placeholders() {
        let output = build_report(
            &class(),
            &ReportResult::default(),
            &[],
            &[],
            OutcomeTotals::default(),
            None,
        );
        assert!(output.contains("No answers recorded for this class."));
        assert!(output.contains("No students with recorded answers to group."));
        assert!(output.contains("No students enrolled in this class."));
    }

    #[test]
    fn focus_block_is_appended() {
        let (report, cards) = sample();
        let topics = vec![TopicSummary {
            topic_id: Uuid::from_u128(20),
            topic_name: "Factoring".to_string(),
            attempts: 4,
            errors: 1,
            error_rate: 0.25,
        }];
        let focus = StudentFocus {
            card: &cards[0],
            topics: &topics,
            totals: OutcomeTotals {
                correct: 3,
                errors: 1,
                total: 4,
            },
        };
        let output = build_report(
            &class(),
            &report,
            &cards,
            &[],
            OutcomeTotals::default(),
            Some(&focus),
        );
        assert!(output.contains("## Student Detail: Ana"));
        assert!(output.contains("- Factoring: 1 errors in 4 answers (25.00%)"));
    }

    #[test]
    fn export_writes_both_files() {
        let (report, cards) = sample();
        let dir = tempfile::tempdir().unwrap();
        let (students, groups) = export_csv(dir.path(), "CALC1", &report, &cards).unwrap();

        let students = std::fs::read_to_string(students).unwrap();
        let mut lines = students.lines();
        assert_eq!(
            lines.next(),
            Some("student_id,name,email,group,answers,error_rate,Factoring,L'Hopital")
        );
        assert!(students.contains("Ana,ana@example.com,1,8,0.3750,0.2500,0.5000"));
        assert!(students.contains("Idle,idle@example.com,,0,0.0000,,"));

        let groups = std::fs::read_to_string(groups).unwrap();
        assert_eq!(
            groups.lines().collect::<Vec<_>>(),
            vec!["group,members,Factoring,L'Hopital", "1,1,0.2500,0.5000"]
        );
    }

    #[test]
    fn json_view_carries_cards_totals_and_focus() {
        let (report, cards) = sample();
        let topics = vec![TopicSummary {
            topic_id: Uuid::from_u128(20),
            topic_name: "Factoring".to_string(),
            attempts: 4,
            errors: 1,
            error_rate: 0.25,
        }];
        let focus = StudentFocus {
            card: &cards[0],
            topics: &topics,
            totals: OutcomeTotals {
                correct: 3,
                errors: 1,
                total: 4,
            },
        };
        let class = class();
        let view = ClassReportView {
            class: &class,
            report: &report,
            cards: &cards,
            breakdown: &topics,
            totals: OutcomeTotals {
                correct: 5,
                errors: 3,
                total: 8,
            },
            focus: Some(&focus),
        };

        let value: serde_json::Value = serde_json::from_str(&build_json(&view).unwrap()).unwrap();
        assert_eq!(value["class"]["code"], "CALC1");
        assert_eq!(value["cards"].as_array().unwrap().len(), 2);
        assert_eq!(value["cards"][1]["group"], serde_json::Value::Null);
        assert_eq!(value["totals"]["errors"], 3);
        assert_eq!(value["breakdown"][0]["topic_name"], "Factoring");
        assert_eq!(value["focus"]["card"]["name"], "Ana");
        assert_eq!(value["focus"]["totals"]["total"], 4);
        assert_eq!(value["report"]["k_effective"], 1);

        let without_focus = ClassReportView { focus: None, ..view };
        let value: serde_json::Value =
            serde_json::from_str(&build_json(&without_focus).unwrap()).unwrap();
        assert!(value["focus"].is_null());
    }
}
