use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

mod analysis;
mod clustering;
mod config;
mod db;
mod error;
mod grouping;
mod logging;
mod models;
mod report;

use config::Config;
use grouping::GroupingReportBuilder;
use models::{ClassInfo, InteractionTable, ReportResult, Student, Topic};

const MAX_REQUESTED_GROUPS: usize = 10;

#[derive(Parser)]
#[command(name = "limit-practice-grouping")]
#[command(about = "Groups students by per-topic error rate on limit exercises", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo class with answers
    Seed,
    /// Import answer events from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Group a class and render the report
    Analyze {
        #[arg(long = "class")]
        class_code: String,
        /// Requested group count (clamped to 1..=10)
        #[arg(long)]
        k: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        /// Email of a student to show in detail
        #[arg(long)]
        student: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write per-student and per-group CSV files for a class
    Export {
        #[arg(long = "class")]
        class_code: String,
        #[arg(long)]
        k: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value = "reports")]
        dir: PathBuf,
    },
}

struct ClassData {
    class: ClassInfo,
    students: Vec<Student>,
    topics: Vec<Topic>,
    interactions: InteractionTable,
}

async fn load_class(pool: &PgPool, code: &str) -> anyhow::Result<ClassData> {
    let class = db::fetch_class(pool, code).await?;
    let students = db::fetch_class_students(pool, class.id).await?;
    let topics = db::fetch_class_topics(pool, class.id).await?;
    let interactions = db::fetch_interaction_counts(pool, class.id).await?;
    Ok(ClassData {
        class,
        students,
        topics,
        interactions,
    })
}

fn group_class(config: &Config, data: &ClassData, k: Option<usize>, seed: Option<u64>) -> ReportResult {
    let k = k
        .unwrap_or(config.grouping.default_k)
        .clamp(1, MAX_REQUESTED_GROUPS);
    let seed = seed.unwrap_or(config.grouping.seed);
    let result = GroupingReportBuilder::new()
        .with_max_iterations(config.grouping.max_iterations)
        .build(&data.students, &data.topics, &data.interactions, k, seed);
    info!(
        class = %data.class.code,
        enrolled = data.students.len(),
        grouped = result.active_count(),
        groups = result.groups.len(),
        seed,
        "class grouped"
    );
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    logging::init_tracing(&config.log_level);

    let database_url = config::database_url()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    info!(max_connections = config.db_max_connections, "connected to Postgres");

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} answers from {}.", csv.display());
        }
        Commands::Analyze {
            class_code,
            k,
            seed,
            student,
            format,
            out,
        } => {
            let data = load_class(&pool, &class_code).await?;
            let result = group_class(&config, &data, k, seed);

            let cards = analysis::student_cards(&data.students, &data.interactions, &result);
            let breakdown = analysis::topic_breakdown(&data.topics, &data.interactions, None);
            let totals = analysis::outcome_totals(&data.interactions, None);

            let selected = student.as_deref().and_then(|email| {
                let card = cards.iter().find(|c| c.email.eq_ignore_ascii_case(email));
                if card.is_none() {
                    warn!(%email, class = %class_code, "student is not enrolled in this class");
                }
                card
            });
            let focus_topics = selected
                .map(|card| {
                    analysis::student_topic_matrix(&data.topics, &data.interactions, card.student_id)
                })
                .unwrap_or_default();
            let focus = selected.map(|card| report::StudentFocus {
                card,
                topics: &focus_topics,
                totals: analysis::outcome_totals(&data.interactions, Some(card.student_id)),
            });

            let rendered = match format {
                OutputFormat::Json => report::build_json(&report::ClassReportView {
                    class: &data.class,
                    report: &result,
                    cards: &cards,
                    breakdown: &breakdown,
                    totals,
                    focus: focus.as_ref(),
                })?,
                OutputFormat::Markdown => report::build_report(
                    &data.class,
                    &result,
                    &cards,
                    &breakdown,
                    totals,
                    focus.as_ref(),
                ),
            };

            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Report written to {}.", path.display());
                }
                None => println!("{rendered}"),
            }
        }
        Commands::Export {
            class_code,
            k,
            seed,
            dir,
        } => {
            let data = load_class(&pool, &class_code).await?;
            let result = group_class(&config, &data, k, seed);
            let cards = analysis::student_cards(&data.students, &data.interactions, &result);
            let (students_path, groups_path) =
                report::export_csv(&dir, &data.class.code, &result, &cards)?;
            println!(
                "Wrote {} and {}.",
                students_path.display(),
                groups_path.display()
            );
        }
    }

    Ok(())
}
