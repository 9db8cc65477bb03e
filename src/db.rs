use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::checked_count;
use crate::models::{ClassInfo, InteractionCounts, InteractionTable, Student, Topic};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn upsert_student(pool: &PgPool, name: &str, email: &str) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO limit_practice.students (id, full_name, email)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO UPDATE SET full_name = EXCLUDED.full_name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(email)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_class(pool: &PgPool, code: &str, name: &str) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO limit_practice.classes (id, code, name)
        VALUES ($1, $2, $3)
        ON CONFLICT (code) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(code)
    .bind(name)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_topic(pool: &PgPool, name: &str) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO limit_practice.topics (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn enroll(pool: &PgPool, class_id: Uuid, student_id: Uuid) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO limit_practice.enrollments (class_id, student_id, role)
        VALUES ($1, $2, 'student')
        ON CONFLICT (class_id, student_id) DO NOTHING
        "#,
    )
    .bind(class_id)
    .bind(student_id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn insert_interaction(
    pool: &PgPool,
    student_id: Uuid,
    class_id: Uuid,
    topic_id: Uuid,
    correct: bool,
    occurred_at: DateTime<Utc>,
    source_key: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO limit_practice.interactions
        (id, student_id, class_id, topic_id, correct, occurred_at, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(class_id)
    .bind(topic_id)
    .bind(correct)
    .bind(occurred_at)
    .bind(source_key)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let class_id = upsert_class(pool, "CALC1", "Calculus I - Limits").await?;

    let topics = [
        "Factoring",
        "Rationalization",
        "L'Hôpital",
        "Division by Highest Power",
        "Fundamental Trigonometric Limit",
        "Direct Substitution",
    ];
    let mut topic_ids = Vec::with_capacity(topics.len());
    for name in topics {
        topic_ids.push(upsert_topic(pool, name).await?);
    }

    // (name, email, wrong answers out of four per topic); None = enrolled, no answers yet
    let students: [(&str, &str, Option<[u32; 6]>); 5] = [
        ("Avery Lee", "avery.lee@example.edu", Some([0, 1, 0, 1, 0, 0])),
        ("Jules Moreno", "jules.moreno@example.edu", Some([3, 4, 2, 3, 4, 1])),
        ("Kiara Patel", "kiara.patel@example.edu", Some([1, 0, 3, 4, 3, 0])),
        ("Noah Silva", "noah.silva@example.edu", Some([4, 3, 3, 4, 2, 1])),
        ("Mina Costa", "mina.costa@example.edu", None),
    ];

    let base = Utc::now() - Duration::days(14);
    for (name, email, wrong) in students {
        let student_id = upsert_student(pool, name, email).await?;
        enroll(pool, class_id, student_id).await?;

        let Some(wrong) = wrong else {
            continue;
        };

        for (topic_index, (topic_id, wrong_count)) in topic_ids.iter().zip(wrong).enumerate() {
            for attempt in 0..4u32 {
                let key = format!("seed-{email}-{topic_index}-{attempt}");
                let occurred_at = base + Duration::hours(i64::from(attempt) + topic_index as i64);
                insert_interaction(
                    pool,
                    student_id,
                    class_id,
                    *topic_id,
                    attempt >= wrong_count,
                    occurred_at,
                    &key,
                )
                .await?;
            }
        }
    }

    info!(class = "CALC1", "seed data ready");
    Ok(())
}

pub async fn fetch_class(pool: &PgPool, code: &str) -> anyhow::Result<ClassInfo> {
    let row = sqlx::query("SELECT id, code, name FROM limit_practice.classes WHERE code = $1")
        .bind(code)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("no class with code {code}"))?;

    Ok(ClassInfo {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
    })
}

pub async fn fetch_class_students(pool: &PgPool, class_id: Uuid) -> anyhow::Result<Vec<Student>> {
    let rows = sqlx::query(
        r#"
        SELECT s.id, s.full_name, s.email
        FROM limit_practice.enrollments e
        JOIN limit_practice.students s ON s.id = e.student_id
        WHERE e.class_id = $1 AND e.role = 'student'
        ORDER BY s.full_name ASC
        "#,
    )
    .bind(class_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| Student {
            id: row.get("id"),
            name: row.get("full_name"),
            email: row.get("email"),
        })
        .collect())
}

/// Topics answered in a class, in no particular order; report code sorts them.
pub async fn fetch_class_topics(pool: &PgPool, class_id: Uuid) -> anyhow::Result<Vec<Topic>> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT t.id, t.name
        FROM limit_practice.interactions i
        JOIN limit_practice.topics t ON t.id = i.topic_id
        WHERE i.class_id = $1
        "#,
    )
    .bind(class_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| Topic {
            id: row.get("id"),
            name: row.get("name"),
        })
        .collect())
}

/// Aggregated (student, topic) answer counts for enrolled students of a class.
pub async fn fetch_interaction_counts(
    pool: &PgPool,
    class_id: Uuid,
) -> anyhow::Result<InteractionTable> {
    let rows = sqlx::query(
        r#"
        SELECT i.student_id,
               i.topic_id,
               COUNT(*)::BIGINT AS attempts,
               COALESCE(SUM(CASE WHEN i.correct THEN 0 ELSE 1 END), 0)::BIGINT AS errors
        FROM limit_practice.interactions i
        JOIN limit_practice.enrollments e
          ON e.class_id = i.class_id AND e.student_id = i.student_id AND e.role = 'student'
        WHERE i.class_id = $1
        GROUP BY i.student_id, i.topic_id
        "#,
    )
    .bind(class_id)
    .fetch_all(pool)
    .await?;

    let mut table = InteractionTable::with_capacity(rows.len());
    for row in rows {
        let student_id: Uuid = row.get("student_id");
        let topic_id: Uuid = row.get("topic_id");
        let attempts = checked_count("attempts", row.get("attempts"))?;
        let errors = checked_count("errors", row.get("errors"))?;
        let counts = InteractionCounts::new(attempts, errors)
            .with_context(|| format!("bad aggregate for student {student_id}, topic {topic_id}"))?;
        table.insert((student_id, topic_id), counts);
    }

    debug!(%class_id, cells = table.len(), "fetched interaction counts");
    Ok(table)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        email: String,
        class_code: String,
        class_name: String,
        topic: String,
        correct: bool,
        occurred_at: DateTime<Utc>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV record {}", line + 1))?;
        let student_id = upsert_student(pool, &row.full_name, &row.email).await?;
        let class_id = upsert_class(pool, &row.class_code, &row.class_name).await?;
        let topic_id = upsert_topic(pool, &row.topic).await?;
        enroll(pool, class_id, student_id).await?;

        let source_key = row
            .source_key
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        if insert_interaction(
            pool,
            student_id,
            class_id,
            topic_id,
            row.correct,
            row.occurred_at,
            &source_key,
        )
        .await?
        {
            inserted += 1;
        } else {
            debug!(%source_key, "skipping duplicate interaction");
        }
    }

    info!(inserted, path = %csv_path.display(), "imported interactions");
    Ok(inserted)
}
