use anyhow::Context;
use chrono::{NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::affinity::{HistoryDay, HistoryPayload};
use crate::models::{
    ClosingPartyResult, DailyAssignment, Gender, Participant, SubmissionRecord, SubmissionStatus,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("CREATE SCHEMA IF NOT EXISTS reading_club")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reading_club.participants (
            id UUID PRIMARY KEY,
            full_name TEXT NOT NULL,
            gender TEXT NOT NULL,
            cohort TEXT NOT NULL,
            absent BOOLEAN NOT NULL DEFAULT FALSE,
            UNIQUE (cohort, full_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reading_club.reading_submissions (
            id UUID PRIMARY KEY,
            participant_id UUID NOT NULL REFERENCES reading_club.participants (id),
            cohort TEXT NOT NULL,
            submitted_on DATE NOT NULL,
            status TEXT NOT NULL,
            source_key TEXT UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reading_club.daily_assignments (
            cohort TEXT NOT NULL,
            assigned_on DATE NOT NULL,
            payload JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (cohort, assigned_on)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reading_club.daily_assignment_backups (
            id UUID PRIMARY KEY,
            cohort TEXT NOT NULL,
            assigned_on DATE NOT NULL,
            payload JSONB NOT NULL,
            replaced_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reading_club.closing_party (
            cohort TEXT PRIMARY KEY,
            groups JSONB NOT NULL,
            formed_at TIMESTAMPTZ NOT NULL,
            total_participants INT NOT NULL,
            version BIGINT NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let participants = vec![
        ("7f3c1b2a-6d4e-4f5a-8b9c-0d1e2f3a4b5c", "Mina Park", "female"),
        ("2a9d8c7b-5e4f-4a3b-9c8d-7e6f5a4b3c2d", "Jiho Kim", "male"),
        ("9c8b7a6d-4e3f-4c5b-8a9d-6f5e4d3c2b1a", "Sena Lee", "female"),
        ("4b5c6d7e-8f9a-4b3c-9d8e-5f4a3b2c1d0e", "Dokyun Choi", "male"),
        ("1d2e3f4a-5b6c-4d7e-8f9a-0b1c2d3e4f5a", "Hana Yoon", "female"),
        ("6e7f8a9b-0c1d-4e2f-9a8b-3c4d5e6f7a8b", "Taeyang Jung", "male"),
        ("3f4a5b6c-7d8e-4f9a-8b0c-1d2e3f4a5b6c", "Ara Song", "female"),
        ("8a9b0c1d-2e3f-4a5b-9c6d-7e8f9a0b1c2d", "Woojin Kang", "male"),
    ];

    for (id, name, gender) in participants {
        sqlx::query(
            r#"
            INSERT INTO reading_club.participants (id, full_name, gender, cohort)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (cohort, full_name) DO UPDATE
            SET gender = EXCLUDED.gender
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(name)
        .bind(gender)
        .bind("2026-1")
        .execute(pool)
        .await?;
    }

    let submissions = vec![
        ("seed-001", "Mina Park", 2, "approved"),
        ("seed-002", "Mina Park", 3, "approved"),
        ("seed-003", "Jiho Kim", 2, "approved"),
        ("seed-004", "Sena Lee", 3, "approved"),
        ("seed-005", "Dokyun Choi", 3, "pending"),
        ("seed-006", "Hana Yoon", 3, "approved"),
        ("seed-007", "Taeyang Jung", 2, "rejected"),
        ("seed-008", "Ara Song", 3, "approved"),
        ("seed-009", "Woojin Kang", 3, "approved"),
    ];

    for (source_key, name, day, status) in submissions {
        let participant_id: Uuid = sqlx::query(
            "SELECT id FROM reading_club.participants WHERE cohort = $1 AND full_name = $2",
        )
        .bind("2026-1")
        .bind(name)
        .fetch_one(pool)
        .await?
        .get("id");

        sqlx::query(
            r#"
            INSERT INTO reading_club.reading_submissions
            (id, participant_id, cohort, submitted_on, status, source_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(participant_id)
        .bind("2026-1")
        .bind(NaiveDate::from_ymd_opt(2026, 3, day).context("invalid date")?)
        .bind(status)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    Ok(())
}

fn parse_gender(value: &str) -> anyhow::Result<Gender> {
    match value {
        "male" => Ok(Gender::Male),
        "female" => Ok(Gender::Female),
        "other" => Ok(Gender::Other),
        unknown => anyhow::bail!("unknown gender value: {unknown}"),
    }
}

fn parse_status(value: &str) -> anyhow::Result<SubmissionStatus> {
    match value {
        "approved" => Ok(SubmissionStatus::Approved),
        "pending" => Ok(SubmissionStatus::Pending),
        "rejected" => Ok(SubmissionStatus::Rejected),
        unknown => anyhow::bail!("unknown submission status: {unknown}"),
    }
}

pub async fn fetch_participants(pool: &PgPool, cohort: &str) -> anyhow::Result<Vec<Participant>> {
    let rows = sqlx::query(
        "SELECT id, full_name, gender, cohort, absent \
         FROM reading_club.participants WHERE cohort = $1 ORDER BY id",
    )
    .bind(cohort)
    .fetch_all(pool)
    .await?;

    let mut participants = Vec::new();
    for row in rows {
        let gender: String = row.get("gender");
        participants.push(Participant {
            id: row.get("id"),
            name: row.get("full_name"),
            gender: parse_gender(&gender)?,
            cohort: row.get("cohort"),
            absent: row.get("absent"),
        });
    }

    Ok(participants)
}

pub async fn fetch_submissions(
    pool: &PgPool,
    cohort: &str,
) -> anyhow::Result<Vec<SubmissionRecord>> {
    let rows = sqlx::query(
        "SELECT participant_id, cohort, submitted_on, status \
         FROM reading_club.reading_submissions WHERE cohort = $1",
    )
    .bind(cohort)
    .fetch_all(pool)
    .await?;

    let mut records = Vec::new();
    for row in rows {
        let status: String = row.get("status");
        records.push(SubmissionRecord {
            participant_id: row.get("participant_id"),
            cohort: row.get("cohort"),
            submitted_on: row.get("submitted_on"),
            status: parse_status(&status)?,
        });
    }

    Ok(records)
}

pub async fn fetch_history(pool: &PgPool, cohort: &str) -> anyhow::Result<Vec<HistoryDay>> {
    let rows = sqlx::query(
        "SELECT assigned_on, payload FROM reading_club.daily_assignments \
         WHERE cohort = $1 ORDER BY assigned_on",
    )
    .bind(cohort)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let date: NaiveDate = row.get("assigned_on");
            let payload: serde_json::Value = row.get("payload");
            let payload: HistoryPayload = serde_json::from_value(payload)
                .with_context(|| format!("malformed assignment payload for {date}"))?;
            Ok(HistoryDay { date, payload })
        })
        .collect()
}

/// History rows inside the recency lookback window, i.e. the `lookback_days`
/// days strictly before `date`.
pub async fn fetch_history_window(
    pool: &PgPool,
    cohort: &str,
    date: NaiveDate,
    lookback_days: i64,
) -> anyhow::Result<Vec<HistoryDay>> {
    let window_start = date - chrono::Duration::days(lookback_days.max(0));
    let rows = sqlx::query(
        "SELECT assigned_on, payload FROM reading_club.daily_assignments \
         WHERE cohort = $1 AND assigned_on >= $2 AND assigned_on < $3 \
         ORDER BY assigned_on",
    )
    .bind(cohort)
    .bind(window_start)
    .bind(date)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let date: NaiveDate = row.get("assigned_on");
            let payload: serde_json::Value = row.get("payload");
            let payload: HistoryPayload = serde_json::from_value(payload)
                .with_context(|| format!("malformed assignment payload for {date}"))?;
            Ok(HistoryDay { date, payload })
        })
        .collect()
}

/// Commits one day's allocation atomically. An existing row blocks the write
/// unless `force` is set, in which case the prior payload is copied into the
/// backup table inside the same transaction before the overwrite.
pub async fn store_daily_assignment(
    pool: &PgPool,
    batch: &DailyAssignment,
    force: bool,
) -> anyhow::Result<()> {
    let payload = serde_json::to_value(batch)?;
    let mut tx = pool.begin().await?;

    let existing = sqlx::query(
        "SELECT payload FROM reading_club.daily_assignments \
         WHERE cohort = $1 AND assigned_on = $2 FOR UPDATE",
    )
    .bind(&batch.cohort)
    .bind(batch.date)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(row) = existing {
        if !force {
            anyhow::bail!(
                "assignment for cohort {} on {} already exists; use --force to regenerate",
                batch.cohort,
                batch.date
            );
        }

        let prior: serde_json::Value = row.get("payload");
        sqlx::query(
            r#"
            INSERT INTO reading_club.daily_assignment_backups
            (id, cohort, assigned_on, payload, replaced_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&batch.cohort)
        .bind(batch.date)
        .bind(prior)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO reading_club.daily_assignments (cohort, assigned_on, payload)
        VALUES ($1, $2, $3)
        ON CONFLICT (cohort, assigned_on) DO UPDATE
        SET payload = EXCLUDED.payload, created_at = NOW()
        "#,
    )
    .bind(&batch.cohort)
    .bind(batch.date)
    .bind(payload)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn fetch_closing_party(
    pool: &PgPool,
    cohort: &str,
) -> anyhow::Result<Option<(ClosingPartyResult, i64)>> {
    let row = sqlx::query(
        "SELECT groups, formed_at, total_participants, version \
         FROM reading_club.closing_party WHERE cohort = $1",
    )
    .bind(cohort)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let groups: serde_json::Value = row.get("groups");
    let total: i32 = row.get("total_participants");
    let result = ClosingPartyResult {
        cohort: cohort.to_string(),
        groups: serde_json::from_value(groups).context("malformed closing party groups")?,
        formed_at: row.get("formed_at"),
        total_participants: total as usize,
    };

    Ok(Some((result, row.get("version"))))
}

/// Full replace of the closing-party record (regeneration path). The version
/// counter still advances so concurrent manual moves notice the overwrite.
pub async fn store_closing_party(pool: &PgPool, result: &ClosingPartyResult) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO reading_club.closing_party
        (cohort, groups, formed_at, total_participants, version)
        VALUES ($1, $2, $3, $4, 0)
        ON CONFLICT (cohort) DO UPDATE
        SET groups = EXCLUDED.groups,
            formed_at = EXCLUDED.formed_at,
            total_participants = EXCLUDED.total_participants,
            version = reading_club.closing_party.version + 1
        "#,
    )
    .bind(&result.cohort)
    .bind(serde_json::to_value(&result.groups)?)
    .bind(result.formed_at)
    .bind(result.total_participants as i32)
    .execute(pool)
    .await?;

    Ok(())
}

/// Optimistic write for manual moves: succeeds only if the stored version
/// still matches the one read. Returns false on a version conflict.
pub async fn update_closing_party_versioned(
    pool: &PgPool,
    result: &ClosingPartyResult,
    expected_version: i64,
) -> anyhow::Result<bool> {
    let outcome = sqlx::query(
        r#"
        UPDATE reading_club.closing_party
        SET groups = $2, formed_at = $3, total_participants = $4, version = version + 1
        WHERE cohort = $1 AND version = $5
        "#,
    )
    .bind(&result.cohort)
    .bind(serde_json::to_value(&result.groups)?)
    .bind(result.formed_at)
    .bind(result.total_participants as i32)
    .bind(expected_version)
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected() == 1)
}

pub async fn import_participants(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        gender: String,
        cohort: String,
        absent: Option<bool>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut imported = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        parse_gender(&row.gender)?;

        sqlx::query(
            r#"
            INSERT INTO reading_club.participants (id, full_name, gender, cohort, absent)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (cohort, full_name) DO UPDATE
            SET gender = EXCLUDED.gender, absent = EXCLUDED.absent
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.full_name)
        .bind(&row.gender)
        .bind(&row.cohort)
        .bind(row.absent.unwrap_or(false))
        .execute(pool)
        .await?;

        imported += 1;
    }

    Ok(imported)
}

pub async fn import_submissions(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        cohort: String,
        submitted_on: NaiveDate,
        status: String,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        parse_status(&row.status)?;

        let participant_id: Uuid = sqlx::query(
            "SELECT id FROM reading_club.participants WHERE cohort = $1 AND full_name = $2",
        )
        .bind(&row.cohort)
        .bind(&row.full_name)
        .fetch_one(pool)
        .await
        .with_context(|| format!("unknown participant {} in cohort {}", row.full_name, row.cohort))?
        .get("id");

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let outcome = sqlx::query(
            r#"
            INSERT INTO reading_club.reading_submissions
            (id, participant_id, cohort, submitted_on, status, source_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(participant_id)
        .bind(&row.cohort)
        .bind(row.submitted_on)
        .bind(&row.status)
        .bind(source_key)
        .execute(pool)
        .await?;

        if outcome.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}
