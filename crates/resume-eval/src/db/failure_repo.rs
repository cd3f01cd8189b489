//! Audit trail of failed attempts.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct FailureRow {
    pub id: i64,
    pub candidate_id: String,
    pub attempt: u32,
    pub stage: String,
    pub cause: String,
    pub retryable: bool,
    pub terminal: bool,
    pub created_at: String,
}

impl FailureRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            candidate_id: row.get("candidate_id")?,
            attempt: row.get("attempt")?,
            stage: row.get("stage")?,
            cause: row.get("cause")?,
            retryable: row.get("retryable")?,
            terminal: row.get("terminal")?,
            created_at: row.get("created_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewFailure<'a> {
    pub candidate_id: &'a str,
    pub attempt: u32,
    pub stage: &'a str,
    pub cause: &'a str,
    pub retryable: bool,
    pub terminal: bool,
    pub created_at: &'a str,
}

pub fn insert(db: &Database, failure: &NewFailure<'_>) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO candidate_failures
             (candidate_id, attempt, stage, cause, retryable, terminal, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                failure.candidate_id,
                failure.attempt,
                failure.stage,
                failure.cause,
                failure.retryable,
                failure.terminal,
                failure.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Failures for one candidate, oldest first.
pub fn list_for_candidate(
    db: &Database,
    candidate_id: &str,
) -> Result<Vec<FailureRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM candidate_failures WHERE candidate_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![candidate_id], FailureRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
