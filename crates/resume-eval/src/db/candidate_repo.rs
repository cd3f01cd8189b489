//! Candidate repository: rows of the `candidates` table.
//!
//! Status-changing writes take the set of statuses they may leave from and
//! return the number of rows changed, so a transition that is not allowed
//! for the row's current status is a no-op the caller can detect.

use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRow {
    pub id: String,
    pub original_filename: String,
    pub stored_path: String,
    pub status: String,
    pub attempt_count: u32,
    pub raw_text: Option<String>,
    pub structured_json: Option<String>,
    pub fit_score: Option<f64>,
    pub recommendation: Option<String>,
    pub summary_text: Option<String>,
    pub evaluation_details: Option<String>,
    pub extraction_method: Option<String>,
    pub model_used: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl CandidateRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            original_filename: row.get("original_filename")?,
            stored_path: row.get("stored_path")?,
            status: row.get("status")?,
            attempt_count: row.get("attempt_count")?,
            raw_text: row.get("raw_text")?,
            structured_json: row.get("structured_json")?,
            fit_score: row.get("fit_score")?,
            recommendation: row.get("recommendation")?,
            summary_text: row.get("summary_text")?,
            evaluation_details: row.get("evaluation_details")?,
            extraction_method: row.get("extraction_method")?,
            model_used: row.get("model_used")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Result columns written together with the `DONE` status.
#[derive(Debug, Clone)]
pub struct CompletionRow {
    pub raw_text: String,
    pub structured_json: String,
    pub fit_score: f64,
    pub recommendation: String,
    pub summary_text: String,
    pub evaluation_details: String,
    pub extraction_method: String,
    pub model_used: String,
}

#[derive(Debug, Default, Clone)]
pub struct CandidateFilter {
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Outcome of trying to start an attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptClaim {
    /// Status is now `PROCESSING` and the attempt counter was incremented.
    Claimed(CandidateRow),
    /// The attempt limit was already reached; nothing was changed.
    Exhausted(CandidateRow),
    /// The row's status does not allow a new attempt; nothing was changed.
    NotClaimable(CandidateRow),
    NotFound,
}

/// `?{start}, ?{start+1}, ...` for a dynamic `IN (...)` list.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn map_write_error(e: rusqlite::Error) -> DatabaseError {
    match e {
        rusqlite::Error::SqliteFailure(err, message)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DatabaseError::Constraint(message.unwrap_or_else(|| err.to_string()))
        }
        other => DatabaseError::Sqlite(other),
    }
}

pub fn insert(db: &Database, candidate: &CandidateRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO candidates (id, original_filename, stored_path, status, attempt_count,
             raw_text, structured_json, fit_score, recommendation, summary_text,
             evaluation_details, extraction_method, model_used, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                candidate.id,
                candidate.original_filename,
                candidate.stored_path,
                candidate.status,
                candidate.attempt_count,
                candidate.raw_text,
                candidate.structured_json,
                candidate.fit_score,
                candidate.recommendation,
                candidate.summary_text,
                candidate.evaluation_details,
                candidate.extraction_method,
                candidate.model_used,
                candidate.created_at,
                candidate.updated_at,
            ],
        )
        .map_err(map_write_error)?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<CandidateRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM candidates WHERE id = ?1",
                params![id],
                CandidateRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists candidates newest first, returning (rows, total_count).
pub fn query(
    db: &Database,
    filter: &CandidateFilter,
) -> Result<(Vec<CandidateRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let (where_clause, mut param_values): (String, Vec<Box<dyn rusqlite::types::ToSql>>) =
            match &filter.status {
                Some(status) => ("WHERE status = ?1".to_string(), vec![Box::new(status.clone())]),
                None => (String::new(), Vec::new()),
            };

        let count_sql = format!("SELECT COUNT(*) FROM candidates {}", where_clause);
        let total: u64 = conn.query_row(
            &count_sql,
            params_from_iter(param_values.iter().map(|p| p.as_ref())),
            |r| r.get(0),
        )?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM candidates {} ORDER BY created_at DESC, id LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let mut stmt = conn.prepare(&query_sql)?;
        let rows = stmt
            .query_map(
                params_from_iter(param_values.iter().map(|p| p.as_ref())),
                CandidateRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM candidates WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Ids of candidates in any of `statuses`, oldest first.
pub fn ids_with_status(db: &Database, statuses: &[&str]) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT id FROM candidates WHERE status IN ({}) ORDER BY created_at ASC, id",
            placeholders(1, statuses.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(statuses.iter()), |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    })
}

/// Moves the row to `PROCESSING` and bumps `attempt_count`, in one
/// transaction, unless the status or the attempt limit forbids it.
pub fn begin_attempt(
    db: &Database,
    id: &str,
    from_statuses: &[&str],
    max_attempts: u32,
    now: &str,
) -> Result<AttemptClaim, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;

        let current = tx
            .query_row(
                "SELECT * FROM candidates WHERE id = ?1",
                params![id],
                CandidateRow::from_row,
            )
            .optional()?;

        let claim = match current {
            None => AttemptClaim::NotFound,
            Some(row) if !from_statuses.contains(&row.status.as_str()) => {
                AttemptClaim::NotClaimable(row)
            }
            Some(row) if row.attempt_count >= max_attempts => AttemptClaim::Exhausted(row),
            Some(_) => {
                tx.execute(
                    "UPDATE candidates SET status = 'PROCESSING',
                     attempt_count = attempt_count + 1, updated_at = ?2
                     WHERE id = ?1",
                    params![id, now],
                )
                .map_err(map_write_error)?;
                let row = tx.query_row(
                    "SELECT * FROM candidates WHERE id = ?1",
                    params![id],
                    CandidateRow::from_row,
                )?;
                AttemptClaim::Claimed(row)
            }
        };

        tx.commit()?;
        Ok(claim)
    })
}

/// Writes every result column and `DONE` in a single statement. Only the
/// attempt numbered `attempt` may commit; a superseded one changes nothing.
pub fn complete(
    db: &Database,
    id: &str,
    attempt: u32,
    completion: &CompletionRow,
    from_statuses: &[&str],
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE candidates SET status = 'DONE', raw_text = ?4, structured_json = ?5,
             fit_score = ?6, recommendation = ?7, summary_text = ?8,
             evaluation_details = ?9, extraction_method = ?10, model_used = ?11,
             updated_at = ?2
             WHERE id = ?1 AND attempt_count = ?3 AND status IN ({})",
            placeholders(12, from_statuses.len())
        );
        let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![
            &id,
            &now,
            &attempt,
            &completion.raw_text,
            &completion.structured_json,
            &completion.fit_score,
            &completion.recommendation,
            &completion.summary_text,
            &completion.evaluation_details,
            &completion.extraction_method,
            &completion.model_used,
        ];
        values.extend(from_statuses.iter().map(|s| s as &dyn rusqlite::types::ToSql));

        let changed = conn
            .execute(&sql, params_from_iter(values))
            .map_err(map_write_error)?;
        Ok(changed)
    })
}

/// Sets `FAILED` and clears any result columns, if attempt `attempt` still
/// owns the row.
pub fn fail(
    db: &Database,
    id: &str,
    attempt: u32,
    from_statuses: &[&str],
    now: &str,
) -> Result<usize, DatabaseError> {
    clear_results_and_set(db, id, "FAILED", Some(attempt), from_statuses, now)
}

/// Back to `PENDING` with a fresh attempt budget and no results.
pub fn reset(
    db: &Database,
    id: &str,
    from_statuses: &[&str],
    now: &str,
) -> Result<usize, DatabaseError> {
    clear_results_and_set(db, id, "PENDING", None, from_statuses, now)
}

/// With `owner` set, the row keeps its attempt counter and is only changed
/// while `attempt_count` equals it. Without, the counter is reset to 0.
fn clear_results_and_set(
    db: &Database,
    id: &str,
    status: &str,
    owner: Option<u32>,
    from_statuses: &[&str],
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let (attempts, owner_clause) = match owner {
            Some(_) => ("attempt_count", "AND attempt_count = ?4"),
            None => ("0", "AND ?4 IS NULL"),
        };
        let sql = format!(
            "UPDATE candidates SET status = ?3, attempt_count = {}, raw_text = NULL,
             structured_json = NULL, fit_score = NULL, recommendation = NULL,
             summary_text = NULL, evaluation_details = NULL,
             extraction_method = NULL, model_used = NULL,
             updated_at = ?2
             WHERE id = ?1 {} AND status IN ({})",
            attempts,
            owner_clause,
            placeholders(5, from_statuses.len())
        );
        let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![&id, &now, &status, &owner];
        values.extend(from_statuses.iter().map(|s| s as &dyn rusqlite::types::ToSql));

        let changed = conn
            .execute(&sql, params_from_iter(values))
            .map_err(map_write_error)?;
        Ok(changed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample(id: &str) -> CandidateRow {
        CandidateRow {
            id: id.to_string(),
            original_filename: "resume.pdf".to_string(),
            stored_path: format!("/data/candidates/{}/resume.pdf", id),
            status: "PENDING".to_string(),
            attempt_count: 0,
            raw_text: None,
            structured_json: None,
            fit_score: None,
            recommendation: None,
            summary_text: None,
            evaluation_details: None,
            extraction_method: None,
            model_used: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn completion() -> CompletionRow {
        CompletionRow {
            raw_text: "John Doe".to_string(),
            structured_json: r#"{"name":"John Doe","skills":[]}"#.to_string(),
            fit_score: 8.5,
            recommendation: "Interview".to_string(),
            summary_text: "Strong backend profile".to_string(),
            evaluation_details: r#"{"strengths":["Rust"],"weaknesses":[]}"#.to_string(),
            extraction_method: "text_layer".to_string(),
            model_used: "gpt-4o-mini".to_string(),
        }
    }

    const CLAIMABLE: &[&str] = &["PENDING", "PROCESSING"];

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        insert(&db, &sample("c-1")).unwrap();

        let found = find_by_id(&db, "c-1").unwrap().unwrap();
        assert_eq!(found, sample("c-1"));
        assert!(find_by_id(&db, "missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_insert_is_constraint_error() {
        let db = test_db();
        insert(&db, &sample("dup")).unwrap();
        match insert(&db, &sample("dup")) {
            Err(DatabaseError::Constraint(_)) => {}
            other => panic!("Expected Constraint error, got {:?}", other),
        }
    }

    #[test]
    fn test_begin_attempt_increments() {
        let db = test_db();
        insert(&db, &sample("a")).unwrap();

        let claim = begin_attempt(&db, "a", CLAIMABLE, 3, "2026-01-01T00:01:00Z").unwrap();
        match claim {
            AttemptClaim::Claimed(row) => {
                assert_eq!(row.status, "PROCESSING");
                assert_eq!(row.attempt_count, 1);
                assert_eq!(row.updated_at, "2026-01-01T00:01:00Z");
            }
            other => panic!("Expected Claimed, got {:?}", other),
        }

        let claim = begin_attempt(&db, "a", CLAIMABLE, 3, "2026-01-01T00:02:00Z").unwrap();
        assert!(matches!(claim, AttemptClaim::Claimed(ref r) if r.attempt_count == 2));
    }

    #[test]
    fn test_begin_attempt_respects_limit() {
        let db = test_db();
        insert(&db, &sample("lim")).unwrap();
        for _ in 0..2 {
            begin_attempt(&db, "lim", CLAIMABLE, 2, "t").unwrap();
        }

        match begin_attempt(&db, "lim", CLAIMABLE, 2, "t").unwrap() {
            AttemptClaim::Exhausted(row) => assert_eq!(row.attempt_count, 2),
            other => panic!("Expected Exhausted, got {:?}", other),
        }
    }

    #[test]
    fn test_begin_attempt_not_claimable_or_missing() {
        let db = test_db();
        insert(&db, &sample("t")).unwrap();
        begin_attempt(&db, "t", CLAIMABLE, 3, "t").unwrap();
        fail(&db, "t", 1, &["PROCESSING"], "t").unwrap();

        assert!(matches!(
            begin_attempt(&db, "t", CLAIMABLE, 3, "t").unwrap(),
            AttemptClaim::NotClaimable(ref r) if r.status == "FAILED"
        ));
        assert_eq!(
            begin_attempt(&db, "nope", CLAIMABLE, 3, "t").unwrap(),
            AttemptClaim::NotFound
        );
    }

    #[test]
    fn test_complete_writes_all_fields() {
        let db = test_db();
        insert(&db, &sample("d")).unwrap();
        begin_attempt(&db, "d", CLAIMABLE, 3, "t1").unwrap();

        let changed = complete(&db, "d", 1, &completion(), &["PROCESSING", "DONE"], "t2").unwrap();
        assert_eq!(changed, 1);

        let row = find_by_id(&db, "d").unwrap().unwrap();
        assert_eq!(row.status, "DONE");
        assert_eq!(row.fit_score, Some(8.5));
        assert_eq!(row.recommendation.as_deref(), Some("Interview"));
        assert_eq!(row.raw_text.as_deref(), Some("John Doe"));
        assert_eq!(row.model_used.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(row.attempt_count, 1);
    }

    #[test]
    fn test_complete_from_wrong_status_changes_nothing() {
        let db = test_db();
        insert(&db, &sample("p")).unwrap();

        let changed = complete(&db, "p", 0, &completion(), &["PROCESSING"], "t").unwrap();
        assert_eq!(changed, 0);
        assert_eq!(find_by_id(&db, "p").unwrap().unwrap().status, "PENDING");
    }

    #[test]
    fn test_complete_rejects_out_of_range_score() {
        let db = test_db();
        insert(&db, &sample("s")).unwrap();
        begin_attempt(&db, "s", CLAIMABLE, 3, "t").unwrap();

        let mut bad = completion();
        bad.fit_score = 42.0;
        assert!(matches!(
            complete(&db, "s", 1, &bad, &["PROCESSING"], "t"),
            Err(DatabaseError::Constraint(_))
        ));
        assert_eq!(find_by_id(&db, "s").unwrap().unwrap().status, "PROCESSING");
    }

    #[test]
    fn test_fail_clears_results() {
        let db = test_db();
        insert(&db, &sample("f")).unwrap();
        begin_attempt(&db, "f", CLAIMABLE, 3, "t").unwrap();

        assert_eq!(fail(&db, "f", 1, &["PROCESSING"], "t2").unwrap(), 1);
        let row = find_by_id(&db, "f").unwrap().unwrap();
        assert_eq!(row.status, "FAILED");
        assert_eq!(row.attempt_count, 1);
        assert!(row.fit_score.is_none());
    }

    #[test]
    fn test_superseded_attempt_cannot_commit_or_fail() {
        let db = test_db();
        insert(&db, &sample("o")).unwrap();
        begin_attempt(&db, "o", CLAIMABLE, 3, "t1").unwrap();
        // A redelivery takes the row over as attempt 2.
        begin_attempt(&db, "o", CLAIMABLE, 3, "t2").unwrap();

        assert_eq!(fail(&db, "o", 1, &["PROCESSING"], "t3").unwrap(), 0);
        assert_eq!(
            complete(&db, "o", 1, &completion(), &["PROCESSING"], "t3").unwrap(),
            0
        );
        let row = find_by_id(&db, "o").unwrap().unwrap();
        assert_eq!(row.status, "PROCESSING");
        assert_eq!(row.attempt_count, 2);
        assert!(row.fit_score.is_none());

        assert_eq!(
            complete(&db, "o", 2, &completion(), &["PROCESSING"], "t4").unwrap(),
            1
        );
        assert_eq!(find_by_id(&db, "o").unwrap().unwrap().status, "DONE");
    }

    #[test]
    fn test_reset_restores_pending() {
        let db = test_db();
        insert(&db, &sample("r")).unwrap();
        begin_attempt(&db, "r", CLAIMABLE, 3, "t").unwrap();
        complete(&db, "r", 1, &completion(), &["PROCESSING"], "t").unwrap();

        assert_eq!(reset(&db, "r", &["PROCESSING"], "t").unwrap(), 0);
        assert_eq!(reset(&db, "r", &["DONE", "FAILED"], "t3").unwrap(), 1);

        let row = find_by_id(&db, "r").unwrap().unwrap();
        assert_eq!(row.status, "PENDING");
        assert_eq!(row.attempt_count, 0);
        assert!(row.raw_text.is_none());
        assert!(row.summary_text.is_none());
        assert!(row.evaluation_details.is_none());
        assert!(row.model_used.is_none());
    }

    #[test]
    fn test_query_and_counts() {
        let db = test_db();
        for i in 0..5 {
            let mut row = sample(&format!("q{}", i));
            row.created_at = format!("2026-01-0{}T00:00:00Z", i + 1);
            insert(&db, &row).unwrap();
        }
        begin_attempt(&db, "q0", CLAIMABLE, 3, "t").unwrap();

        let (rows, total) = query(&db, &CandidateFilter::default()).unwrap();
        assert_eq!(total, 5);
        assert_eq!(rows[0].id, "q4");

        let (rows, total) = query(
            &db,
            &CandidateFilter {
                status: Some("PROCESSING".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, "q0");

        let (rows, _) = query(
            &db,
            &CandidateFilter {
                limit: Some(2),
                offset: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            rows.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["q3", "q2"]
        );

        assert_eq!(count_by_status(&db, "PENDING").unwrap(), 4);
        assert_eq!(
            ids_with_status(&db, &["PENDING", "PROCESSING"]).unwrap(),
            vec!["q0", "q1", "q2", "q3", "q4"]
        );
    }
}
