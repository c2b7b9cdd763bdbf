//! Local SQLite cache for issues, comments, and sync metadata.
//!
//! All write operations are idempotent: repeating a call with the same
//! input leaves the same end state. Issues are addressed by (repo, number),
//! comments by (repo, id).

pub mod schema;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::github::types::{Comment, Issue, RepoRef};

/// Errors from the cache store
#[derive(Error, Debug)]
pub enum StoreError {
  #[error("database error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("timestamp parse error: {0}")]
  Timestamp(#[from] chrono::ParseError),

  #[error("failed to create cache directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    source: std::io::Error,
  },

  #[error("store mutex poisoned")]
  LockPoisoned,
}

/// Row counts for one repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
  pub issues: u64,
  pub comments: u64,
}

/// SQLite-backed store for mirrored issues.
pub struct Store {
  conn: Mutex<Connection>,
}

impl Store {
  /// Open or create the store at the given path, creating parent
  /// directories as needed.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
        path: parent.to_path_buf(),
        source,
      })?;
    }
    Self::from_connection(Connection::open(path)?)
  }

  /// In-memory store, used in tests.
  #[allow(dead_code)]
  pub fn in_memory() -> Result<Self, StoreError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    // Composite FK from comments to issues is only enforced with the
    // pragma on; it is per-connection in SQLite.
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(schema::SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self.conn.lock().map_err(|_| StoreError::LockPoisoned)
  }

  /// Insert or update an issue row, replacing its labels and assignees.
  ///
  /// The conflict clause updates in place; a delete-and-reinsert would
  /// cascade into the issue's comments.
  pub fn upsert_issue(&self, repo: &RepoRef, issue: &Issue) -> Result<(), StoreError> {
    let labels = serde_json::to_string(&issue.labels)?;
    let assignees = serde_json::to_string(&issue.assignees)?;
    let conn = self.lock()?;
    conn.execute(
      "INSERT INTO issues (repo, number, title, body, state, author, created_at,
                           updated_at, closed_at, comment_count, labels, assignees)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
       ON CONFLICT (repo, number) DO UPDATE SET
         title = excluded.title,
         body = excluded.body,
         state = excluded.state,
         author = excluded.author,
         created_at = excluded.created_at,
         updated_at = excluded.updated_at,
         closed_at = excluded.closed_at,
         comment_count = excluded.comment_count,
         labels = excluded.labels,
         assignees = excluded.assignees",
      params![
        repo.as_slug(),
        issue.number,
        issue.title,
        issue.body,
        issue.state,
        issue.author,
        issue.created_at.to_rfc3339(),
        issue.updated_at.to_rfc3339(),
        issue.closed_at.map(|at| at.to_rfc3339()),
        issue.comment_count,
        labels,
        assignees,
      ],
    )?;
    Ok(())
  }

  /// Replace every cached comment for one issue in a single transaction.
  pub fn replace_comments(
    &self,
    repo: &RepoRef,
    issue_number: i64,
    comments: &[Comment],
  ) -> Result<(), StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "DELETE FROM comments WHERE repo = ?1 AND issue_number = ?2",
      params![repo.as_slug(), issue_number],
    )?;
    for comment in comments {
      upsert_comment(&tx, repo, comment)?;
    }
    tx.commit()?;
    Ok(())
  }

  /// Merge fetched comments into the cached set.
  ///
  /// Incremental passes fetch only comments updated since the cursor;
  /// fetched rows overwrite by id and everything else survives. Each row
  /// carries its own issue number.
  pub fn merge_comments(&self, repo: &RepoRef, fetched: &[Comment]) -> Result<(), StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    for comment in fetched {
      upsert_comment(&tx, repo, comment)?;
    }
    tx.commit()?;
    Ok(())
  }

  /// All cached issue numbers for a repository, ascending.
  pub fn issue_numbers(&self, repo: &RepoRef) -> Result<Vec<i64>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT number FROM issues WHERE repo = ?1 ORDER BY number")?;
    let numbers = stmt
      .query_map(params![repo.as_slug()], |row| row.get(0))?
      .collect::<Result<Vec<i64>, _>>()?;
    Ok(numbers)
  }

  /// Delete an issue and, via the cascade, its comments. Returns whether
  /// a row existed.
  pub fn delete_issue(&self, repo: &RepoRef, number: i64) -> Result<bool, StoreError> {
    let conn = self.lock()?;
    let deleted = conn.execute(
      "DELETE FROM issues WHERE repo = ?1 AND number = ?2",
      params![repo.as_slug(), number],
    )?;
    Ok(deleted > 0)
  }

  /// Timestamp of the last fully successful sync pass, if any.
  pub fn last_sync(&self, repo: &RepoRef) -> Result<Option<DateTime<Utc>>, StoreError> {
    let conn = self.lock()?;
    let value: Option<String> = conn
      .query_row(
        "SELECT last_sync_at FROM sync_metadata WHERE repo = ?1",
        params![repo.as_slug()],
        |row| row.get(0),
      )
      .optional()?;
    value.as_deref().map(parse_datetime).transpose()
  }

  pub fn set_last_sync(&self, repo: &RepoRef, at: DateTime<Utc>) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT INTO sync_metadata (repo, last_sync_at) VALUES (?1, ?2)
       ON CONFLICT (repo) DO UPDATE SET last_sync_at = excluded.last_sync_at",
      params![repo.as_slug(), at.to_rfc3339()],
    )?;
    Ok(())
  }

  /// All cached issues for a repository, most recently updated first.
  #[allow(dead_code)]
  pub fn issues(&self, repo: &RepoRef) -> Result<Vec<Issue>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT number, title, body, state, author, created_at, updated_at,
              closed_at, comment_count, labels, assignees
       FROM issues WHERE repo = ?1 ORDER BY updated_at DESC",
    )?;
    let issues = stmt
      .query_map(params![repo.as_slug()], issue_from_row)?
      .collect::<Result<Vec<Issue>, _>>()?;
    Ok(issues)
  }

  /// A single cached issue, if present.
  #[allow(dead_code)]
  pub fn issue(&self, repo: &RepoRef, number: i64) -> Result<Option<Issue>, StoreError> {
    let conn = self.lock()?;
    let issue = conn
      .query_row(
        "SELECT number, title, body, state, author, created_at, updated_at,
                closed_at, comment_count, labels, assignees
         FROM issues WHERE repo = ?1 AND number = ?2",
        params![repo.as_slug(), number],
        issue_from_row,
      )
      .optional()?;
    Ok(issue)
  }

  /// Cached comments for one issue in thread order.
  #[allow(dead_code)]
  pub fn comments_for_issue(
    &self,
    repo: &RepoRef,
    number: i64,
  ) -> Result<Vec<Comment>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT id, issue_number, author, body, created_at, updated_at
       FROM comments WHERE repo = ?1 AND issue_number = ?2
       ORDER BY created_at, id",
    )?;
    let comments = stmt
      .query_map(params![repo.as_slug(), number], comment_from_row)?
      .collect::<Result<Vec<Comment>, _>>()?;
    Ok(comments)
  }

  /// Cached row counts for one repository.
  pub fn counts(&self, repo: &RepoRef) -> Result<StoreCounts, StoreError> {
    let conn = self.lock()?;
    let issues = conn.query_row(
      "SELECT COUNT(*) FROM issues WHERE repo = ?1",
      params![repo.as_slug()],
      |row| row.get(0),
    )?;
    let comments = conn.query_row(
      "SELECT COUNT(*) FROM comments WHERE repo = ?1",
      params![repo.as_slug()],
      |row| row.get(0),
    )?;
    Ok(StoreCounts { issues, comments })
  }
}

fn upsert_comment(conn: &Connection, repo: &RepoRef, comment: &Comment) -> Result<(), StoreError> {
  conn.execute(
    "INSERT INTO comments (repo, id, issue_number, author, body, created_at, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
     ON CONFLICT (repo, id) DO UPDATE SET
       issue_number = excluded.issue_number,
       author = excluded.author,
       body = excluded.body,
       created_at = excluded.created_at,
       updated_at = excluded.updated_at",
    params![
      repo.as_slug(),
      comment.id,
      comment.issue_number,
      comment.author,
      comment.body,
      comment.created_at.to_rfc3339(),
      comment.updated_at.to_rfc3339(),
    ],
  )?;
  Ok(())
}

fn issue_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Issue> {
  Ok(Issue {
    number: row.get(0)?,
    title: row.get(1)?,
    body: row.get(2)?,
    state: row.get(3)?,
    author: row.get(4)?,
    created_at: datetime_col(row, 5)?,
    updated_at: datetime_col(row, 6)?,
    closed_at: optional_datetime_col(row, 7)?,
    comment_count: row.get(8)?,
    labels: json_col(row, 9)?,
    assignees: json_col(row, 10)?,
  })
}

fn comment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
  Ok(Comment {
    id: row.get(0)?,
    issue_number: row.get(1)?,
    author: row.get(2)?,
    body: row.get(3)?,
    created_at: datetime_col(row, 4)?,
    updated_at: datetime_col(row, 5)?,
  })
}

fn datetime_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
  let value: String = row.get(idx)?;
  datetime_value(&value, idx)
}

fn optional_datetime_col(
  row: &rusqlite::Row<'_>,
  idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
  let value: Option<String> = row.get(idx)?;
  match value {
    Some(v) => datetime_value(&v, idx).map(Some),
    None => Ok(None),
  }
}

fn datetime_value(value: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(value)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| {
      rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn json_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
  let value: String = row.get(idx)?;
  serde_json::from_str(&value).map_err(|e| {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
  })
}

/// Parse an RFC 3339 timestamp stored by this module.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
  Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}
