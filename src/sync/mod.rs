//! Synchronization engine: mirrors a repository's open issues into the
//! local store in one sequential pass.
//!
//! A pass is incremental when a last-sync timestamp is recorded (only
//! items updated since then are fetched) and full otherwise. Only full
//! passes reconcile deletions: an incremental result is a window of
//! recent activity, not a census of open issues. The last-sync timestamp
//! is captured when the pass starts and written only after the pass
//! finishes completely, so an aborted or cancelled pass never advances
//! the cursor.

mod reconcile;

pub use reconcile::reconcile;

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::github::types::RepoRef;
use crate::github::{GithubError, IssueSource, PageCursor};
use crate::store::{Store, StoreError};

/// Errors that abort a sync pass
#[derive(Error, Debug)]
pub enum SyncError {
  #[error(transparent)]
  Github(#[from] GithubError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

impl SyncError {
  /// Returns true if a later run may succeed without operator action
  pub fn is_transient(&self) -> bool {
    match self {
      SyncError::Github(e) => e.is_transient(),
      SyncError::Store(_) => false,
    }
  }

  /// Returns true if the token needs fixing before another attempt
  pub fn is_auth(&self) -> bool {
    matches!(self, SyncError::Github(e) if e.is_auth())
  }
}

/// Which collection the engine is currently fetching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
  Issues,
  Comments,
}

impl fmt::Display for SyncPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SyncPhase::Issues => write!(f, "issues"),
      SyncPhase::Comments => write!(f, "comments"),
    }
  }
}

/// A progress notification emitted while a pass runs.
///
/// `total` is 0 when the remote does not report an overall count upfront;
/// the issues listing never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
  pub phase: SyncPhase,
  pub current: u64,
  pub total: u64,
}

/// Counters for one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
  /// Issues upserted with their comments persisted
  pub issues_fetched: u64,
  /// Comments written across all processed issues
  pub comments_fetched: u64,
  /// Issues removed by reconciliation
  pub issues_deleted: u64,
  /// Wall-clock duration of the pass
  pub elapsed: Duration,
}

/// How a pass ended.
///
/// Cancellation is a successful partial stop, not an error: everything
/// persisted up to that point is consistent, and the untouched last-sync
/// timestamp makes the next pass pick the work back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  Completed(SyncStats),
  Cancelled(SyncStats),
}

impl SyncOutcome {
  #[allow(dead_code)]
  pub fn stats(&self) -> &SyncStats {
    match self {
      SyncOutcome::Completed(stats) | SyncOutcome::Cancelled(stats) => stats,
    }
  }
}

/// Drives synchronization passes from an [`IssueSource`] into a [`Store`].
pub struct SyncEngine<S: IssueSource> {
  source: S,
  store: Store,
}

impl<S: IssueSource> SyncEngine<S> {
  pub fn new(source: S, store: Store) -> Self {
    Self { source, store }
  }

  pub fn store(&self) -> &Store {
    &self.store
  }

  /// Run one pass, incremental when a last-sync timestamp is recorded.
  ///
  /// The progress callback is invoked synchronously on the calling task.
  pub async fn sync(
    &self,
    repo: &RepoRef,
    cancel: &CancellationToken,
    progress: impl FnMut(SyncProgress),
  ) -> Result<SyncOutcome, SyncError> {
    let since = self.store.last_sync(repo)?;
    self.run_pass(repo, since, cancel, progress).await
  }

  /// Run one full pass regardless of any recorded last-sync timestamp.
  ///
  /// Full passes are the only ones that reconcile deletions, so this is
  /// how issues closed since the cache was built get flushed.
  pub async fn sync_full(
    &self,
    repo: &RepoRef,
    cancel: &CancellationToken,
    progress: impl FnMut(SyncProgress),
  ) -> Result<SyncOutcome, SyncError> {
    self.run_pass(repo, None, cancel, progress).await
  }

  async fn run_pass(
    &self,
    repo: &RepoRef,
    since: Option<DateTime<Utc>>,
    cancel: &CancellationToken,
    mut progress: impl FnMut(SyncProgress),
  ) -> Result<SyncOutcome, SyncError> {
    let started = Instant::now();
    // The next incremental pass resumes from when this pass began, not
    // when it finished: items updated while it runs must not be skipped.
    let pass_started_at = Utc::now();

    let mut stats = SyncStats::default();
    let mut fetched: HashSet<i64> = HashSet::new();
    let mut skipped_prs: HashSet<i64> = HashSet::new();

    info!(repo = %repo, incremental = since.is_some(), "starting sync pass");

    let mut cursor = Some(PageCursor::first());
    while let Some(page_cursor) = cursor {
      if cancel.is_cancelled() {
        return Ok(cancelled(stats, started));
      }

      let page = self.source.issue_page(repo, since, page_cursor).await?;
      debug!(page = page_cursor.0, items = page.items.len(), "fetched issue page");
      cursor = page.next;

      for api_issue in page.items {
        if cancel.is_cancelled() {
          return Ok(cancelled(stats, started));
        }

        if api_issue.is_pull_request() {
          // Never cached, but shielded from reconciliation: a cached row
          // with this number must not be mistaken for a vanished issue.
          skipped_prs.insert(api_issue.number);
          continue;
        }

        let number = api_issue.number;
        self.store.upsert_issue(repo, &api_issue.into_issue())?;

        // An updated-ordered listing can repeat an issue on a later page;
        // its comments were already persisted the first time through.
        if !fetched.insert(number) {
          continue;
        }

        match self.sync_comments(repo, number, since, cancel).await? {
          Some(written) => {
            stats.comments_fetched += written;
            progress(SyncProgress {
              phase: SyncPhase::Comments,
              current: stats.comments_fetched,
              total: 0,
            });
          }
          None => return Ok(cancelled(stats, started)),
        }

        stats.issues_fetched += 1;
        progress(SyncProgress {
          phase: SyncPhase::Issues,
          current: stats.issues_fetched,
          total: 0,
        });
      }
    }

    if cancel.is_cancelled() {
      return Ok(cancelled(stats, started));
    }

    if since.is_none() {
      let keep: HashSet<i64> = fetched.union(&skipped_prs).copied().collect();
      stats.issues_deleted = reconcile(&self.store, repo, &keep)?;
    }

    self.store.set_last_sync(repo, pass_started_at)?;
    stats.elapsed = started.elapsed();

    info!(
      repo = %repo,
      issues = stats.issues_fetched,
      comments = stats.comments_fetched,
      deleted = stats.issues_deleted,
      "sync pass complete"
    );

    Ok(SyncOutcome::Completed(stats))
  }

  /// Fetch and persist one issue's comments. Returns the number of rows
  /// written, or None when cancellation interrupted the fetch (nothing is
  /// written in that case).
  async fn sync_comments(
    &self,
    repo: &RepoRef,
    issue_number: i64,
    since: Option<DateTime<Utc>>,
    cancel: &CancellationToken,
  ) -> Result<Option<u64>, SyncError> {
    let mut comments = Vec::new();
    let mut cursor = Some(PageCursor::first());
    while let Some(page_cursor) = cursor {
      if cancel.is_cancelled() {
        return Ok(None);
      }
      let page = self
        .source
        .comment_page(repo, issue_number, since, page_cursor)
        .await?;
      cursor = page.next;
      comments.extend(page.items.into_iter().map(|c| c.into_comment(issue_number)));
    }

    let written = comments.len() as u64;
    if since.is_some() {
      // A since-filtered fetch misses untouched comments; merging keeps them
      self.store.merge_comments(repo, &comments)?;
    } else {
      self.store.replace_comments(repo, issue_number, &comments)?;
    }
    Ok(Some(written))
  }
}

fn cancelled(mut stats: SyncStats, started: Instant) -> SyncOutcome {
  stats.elapsed = started.elapsed();
  info!(issues = stats.issues_fetched, "sync pass cancelled before completion");
  SyncOutcome::Cancelled(stats)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::github::api_types::{ApiComment, ApiIssue, ApiLabel, ApiUser};
  use crate::github::{Page, PageCursor};
  use async_trait::async_trait;
  use chrono::TimeZone;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicU64, Ordering};
  use std::sync::{Arc, Mutex};

  /// Page size the fake source serves
  const PAGE: usize = 2;

  #[derive(Default)]
  struct FakeState {
    issues: Mutex<Vec<ApiIssue>>,
    comments: Mutex<HashMap<i64, Vec<ApiComment>>>,
    issue_pages_served: AtomicU64,
    first_issue_page_at: Mutex<Option<DateTime<Utc>>>,
    fail_comments_for: Mutex<Option<i64>>,
  }

  /// In-memory `IssueSource` serving canned data two items per page,
  /// honoring the since-filter the way the live API does.
  #[derive(Clone, Default)]
  struct FakeSource {
    state: Arc<FakeState>,
  }

  #[async_trait]
  impl IssueSource for FakeSource {
    async fn issue_page(
      &self,
      _repo: &RepoRef,
      since: Option<DateTime<Utc>>,
      page: PageCursor,
    ) -> Result<Page<ApiIssue>, GithubError> {
      self.state.issue_pages_served.fetch_add(1, Ordering::SeqCst);
      {
        let mut first_page_at = self.state.first_issue_page_at.lock().unwrap();
        if first_page_at.is_none() {
          *first_page_at = Some(Utc::now());
        }
      }
      let issues = self.state.issues.lock().unwrap();
      let matching: Vec<ApiIssue> = issues
        .iter()
        .filter(|issue| since.map_or(true, |s| issue.updated_at >= s))
        .cloned()
        .collect();
      Ok(paginate(matching, page))
    }

    async fn comment_page(
      &self,
      _repo: &RepoRef,
      issue_number: i64,
      since: Option<DateTime<Utc>>,
      page: PageCursor,
    ) -> Result<Page<ApiComment>, GithubError> {
      if *self.state.fail_comments_for.lock().unwrap() == Some(issue_number) {
        return Err(GithubError::RateLimited { reset: None });
      }
      let comments = self.state.comments.lock().unwrap();
      let matching: Vec<ApiComment> = comments
        .get(&issue_number)
        .map(|list| {
          list
            .iter()
            .filter(|c| since.map_or(true, |s| c.updated_at >= s))
            .cloned()
            .collect()
        })
        .unwrap_or_default();
      Ok(paginate(matching, page))
    }
  }

  fn paginate<T>(items: Vec<T>, page: PageCursor) -> Page<T> {
    let start = ((page.0 - 1) as usize) * PAGE;
    let has_more = items.len() > start + PAGE;
    Page {
      items: items.into_iter().skip(start).take(PAGE).collect(),
      next: if has_more {
        Some(PageCursor(page.0 + 1))
      } else {
        None
      },
    }
  }

  fn repo() -> RepoRef {
    RepoRef::parse("acme/widgets").unwrap()
  }

  fn ts(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
  }

  fn api_issue(number: i64, updated: DateTime<Utc>) -> ApiIssue {
    ApiIssue {
      number,
      title: format!("Issue {number}"),
      body: Some("body".to_string()),
      state: "open".to_string(),
      user: Some(ApiUser {
        login: "alice".to_string(),
      }),
      created_at: ts(1),
      updated_at: updated,
      closed_at: None,
      comments: 0,
      labels: vec![ApiLabel {
        name: "bug".to_string(),
      }],
      assignees: vec![],
      pull_request: None,
    }
  }

  fn api_pull_request(number: i64, updated: DateTime<Utc>) -> ApiIssue {
    ApiIssue {
      pull_request: Some(serde_json::json!({
        "url": format!("https://api.github.com/repos/acme/widgets/pulls/{number}")
      })),
      ..api_issue(number, updated)
    }
  }

  fn api_comment(id: i64, updated: DateTime<Utc>) -> ApiComment {
    ApiComment {
      id,
      body: Some(format!("comment {id}")),
      user: Some(ApiUser {
        login: "bob".to_string(),
      }),
      created_at: ts(1),
      updated_at: updated,
    }
  }

  fn engine_with(
    issues: Vec<ApiIssue>,
    comments: HashMap<i64, Vec<ApiComment>>,
  ) -> (SyncEngine<FakeSource>, Arc<FakeState>) {
    let source = FakeSource::default();
    let state = source.state.clone();
    *state.issues.lock().unwrap() = issues;
    *state.comments.lock().unwrap() = comments;
    let engine = SyncEngine::new(source, Store::in_memory().unwrap());
    (engine, state)
  }

  #[tokio::test]
  async fn test_full_sync_persists_issues_and_comments() {
    let comments = HashMap::from([
      (1, vec![api_comment(10, ts(2)), api_comment(11, ts(2))]),
      (2, vec![api_comment(20, ts(2))]),
    ]);
    let issues = vec![
      api_issue(1, ts(2)),
      api_issue(2, ts(3)),
      api_issue(3, ts(4)),
    ];
    let (engine, state) = engine_with(issues, comments);

    let outcome = engine
      .sync(&repo(), &CancellationToken::new(), |_| {})
      .await
      .unwrap();

    let stats = match outcome {
      SyncOutcome::Completed(stats) => stats,
      other => panic!("expected Completed, got {other:?}"),
    };
    assert_eq!(stats.issues_fetched, 3);
    assert_eq!(stats.comments_fetched, 3);
    assert_eq!(stats.issues_deleted, 0);

    assert_eq!(engine.store().issue_numbers(&repo()).unwrap(), vec![1, 2, 3]);
    assert_eq!(engine.store().comments_for_issue(&repo(), 1).unwrap().len(), 2);
    assert!(engine.store().last_sync(&repo()).unwrap().is_some());

    // Three issues at two per page is two pages
    assert_eq!(state.issue_pages_served.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_pull_requests_are_skipped_entirely() {
    let comments = HashMap::from([
      (1, vec![api_comment(10, ts(2))]),
      (2, vec![api_comment(20, ts(2))]),
      (3, vec![api_comment(30, ts(2))]),
    ]);
    let issues = vec![
      api_issue(1, ts(2)),
      api_pull_request(2, ts(3)),
      api_issue(3, ts(4)),
    ];
    let (engine, _state) = engine_with(issues, comments);

    let outcome = engine
      .sync(&repo(), &CancellationToken::new(), |_| {})
      .await
      .unwrap();

    let stats = outcome.stats();
    assert_eq!(stats.issues_fetched, 2);
    assert_eq!(stats.comments_fetched, 2);
    assert_eq!(engine.store().issue_numbers(&repo()).unwrap(), vec![1, 3]);
    assert!(engine.store().issue(&repo(), 2).unwrap().is_none());
    assert!(engine.store().comments_for_issue(&repo(), 2).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_sync_twice_with_no_remote_changes_is_idempotent() {
    let comments = HashMap::from([(1, vec![api_comment(10, ts(2))])]);
    let (engine, _state) = engine_with(vec![api_issue(1, ts(2))], comments);
    let cancel = CancellationToken::new();

    engine.sync(&repo(), &cancel, |_| {}).await.unwrap();
    let first_issues = engine.store().issues(&repo()).unwrap();
    let first_sync = engine.store().last_sync(&repo()).unwrap().unwrap();

    let outcome = engine.sync(&repo(), &cancel, |_| {}).await.unwrap();

    let stats = match outcome {
      SyncOutcome::Completed(stats) => stats,
      other => panic!("expected Completed, got {other:?}"),
    };
    assert_eq!(stats.issues_fetched, 0);
    assert_eq!(stats.issues_deleted, 0);
    assert_eq!(engine.store().issues(&repo()).unwrap(), first_issues);
    assert!(engine.store().last_sync(&repo()).unwrap().unwrap() >= first_sync);
  }

  #[tokio::test]
  async fn test_issue_repeated_across_pages_counts_once() {
    // A listing that shifts mid-pass can serve the same issue on two pages
    let comments = HashMap::from([
      (1, vec![api_comment(10, ts(2))]),
      (2, vec![api_comment(20, ts(2))]),
    ]);
    let issues = vec![
      api_issue(1, ts(2)),
      api_issue(2, ts(3)),
      api_issue(1, ts(4)),
    ];
    let (engine, _state) = engine_with(issues, comments);

    let outcome = engine
      .sync(&repo(), &CancellationToken::new(), |_| {})
      .await
      .unwrap();

    let stats = outcome.stats();
    assert_eq!(stats.issues_fetched, 2);
    assert_eq!(stats.comments_fetched, 2);
    assert_eq!(engine.store().issue_numbers(&repo()).unwrap(), vec![1, 2]);
    assert_eq!(engine.store().comments_for_issue(&repo(), 1).unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_incremental_sync_fetches_only_updated_issues() {
    let (engine, state) = engine_with(
      vec![api_issue(1, ts(2)), api_issue(2, ts(3))],
      HashMap::new(),
    );
    let cancel = CancellationToken::new();
    engine.sync(&repo(), &cancel, |_| {}).await.unwrap();

    // Issue 1 changes upstream after the first pass
    let mut edited = api_issue(1, Utc::now());
    edited.title = "Issue 1 (edited)".to_string();
    state.issues.lock().unwrap()[0] = edited;

    let outcome = engine.sync(&repo(), &cancel, |_| {}).await.unwrap();

    assert_eq!(outcome.stats().issues_fetched, 1);
    let loaded = engine.store().issue(&repo(), 1).unwrap().unwrap();
    assert_eq!(loaded.title, "Issue 1 (edited)");
    // The unchanged issue is untouched and still cached
    assert!(engine.store().issue(&repo(), 2).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_incremental_sync_merges_instead_of_replacing_comments() {
    let comments = HashMap::from([(1, vec![api_comment(10, ts(2)), api_comment(11, ts(2))])]);
    let (engine, state) = engine_with(vec![api_issue(1, ts(2))], comments);
    let cancel = CancellationToken::new();
    engine.sync(&repo(), &cancel, |_| {}).await.unwrap();

    // A new comment lands and an old one is edited; the since-filter will
    // hide comment 10 from the incremental fetch.
    let now = Utc::now();
    let mut edited = api_comment(11, now);
    edited.body = Some("edited".to_string());
    state
      .comments
      .lock()
      .unwrap()
      .insert(1, vec![api_comment(10, ts(2)), edited, api_comment(12, now)]);
    state.issues.lock().unwrap()[0] = api_issue(1, now);

    engine.sync(&repo(), &cancel, |_| {}).await.unwrap();

    let cached = engine.store().comments_for_issue(&repo(), 1).unwrap();
    let ids: Vec<i64> = cached.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![10, 11, 12]);
    assert_eq!(cached[1].body, "edited");
  }

  #[tokio::test]
  async fn test_full_sync_removes_issues_gone_upstream() {
    let comments = HashMap::from([(2, vec![api_comment(20, ts(2))])]);
    let issues = vec![
      api_issue(1, ts(2)),
      api_issue(2, ts(3)),
      api_issue(3, ts(4)),
    ];
    let (engine, state) = engine_with(issues, comments);
    let cancel = CancellationToken::new();
    engine.sync(&repo(), &cancel, |_| {}).await.unwrap();

    // Issue 2 is closed upstream and drops out of the open listing
    *state.issues.lock().unwrap() = vec![api_issue(1, ts(2)), api_issue(3, ts(4))];

    let outcome = engine.sync_full(&repo(), &cancel, |_| {}).await.unwrap();

    assert_eq!(outcome.stats().issues_deleted, 1);
    assert_eq!(engine.store().issue_numbers(&repo()).unwrap(), vec![1, 3]);
    assert!(engine.store().comments_for_issue(&repo(), 2).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_incremental_sync_never_deletes() {
    let (engine, state) = engine_with(
      vec![api_issue(1, ts(2)), api_issue(2, ts(3)), api_issue(3, ts(4))],
      HashMap::new(),
    );
    let cancel = CancellationToken::new();
    engine.sync(&repo(), &cancel, |_| {}).await.unwrap();

    // Only issue 1 has recent activity; 2 and 3 fall outside the window
    state.issues.lock().unwrap()[0] = api_issue(1, Utc::now());

    let outcome = engine.sync(&repo(), &cancel, |_| {}).await.unwrap();

    assert_eq!(outcome.stats().issues_deleted, 0);
    assert_eq!(engine.store().issue_numbers(&repo()).unwrap(), vec![1, 2, 3]);
  }

  #[tokio::test]
  async fn test_pull_request_number_is_shielded_from_reconciliation() {
    let (engine, state) = engine_with(
      vec![api_issue(1, ts(2)), api_issue(7, ts(3))],
      HashMap::new(),
    );
    let cancel = CancellationToken::new();
    engine.sync(&repo(), &cancel, |_| {}).await.unwrap();

    // Number 7 now shows up flagged as a pull request
    *state.issues.lock().unwrap() = vec![api_issue(1, ts(2)), api_pull_request(7, ts(3))];

    let outcome = engine.sync_full(&repo(), &cancel, |_| {}).await.unwrap();

    let stats = outcome.stats();
    assert_eq!(stats.issues_fetched, 1);
    assert_eq!(stats.issues_deleted, 0);
    // The previously cached row for 7 is stale but must not be dropped
    assert!(engine.store().issue(&repo(), 7).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_cancellation_keeps_a_consistent_prefix() {
    let issues: Vec<ApiIssue> = (1..=10).map(|n| api_issue(n, ts(2))).collect();
    let comments: HashMap<i64, Vec<ApiComment>> = (1..=10)
      .map(|n| (n, vec![api_comment(n * 100, ts(2))]))
      .collect();
    let (engine, _state) = engine_with(issues, comments);

    let cancel = CancellationToken::new();
    let cancel_from_progress = cancel.clone();
    let outcome = engine
      .sync(&repo(), &cancel, move |p| {
        if p.phase == SyncPhase::Issues && p.current == 5 {
          cancel_from_progress.cancel();
        }
      })
      .await
      .unwrap();

    let stats = match outcome {
      SyncOutcome::Cancelled(stats) => stats,
      other => panic!("expected Cancelled, got {other:?}"),
    };
    assert_eq!(stats.issues_fetched, 5);
    assert_eq!(stats.comments_fetched, 5);

    // Exactly the processed prefix is persisted, and the pass never
    // counted as successful.
    assert_eq!(
      engine.store().issue_numbers(&repo()).unwrap(),
      vec![1, 2, 3, 4, 5]
    );
    assert_eq!(engine.store().comments_for_issue(&repo(), 5).unwrap().len(), 1);
    assert!(engine.store().last_sync(&repo()).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_cancelled_before_start_touches_nothing() {
    let (engine, state) = engine_with(vec![api_issue(1, ts(2))], HashMap::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = engine.sync(&repo(), &cancel, |_| {}).await.unwrap();

    assert!(matches!(outcome, SyncOutcome::Cancelled(_)));
    assert_eq!(outcome.stats().issues_fetched, 0);
    assert_eq!(state.issue_pages_served.load(Ordering::SeqCst), 0);
    assert!(engine.store().issue_numbers(&repo()).unwrap().is_empty());
    assert!(engine.store().last_sync(&repo()).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_error_aborts_pass_without_advancing_metadata() {
    let comments = HashMap::from([(1, vec![api_comment(10, ts(2))])]);
    let (engine, state) = engine_with(
      vec![api_issue(1, ts(2)), api_issue(2, ts(3)), api_issue(3, ts(4))],
      comments,
    );
    *state.fail_comments_for.lock().unwrap() = Some(2);

    let err = engine
      .sync(&repo(), &CancellationToken::new(), |_| {})
      .await
      .unwrap_err();

    assert!(matches!(
      err,
      SyncError::Github(GithubError::RateLimited { .. })
    ));
    assert!(err.is_transient());
    assert!(!err.is_auth());

    // Work done before the failure stays; the cursor does not advance,
    // so the next pass retries from the same point.
    assert_eq!(engine.store().comments_for_issue(&repo(), 1).unwrap().len(), 1);
    assert!(engine.store().last_sync(&repo()).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_empty_page_with_next_cursor_continues() {
    /// Serves an empty first page that still advertises a next page.
    struct GappySource;

    #[async_trait]
    impl IssueSource for GappySource {
      async fn issue_page(
        &self,
        _repo: &RepoRef,
        _since: Option<DateTime<Utc>>,
        page: PageCursor,
      ) -> Result<Page<ApiIssue>, GithubError> {
        match page.0 {
          1 => Ok(Page {
            items: vec![],
            next: Some(PageCursor(2)),
          }),
          _ => Ok(Page {
            items: vec![api_issue(1, ts(2))],
            next: None,
          }),
        }
      }

      async fn comment_page(
        &self,
        _repo: &RepoRef,
        _issue_number: i64,
        _since: Option<DateTime<Utc>>,
        _page: PageCursor,
      ) -> Result<Page<ApiComment>, GithubError> {
        Ok(Page {
          items: vec![],
          next: None,
        })
      }
    }

    let engine = SyncEngine::new(GappySource, Store::in_memory().unwrap());
    let outcome = engine
      .sync(&repo(), &CancellationToken::new(), |_| {})
      .await
      .unwrap();

    assert_eq!(outcome.stats().issues_fetched, 1);
    assert_eq!(engine.store().issue_numbers(&repo()).unwrap(), vec![1]);
  }

  #[tokio::test]
  async fn test_last_sync_lands_inside_the_pass_window() {
    let (engine, _state) = engine_with(vec![api_issue(1, ts(2))], HashMap::new());

    let before = Utc::now();
    engine
      .sync(&repo(), &CancellationToken::new(), |_| {})
      .await
      .unwrap();
    let after = Utc::now();

    let recorded = engine.store().last_sync(&repo()).unwrap().unwrap();
    assert!(recorded >= before);
    assert!(recorded <= after);
  }

  #[tokio::test]
  async fn test_last_sync_is_captured_before_the_first_page_request() {
    let (engine, state) = engine_with(vec![api_issue(1, ts(2))], HashMap::new());

    engine
      .sync(&repo(), &CancellationToken::new(), |_| {})
      .await
      .unwrap();

    // A capture taken at completion would land after the request went out
    let first_request_at = state.first_issue_page_at.lock().unwrap().unwrap();
    let recorded = engine.store().last_sync(&repo()).unwrap().unwrap();
    assert!(recorded <= first_request_at);
  }

  #[tokio::test]
  async fn test_progress_reports_both_phases_in_order() {
    let comments = HashMap::from([
      (1, vec![api_comment(10, ts(2))]),
      (2, vec![api_comment(20, ts(2))]),
    ]);
    let (engine, _state) = engine_with(vec![api_issue(1, ts(2)), api_issue(2, ts(3))], comments);

    let mut events: Vec<SyncProgress> = Vec::new();
    engine
      .sync(&repo(), &CancellationToken::new(), |p| events.push(p))
      .await
      .unwrap();

    let issue_counts: Vec<u64> = events
      .iter()
      .filter(|p| p.phase == SyncPhase::Issues)
      .map(|p| p.current)
      .collect();
    let comment_counts: Vec<u64> = events
      .iter()
      .filter(|p| p.phase == SyncPhase::Comments)
      .map(|p| p.current)
      .collect();

    assert_eq!(issue_counts, vec![1, 2]);
    assert_eq!(comment_counts, vec![1, 2]);
    assert!(events.iter().all(|p| p.total == 0));
  }
}
