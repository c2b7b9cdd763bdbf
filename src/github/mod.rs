//! GitHub REST API access.
//!
//! The sync engine consumes the [`IssueSource`] trait rather than the
//! concrete client, so tests can drive it from canned data.

pub mod api_types;
mod client;
mod error;
pub mod types;

pub use client::GithubClient;
pub use error::GithubError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use api_types::{ApiComment, ApiIssue};
use types::RepoRef;

/// Position within a paginated listing. Page numbers start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor(pub u32);

impl PageCursor {
  pub fn first() -> Self {
    PageCursor(1)
  }
}

/// One page of results plus the cursor for the page after it.
///
/// `next` comes from the `Link: <...>; rel="next"` response header and its
/// absence is the only end-of-listing signal. An empty `items` with a
/// present `next` means the listing continues.
#[derive(Debug, Clone)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub next: Option<PageCursor>,
}

/// Read access to a repository's open issues and their comments
#[async_trait]
pub trait IssueSource: Send + Sync {
  /// Fetch one page of open issues, oldest-updated first.
  ///
  /// `since` restricts the listing to items updated at or after that
  /// instant. Pages may contain pull requests; callers filter them.
  async fn issue_page(
    &self,
    repo: &RepoRef,
    since: Option<DateTime<Utc>>,
    page: PageCursor,
  ) -> Result<Page<ApiIssue>, GithubError>;

  /// Fetch one page of comments for a single issue, oldest first
  async fn comment_page(
    &self,
    repo: &RepoRef,
    issue_number: i64,
    since: Option<DateTime<Utc>>,
    page: PageCursor,
  ) -> Result<Page<ApiComment>, GithubError>;
}
