//! Asynchronous client for the GitHub REST v3 API.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, LINK, USER_AGENT};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use super::api_types::{ApiComment, ApiIssue};
use super::error::GithubError;
use super::types::RepoRef;
use super::{IssueSource, Page, PageCursor};

/// Issues and comments are requested at the API's page size ceiling.
pub const MAX_PAGE_SIZE: u32 = 100;

const DEFAULT_API_BASE: &str = "https://api.github.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// GitHub API client wrapper
#[derive(Clone, Debug)]
pub struct GithubClient {
  http: reqwest::Client,
  api_base: String,
}

impl GithubClient {
  /// Create a client authenticated with a personal access token.
  pub fn new(token: &str) -> Result<Self, GithubError> {
    Self::with_api_base(token, DEFAULT_API_BASE)
  }

  /// Create a client against a non-default API base (GitHub Enterprise, tests).
  pub fn with_api_base(token: &str, api_base: &str) -> Result<Self, GithubError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static("offhub"));
    headers.insert(
      ACCEPT,
      HeaderValue::from_static("application/vnd.github+json"),
    );
    headers.insert(
      "x-github-api-version",
      HeaderValue::from_static("2022-11-28"),
    );
    let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
      .map_err(|_| GithubError::InvalidToken)?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(REQUEST_TIMEOUT)
      .build()?;

    Ok(Self {
      http,
      api_base: api_base.trim_end_matches('/').to_string(),
    })
  }

  async fn get_page<T: DeserializeOwned>(
    &self,
    url: &str,
    query: &[(&str, String)],
  ) -> Result<Page<T>, GithubError> {
    let response = self.http.get(url).query(query).send().await?;

    let status = response.status();
    if !status.is_success() {
      let headers = response.headers().clone();
      let message = response.text().await.unwrap_or_default();
      return Err(GithubError::from_status(status, &headers, message));
    }

    let next = next_page(response.headers());
    let items = response.json().await?;
    Ok(Page { items, next })
  }
}

#[async_trait]
impl IssueSource for GithubClient {
  async fn issue_page(
    &self,
    repo: &RepoRef,
    since: Option<DateTime<Utc>>,
    page: PageCursor,
  ) -> Result<Page<ApiIssue>, GithubError> {
    let url = format!("{}/repos/{}/{}/issues", self.api_base, repo.owner, repo.name);
    let mut query = vec![
      ("state", "open".to_string()),
      ("sort", "updated".to_string()),
      ("direction", "asc".to_string()),
      ("per_page", MAX_PAGE_SIZE.to_string()),
      ("page", page.0.to_string()),
    ];
    if let Some(since) = since {
      query.push(("since", since.to_rfc3339_opts(SecondsFormat::Secs, true)));
    }
    self.get_page(&url, &query).await
  }

  async fn comment_page(
    &self,
    repo: &RepoRef,
    issue_number: i64,
    since: Option<DateTime<Utc>>,
    page: PageCursor,
  ) -> Result<Page<ApiComment>, GithubError> {
    let url = format!(
      "{}/repos/{}/{}/issues/{}/comments",
      self.api_base, repo.owner, repo.name, issue_number
    );
    let mut query = vec![
      ("per_page", MAX_PAGE_SIZE.to_string()),
      ("page", page.0.to_string()),
    ];
    if let Some(since) = since {
      query.push(("since", since.to_rfc3339_opts(SecondsFormat::Secs, true)));
    }
    self.get_page(&url, &query).await
  }
}

/// Extract the next page number from a `Link` response header.
///
/// GitHub terminates pagination by omitting `rel="next"`. Item counts are
/// not a reliable end signal: a non-final page can come back short.
fn next_page(headers: &HeaderMap) -> Option<PageCursor> {
  let link = headers.get(LINK)?.to_str().ok()?;
  for part in link.split(',') {
    let mut sections = part.split(';');
    let target = sections.next().unwrap_or("").trim();
    if !sections.any(|param| param.trim() == "rel=\"next\"") {
      continue;
    }
    let target = target.strip_prefix('<')?.strip_suffix('>')?;
    let url = Url::parse(target).ok()?;
    let page = url
      .query_pairs()
      .find(|(key, _)| key == "page")
      .and_then(|(_, value)| value.parse::<u32>().ok())?;
    return Some(PageCursor(page));
  }
  None
}
