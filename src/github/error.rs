use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors from the GitHub API layer
#[derive(Error, Debug)]
pub enum GithubError {
  /// Malformed repository reference
  #[error("invalid repository '{0}', expected owner/name")]
  InvalidRepo(String),

  /// Token rejected or lacking access (HTTP 401, or 403 with quota left)
  #[error("GitHub authentication failed - check your token")]
  Auth,

  /// Primary or secondary rate limit (HTTP 403 with zero remaining quota
  /// or a retry-after delay, or 429)
  #[error("GitHub rate limit exceeded{}", reset_hint(.reset))]
  RateLimited { reset: Option<DateTime<Utc>> },

  /// Repository or issue does not exist, or is hidden from this token (HTTP 404)
  #[error("not found: {0}")]
  NotFound(String),

  /// Any other API-level failure
  #[error("GitHub API error ({status}): {message}")]
  Api { status: StatusCode, message: String },

  /// Network or connection error
  #[error("network error: {0}")]
  Network(#[from] reqwest::Error),

  /// Token contains bytes that cannot appear in an HTTP header
  #[error("token is not a valid header value")]
  InvalidToken,
}

impl GithubError {
  /// Map an error response to the matching kind.
  ///
  /// 403 is ambiguous: GitHub reports primary rate-limit exhaustion as 403
  /// with `x-ratelimit-remaining: 0`, secondary (abuse) limits as 403 with
  /// a `retry-after` delay and quota to spare, and permission problems as
  /// plain 403.
  pub fn from_status(status: StatusCode, headers: &HeaderMap, message: String) -> Self {
    match status {
      StatusCode::UNAUTHORIZED => GithubError::Auth,
      StatusCode::FORBIDDEN => {
        if rate_limit_exhausted(headers) {
          GithubError::RateLimited {
            reset: rate_limit_reset(headers),
          }
        } else if let Some(reset) = retry_after_reset(headers) {
          GithubError::RateLimited { reset: Some(reset) }
        } else {
          GithubError::Auth
        }
      }
      StatusCode::TOO_MANY_REQUESTS => GithubError::RateLimited {
        reset: rate_limit_reset(headers).or_else(|| retry_after_reset(headers)),
      },
      StatusCode::NOT_FOUND => GithubError::NotFound(message),
      _ => GithubError::Api { status, message },
    }
  }

  /// Returns true if the token needs fixing before another attempt can succeed
  pub fn is_auth(&self) -> bool {
    matches!(self, GithubError::Auth | GithubError::InvalidToken)
  }

  #[allow(dead_code)]
  pub fn is_rate_limited(&self) -> bool {
    matches!(self, GithubError::RateLimited { .. })
  }

  /// Returns true if a later run may succeed without operator action
  pub fn is_transient(&self) -> bool {
    match self {
      GithubError::RateLimited { .. } => true,
      GithubError::Api { status, .. } => status.is_server_error(),
      GithubError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
      _ => false,
    }
  }
}

fn rate_limit_exhausted(headers: &HeaderMap) -> bool {
  headers
    .get("x-ratelimit-remaining")
    .and_then(|v| v.to_str().ok())
    .map(|v| v == "0")
    .unwrap_or(false)
}

fn rate_limit_reset(headers: &HeaderMap) -> Option<DateTime<Utc>> {
  let epoch = headers
    .get("x-ratelimit-reset")?
    .to_str()
    .ok()?
    .parse::<i64>()
    .ok()?;
  DateTime::from_timestamp(epoch, 0)
}

fn retry_after_reset(headers: &HeaderMap) -> Option<DateTime<Utc>> {
  let secs = headers
    .get("retry-after")?
    .to_str()
    .ok()?
    .parse::<i64>()
    .ok()?;
  Some(Utc::now() + chrono::Duration::try_seconds(secs)?)
}

fn reset_hint(reset: &Option<DateTime<Utc>>) -> String {
  match reset {
    Some(at) => format!(" (resets at {})", at.format("%H:%M:%S UTC")),
    None => String::new(),
  }
}
