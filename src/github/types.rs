use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use super::error::GithubError;

/// A repository reference in "owner/name" form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
  pub owner: String,
  pub name: String,
}

impl RepoRef {
  pub fn parse(raw: &str) -> Result<Self, GithubError> {
    let trimmed = raw.trim();
    let (owner, name) = trimmed
      .split_once('/')
      .ok_or_else(|| GithubError::InvalidRepo(raw.to_string()))?;
    let owner = owner.trim();
    let name = name.trim();
    if owner.is_empty() || name.is_empty() || name.contains('/') {
      return Err(GithubError::InvalidRepo(raw.to_string()));
    }
    Ok(Self {
      owner: owner.to_string(),
      name: name.to_string(),
    })
  }

  /// The "owner/name" form, also used as the cache key
  pub fn as_slug(&self) -> String {
    format!("{}/{}", self.owner, self.name)
  }
}

impl fmt::Display for RepoRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.owner, self.name)
  }
}

impl FromStr for RepoRef {
  type Err = GithubError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

/// An issue as stored in the local cache
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
  pub number: i64,
  pub title: String,
  pub body: Option<String>,
  pub state: String,
  pub author: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub closed_at: Option<DateTime<Utc>>,
  pub comment_count: i64,
  pub labels: Vec<String>,
  pub assignees: Vec<String>,
}

/// A comment as stored in the local cache
#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
  pub id: i64,
  pub issue_number: i64,
  pub author: Option<String>,
  pub body: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}
