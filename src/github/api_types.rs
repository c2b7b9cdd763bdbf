//! Serde-deserializable types matching GitHub REST API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use chrono::{DateTime, Utc};
use serde::Deserialize;

// ============================================================================
// Common nested field types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
  pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiLabel {
  pub name: String,
}

// ============================================================================
// Issues endpoint
// ============================================================================

/// One element of `GET /repos/{owner}/{name}/issues`.
///
/// The endpoint also returns pull requests; those rows carry a
/// `pull_request` object and callers are expected to filter them.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiIssue {
  pub number: i64,
  #[serde(default)]
  pub title: String,
  pub body: Option<String>,
  #[serde(default)]
  pub state: String,
  pub user: Option<ApiUser>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub closed_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub comments: i64,
  #[serde(default)]
  pub labels: Vec<ApiLabel>,
  #[serde(default)]
  pub assignees: Vec<ApiUser>,
  #[serde(default)]
  pub pull_request: Option<serde_json::Value>,
}

// ============================================================================
// Issue comments endpoint
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ApiComment {
  pub id: i64,
  pub body: Option<String>,
  pub user: Option<ApiUser>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

use super::types::{Comment, Issue};

impl ApiIssue {
  /// True for rows of the issues listing that are actually pull requests
  pub fn is_pull_request(&self) -> bool {
    self.pull_request.is_some()
  }

  pub fn into_issue(self) -> Issue {
    Issue {
      number: self.number,
      title: self.title,
      body: self.body,
      state: self.state,
      author: self.user.map(|u| u.login),
      created_at: self.created_at,
      updated_at: self.updated_at,
      closed_at: self.closed_at,
      comment_count: self.comments,
      labels: self.labels.into_iter().map(|l| l.name).collect(),
      assignees: self.assignees.into_iter().map(|u| u.login).collect(),
    }
  }
}

impl ApiComment {
  pub fn into_comment(self, issue_number: i64) -> Comment {
    Comment {
      id: self.id,
      issue_number,
      author: self.user.map(|u| u.login),
      body: self.body.unwrap_or_default(),
      created_at: self.created_at,
      updated_at: self.updated_at,
    }
  }
}
