//! Deletion reconciliation for issues that left the open listing.

use std::collections::HashSet;
use tracing::{debug, info};

use crate::github::types::RepoRef;
use crate::store::{Store, StoreError};

/// Delete cached issues for `repo` whose numbers are absent from `keep`.
/// Returns how many issues were removed.
///
/// `keep` must come from a complete full fetch pass: the union of every
/// number the pass processed and every number it skipped as a pull
/// request. A partial or incremental set is a window of recent activity,
/// not a census, and must never reach this function.
///
/// Disappearance from the open listing is all this detects; closed,
/// deleted, and converted-to-PR issues are indistinguishable here.
pub fn reconcile(store: &Store, repo: &RepoRef, keep: &HashSet<i64>) -> Result<u64, StoreError> {
  let mut deleted = 0;
  for number in store.issue_numbers(repo)? {
    if keep.contains(&number) {
      continue;
    }
    if store.delete_issue(repo, number)? {
      debug!(number, "dropped issue missing from remote listing");
      deleted += 1;
    }
  }
  if deleted > 0 {
    info!(repo = %repo, deleted, "removed issues no longer open upstream");
  }
  Ok(deleted)
}
