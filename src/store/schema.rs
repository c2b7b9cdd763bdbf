//! Embedded schema for the local issue cache.

/// Applied with `execute_batch` on every open; idempotent.
pub const SCHEMA: &str = r#"
-- Mirrored issues, one row per (repo, number)
CREATE TABLE IF NOT EXISTS issues (
    repo TEXT NOT NULL,
    number INTEGER NOT NULL,
    title TEXT NOT NULL,
    body TEXT,
    state TEXT NOT NULL,
    author TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    closed_at TEXT,
    comment_count INTEGER NOT NULL DEFAULT 0,
    labels TEXT NOT NULL DEFAULT '[]',
    assignees TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (repo, number)
);

CREATE INDEX IF NOT EXISTS idx_issues_updated
    ON issues(repo, updated_at DESC);

-- Comments belong to exactly one issue in the same repo; deleting the
-- issue removes them via the cascade
CREATE TABLE IF NOT EXISTS comments (
    repo TEXT NOT NULL,
    id INTEGER NOT NULL,
    issue_number INTEGER NOT NULL,
    author TEXT,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (repo, id),
    FOREIGN KEY (repo, issue_number)
        REFERENCES issues(repo, number) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_comments_issue
    ON comments(repo, issue_number, created_at);

-- One row per repo; last_sync_at only advances after a fully
-- successful pass
CREATE TABLE IF NOT EXISTS sync_metadata (
    repo TEXT PRIMARY KEY,
    last_sync_at TEXT NOT NULL
);
"#;
