//! SQL schema for the Stagewise SQLite registry.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS runs (
    run_id      TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,            -- RFC 3339 UTC
    metrics     TEXT NOT NULL,            -- JSON object of name -> number
    params      TEXT NOT NULL DEFAULT '{}'
);

-- Versions are never deleted; only stage, description and updated_at change.
CREATE TABLE IF NOT EXISTS model_versions (
    version_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id          TEXT NOT NULL REFERENCES runs(run_id),
    stage           TEXT NOT NULL DEFAULT 'None',
                    -- 'None' | 'Staging' | 'Production' | 'Archived'
    description     TEXT NOT NULL DEFAULT '',
    artifact_uri    TEXT,
    artifact_sha256 TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

-- At most one version per serving stage.
CREATE UNIQUE INDEX IF NOT EXISTS model_versions_serving_idx
    ON model_versions(stage) WHERE stage IN ('Staging', 'Production');

CREATE INDEX IF NOT EXISTS model_versions_stage_idx ON model_versions(stage);

-- Append-only history of stage changes.
CREATE TABLE IF NOT EXISTS stage_transitions (
    transition_id INTEGER PRIMARY KEY AUTOINCREMENT,
    version_id    INTEGER NOT NULL REFERENCES model_versions(version_id),
    from_stage    TEXT NOT NULL,
    to_stage      TEXT NOT NULL,
    at            TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS stage_transitions_to_idx ON stage_transitions(to_stage);

PRAGMA user_version = 1;
";
