//! Database schema and migrations for tierbox.
//!
//! Migrations are applied sequentially when the database is first opened
//! or upgraded. Timestamps are TEXT in `datetime::DB_TIMESTAMP_FORMAT`.

/// Database migrations (SQLite).
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
#[cfg(feature = "sqlite")]
pub const MIGRATIONS: &[&str] = &[
    // v1: Accounts with tier state and the per-tier storage ledger
    r#"
CREATE TABLE accounts (
    id              BIGINT PRIMARY KEY,
    tier            TEXT NOT NULL DEFAULT 'free',     -- 'free', 'premium'
    tier_expiry     TEXT,                             -- NULL = no scheduled expiry
    lapsed_at       TEXT,                             -- set when a lapse was persisted
    free_used       BIGINT NOT NULL DEFAULT 0,
    free_limit      BIGINT NOT NULL,
    premium_used    BIGINT NOT NULL DEFAULT 0,
    premium_limit   BIGINT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX idx_accounts_tier_expiry ON accounts(tier, tier_expiry);
"#,
    // v2: File records
    r#"
CREATE TABLE files (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id            BIGINT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    display_name        TEXT NOT NULL,
    size_bytes          BIGINT NOT NULL,
    blob_key            TEXT NOT NULL,
    content_type        TEXT NOT NULL,
    uploaded_with_tier  TEXT NOT NULL,                -- fixed at upload time
    created_at          TEXT NOT NULL
);

CREATE INDEX idx_files_owner_id ON files(owner_id);
"#,
];

/// Database migrations (PostgreSQL).
#[cfg(feature = "postgres")]
pub const MIGRATIONS: &[&str] = &[
    // v1: Accounts with tier state and the per-tier storage ledger
    r#"
CREATE TABLE accounts (
    id              BIGINT PRIMARY KEY,
    tier            TEXT NOT NULL DEFAULT 'free',
    tier_expiry     TEXT,
    lapsed_at       TEXT,
    free_used       BIGINT NOT NULL DEFAULT 0,
    free_limit      BIGINT NOT NULL,
    premium_used    BIGINT NOT NULL DEFAULT 0,
    premium_limit   BIGINT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX idx_accounts_tier_expiry ON accounts(tier, tier_expiry);
"#,
    // v2: File records
    r#"
CREATE TABLE files (
    id                  BIGSERIAL PRIMARY KEY,
    owner_id            BIGINT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    display_name        TEXT NOT NULL,
    size_bytes          BIGINT NOT NULL,
    blob_key            TEXT NOT NULL,
    content_type        TEXT NOT NULL,
    uploaded_with_tier  TEXT NOT NULL,
    created_at          TEXT NOT NULL
);

CREATE INDEX idx_files_owner_id ON files(owner_id);
"#,
];
