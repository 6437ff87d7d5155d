//! Idempotent schema bootstrap.
//!
//! Run once at startup, not as a migration framework: every statement is
//! `CREATE TABLE IF NOT EXISTS`, so repeated runs against an already
//! initialized database are no-ops.

pub const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS agents (
        id              UUID PRIMARY KEY,
        kind            TEXT NOT NULL,
        hostname        TEXT NOT NULL,
        last_ip         TEXT,
        mac_address     TEXT,
        machine_id      TEXT,
        status          TEXT NOT NULL DEFAULT 'offline',
        enabled         BOOLEAN NOT NULL DEFAULT TRUE,
        last_heartbeat  TIMESTAMPTZ,
        credential_hash TEXT NOT NULL,
        devices         JSONB NOT NULL DEFAULT '[]',
        push_connected  BOOLEAN NOT NULL DEFAULT FALSE,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS challenges (
        id                  UUID PRIMARY KEY,
        name                TEXT NOT NULL UNIQUE,
        spec                JSONB NOT NULL,
        status              TEXT NOT NULL DEFAULT 'queued',
        priority            INTEGER NOT NULL DEFAULT 0,
        last_transmission_at TIMESTAMPTZ,
        transmission_count  BIGINT NOT NULL DEFAULT 0,
        owner_agent_id      UUID REFERENCES agents(id),
        assignment_begin    TIMESTAMPTZ,
        assignment_expiry   TIMESTAMPTZ,
        enabled             BOOLEAN NOT NULL DEFAULT TRUE,
        created_at          TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_challenges_status ON challenges(status)",
    "CREATE INDEX IF NOT EXISTS idx_challenges_owner ON challenges(owner_agent_id)",
    r#"
    CREATE TABLE IF NOT EXISTS transmissions (
        id            UUID PRIMARY KEY,
        challenge_id  UUID NOT NULL REFERENCES challenges(id),
        agent_id      UUID NOT NULL REFERENCES agents(id),
        device_id     TEXT,
        frequency_hz  BIGINT NOT NULL,
        started_at    TIMESTAMPTZ NOT NULL,
        completed_at  TIMESTAMPTZ,
        outcome       TEXT,
        error         TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transmissions_challenge ON transmissions(challenge_id, started_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS artifacts (
        hash              TEXT PRIMARY KEY,
        original_filename TEXT NOT NULL,
        size_bytes        BIGINT NOT NULL,
        media_type        TEXT NOT NULL,
        storage_path      TEXT NOT NULL,
        created_at        TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS enrollment_tokens (
        id                 UUID PRIMARY KEY,
        token              TEXT NOT NULL UNIQUE,
        target_agent_id    UUID NOT NULL REFERENCES agents(id),
        created_by         TEXT NOT NULL,
        created_at         TIMESTAMPTZ NOT NULL DEFAULT now(),
        expires_at         TIMESTAMPTZ NOT NULL,
        used               BOOLEAN NOT NULL DEFAULT FALSE,
        used_at            TIMESTAMPTZ,
        used_by_agent_id   UUID REFERENCES agents(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        token          TEXT PRIMARY KEY,
        username       TEXT NOT NULL,
        expires_at     TIMESTAMPTZ NOT NULL,
        totp_verified  BOOLEAN NOT NULL DEFAULT FALSE,
        created_at     TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON sessions(expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS operator_users (
        username                TEXT PRIMARY KEY,
        password_hash           TEXT NOT NULL,
        totp_secret_encrypted   BYTEA,
        enabled                 BOOLEAN NOT NULL DEFAULT TRUE,
        password_change_required BOOLEAN NOT NULL DEFAULT FALSE,
        created_at              TIMESTAMPTZ NOT NULL DEFAULT now(),
        last_login_at           TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_permissions (
        username   TEXT NOT NULL REFERENCES operator_users(username),
        permission TEXT NOT NULL,
        PRIMARY KEY (username, permission)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS provisioning_api_keys (
        id               UUID PRIMARY KEY,
        credential_hash  TEXT NOT NULL,
        description      TEXT NOT NULL,
        created_by       TEXT NOT NULL,
        created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
        last_used_at     TIMESTAMPTZ,
        enabled          BOOLEAN NOT NULL DEFAULT TRUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS recording_assignments (
        id                    UUID PRIMARY KEY,
        receiver_agent_id     UUID NOT NULL REFERENCES agents(id),
        challenge_id          UUID NOT NULL REFERENCES challenges(id),
        transmission_id       UUID NOT NULL REFERENCES transmissions(id),
        frequency_hz          BIGINT NOT NULL,
        assigned_at           TIMESTAMPTZ NOT NULL DEFAULT now(),
        expected_start        TIMESTAMPTZ NOT NULL,
        expected_duration_secs BIGINT NOT NULL,
        status                TEXT NOT NULL DEFAULT 'pending',
        cancelled_at          TIMESTAMPTZ,
        completed_at          TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_recording_assignments_receiver ON recording_assignments(receiver_agent_id)",
    r#"
    CREATE TABLE IF NOT EXISTS recordings (
        id                 UUID PRIMARY KEY,
        challenge_id       UUID NOT NULL REFERENCES challenges(id),
        receiver_agent_id  UUID NOT NULL REFERENCES agents(id),
        transmission_id    UUID NOT NULL REFERENCES transmissions(id),
        frequency_hz       BIGINT NOT NULL,
        started_at         TIMESTAMPTZ NOT NULL,
        completed_at       TIMESTAMPTZ,
        outcome            TEXT,
        image_path         TEXT,
        image_width        INTEGER,
        image_height       INTEGER,
        sample_rate_hz     BIGINT,
        duration_secs      BIGINT,
        error              TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_recordings_challenge ON recordings(challenge_id, started_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS system_state (
        key    TEXT PRIMARY KEY,
        value  JSONB NOT NULL
    )
    "#,
];

/// Runs every bootstrap statement in order against the given client.
/// Safe to call on every process start (§6.6: the Store owns one
/// relational database; nothing else is authoritative).
pub async fn bootstrap(client: &tokio_postgres::Client) -> Result<(), tokio_postgres::Error> {
    for statement in STATEMENTS {
        client.batch_execute(statement).await?;
    }
    Ok(())
}
