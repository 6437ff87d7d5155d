//! Sessions, operator users, provisioning credentials, and enrollment
//! tokens (§3, §4.2, §4.3). Credential verification itself (bcrypt
//! compare, TOTP window check) is not this module's job — it only stores
//! and retrieves the hashes/secrets; the API crate's identity service
//! does the comparisons.

use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

use challengectl_core::{
    AgentId, EnrollmentToken, EnrollmentTokenId, EntityIdType, OperatorUser, ProvisioningCredential,
    ProvisioningKeyId, Session, StoreError,
};

use crate::writer::Writer;

#[derive(Clone)]
pub struct IdentityStore {
    writer: Writer,
}

impl IdentityStore {
    pub fn new(writer: Writer) -> Self {
        Self { writer }
    }

    // ========================================================================
    // SESSIONS
    // ========================================================================

    /// 32 bytes of CSPRNG output, base62-encoded — matches enrollment
    /// token/credential generation (SPEC_FULL.md §4).
    pub fn generate_opaque_token() -> String {
        const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::thread_rng();
        (0..32)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect()
    }

    pub async fn create_session(
        &self,
        username: &str,
        totp_verified: bool,
        now: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        let token = Self::generate_opaque_token();
        let expires_at = now + chrono::Duration::seconds(Session::SLIDING_WINDOW_SECS);

        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "INSERT INTO sessions (token, username, expires_at, totp_verified, created_at)
                     VALUES ($1, $2, $3, $4, $5)",
                    &[&token, &username, &expires_at, &totp_verified, &now],
                )
                .await?;
                Ok(Session {
                    token,
                    username: username.to_string(),
                    expires_at,
                    totp_verified,
                    created_at: now,
                })
            })
            .await
    }

    pub async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let row = rc
                    .query_opt("SELECT * FROM sessions WHERE token = $1", &[&token])
                    .await?;
                Ok(row.map(|r| Session {
                    token: r.get("token"),
                    username: r.get("username"),
                    expires_at: r.get("expires_at"),
                    totp_verified: r.get("totp_verified"),
                    created_at: r.get("created_at"),
                }))
            })
            .await
    }

    /// Any authenticated request renews the session to `now + 24h` (§4.2).
    pub async fn renew_session(&self, token: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let expires_at = now + chrono::Duration::seconds(Session::SLIDING_WINDOW_SECS);
        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "UPDATE sessions SET expires_at = $2 WHERE token = $1",
                    &[&token, &expires_at],
                )
                .await?;
                Ok(())
            })
            .await
    }

    pub async fn mark_totp_verified(&self, token: &str) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "UPDATE sessions SET totp_verified = TRUE WHERE token = $1",
                    &[&token],
                )
                .await?;
                Ok(())
            })
            .await
    }

    pub async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute("DELETE FROM sessions WHERE token = $1", &[&token])
                    .await?;
                Ok(())
            })
            .await
    }

    /// Password or TOTP reset invalidates every session for the user
    /// (§4.2), optionally preserving the caller's own.
    pub async fn delete_sessions_for_user(
        &self,
        username: &str,
        except_token: Option<&str>,
    ) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                match except_token {
                    Some(keep) => {
                        wc.execute(
                            "DELETE FROM sessions WHERE username = $1 AND token != $2",
                            &[&username, &keep],
                        )
                        .await?;
                    }
                    None => {
                        wc.execute("DELETE FROM sessions WHERE username = $1", &[&username])
                            .await?;
                    }
                }
                Ok(())
            })
            .await
    }

    /// Session expiry sweep (§4.7): delete sessions with `expires < now`.
    pub async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute("DELETE FROM sessions WHERE expires_at < $1", &[&now])
                    .await
            })
            .await
    }

    // ========================================================================
    // OPERATOR USERS
    // ========================================================================

    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        password_change_required: bool,
        now: DateTime<Utc>,
    ) -> Result<OperatorUser, StoreError> {
        self.writer
            .with_write(|wc| async move {
                let existing = wc
                    .query_opt(
                        "SELECT 1 FROM operator_users WHERE username = $1",
                        &[&username],
                    )
                    .await?;
                if existing.is_some() {
                    return Err(StoreError::Conflict {
                        reason: format!("user '{username}' already exists"),
                    });
                }
                wc.execute(
                    "INSERT INTO operator_users
                     (username, password_hash, enabled, password_change_required, created_at)
                     VALUES ($1, $2, TRUE, $3, $4)",
                    &[&username, &password_hash, &password_change_required, &now],
                )
                .await?;
                Ok(OperatorUser {
                    username: username.to_string(),
                    password_hash: password_hash.to_string(),
                    totp_secret_encrypted: None,
                    enabled: true,
                    password_change_required,
                    created_at: now,
                    last_login_at: None,
                    permissions: Vec::new(),
                })
            })
            .await
    }

    pub async fn get_user(&self, username: &str) -> Result<Option<OperatorUser>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let row = rc
                    .query_opt(
                        "SELECT * FROM operator_users WHERE username = $1",
                        &[&username],
                    )
                    .await?;
                let Some(row) = row else { return Ok(None) };

                let perm_rows = rc
                    .query(
                        "SELECT permission FROM user_permissions WHERE username = $1",
                        &[&username],
                    )
                    .await?;
                let permissions = perm_rows
                    .iter()
                    .map(|r| r.get::<_, String>("permission"))
                    .collect();

                Ok(Some(OperatorUser {
                    username: row.get("username"),
                    password_hash: row.get("password_hash"),
                    totp_secret_encrypted: row.get("totp_secret_encrypted"),
                    enabled: row.get("enabled"),
                    password_change_required: row.get("password_change_required"),
                    created_at: row.get("created_at"),
                    last_login_at: row.get("last_login_at"),
                    permissions,
                }))
            })
            .await
    }

    pub async fn list_users(&self) -> Result<Vec<OperatorUser>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let rows = rc
                    .query("SELECT * FROM operator_users ORDER BY username", &[])
                    .await?;
                let mut users = Vec::with_capacity(rows.len());
                for row in &rows {
                    let username: String = row.get("username");
                    let perm_rows = rc
                        .query(
                            "SELECT permission FROM user_permissions WHERE username = $1",
                            &[&username],
                        )
                        .await?;
                    let permissions = perm_rows
                        .iter()
                        .map(|r| r.get::<_, String>("permission"))
                        .collect();
                    users.push(OperatorUser {
                        username,
                        password_hash: row.get("password_hash"),
                        totp_secret_encrypted: row.get("totp_secret_encrypted"),
                        enabled: row.get("enabled"),
                        password_change_required: row.get("password_change_required"),
                        created_at: row.get("created_at"),
                        last_login_at: row.get("last_login_at"),
                        permissions,
                    });
                }
                Ok(users)
            })
            .await
    }

    pub async fn set_password(
        &self,
        username: &str,
        new_hash: &str,
        password_change_required: bool,
    ) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                let updated = wc
                    .execute(
                        "UPDATE operator_users SET password_hash = $2, password_change_required = $3
                         WHERE username = $1",
                        &[&username, &new_hash, &password_change_required],
                    )
                    .await?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "operator_user",
                        id: username.to_string(),
                    });
                }
                Ok(())
            })
            .await
    }

    pub async fn set_totp_secret(
        &self,
        username: &str,
        encrypted_secret: Option<&[u8]>,
    ) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "UPDATE operator_users SET totp_secret_encrypted = $2 WHERE username = $1",
                    &[&username, &encrypted_secret],
                )
                .await?;
                Ok(())
            })
            .await
    }

    pub async fn set_user_enabled(&self, username: &str, enabled: bool) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "UPDATE operator_users SET enabled = $2 WHERE username = $1",
                    &[&username, &enabled],
                )
                .await?;
                Ok(())
            })
            .await
    }

    /// Operator user deletion (§6.3 user CRUD). `user_permissions` has a
    /// foreign key on `username` with no cascade, so that row and any
    /// live sessions are cleared first in the same transaction.
    pub async fn delete_user(&self, username: &str) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute("DELETE FROM user_permissions WHERE username = $1", &[&username])
                    .await?;
                wc.execute("DELETE FROM sessions WHERE username = $1", &[&username])
                    .await?;
                let deleted = wc
                    .execute("DELETE FROM operator_users WHERE username = $1", &[&username])
                    .await?;
                if deleted == 0 {
                    return Err(StoreError::NotFound {
                        entity: "operator_user",
                        id: username.to_string(),
                    });
                }
                Ok(())
            })
            .await
    }

    pub async fn record_login(&self, username: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "UPDATE operator_users SET last_login_at = $2 WHERE username = $1",
                    &[&username, &now],
                )
                .await?;
                Ok(())
            })
            .await
    }

    pub async fn grant_permission(&self, username: &str, permission: &str) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "INSERT INTO user_permissions (username, permission) VALUES ($1, $2)
                     ON CONFLICT DO NOTHING",
                    &[&username, &permission],
                )
                .await?;
                Ok(())
            })
            .await
    }

    pub async fn revoke_permission(&self, username: &str, permission: &str) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "DELETE FROM user_permissions WHERE username = $1 AND permission = $2",
                    &[&username, &permission],
                )
                .await?;
                Ok(())
            })
            .await
    }

    // ========================================================================
    // PROVISIONING CREDENTIALS
    // ========================================================================

    pub async fn create_provisioning_credential(
        &self,
        id: ProvisioningKeyId,
        credential_hash: &str,
        description: &str,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<ProvisioningCredential, StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "INSERT INTO provisioning_api_keys
                     (id, credential_hash, description, created_by, created_at, enabled)
                     VALUES ($1, $2, $3, $4, $5, TRUE)",
                    &[&id.as_uuid(), &credential_hash, &description, &created_by, &now],
                )
                .await?;
                Ok(ProvisioningCredential {
                    id,
                    credential_hash: credential_hash.to_string(),
                    description: description.to_string(),
                    created_by: created_by.to_string(),
                    created_at: now,
                    last_used_at: None,
                    enabled: true,
                })
            })
            .await
    }

    pub async fn list_provisioning_credentials(
        &self,
    ) -> Result<Vec<ProvisioningCredential>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let rows = rc
                    .query(
                        "SELECT * FROM provisioning_api_keys ORDER BY created_at",
                        &[],
                    )
                    .await?;
                Ok(rows
                    .iter()
                    .map(|r| ProvisioningCredential {
                        id: ProvisioningKeyId::new(r.get("id")),
                        credential_hash: r.get("credential_hash"),
                        description: r.get("description"),
                        created_by: r.get("created_by"),
                        created_at: r.get("created_at"),
                        last_used_at: r.get("last_used_at"),
                        enabled: r.get("enabled"),
                    })
                    .collect())
            })
            .await
    }

    pub async fn set_provisioning_credential_enabled(
        &self,
        id: ProvisioningKeyId,
        enabled: bool,
    ) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "UPDATE provisioning_api_keys SET enabled = $2 WHERE id = $1",
                    &[&id.as_uuid(), &enabled],
                )
                .await?;
                Ok(())
            })
            .await
    }

    pub async fn delete_provisioning_credential(&self, id: ProvisioningKeyId) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "DELETE FROM provisioning_api_keys WHERE id = $1",
                    &[&id.as_uuid()],
                )
                .await?;
                Ok(())
            })
            .await
    }

    pub async fn touch_provisioning_credential(
        &self,
        id: ProvisioningKeyId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "UPDATE provisioning_api_keys SET last_used_at = $2 WHERE id = $1",
                    &[&id.as_uuid(), &now],
                )
                .await?;
                Ok(())
            })
            .await
    }

    // ========================================================================
    // ENROLLMENT TOKENS
    // ========================================================================

    pub async fn create_enrollment_token(
        &self,
        target_agent_id: AgentId,
        created_by: &str,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentToken, StoreError> {
        let id = EnrollmentTokenId::now_v7();
        let token = IdentityStore::generate_opaque_token();
        let expires_at = now + ttl;

        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "INSERT INTO enrollment_tokens
                     (id, token, target_agent_id, created_by, created_at, expires_at, used)
                     VALUES ($1, $2, $3, $4, $5, $6, FALSE)",
                    &[
                        &id.as_uuid(),
                        &token,
                        &target_agent_id.as_uuid(),
                        &created_by,
                        &now,
                        &expires_at,
                    ],
                )
                .await?;
                Ok(EnrollmentToken {
                    id,
                    token,
                    target_agent_id,
                    created_by: created_by.to_string(),
                    created_at: now,
                    expires_at,
                    used: false,
                    used_at: None,
                    used_by_agent_id: None,
                })
            })
            .await
    }

    /// `ConsumeEnrollmentToken(token, agent-id, credential-hash,
    /// host-identity, now)` (§4.1, §4.3) — verifies the token is unused
    /// and unexpired, marks it used, and installs the host identity and
    /// fresh credential hash on the target agent, all in one transaction.
    pub async fn consume_enrollment_token(
        &self,
        token: &str,
        credential_hash: &str,
        ip: Option<&str>,
        hostname: &str,
        mac: Option<&str>,
        machine_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AgentId, StoreError> {
        self.writer
            .with_write(|wc| async move {
                let row = wc
                    .query_opt(
                        "SELECT id, target_agent_id, expires_at, used FROM enrollment_tokens WHERE token = $1",
                        &[&token],
                    )
                    .await?
                    .ok_or_else(|| StoreError::NotFound {
                        entity: "enrollment_token",
                        id: "<redacted>".into(),
                    })?;

                let used: bool = row.get("used");
                if used {
                    return Err(StoreError::Conflict {
                        reason: "enrollment token already used".into(),
                    });
                }
                let expires_at: DateTime<Utc> = row.get("expires_at");
                if expires_at < now {
                    return Err(StoreError::Conflict {
                        reason: "enrollment token expired".into(),
                    });
                }

                let target_agent_id: Uuid = row.get("target_agent_id");
                let token_id: Uuid = row.get("id");

                wc.execute(
                    "UPDATE enrollment_tokens
                     SET used = TRUE, used_at = $2, used_by_agent_id = $3
                     WHERE id = $1",
                    &[&token_id, &now, &target_agent_id],
                )
                .await?;

                wc.execute(
                    "UPDATE agents
                     SET credential_hash = $2, last_ip = $3, hostname = $4, mac_address = $5,
                         machine_id = $6, last_heartbeat = $7, status = 'online'
                     WHERE id = $1",
                    &[
                        &target_agent_id,
                        &credential_hash,
                        &ip,
                        &hostname,
                        &mac,
                        &machine_id,
                        &now,
                    ],
                )
                .await?;

                Ok(AgentId::new(target_agent_id))
            })
            .await
    }

    pub async fn get_enrollment_token(&self, token: &str) -> Result<Option<EnrollmentToken>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let row = rc
                    .query_opt("SELECT * FROM enrollment_tokens WHERE token = $1", &[&token])
                    .await?;
                Ok(row.map(|r| EnrollmentToken {
                    id: EnrollmentTokenId::new(r.get("id")),
                    token: r.get("token"),
                    target_agent_id: AgentId::new(r.get("target_agent_id")),
                    created_by: r.get("created_by"),
                    created_at: r.get("created_at"),
                    expires_at: r.get("expires_at"),
                    used: r.get("used"),
                    used_at: r.get("used_at"),
                    used_by_agent_id: r
                        .get::<_, Option<Uuid>>("used_by_agent_id")
                        .map(AgentId::new),
                }))
            })
            .await
    }

    pub async fn list_enrollment_tokens(&self) -> Result<Vec<EnrollmentToken>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let rows = rc
                    .query("SELECT * FROM enrollment_tokens ORDER BY created_at DESC", &[])
                    .await?;
                Ok(rows
                    .iter()
                    .map(|r| EnrollmentToken {
                        id: EnrollmentTokenId::new(r.get("id")),
                        token: r.get("token"),
                        target_agent_id: AgentId::new(r.get("target_agent_id")),
                        created_by: r.get("created_by"),
                        created_at: r.get("created_at"),
                        expires_at: r.get("expires_at"),
                        used: r.get("used"),
                        used_at: r.get("used_at"),
                        used_by_agent_id: r
                            .get::<_, Option<Uuid>>("used_by_agent_id")
                            .map(AgentId::new),
                    })
                    .collect())
            })
            .await
    }

    pub async fn delete_enrollment_token(&self, id: EnrollmentTokenId) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute("DELETE FROM enrollment_tokens WHERE id = $1", &[&id.as_uuid()])
                    .await?;
                Ok(())
            })
            .await
    }
}
