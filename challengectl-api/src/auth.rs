//! Credential verification: operator password + TOTP, agent bearer token
//! with host-identity binding, and provisioning bearer token (§3, §4.2).
//! This module only compares; `IdentityStore`/`Store` own persistence.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use totp_rs::{Algorithm, Secret, TOTP};

use challengectl_core::{Agent, AuthError};

/// §9: the TOTP secret is held as a `SecretString` once decoded into
/// memory, mirroring the teacher's `JwtSecret` redacted-`Debug` pattern.
#[derive(Clone)]
pub struct TotpSecret(SecretString);

impl TotpSecret {
    pub fn from_base32(encoded: &str) -> Self {
        Self(SecretString::new(encoded.to_string().into()))
    }

    pub fn generate() -> Self {
        let secret = Secret::generate_secret();
        Self(SecretString::new(secret.to_encoded().to_string().into()))
    }

    pub fn expose_base32(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for TotpSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TotpSecret([REDACTED])")
    }
}

fn build_totp(secret: &TotpSecret, username: &str) -> Result<TOTP, AuthError> {
    let secret_bytes = Secret::Encoded(secret.expose_base32().to_string())
        .to_bytes()
        .map_err(|_| AuthError::Invalid)?;
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret_bytes,
        Some("ChallengeCtl".to_string()),
        username.to_string(),
    )
    .map_err(|_| AuthError::Invalid)
}

/// Verify a presented TOTP code against the stored secret at `now`, given
/// a previously-consumed-code set for this session (replay protection,
/// §4.7 sweep owns pruning the shared cache this is drawn from).
pub fn verify_totp_code(
    secret: &TotpSecret,
    username: &str,
    code: &str,
    now: DateTime<Utc>,
    replay_cache: &TotpReplayCache,
) -> Result<(), AuthError> {
    let totp = build_totp(secret, username)?;
    let valid = totp
        .check(code, now.timestamp() as u64);
    if !valid {
        return Err(AuthError::Invalid);
    }
    if !replay_cache.record_if_unused(username, code, now) {
        return Err(AuthError::Replay);
    }
    Ok(())
}

/// Per-process cache of (username, code) pairs already accepted, so a
/// leaked 30s code can't be replayed. Pruned by the TOTP-replay sweep
/// (§4.7), not by this struct, since ChallengeCtl keeps all process-local
/// state here in the API crate per §5.
#[derive(Default)]
pub struct TotpReplayCache {
    seen: StdMutex<HashSet<(String, String, i64)>>,
}

impl TotpReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `(username, code)` keyed also by the 30s time-step so the
    /// same code is rejected only within the window it was valid for.
    fn record_if_unused(&self, username: &str, code: &str, now: DateTime<Utc>) -> bool {
        let step = now.timestamp() / 30;
        let key = (username.to_string(), code.to_string(), step);
        let mut seen = self.seen.lock().expect("replay cache mutex poisoned");
        seen.insert(key)
    }

    /// Drops entries whose time-step is more than two windows old.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let step = now.timestamp() / 30;
        let mut seen = self.seen.lock().expect("replay cache mutex poisoned");
        let before = seen.len();
        seen.retain(|(_, _, entry_step)| step - entry_step <= 2);
        before - seen.len()
    }
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(password, cost).map_err(|_| AuthError::Invalid)
}

pub fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    match bcrypt::verify(password, hash) {
        Ok(true) => Ok(()),
        Ok(false) => Err(AuthError::Invalid),
        Err(_) => Err(AuthError::Invalid),
    }
}

pub fn hash_credential(credential: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(credential, cost).map_err(|_| AuthError::Invalid)
}

/// Host identity presented with an agent request (§3, §4.2).
#[derive(Debug, Clone, Default)]
pub struct PresentedHostIdentity {
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub mac: Option<String>,
    pub machine_id: Option<String>,
}

/// §4.2 host binding: verify the bearer token against the agent's stored
/// credential hash, then require at least two matching factors among
/// {(ip & hostname both match), mac matches, machine-id matches} unless
/// the agent's last heartbeat is stale enough to count as reconnecting.
pub fn verify_agent_credential(
    agent: &Agent,
    presented_token: &str,
    presented: &PresentedHostIdentity,
    now: DateTime<Utc>,
    reconnect_grace_secs: i64,
) -> Result<(), AuthError> {
    let ok = bcrypt::verify(presented_token, &agent.credential_hash).map_err(|_| AuthError::Invalid)?;
    if !ok {
        return Err(AuthError::Invalid);
    }

    let stale = match agent.last_heartbeat {
        Some(hb) => (now - hb).num_seconds() > reconnect_grace_secs,
        None => true,
    };
    if stale {
        return Ok(());
    }

    let ip_hostname_match = agent.last_ip.as_deref() == presented.ip.as_deref()
        && presented.ip.is_some()
        && agent.hostname == presented.hostname.clone().unwrap_or_default();
    let mac_match = presented.mac.is_some() && agent.mac_address.as_deref() == presented.mac.as_deref();
    let machine_id_match =
        presented.machine_id.is_some() && agent.machine_id.as_deref() == presented.machine_id.as_deref();

    let matching = [ip_hostname_match, mac_match, machine_id_match]
        .iter()
        .filter(|m| **m)
        .count();

    if matching >= 2 {
        Ok(())
    } else {
        tracing::warn!(
            agent_id = %agent.id,
            presented_ip = ?presented.ip,
            presented_hostname = ?presented.hostname,
            stored_ip = ?agent.last_ip,
            stored_hostname = %agent.hostname,
            "agent host identity mismatch"
        );
        Err(AuthError::HostMismatch)
    }
}

pub fn verify_provisioning_credential(presented: &str, stored_hash: &str) -> Result<(), AuthError> {
    match bcrypt::verify(presented, stored_hash) {
        Ok(true) => Ok(()),
        Ok(false) => Err(AuthError::Invalid),
        Err(_) => Err(AuthError::Invalid),
    }
}

/// 32 bytes of CSPRNG output, base62-encoded (§4, enrollment tokens and
/// agent credentials both use this form).
pub fn generate_credential() -> String {
    challengectl_store::IdentityStore::generate_opaque_token()
}

pub type SharedReplayCache = Arc<TotpReplayCache>;

#[cfg(test)]
mod tests {
    use super::*;
    use challengectl_core::{AgentKind, AgentStatus, EntityIdType};

    fn test_agent(now: DateTime<Utc>) -> Agent {
        Agent {
            id: challengectl_core::AgentId::now_v7(),
            kind: AgentKind::Transmitter,
            hostname: "tx-01".to_string(),
            last_ip: Some("10.0.0.5".to_string()),
            mac_address: Some("aa:bb:cc:dd:ee:ff".to_string()),
            machine_id: Some("machine-1".to_string()),
            status: AgentStatus::Online,
            enabled: true,
            last_heartbeat: Some(now),
            credential_hash: hash_credential("s3cret", 4).unwrap(),
            devices: vec![],
            push_connected: false,
            created_at: now,
        }
    }

    #[test]
    fn password_round_trips() {
        let hash = hash_password("hunter2", 4).unwrap();
        assert!(verify_password("hunter2", &hash).is_ok());
        assert!(verify_password("wrong", &hash).is_err());
    }

    #[test]
    fn host_binding_accepts_full_match() {
        let now = Utc::now();
        let agent = test_agent(now);
        let presented = PresentedHostIdentity {
            ip: Some("10.0.0.5".to_string()),
            hostname: Some("tx-01".to_string()),
            mac: Some("aa:bb:cc:dd:ee:ff".to_string()),
            machine_id: Some("machine-1".to_string()),
        };
        assert!(verify_agent_credential(&agent, "s3cret", &presented, now, 90).is_ok());
    }

    #[test]
    fn host_binding_rejects_single_factor_match() {
        let now = Utc::now();
        let agent = test_agent(now);
        let presented = PresentedHostIdentity {
            ip: Some("10.0.0.99".to_string()),
            hostname: Some("different-host".to_string()),
            mac: Some("aa:bb:cc:dd:ee:ff".to_string()),
            machine_id: Some("different-machine".to_string()),
        };
        let result = verify_agent_credential(&agent, "s3cret", &presented, now, 90);
        assert!(matches!(result, Err(AuthError::HostMismatch)));
    }

    #[test]
    fn host_binding_accepts_mismatch_during_reconnect_grace() {
        let now = Utc::now();
        let mut agent = test_agent(now);
        agent.last_heartbeat = Some(now - chrono::Duration::seconds(200));
        let presented = PresentedHostIdentity {
            ip: Some("10.0.0.99".to_string()),
            hostname: Some("different-host".to_string()),
            mac: None,
            machine_id: None,
        };
        assert!(verify_agent_credential(&agent, "s3cret", &presented, now, 90).is_ok());
    }

    #[test]
    fn host_binding_rejects_bad_token_regardless_of_identity() {
        let now = Utc::now();
        let agent = test_agent(now);
        let presented = PresentedHostIdentity {
            ip: Some("10.0.0.5".to_string()),
            hostname: Some("tx-01".to_string()),
            mac: Some("aa:bb:cc:dd:ee:ff".to_string()),
            machine_id: Some("machine-1".to_string()),
        };
        let result = verify_agent_credential(&agent, "wrong-token", &presented, now, 90);
        assert!(matches!(result, Err(AuthError::Invalid)));
    }

    #[test]
    fn totp_replay_cache_rejects_same_code_twice() {
        let cache = TotpReplayCache::new();
        let now = Utc::now();
        assert!(cache.record_if_unused("alice", "123456", now));
        assert!(!cache.record_if_unused("alice", "123456", now));
    }

    #[test]
    fn totp_replay_cache_prunes_old_steps() {
        let cache = TotpReplayCache::new();
        let now = Utc::now();
        cache.record_if_unused("alice", "123456", now);
        let later = now + chrono::Duration::seconds(200);
        let pruned = cache.prune(later);
        assert_eq!(pruned, 1);
    }
}
