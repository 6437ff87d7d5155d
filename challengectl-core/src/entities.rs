//! Entity types from the data model (§3). These mirror table rows one to
//! one; the Store is the only component allowed to construct or mutate
//! them outside of tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::challenge_spec::ChallengeSpec;
use crate::enums::{AgentKind, AgentStatus, ChallengeStatus, ModulationKind, Outcome, RecordingAssignmentStatus};
use crate::ids::{AgentId, ChallengeId, EnrollmentTokenId, ProvisioningKeyId, RecordingAssignmentId, RecordingId, TransmissionId};

/// A device descriptor an agent reports at enrollment/register time:
/// which SDR or receiver hardware it has attached, and what it can do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub device_id: String,
    pub label: String,
    pub enabled: bool,
    /// §4.5.3: if empty, the device is treated as unrestricted.
    pub frequency_limits: Vec<FrequencyRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyRange {
    pub min_hz: i64,
    pub max_hz: i64,
}

impl FrequencyRange {
    pub fn contains(&self, hz: i64) -> bool {
        hz >= self.min_hz && hz <= self.max_hz
    }
}

/// §3 Agent — a worker (transmitter) or receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub kind: AgentKind,
    pub hostname: String,
    pub last_ip: Option<String>,
    pub mac_address: Option<String>,
    pub machine_id: Option<String>,
    pub status: AgentStatus,
    pub enabled: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub credential_hash: String,
    pub devices: Vec<DeviceDescriptor>,
    /// Receivers only: true while a push-channel subscriber is attached.
    pub push_connected: bool,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// §4.2 host-binding: the agent is treated as reconnecting (host
    /// comparison skipped) once its heartbeat has gone silent this long.
    pub const RECONNECT_GRACE_SECS: i64 = 90;

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.last_heartbeat {
            Some(hb) => (now - hb).num_seconds() > Self::RECONNECT_GRACE_SECS,
            None => true,
        }
    }
}

/// §3 Challenge — a named transmission specification plus live schedule state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: ChallengeId,
    pub name: String,
    pub spec: ChallengeSpec,
    pub status: ChallengeStatus,
    pub priority: i32,
    pub last_transmission_at: Option<DateTime<Utc>>,
    pub transmission_count: i64,
    pub owner_agent_id: Option<AgentId>,
    pub assignment_begin: Option<DateTime<Utc>>,
    pub assignment_expiry: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Challenge {
    /// §4.5.6.
    pub const ASSIGNMENT_TTL_SECS: i64 = 5 * 60;

    /// §3 invariant: status = assigned iff owner is Some iff expiry is Some.
    pub fn assignment_invariant_holds(&self) -> bool {
        let assigned = matches!(self.status, ChallengeStatus::Assigned);
        assigned == self.owner_agent_id.is_some() && assigned == self.assignment_expiry.is_some()
    }

    /// §4.5.5: mean of the declared delay bounds, the source's chosen
    /// interpretation over uniform sampling (§9).
    pub fn reassignment_delay_secs(&self) -> i64 {
        (self.spec.min_delay_secs + self.spec.max_delay_secs) / 2
    }
}

/// §3 Transmission record — append-only historical fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionRecord {
    pub id: TransmissionId,
    pub challenge_id: ChallengeId,
    pub agent_id: AgentId,
    pub device_id: Option<String>,
    pub frequency_hz: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<Outcome>,
    pub error: Option<String>,
}

/// §3 Artifact — immutable content-addressed blob metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub hash: String,
    pub original_filename: String,
    pub size_bytes: i64,
    pub media_type: String,
    pub storage_path: String,
    pub created_at: DateTime<Utc>,
}

/// §3 Enrollment token — single-use binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentToken {
    pub id: EnrollmentTokenId,
    pub token: String,
    pub target_agent_id: AgentId,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by_agent_id: Option<AgentId>,
}

/// §3 Session — operator login context, sliding 24h window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
    pub totp_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub const SLIDING_WINDOW_SECS: i64 = 24 * 60 * 60;
}

/// §3 Operator user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorUser {
    pub username: String,
    pub password_hash: String,
    /// Encrypted at rest by the caller; see SPEC_FULL.md §3 for the
    /// Open-Question resolution on secret handling.
    pub totp_secret_encrypted: Option<Vec<u8>>,
    pub enabled: bool,
    pub password_change_required: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub permissions: Vec<String>,
}

/// §3 Provisioning credential — stateless automated enrollment key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningCredential {
    pub id: ProvisioningKeyId,
    pub credential_hash: String,
    pub description: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

/// §3 Recording assignment — ephemeral directive to a receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingAssignment {
    pub id: RecordingAssignmentId,
    pub receiver_agent_id: AgentId,
    pub challenge_id: ChallengeId,
    pub transmission_id: TransmissionId,
    pub frequency_hz: i64,
    pub assigned_at: DateTime<Utc>,
    pub expected_start: DateTime<Utc>,
    pub expected_duration_secs: i64,
    pub status: RecordingAssignmentStatus,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// §3 Recording — historical capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub id: RecordingId,
    pub challenge_id: ChallengeId,
    pub receiver_agent_id: AgentId,
    pub transmission_id: TransmissionId,
    pub frequency_hz: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<Outcome>,
    pub image_path: Option<String>,
    pub image_width: Option<i32>,
    pub image_height: Option<i32>,
    pub sample_rate_hz: Option<i64>,
    pub duration_secs: Option<i64>,
    pub error: Option<String>,
}

/// §3 System state — process-wide flags, stored as a flat key-value map
/// in the Store but typed here for callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub paused: bool,
    pub conference_name: Option<String>,
    pub conference_start: Option<DateTime<Utc>>,
    pub conference_stop: Option<DateTime<Utc>>,
    pub conference_timezone: Option<String>,
    pub daily_hours: BTreeMap<String, String>,
}

impl Default for SystemState {
    fn default() -> Self {
        SystemState {
            paused: false,
            conference_name: None,
            conference_start: None,
            conference_stop: None,
            conference_timezone: None,
            daily_hours: BTreeMap::new(),
        }
    }
}

/// Not a table: the already-sampled dispatch payload returned to a
/// polling worker from `TryAssignChallenge` (§4.5.2, §6.1 `poll`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedChallenge {
    pub challenge_id: ChallengeId,
    pub transmission_id: TransmissionId,
    pub name: String,
    pub frequency_hz: i64,
    pub modulation: ModulationKind,
    pub payload_text: Option<String>,
    pub payload_artifact_hash: Option<String>,
    pub modulation_params: serde_json::Value,
    pub assignment_expiry: DateTime<Utc>,
}
