//! Enumerated states from the data model (§3).

use serde::{Deserialize, Serialize};

/// §3 Agent.kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Transmitter,
    Receiver,
}

/// §3 Agent.status — derived from heartbeats, not set directly by handlers
/// except sweeps and explicit signout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Offline,
}

/// §4.5.1 challenge state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Queued,
    Waiting,
    Assigned,
    Disabled,
}

/// §3 Transmission record outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// §3 Recording assignment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingAssignmentStatus {
    Pending,
    Recording,
    Completed,
    Cancelled,
    Failed,
}

/// §6.4 modulation kind. The variant drives which modulation-specific knobs
/// are required on a `ChallengeSpec` (§9 "Dynamic blob configuration").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulationKind {
    Cw,
    Fm,
    Am,
    Audio,
    Fhss,
    Digital,
}
