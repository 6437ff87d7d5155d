//! Row → domain-type mapping helpers shared across the store modules.

use challengectl_core::{
    Agent, AgentKind, AgentStatus, Challenge, ChallengeSpec, ChallengeStatus, DeviceDescriptor,
    EntityIdType, Outcome, StoreError, TransmissionRecord,
};
use tokio_postgres::Row;

pub fn parse_agent_kind(s: &str) -> Result<AgentKind, StoreError> {
    match s {
        "transmitter" => Ok(AgentKind::Transmitter),
        "receiver" => Ok(AgentKind::Receiver),
        other => Err(StoreError::Backend {
            reason: format!("unknown agent kind '{other}' in row"),
        }),
    }
}

pub fn agent_kind_str(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Transmitter => "transmitter",
        AgentKind::Receiver => "receiver",
    }
}

pub fn parse_agent_status(s: &str) -> Result<AgentStatus, StoreError> {
    match s {
        "online" => Ok(AgentStatus::Online),
        "offline" => Ok(AgentStatus::Offline),
        other => Err(StoreError::Backend {
            reason: format!("unknown agent status '{other}' in row"),
        }),
    }
}

pub fn agent_status_str(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Online => "online",
        AgentStatus::Offline => "offline",
    }
}

pub fn row_to_agent(row: &Row) -> Result<Agent, StoreError> {
    let devices_json: serde_json::Value = row.get("devices");
    let devices: Vec<DeviceDescriptor> =
        serde_json::from_value(devices_json).map_err(|e| StoreError::Backend {
            reason: format!("corrupt devices column: {e}"),
        })?;

    Ok(Agent {
        id: challengectl_core::AgentId::new(row.get("id")),
        kind: parse_agent_kind(row.get("kind"))?,
        hostname: row.get("hostname"),
        last_ip: row.get("last_ip"),
        mac_address: row.get("mac_address"),
        machine_id: row.get("machine_id"),
        status: parse_agent_status(row.get("status"))?,
        enabled: row.get("enabled"),
        last_heartbeat: row.get("last_heartbeat"),
        credential_hash: row.get("credential_hash"),
        devices,
        push_connected: row.get("push_connected"),
        created_at: row.get("created_at"),
    })
}

pub fn parse_challenge_status(s: &str) -> Result<ChallengeStatus, StoreError> {
    match s {
        "queued" => Ok(ChallengeStatus::Queued),
        "waiting" => Ok(ChallengeStatus::Waiting),
        "assigned" => Ok(ChallengeStatus::Assigned),
        "disabled" => Ok(ChallengeStatus::Disabled),
        other => Err(StoreError::Backend {
            reason: format!("unknown challenge status '{other}' in row"),
        }),
    }
}

pub fn challenge_status_str(status: ChallengeStatus) -> &'static str {
    match status {
        ChallengeStatus::Queued => "queued",
        ChallengeStatus::Waiting => "waiting",
        ChallengeStatus::Assigned => "assigned",
        ChallengeStatus::Disabled => "disabled",
    }
}

pub fn row_to_challenge(row: &Row) -> Result<Challenge, StoreError> {
    let spec_json: serde_json::Value = row.get("spec");
    let spec: ChallengeSpec = serde_json::from_value(spec_json).map_err(|e| StoreError::Backend {
        reason: format!("corrupt spec column: {e}"),
    })?;

    let owner_agent_id: Option<uuid::Uuid> = row.get("owner_agent_id");

    Ok(Challenge {
        id: challengectl_core::ChallengeId::new(row.get("id")),
        name: row.get("name"),
        spec,
        status: parse_challenge_status(row.get("status"))?,
        priority: row.get("priority"),
        last_transmission_at: row.get("last_transmission_at"),
        transmission_count: row.get("transmission_count"),
        owner_agent_id: owner_agent_id.map(challengectl_core::AgentId::new),
        assignment_begin: row.get("assignment_begin"),
        assignment_expiry: row.get("assignment_expiry"),
        enabled: row.get("enabled"),
        created_at: row.get("created_at"),
    })
}

pub fn parse_outcome(s: &str) -> Result<Outcome, StoreError> {
    match s {
        "success" => Ok(Outcome::Success),
        "failure" => Ok(Outcome::Failure),
        other => Err(StoreError::Backend {
            reason: format!("unknown outcome '{other}' in row"),
        }),
    }
}

pub fn outcome_str(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Success => "success",
        Outcome::Failure => "failure",
    }
}

pub fn row_to_transmission(row: &Row) -> Result<TransmissionRecord, StoreError> {
    let outcome: Option<String> = row.get("outcome");
    Ok(TransmissionRecord {
        id: challengectl_core::TransmissionId::new(row.get("id")),
        challenge_id: challengectl_core::ChallengeId::new(row.get("challenge_id")),
        agent_id: challengectl_core::AgentId::new(row.get("agent_id")),
        device_id: row.get("device_id"),
        frequency_hz: row.get("frequency_hz"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        outcome: outcome.map(|s| parse_outcome(&s)).transpose()?,
        error: row.get("error"),
    })
}
