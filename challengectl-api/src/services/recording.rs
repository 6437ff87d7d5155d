//! Recording Coordinator (§4.6): decides whether a dispatched transmission
//! is worth recording and, if so, pushes a capture directive to one
//! receiver. Grounded in the same store-composition style as the
//! Assignment Engine, minus any writer-lock requirement — every write here
//! is a single independent statement, not a multi-step state transition.

use chrono::{DateTime, Utc};

use challengectl_core::{
    Agent, AgentId, AgentKind, AgentStatus, Challenge, EntityIdType, RecordingAssignmentStatus,
    TransmissionId,
};
use challengectl_store::Persistence;

use crate::config::RecordingConfig;
use crate::error::ApiResult;
use crate::ws::{EventBus, WsEvent};

/// §4.6 priority score, clamped to 1000.0. A challenge with no prior
/// recording always scores the maximum.
async fn priority_score(
    persistence: &Persistence,
    challenge: &Challenge,
    now: DateTime<Utc>,
) -> ApiResult<f64> {
    let last_recording = persistence
        .recordings
        .list_recordings(Some(challenge.id), 1)
        .await?
        .into_iter()
        .next();

    let Some(last) = last_recording else {
        return Ok(1000.0);
    };

    let since = last.completed_at.unwrap_or(last.started_at);
    let minutes_since = (now - since).num_seconds() as f64 / 60.0;

    // Recent history is enough to count transmissions since the last
    // recording; a challenge that outruns this window just underestimates
    // `n`, which only makes the coordinator more conservative.
    let recent = persistence.store.list_transmissions(Some(challenge.id), 1000).await?;
    let transmissions_since = recent.iter().filter(|t| t.started_at > since).count() as f64;

    let score = transmissions_since * (10.0_f64).min(minutes_since / 60.0) * (challenge.priority as f64 / 10.0);
    Ok(score.min(1000.0))
}

/// §4.6: enabled, online (heartbeat within the reconnect grace), and
/// push-channel-connected. "First available" is read literally: the
/// lowest agent id among eligible receivers, since the schema tracks no
/// last-assigned timestamp to round-robin against (§9 leaves smarter
/// selection open).
async fn pick_receiver(persistence: &Persistence, now: DateTime<Utc>) -> ApiResult<Option<Agent>> {
    let agents = persistence.store.list_agents().await?;
    let mut eligible: Vec<Agent> = agents
        .into_iter()
        .filter(|a| {
            a.kind == AgentKind::Receiver
                && a.enabled
                && a.status == AgentStatus::Online
                && a.push_connected
                && !a.is_stale(now)
        })
        .collect();
    eligible.sort_by_key(|a| a.id.as_uuid());
    Ok(eligible.into_iter().next())
}

/// Called right after a successful dispatch (§4.5.9's `ChallengeAssigned`
/// path). A no-op if the score is below threshold or no receiver is
/// available; otherwise creates a pending assignment and pushes it.
pub async fn maybe_assign_recording(
    persistence: &Persistence,
    events: &EventBus,
    recording_config: &RecordingConfig,
    challenge: &Challenge,
    transmission_id: TransmissionId,
    frequency_hz: i64,
    now: DateTime<Utc>,
) -> ApiResult<()> {
    let score = priority_score(persistence, challenge, now).await?;
    if score < recording_config.score_threshold {
        return Ok(());
    }

    let Some(receiver) = pick_receiver(persistence, now).await? else {
        return Ok(());
    };

    let expected_start = now + chrono::Duration::seconds(recording_config.start_slack_secs);
    let durations = persistence.store.recent_transmission_durations(challenge.id).await?;
    let expected_duration_secs = if durations.is_empty() {
        recording_config.default_duration_secs
    } else {
        durations.iter().sum::<i64>() / durations.len() as i64
    };

    let assignment = persistence
        .recordings
        .create_assignment(
            receiver.id,
            challenge.id,
            transmission_id,
            frequency_hz,
            expected_start,
            expected_duration_secs,
            now,
        )
        .await?;

    events.push_to_agent(
        receiver.id,
        WsEvent::RecordingAssignment {
            assignment_id: assignment.id,
            frequency_hz,
            expected_start,
            expected_duration_secs,
            at: now,
        },
    );

    Ok(())
}

/// §4.6 last paragraph: a transmission that completes `failure` before its
/// receiver reports `recording started` gets its still-pending assignment
/// cancelled out from under it.
pub async fn cancel_for_failed_transmission(
    persistence: &Persistence,
    events: &EventBus,
    transmission_id: TransmissionId,
    now: DateTime<Utc>,
) -> ApiResult<()> {
    let Some(assignment) = persistence
        .recordings
        .find_assignment_for_transmission(transmission_id)
        .await?
    else {
        return Ok(());
    };

    if assignment.status != RecordingAssignmentStatus::Pending {
        return Ok(());
    }

    persistence.recordings.cancel_assignment(assignment.id, now).await?;
    events.push_to_agent(
        assignment.receiver_agent_id,
        WsEvent::AssignmentCancelled {
            assignment_id: assignment.id,
            at: now,
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge(priority: i32) -> Challenge {
        Challenge {
            id: challengectl_core::ChallengeId::now_v7(),
            name: "c1".into(),
            spec: challengectl_core::ChallengeSpec {
                frequency: challengectl_core::FrequencySpec::Single { frequency_hz: 146_000_000 },
                modulation: challengectl_core::ModulationKind::Cw,
                payload_text: Some("hi".into()),
                payload_artifact_hash: None,
                min_delay_secs: 10,
                max_delay_secs: 20,
                modulation_params: Default::default(),
                public_view: true,
            },
            status: challengectl_core::ChallengeStatus::Assigned,
            priority,
            last_transmission_at: None,
            transmission_count: 0,
            owner_agent_id: None,
            assignment_begin: None,
            assignment_expiry: None,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    fn receiver(id: AgentId, enabled: bool, status: AgentStatus, push_connected: bool, heartbeat: Option<DateTime<Utc>>) -> Agent {
        Agent {
            id,
            kind: AgentKind::Receiver,
            hostname: "rx".into(),
            last_ip: None,
            mac_address: None,
            machine_id: None,
            status,
            enabled,
            last_heartbeat: heartbeat,
            credential_hash: "x".into(),
            devices: vec![],
            push_connected,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn challenge_priority_is_positive_for_new_challenges() {
        // Construction sanity only; the async score path needs a live
        // Store and is covered by the coordinator's integration path.
        let c = challenge(5);
        assert_eq!(c.priority, 5);
    }

    #[test]
    fn receiver_filter_excludes_disabled_and_offline_and_unpushed() {
        let now = Utc::now();
        let a = receiver(AgentId::now_v7(), true, AgentStatus::Online, true, Some(now));
        let b = receiver(AgentId::now_v7(), false, AgentStatus::Online, true, Some(now));
        let c = receiver(AgentId::now_v7(), true, AgentStatus::Offline, true, Some(now));
        let d = receiver(AgentId::now_v7(), true, AgentStatus::Online, false, Some(now));
        let e = receiver(AgentId::now_v7(), true, AgentStatus::Online, true, None);

        let agents = [a.clone(), b, c, d, e];
        let eligible: Vec<_> = agents
            .iter()
            .filter(|ag| {
                ag.kind == AgentKind::Receiver
                    && ag.enabled
                    && ag.status == AgentStatus::Online
                    && ag.push_connected
                    && !ag.is_stale(now)
            })
            .collect();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, a.id);
    }
}
