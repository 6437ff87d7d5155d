//! Assignment Engine (§4.5): dispatches queued/waiting challenges to
//! polling transmitters. Adapted from the teacher's single-writer
//! transactional job-claim pattern (`with_write` wrapping a conditional
//! `UPDATE ... RETURNING`); the part that's new here is sampling a
//! frequency and checking per-device eligibility before the claim.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use challengectl_core::{
    Agent, AgentKind, Challenge, ChallengeStatus, ControllerConfig, EntityIdType, FrequencySpec,
    TransmissionId,
};
use challengectl_store::Persistence;

use crate::error::ApiResult;

/// What the engine handed an agent on a successful dispatch.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub challenge: Challenge,
    pub frequency_hz: i64,
    pub transmission_id: TransmissionId,
}

/// §4.5.2: resolve a challenge's frequency spec into one concrete Hz value.
fn sample_frequency(
    spec: &FrequencySpec,
    controller_config: &ControllerConfig,
    rng: &mut impl Rng,
) -> Option<i64> {
    match spec {
        FrequencySpec::Single { frequency_hz } => Some(*frequency_hz),
        FrequencySpec::ManualRange { min_hz, max_hz } => Some(rng.gen_range(*min_hz..=*max_hz)),
        FrequencySpec::NamedRanges { named_ranges } => {
            let name = named_ranges.choose(rng)?;
            let range = controller_config.named_range(name)?;
            Some(rng.gen_range(range.min_hz..=range.max_hz))
        }
    }
}

/// §4.5.3 last bullet: a device with no declared limits accepts any
/// frequency; an agent with no enabled devices at all accepts none.
fn agent_accepts_frequency(agent: &Agent, frequency_hz: i64) -> bool {
    agent
        .devices
        .iter()
        .filter(|d| d.enabled)
        .any(|d| d.frequency_limits.is_empty() || d.frequency_limits.iter().any(|r| r.contains(frequency_hz)))
}

/// §4.5.3: is `challenge` eligible right now on status/delay grounds alone
/// (frequency/device eligibility needs a sample first)?
fn challenge_time_eligible(challenge: &Challenge, now: DateTime<Utc>) -> bool {
    match challenge.status {
        ChallengeStatus::Queued => true,
        ChallengeStatus::Waiting => match challenge.last_transmission_at {
            Some(last) => now >= last + chrono::Duration::seconds(challenge.reassignment_delay_secs()),
            None => true,
        },
        ChallengeStatus::Assigned | ChallengeStatus::Disabled => false,
    }
}

/// §4.5.4: candidates arrive pre-sorted by priority desc, last-tx asc
/// (nulls first) from the store's query. Shuffle only within runs that tie
/// on both keys, so the random perturbation never disturbs the declared
/// ordering between genuinely distinct priorities or timestamps.
fn shuffle_ties(mut candidates: Vec<Challenge>, rng: &mut impl Rng) -> Vec<Challenge> {
    let mut ordered = Vec::with_capacity(candidates.len());
    let mut start = 0;
    while start < candidates.len() {
        let mut end = start + 1;
        while end < candidates.len()
            && candidates[end].priority == candidates[start].priority
            && candidates[end].last_transmission_at == candidates[start].last_transmission_at
        {
            end += 1;
        }
        let mut run: Vec<Challenge> = candidates.drain(start..end).collect();
        run.shuffle(rng);
        ordered.extend(run);
        // `drain` removed `end - start` elements at `start`; the next run
        // now begins at the same index.
    }
    ordered
}

/// `Dispatch(agent, now)` — the heart of the poll handler (§6.1). Runs
/// entirely inside one writer transaction (§4.5.7): selection, frequency
/// sampling, and the claim itself are atomic with respect to every other
/// poll and sweep.
pub async fn dispatch_next(
    persistence: &Persistence,
    controller_config: &ControllerConfig,
    agent: &Agent,
    now: DateTime<Utc>,
) -> ApiResult<Option<Dispatch>> {
    if agent.kind != AgentKind::Transmitter || !agent.enabled {
        return Ok(None);
    }

    let system_state = persistence.store.get_system_state().await?;
    if system_state.paused {
        return Ok(None);
    }

    let mut rng = rand::thread_rng();

    let dispatch = persistence
        .store
        .writer()
        .with_write(|wc| async move {
            let candidates = persistence.store.list_assignable_challenges(wc, now).await?;
            let candidates = shuffle_ties(candidates, &mut rng);

            for challenge in candidates {
                if !challenge_time_eligible(&challenge, now) {
                    continue;
                }
                let Some(frequency_hz) = sample_frequency(&challenge.spec.frequency, controller_config, &mut rng)
                else {
                    continue;
                };
                if !agent_accepts_frequency(agent, frequency_hz) {
                    continue;
                }

                match persistence
                    .store
                    .try_assign_challenge(wc, agent.id, challenge.id, now)
                    .await
                {
                    Ok(assigned) => {
                        let transmission_id = TransmissionId::now_v7();
                        persistence
                            .store
                            .begin_transmission(wc, transmission_id, assigned.id, agent.id, frequency_hz, now)
                            .await?;
                        return Ok(Some(Dispatch {
                            challenge: assigned,
                            frequency_hz,
                            transmission_id,
                        }));
                    }
                    // Lost the race for this row (impossible under the
                    // single writer, but the store keeps the check
                    // explicit); move on to the next candidate.
                    Err(challengectl_core::StoreError::Conflict { .. }) => continue,
                    Err(e) => return Err(e),
                }
            }

            Ok(None)
        })
        .await?;

    Ok(dispatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use challengectl_core::{
        ChallengeSpec, DeviceDescriptor, FrequencyRange, ModulationKind, ModulationParams,
    };

    fn named_ranges_config() -> ControllerConfig {
        let raw = r#"
bind_address: "0.0.0.0"
bind_port: 8080
frequency_ranges:
  - name: twometer
    min_hz: 144000000
    max_hz: 148000000
"#;
        ControllerConfig::from_yaml_str(raw).unwrap()
    }

    fn single_spec(frequency_hz: i64) -> ChallengeSpec {
        ChallengeSpec {
            frequency: FrequencySpec::Single { frequency_hz },
            modulation: ModulationKind::Cw,
            payload_text: Some("hi".into()),
            payload_artifact_hash: None,
            min_delay_secs: 10,
            max_delay_secs: 20,
            modulation_params: ModulationParams::default(),
            public_view: true,
        }
    }

    #[test]
    fn sample_frequency_single_returns_fixed_value() {
        let mut rng = rand::thread_rng();
        let spec = FrequencySpec::Single { frequency_hz: 146_520_000 };
        let config = named_ranges_config();
        assert_eq!(sample_frequency(&spec, &config, &mut rng), Some(146_520_000));
    }

    #[test]
    fn sample_frequency_manual_range_within_bounds() {
        let mut rng = rand::thread_rng();
        let spec = FrequencySpec::ManualRange { min_hz: 100, max_hz: 200 };
        let config = named_ranges_config();
        for _ in 0..50 {
            let hz = sample_frequency(&spec, &config, &mut rng).unwrap();
            assert!((100..=200).contains(&hz));
        }
    }

    #[test]
    fn sample_frequency_named_range_resolves_from_config() {
        let mut rng = rand::thread_rng();
        let spec = FrequencySpec::NamedRanges { named_ranges: vec!["twometer".to_string()] };
        let config = named_ranges_config();
        let hz = sample_frequency(&spec, &config, &mut rng).unwrap();
        assert!((144_000_000..=148_000_000).contains(&hz));
    }

    #[test]
    fn sample_frequency_named_range_missing_from_catalog_is_none() {
        let mut rng = rand::thread_rng();
        let spec = FrequencySpec::NamedRanges { named_ranges: vec!["nonexistent".to_string()] };
        let config = named_ranges_config();
        assert_eq!(sample_frequency(&spec, &config, &mut rng), None);
    }

    fn agent_with_devices(devices: Vec<DeviceDescriptor>) -> Agent {
        Agent {
            id: challengectl_core::AgentId::now_v7(),
            kind: AgentKind::Transmitter,
            hostname: "tx-01".into(),
            last_ip: None,
            mac_address: None,
            machine_id: None,
            status: challengectl_core::AgentStatus::Online,
            enabled: true,
            last_heartbeat: Some(Utc::now()),
            credential_hash: "x".into(),
            devices,
            push_connected: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn agent_accepts_frequency_empty_limits_means_unrestricted() {
        let agent = agent_with_devices(vec![DeviceDescriptor {
            device_id: "d1".into(),
            label: "radio".into(),
            enabled: true,
            frequency_limits: vec![],
        }]);
        assert!(agent_accepts_frequency(&agent, 900_000_000));
    }

    #[test]
    fn agent_accepts_frequency_rejects_outside_declared_range() {
        let agent = agent_with_devices(vec![DeviceDescriptor {
            device_id: "d1".into(),
            label: "radio".into(),
            enabled: true,
            frequency_limits: vec![FrequencyRange { min_hz: 144_000_000, max_hz: 148_000_000 }],
        }]);
        assert!(!agent_accepts_frequency(&agent, 900_000_000));
        assert!(agent_accepts_frequency(&agent, 146_000_000));
    }

    #[test]
    fn agent_accepts_frequency_ignores_disabled_devices() {
        let agent = agent_with_devices(vec![DeviceDescriptor {
            device_id: "d1".into(),
            label: "radio".into(),
            enabled: false,
            frequency_limits: vec![],
        }]);
        assert!(!agent_accepts_frequency(&agent, 146_000_000));
    }

    #[test]
    fn challenge_time_eligible_waiting_respects_delay() {
        let now = Utc::now();
        let mut challenge = Challenge {
            id: challengectl_core::ChallengeId::now_v7(),
            name: "c1".into(),
            spec: single_spec(146_000_000),
            status: ChallengeStatus::Waiting,
            priority: 0,
            last_transmission_at: Some(now - chrono::Duration::seconds(5)),
            transmission_count: 1,
            owner_agent_id: None,
            assignment_begin: None,
            assignment_expiry: None,
            enabled: true,
            created_at: now,
        };
        assert!(!challenge_time_eligible(&challenge, now));

        challenge.last_transmission_at = Some(now - chrono::Duration::seconds(30));
        assert!(challenge_time_eligible(&challenge, now));
    }

    #[test]
    fn challenge_time_eligible_rejects_assigned_and_disabled() {
        let now = Utc::now();
        let mut challenge = Challenge {
            id: challengectl_core::ChallengeId::now_v7(),
            name: "c1".into(),
            spec: single_spec(146_000_000),
            status: ChallengeStatus::Assigned,
            priority: 0,
            last_transmission_at: None,
            transmission_count: 0,
            owner_agent_id: Some(challengectl_core::AgentId::now_v7()),
            assignment_begin: Some(now),
            assignment_expiry: Some(now),
            enabled: true,
            created_at: now,
        };
        assert!(!challenge_time_eligible(&challenge, now));
        challenge.status = ChallengeStatus::Disabled;
        assert!(!challenge_time_eligible(&challenge, now));
    }
}
