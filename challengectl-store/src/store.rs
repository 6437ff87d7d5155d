//! The Store: the only component that performs writes (§4.1).
//!
//! Every method here either runs under `Writer::with_write` (and therefore
//! inside a real `BEGIN`/`COMMIT`) or under `Writer::with_read`. No method
//! holds a connection across an `.await` boundary outside of those two
//! entry points.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use challengectl_core::{
    Agent, AgentId, Challenge, ChallengeId, ChallengeSpec, ChallengeStatus, DeviceDescriptor,
    EntityIdType, StoreError, SystemState, TransmissionId, TransmissionRecord,
};

use crate::rowmap::{
    agent_kind_str, challenge_status_str, outcome_str, row_to_agent, row_to_challenge,
    row_to_transmission,
};
use crate::writer::Writer;

#[derive(Clone)]
pub struct Store {
    writer: Writer,
}

impl Store {
    pub fn new(writer: Writer) -> Self {
        Self { writer }
    }

    pub fn writer(&self) -> &Writer {
        &self.writer
    }

    // ========================================================================
    // AGENT OPERATIONS
    // ========================================================================

    /// Inserts a pending agent row ahead of enrollment (§4.3): credential
    /// hash only, no host identity yet.
    pub async fn create_pending_agent(
        &self,
        id: AgentId,
        kind: challengectl_core::AgentKind,
        hostname: &str,
        credential_hash: &str,
    ) -> Result<Agent, StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "INSERT INTO agents (id, kind, hostname, status, enabled, credential_hash, devices)
                     VALUES ($1, $2, $3, 'offline', TRUE, $4, '[]')",
                    &[&id.as_uuid(), &agent_kind_str(kind), &hostname, &credential_hash],
                )
                .await?;
                let row = wc
                    .query_one("SELECT * FROM agents WHERE id = $1", &[&id.as_uuid()])
                    .await?;
                row_to_agent(&row)
            })
            .await
    }

    pub async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let row = rc
                    .query_opt("SELECT * FROM agents WHERE id = $1", &[&id.as_uuid()])
                    .await?;
                row.as_ref().map(row_to_agent).transpose()
            })
            .await
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let rows = rc
                    .query("SELECT * FROM agents ORDER BY created_at", &[])
                    .await?;
                rows.iter().map(row_to_agent).collect()
            })
            .await
    }

    pub async fn set_agent_enabled(&self, id: AgentId, enabled: bool) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                let updated = wc
                    .execute(
                        "UPDATE agents SET enabled = $2 WHERE id = $1",
                        &[&id.as_uuid(), &enabled],
                    )
                    .await?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "agent",
                        id: id.to_string(),
                    });
                }
                Ok(())
            })
            .await
    }

    pub async fn delete_agent(&self, id: AgentId) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                let deleted = wc
                    .execute("DELETE FROM agents WHERE id = $1", &[&id.as_uuid()])
                    .await?;
                if deleted == 0 {
                    return Err(StoreError::NotFound {
                        entity: "agent",
                        id: id.to_string(),
                    });
                }
                Ok(())
            })
            .await
    }

    /// `RegisterHeartbeat(id, ip, hostname, mac, machine-id, now)` (§4.1).
    /// Host-binding comparison happens in the caller (Identity & Session,
    /// §4.2); by the time this runs the caller has already decided the
    /// presented identifiers are acceptable. This only records them,
    /// upgrading any previously-null identifier in place (§4.2 upgrade
    /// rule) and marking the agent online.
    pub async fn register_heartbeat(
        &self,
        id: AgentId,
        ip: Option<&str>,
        hostname: Option<&str>,
        mac: Option<&str>,
        machine_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Agent, StoreError> {
        self.writer
            .with_write(|wc| async move {
                let row = wc
                    .query_opt("SELECT * FROM agents WHERE id = $1", &[&id.as_uuid()])
                    .await?
                    .ok_or_else(|| StoreError::NotFound {
                        entity: "agent",
                        id: id.to_string(),
                    })?;
                let existing = row_to_agent(&row)?;

                let new_ip = ip.map(str::to_string).or(existing.last_ip);
                let new_hostname = hostname.map(str::to_string).unwrap_or(existing.hostname);
                let new_mac = existing.mac_address.or_else(|| mac.map(str::to_string));
                let new_machine_id = existing
                    .machine_id
                    .or_else(|| machine_id.map(str::to_string));

                wc.execute(
                    "UPDATE agents SET last_ip = $2, hostname = $3, mac_address = $4,
                     machine_id = $5, last_heartbeat = $6, status = 'online' WHERE id = $1",
                    &[
                        &id.as_uuid(),
                        &new_ip,
                        &new_hostname,
                        &new_mac,
                        &new_machine_id,
                        &now,
                    ],
                )
                .await?;

                let row = wc
                    .query_one("SELECT * FROM agents WHERE id = $1", &[&id.as_uuid()])
                    .await?;
                row_to_agent(&row)
            })
            .await
    }

    /// `MarkAgentOffline(id)` (§4.1) — used by the agent-offline sweep and
    /// by explicit signout.
    pub async fn mark_agent_offline(&self, id: AgentId) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "UPDATE agents SET status = 'offline', push_connected = FALSE WHERE id = $1",
                    &[&id.as_uuid()],
                )
                .await?;
                Ok(())
            })
            .await
    }

    pub async fn set_push_connected(&self, id: AgentId, connected: bool) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "UPDATE agents SET push_connected = $2 WHERE id = $1",
                    &[&id.as_uuid(), &connected],
                )
                .await?;
                Ok(())
            })
            .await
    }

    pub async fn upsert_devices(
        &self,
        id: AgentId,
        devices: &[DeviceDescriptor],
    ) -> Result<(), StoreError> {
        let devices_json = serde_json::to_value(devices).map_err(|e| StoreError::Backend {
            reason: e.to_string(),
        })?;
        self.writer
            .with_write(|wc| async move {
                let updated = wc
                    .execute(
                        "UPDATE agents SET devices = $2 WHERE id = $1",
                        &[&id.as_uuid(), &devices_json],
                    )
                    .await?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "agent",
                        id: id.to_string(),
                    });
                }
                Ok(())
            })
            .await
    }

    // ========================================================================
    // CHALLENGE OPERATIONS
    // ========================================================================

    pub async fn create_challenge(
        &self,
        id: ChallengeId,
        name: &str,
        spec: &ChallengeSpec,
        priority: i32,
        enabled: bool,
    ) -> Result<Challenge, StoreError> {
        spec.validate()
            .map_err(|e| StoreError::Conflict { reason: e.to_string() })?;
        let spec_json = serde_json::to_value(spec).map_err(|e| StoreError::Backend {
            reason: e.to_string(),
        })?;
        let status = if enabled { "queued" } else { "disabled" };

        self.writer
            .with_write(|wc| async move {
                let existing = wc
                    .query_opt("SELECT 1 FROM challenges WHERE name = $1", &[&name])
                    .await?;
                if existing.is_some() {
                    return Err(StoreError::Conflict {
                        reason: format!("challenge '{name}' already exists"),
                    });
                }

                wc.execute(
                    "INSERT INTO challenges (id, name, spec, status, priority, enabled)
                     VALUES ($1, $2, $3, $4, $5, $6)",
                    &[&id.as_uuid(), &name, &spec_json, &status, &priority, &enabled],
                )
                .await?;

                let row = wc
                    .query_one("SELECT * FROM challenges WHERE id = $1", &[&id.as_uuid()])
                    .await?;
                row_to_challenge(&row)
            })
            .await
    }

    pub async fn get_challenge(&self, id: ChallengeId) -> Result<Option<Challenge>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let row = rc
                    .query_opt("SELECT * FROM challenges WHERE id = $1", &[&id.as_uuid()])
                    .await?;
                row.as_ref().map(row_to_challenge).transpose()
            })
            .await
    }

    pub async fn list_challenges(&self) -> Result<Vec<Challenge>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let rows = rc
                    .query("SELECT * FROM challenges ORDER BY priority DESC, name", &[])
                    .await?;
                rows.iter().map(row_to_challenge).collect()
            })
            .await
    }

    /// §4.5.1 `* -- enable toggle off --> disabled` (assigned challenges
    /// transition through queued first) and `disabled -- enable toggle on
    /// --> queued`.
    pub async fn set_challenge_enabled(
        &self,
        id: ChallengeId,
        enabled: bool,
    ) -> Result<Challenge, StoreError> {
        self.writer
            .with_write(|wc| async move {
                let row = wc
                    .query_opt("SELECT * FROM challenges WHERE id = $1", &[&id.as_uuid()])
                    .await?
                    .ok_or_else(|| StoreError::NotFound {
                        entity: "challenge",
                        id: id.to_string(),
                    })?;
                let challenge = row_to_challenge(&row)?;

                let new_status = if enabled {
                    ChallengeStatus::Queued
                } else {
                    ChallengeStatus::Disabled
                };

                wc.execute(
                    "UPDATE challenges SET enabled = $2, status = $3,
                     owner_agent_id = NULL, assignment_begin = NULL, assignment_expiry = NULL
                     WHERE id = $1",
                    &[&id.as_uuid(), &enabled, &challenge_status_str(new_status)],
                )
                .await?;

                let row = wc
                    .query_one("SELECT * FROM challenges WHERE id = $1", &[&id.as_uuid()])
                    .await?;
                row_to_challenge(&row)
            })
            .await
    }

    /// Operator-driven update (§6.3 challenge CRUD): replaces the spec,
    /// name, and priority of an existing challenge. Refuses while the
    /// challenge is assigned, so an in-flight dispatch never has its
    /// parameters changed out from under it.
    pub async fn update_challenge(
        &self,
        id: ChallengeId,
        name: &str,
        spec: &ChallengeSpec,
        priority: i32,
    ) -> Result<Challenge, StoreError> {
        spec.validate()
            .map_err(|e| StoreError::Conflict { reason: e.to_string() })?;
        let spec_json = serde_json::to_value(spec).map_err(|e| StoreError::Backend {
            reason: e.to_string(),
        })?;

        self.writer
            .with_write(|wc| async move {
                let row = wc
                    .query_opt("SELECT * FROM challenges WHERE id = $1", &[&id.as_uuid()])
                    .await?
                    .ok_or_else(|| StoreError::NotFound {
                        entity: "challenge",
                        id: id.to_string(),
                    })?;
                let challenge = row_to_challenge(&row)?;
                if challenge.status == ChallengeStatus::Assigned {
                    return Err(StoreError::Conflict {
                        reason: "cannot update a challenge while it is assigned".into(),
                    });
                }

                wc.execute(
                    "UPDATE challenges SET name = $2, spec = $3, priority = $4 WHERE id = $1",
                    &[&id.as_uuid(), &name, &spec_json, &priority],
                )
                .await?;

                let row = wc
                    .query_one("SELECT * FROM challenges WHERE id = $1", &[&id.as_uuid()])
                    .await?;
                row_to_challenge(&row)
            })
            .await
    }

    pub async fn delete_challenge(&self, id: ChallengeId) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                let deleted = wc
                    .execute("DELETE FROM challenges WHERE id = $1", &[&id.as_uuid()])
                    .await?;
                if deleted == 0 {
                    return Err(StoreError::NotFound {
                        entity: "challenge",
                        id: id.to_string(),
                    });
                }
                Ok(())
            })
            .await
    }

    /// §4.5.2–§4.5.4: candidates a caller (the Assignment Engine) can pick
    /// from, ordered per §4.5.4. The caller still must check per-agent
    /// frequency-limit eligibility (§4.5.3's last bullet) and sample a
    /// concrete frequency before calling `try_assign_challenge`; both need
    /// data (device descriptors, the named-range catalog) the Store
    /// doesn't own.
    pub async fn list_assignable_challenges(
        &self,
        wc: &crate::writer::WriteConn,
        now: DateTime<Utc>,
    ) -> Result<Vec<Challenge>, StoreError> {
        let rows = wc
            .query(
                "SELECT * FROM challenges
                 WHERE enabled = TRUE AND owner_agent_id IS NULL
                   AND (status = 'queued' OR status = 'waiting')
                 ORDER BY priority DESC, last_transmission_at ASC NULLS FIRST",
                &[],
            )
            .await?;
        rows.iter().map(row_to_challenge).collect()
    }

    /// `TryAssignChallenge` (§4.1): the caller has already selected
    /// `challenge_id` and sampled `frequency_hz`; this performs the actual
    /// conditional transition (§4.5.1 `queued -> assigned`), re-checking
    /// ownership is still free so a concurrent writer can't have raced it
    /// — impossible under `with_write`'s single writer, but the `WHERE`
    /// clause keeps the invariant explicit rather than implicit.
    pub async fn try_assign_challenge(
        &self,
        wc: &crate::writer::WriteConn,
        agent_id: AgentId,
        challenge_id: ChallengeId,
        now: DateTime<Utc>,
    ) -> Result<Challenge, StoreError> {
        let expiry = now + chrono::Duration::seconds(Challenge::ASSIGNMENT_TTL_SECS);
        let updated = wc
            .execute(
                "UPDATE challenges SET status = 'assigned', owner_agent_id = $2,
                 assignment_begin = $3, assignment_expiry = $4
                 WHERE id = $1 AND owner_agent_id IS NULL AND enabled = TRUE",
                &[&challenge_id.as_uuid(), &agent_id.as_uuid(), &now, &expiry],
            )
            .await?;

        if updated == 0 {
            return Err(StoreError::Conflict {
                reason: "challenge no longer available".into(),
            });
        }

        let row = wc
            .query_one(
                "SELECT * FROM challenges WHERE id = $1",
                &[&challenge_id.as_uuid()],
            )
            .await?;
        row_to_challenge(&row)
    }

    /// Opens the in-flight transmission row for a freshly dispatched
    /// challenge (§4.6 data flow: the Recording Coordinator must be able to
    /// reference this transmission before the worker ever reports back).
    /// Runs in the same write transaction as `try_assign_challenge`.
    /// `complete_assignment` later fills in `completed_at`/`outcome`.
    pub async fn begin_transmission(
        &self,
        wc: &crate::writer::WriteConn,
        id: TransmissionId,
        challenge_id: ChallengeId,
        agent_id: AgentId,
        frequency_hz: i64,
        started_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        wc.execute(
            "INSERT INTO transmissions (id, challenge_id, agent_id, device_id, frequency_hz, started_at)
             VALUES ($1, $2, $3, NULL, $4, $5)",
            &[
                &id.as_uuid(),
                &challenge_id.as_uuid(),
                &agent_id.as_uuid(),
                &frequency_hz,
                &started_at,
            ],
        )
        .await?;
        Ok(())
    }

    /// `CompleteAssignment(agent, challenge, outcome, error)` (§4.5.9).
    ///
    /// `transmission_id` is the row `begin_transmission` opened at dispatch
    /// time; the worker echoes it back from its `DispatchedChallenge`. This
    /// closes that row rather than inserting a fresh one, so a transmission
    /// record exists (and is referenceable by a recording assignment) for
    /// the whole lifetime of the transmission, not just after it ends.
    pub async fn complete_assignment(
        &self,
        agent_id: AgentId,
        challenge_id: ChallengeId,
        transmission_id: TransmissionId,
        device_id: Option<&str>,
        outcome: challengectl_core::Outcome,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TransmissionRecord, StoreError> {
        self.writer
            .with_write(|wc| async move {
                let row = wc
                    .query_opt(
                        "SELECT * FROM challenges WHERE id = $1",
                        &[&challenge_id.as_uuid()],
                    )
                    .await?
                    .ok_or_else(|| StoreError::NotFound {
                        entity: "challenge",
                        id: challenge_id.to_string(),
                    })?;
                let challenge = row_to_challenge(&row)?;

                // Still owned by the reporting agent: clear ownership,
                // advance the schedule. Otherwise (expired + reassigned)
                // only the historical fact is recorded (§4.5.9).
                if challenge.owner_agent_id == Some(agent_id) {
                    wc.execute(
                        "UPDATE challenges SET status = 'waiting', last_transmission_at = $2,
                         transmission_count = transmission_count + 1,
                         owner_agent_id = NULL, assignment_begin = NULL, assignment_expiry = NULL
                         WHERE id = $1",
                        &[&challenge_id.as_uuid(), &now],
                    )
                    .await?;
                }

                let updated = wc
                    .execute(
                        "UPDATE transmissions SET device_id = $2, completed_at = $3, outcome = $4, error = $5
                         WHERE id = $1 AND challenge_id = $6 AND agent_id = $7",
                        &[
                            &transmission_id.as_uuid(),
                            &device_id,
                            &now,
                            &outcome_str(outcome),
                            &error,
                            &challenge_id.as_uuid(),
                            &agent_id.as_uuid(),
                        ],
                    )
                    .await?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "transmission",
                        id: transmission_id.to_string(),
                    });
                }

                let row = wc
                    .query_one(
                        "SELECT * FROM transmissions WHERE id = $1",
                        &[&transmission_id.as_uuid()],
                    )
                    .await?;
                row_to_transmission(&row)
            })
            .await
    }

    /// `RequeueOwnedBy(agent)` (§4.1) — used by the agent-offline sweep
    /// (§4.7) and by explicit signout handling.
    pub async fn requeue_owned_by(&self, agent_id: AgentId) -> Result<Vec<ChallengeId>, StoreError> {
        self.writer
            .with_write(|wc| async move {
                let rows = wc
                    .query(
                        "UPDATE challenges SET status = 'queued', owner_agent_id = NULL,
                         assignment_begin = NULL, assignment_expiry = NULL
                         WHERE owner_agent_id = $1
                         RETURNING id",
                        &[&agent_id.as_uuid()],
                    )
                    .await?;
                Ok(rows
                    .iter()
                    .map(|r| ChallengeId::new(r.get::<_, Uuid>("id")))
                    .collect())
            })
            .await
    }

    /// `ExpireStaleAssignments(now)` (§4.1, §4.5.6) — the assignment
    /// expiry sweep.
    pub async fn expire_stale_assignments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChallengeId>, StoreError> {
        self.writer
            .with_write(|wc| async move {
                let rows = wc
                    .query(
                        "UPDATE challenges SET status = 'queued', owner_agent_id = NULL,
                         assignment_begin = NULL, assignment_expiry = NULL
                         WHERE status = 'assigned' AND assignment_expiry < $1
                         RETURNING id",
                        &[&now],
                    )
                    .await?;
                Ok(rows
                    .iter()
                    .map(|r| ChallengeId::new(r.get::<_, Uuid>("id")))
                    .collect())
            })
            .await
    }

    /// §4.5.8 manual trigger: `waiting -> queued` bypassing delay;
    /// `disabled` is an error; `assigned` is a no-op.
    pub async fn trigger_challenge_now(&self, id: ChallengeId) -> Result<Challenge, StoreError> {
        self.writer
            .with_write(|wc| async move {
                let row = wc
                    .query_opt("SELECT * FROM challenges WHERE id = $1", &[&id.as_uuid()])
                    .await?
                    .ok_or_else(|| StoreError::NotFound {
                        entity: "challenge",
                        id: id.to_string(),
                    })?;
                let challenge = row_to_challenge(&row)?;

                match challenge.status {
                    ChallengeStatus::Disabled => {
                        return Err(StoreError::InvariantViolation {
                            reason: "cannot trigger a disabled challenge".into(),
                        })
                    }
                    ChallengeStatus::Assigned => return Ok(challenge),
                    ChallengeStatus::Queued => return Ok(challenge),
                    ChallengeStatus::Waiting => {
                        wc.execute(
                            "UPDATE challenges SET status = 'queued' WHERE id = $1",
                            &[&id.as_uuid()],
                        )
                        .await?;
                    }
                }

                let row = wc
                    .query_one("SELECT * FROM challenges WHERE id = $1", &[&id.as_uuid()])
                    .await?;
                row_to_challenge(&row)
            })
            .await
    }

    // ========================================================================
    // TRANSMISSION HISTORY
    // ========================================================================

    pub async fn list_transmissions(
        &self,
        challenge_id: Option<ChallengeId>,
        limit: i64,
    ) -> Result<Vec<TransmissionRecord>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let rows = match challenge_id {
                    Some(id) => {
                        rc.query(
                            "SELECT * FROM transmissions WHERE challenge_id = $1
                             ORDER BY started_at DESC LIMIT $2",
                            &[&id.as_uuid(), &limit],
                        )
                        .await?
                    }
                    None => {
                        rc.query(
                            "SELECT * FROM transmissions ORDER BY started_at DESC LIMIT $1",
                            &[&limit],
                        )
                        .await?
                    }
                };
                rows.iter().map(row_to_transmission).collect()
            })
            .await
    }

    /// Last 10 completed transmissions for a challenge, used by the
    /// Recording Coordinator (§4.6) to estimate expected duration.
    pub async fn recent_transmission_durations(
        &self,
        challenge_id: ChallengeId,
    ) -> Result<Vec<i64>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let rows = rc
                    .query(
                        "SELECT EXTRACT(EPOCH FROM (completed_at - started_at))::BIGINT AS secs
                         FROM transmissions
                         WHERE challenge_id = $1 AND completed_at IS NOT NULL
                         ORDER BY started_at DESC LIMIT 10",
                        &[&challenge_id.as_uuid()],
                    )
                    .await?;
                Ok(rows.iter().map(|r| r.get::<_, i64>("secs")).collect())
            })
            .await
    }

    // ========================================================================
    // SYSTEM STATE
    // ========================================================================

    pub async fn get_system_state(&self) -> Result<SystemState, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let rows = rc.query("SELECT key, value FROM system_state", &[]).await?;
                let mut state = SystemState::default();
                for row in rows {
                    let key: String = row.get("key");
                    let value: serde_json::Value = row.get("value");
                    match key.as_str() {
                        "paused" => state.paused = value.as_bool().unwrap_or(false),
                        "conference_name" => state.conference_name = value.as_str().map(String::from),
                        "conference_timezone" => {
                            state.conference_timezone = value.as_str().map(String::from)
                        }
                        "conference_start" => {
                            state.conference_start =
                                value.as_str().and_then(|s| s.parse().ok())
                        }
                        "conference_stop" => {
                            state.conference_stop = value.as_str().and_then(|s| s.parse().ok())
                        }
                        "daily_hours" => {
                            if let Ok(parsed) = serde_json::from_value(value) {
                                state.daily_hours = parsed;
                            }
                        }
                        _ => {}
                    }
                }
                Ok(state)
            })
            .await
    }

    pub async fn set_paused(&self, paused: bool) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                let value = serde_json::Value::Bool(paused);
                wc.execute(
                    "INSERT INTO system_state (key, value) VALUES ('paused', $1)
                     ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
                    &[&value],
                )
                .await?;
                Ok(())
            })
            .await
    }

    /// `ImportChallengeSpecs` (SPEC_FULL.md §2): additive-only per §6.5 —
    /// new challenges are inserted, existing ones (matched by name) get
    /// their parameters updated, nothing is ever removed.
    pub async fn import_challenge_specs(
        &self,
        specs: &[(String, ChallengeSpec, i32, bool)],
    ) -> Result<usize, StoreError> {
        let mut imported = 0;
        for (name, spec, priority, enabled) in specs {
            spec.validate()
                .map_err(|e| StoreError::Conflict { reason: e.to_string() })?;
            let spec_json = serde_json::to_value(spec).map_err(|e| StoreError::Backend {
                reason: e.to_string(),
            })?;

            self.writer
                .with_write(|wc| async move {
                    let existing = wc
                        .query_opt("SELECT id FROM challenges WHERE name = $1", &[&name])
                        .await?;

                    match existing {
                        Some(row) => {
                            let id: Uuid = row.get("id");
                            wc.execute(
                                "UPDATE challenges SET spec = $2, priority = $3, enabled = $4 WHERE id = $1",
                                &[&id, &spec_json, priority, enabled],
                            )
                            .await?;
                        }
                        None => {
                            let id = ChallengeId::now_v7();
                            let status = if *enabled { "queued" } else { "disabled" };
                            wc.execute(
                                "INSERT INTO challenges (id, name, spec, status, priority, enabled)
                                 VALUES ($1, $2, $3, $4, $5, $6)",
                                &[&id.as_uuid(), name, &spec_json, &status, priority, enabled],
                            )
                            .await?;
                        }
                    }
                    Ok(())
                })
                .await?;
            imported += 1;
        }
        Ok(imported)
    }
}

/// Agent-offline sweep predicate (§4.7): heartbeat silent past the grace
/// window and not already marked offline.
pub fn is_agent_stale(agent: &Agent, now: DateTime<Utc>) -> bool {
    agent.is_stale(now) && agent.status != challengectl_core::AgentStatus::Offline
}
