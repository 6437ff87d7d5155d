//! Recording assignments and historical recordings (§4.6, §3).

use chrono::{DateTime, Utc};

use challengectl_core::{
    AgentId, ChallengeId, EntityIdType, Outcome, Recording, RecordingAssignment,
    RecordingAssignmentId, RecordingAssignmentStatus, RecordingId, StoreError, TransmissionId,
};

use crate::rowmap::{outcome_str, parse_outcome};
use crate::writer::{ReadConn, Writer};

#[derive(Clone)]
pub struct RecordingStore {
    writer: Writer,
}

fn parse_assignment_status(s: &str) -> Result<RecordingAssignmentStatus, StoreError> {
    match s {
        "pending" => Ok(RecordingAssignmentStatus::Pending),
        "recording" => Ok(RecordingAssignmentStatus::Recording),
        "completed" => Ok(RecordingAssignmentStatus::Completed),
        "cancelled" => Ok(RecordingAssignmentStatus::Cancelled),
        "failed" => Ok(RecordingAssignmentStatus::Failed),
        other => Err(StoreError::Backend {
            reason: format!("unknown recording assignment status '{other}' in row"),
        }),
    }
}

fn assignment_status_str(status: RecordingAssignmentStatus) -> &'static str {
    match status {
        RecordingAssignmentStatus::Pending => "pending",
        RecordingAssignmentStatus::Recording => "recording",
        RecordingAssignmentStatus::Completed => "completed",
        RecordingAssignmentStatus::Cancelled => "cancelled",
        RecordingAssignmentStatus::Failed => "failed",
    }
}

fn row_to_assignment(row: &tokio_postgres::Row) -> Result<RecordingAssignment, StoreError> {
    Ok(RecordingAssignment {
        id: RecordingAssignmentId::new(row.get("id")),
        receiver_agent_id: AgentId::new(row.get("receiver_agent_id")),
        challenge_id: ChallengeId::new(row.get("challenge_id")),
        transmission_id: TransmissionId::new(row.get("transmission_id")),
        frequency_hz: row.get("frequency_hz"),
        assigned_at: row.get("assigned_at"),
        expected_start: row.get("expected_start"),
        expected_duration_secs: row.get("expected_duration_secs"),
        status: parse_assignment_status(row.get("status"))?,
        cancelled_at: row.get("cancelled_at"),
        completed_at: row.get("completed_at"),
    })
}

fn row_to_recording(row: &tokio_postgres::Row) -> Result<Recording, StoreError> {
    let outcome: Option<String> = row.get("outcome");
    Ok(Recording {
        id: RecordingId::new(row.get("id")),
        challenge_id: ChallengeId::new(row.get("challenge_id")),
        receiver_agent_id: AgentId::new(row.get("receiver_agent_id")),
        transmission_id: TransmissionId::new(row.get("transmission_id")),
        frequency_hz: row.get("frequency_hz"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        outcome: outcome.map(|s| parse_outcome(&s)).transpose()?,
        image_path: row.get("image_path"),
        image_width: row.get("image_width"),
        image_height: row.get("image_height"),
        sample_rate_hz: row.get("sample_rate_hz"),
        duration_secs: row.get("duration_secs"),
        error: row.get("error"),
    })
}

impl RecordingStore {
    pub fn new(writer: Writer) -> Self {
        Self { writer }
    }

    /// Recording Coordinator (§4.6) creates one pending assignment per
    /// dispatched transmission, targeting the highest-priority eligible
    /// receiver. The priority-score computation itself lives in the
    /// coordinator, not the Store; this just persists the decision.
    pub async fn create_assignment(
        &self,
        receiver_agent_id: AgentId,
        challenge_id: ChallengeId,
        transmission_id: TransmissionId,
        frequency_hz: i64,
        expected_start: DateTime<Utc>,
        expected_duration_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<RecordingAssignment, StoreError> {
        let id = RecordingAssignmentId::now_v7();
        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "INSERT INTO recording_assignments
                     (id, receiver_agent_id, challenge_id, transmission_id, frequency_hz,
                      assigned_at, expected_start, expected_duration_secs, status)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending')",
                    &[
                        &id.as_uuid(),
                        &receiver_agent_id.as_uuid(),
                        &challenge_id.as_uuid(),
                        &transmission_id.as_uuid(),
                        &frequency_hz,
                        &now,
                        &expected_start,
                        &expected_duration_secs,
                    ],
                )
                .await?;
                Ok(RecordingAssignment {
                    id,
                    receiver_agent_id,
                    challenge_id,
                    transmission_id,
                    frequency_hz,
                    assigned_at: now,
                    expected_start,
                    expected_duration_secs,
                    status: RecordingAssignmentStatus::Pending,
                    cancelled_at: None,
                    completed_at: None,
                })
            })
            .await
    }

    pub async fn get_assignment(
        &self,
        id: RecordingAssignmentId,
    ) -> Result<Option<RecordingAssignment>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let row = rc
                    .query_opt(
                        "SELECT * FROM recording_assignments WHERE id = $1",
                        &[&id.as_uuid()],
                    )
                    .await?;
                row.map(|r| row_to_assignment(&r)).transpose()
            })
            .await
    }

    /// A receiver's poll loop (§4.6) consults its own pending/active
    /// assignments, oldest first.
    pub async fn list_assignments_for_receiver(
        &self,
        receiver_agent_id: AgentId,
    ) -> Result<Vec<RecordingAssignment>, StoreError> {
        self.writer
            .with_read(|rc: &ReadConn| async move {
                let rows = rc
                    .query(
                        "SELECT * FROM recording_assignments
                         WHERE receiver_agent_id = $1 AND status IN ('pending', 'recording')
                         ORDER BY assigned_at",
                        &[&receiver_agent_id.as_uuid()],
                    )
                    .await?;
                rows.iter().map(row_to_assignment).collect()
            })
            .await
    }

    /// Receiver reports it has begun capturing (§4.6 state machine:
    /// pending -> recording).
    pub async fn mark_recording_started(
        &self,
        id: RecordingAssignmentId,
    ) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                let updated = wc
                    .execute(
                        "UPDATE recording_assignments SET status = 'recording'
                         WHERE id = $1 AND status = 'pending'",
                        &[&id.as_uuid()],
                    )
                    .await?;
                if updated == 0 {
                    return Err(StoreError::Conflict {
                        reason: "recording assignment is not pending".into(),
                    });
                }
                Ok(())
            })
            .await
    }

    /// Receiver reports capture completion (successful or failed),
    /// transitioning the assignment and inserting the historical
    /// `Recording` row in the same transaction.
    #[allow(clippy::too_many_arguments)]
    pub async fn complete_assignment(
        &self,
        id: RecordingAssignmentId,
        outcome: Outcome,
        image_path: Option<String>,
        image_width: Option<i32>,
        image_height: Option<i32>,
        sample_rate_hz: Option<i64>,
        duration_secs: Option<i64>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Recording, StoreError> {
        self.writer
            .with_write(|wc| async move {
                let row = wc
                    .query_opt(
                        "SELECT * FROM recording_assignments WHERE id = $1",
                        &[&id.as_uuid()],
                    )
                    .await?
                    .ok_or_else(|| StoreError::NotFound {
                        entity: "recording_assignment",
                        id: id.to_string(),
                    })?;
                let assignment = row_to_assignment(&row)?;

                let new_status = if matches!(outcome, Outcome::Success) {
                    "completed"
                } else {
                    "failed"
                };
                wc.execute(
                    "UPDATE recording_assignments
                     SET status = $2, completed_at = $3
                     WHERE id = $1",
                    &[&id.as_uuid(), &new_status, &now],
                )
                .await?;

                let recording_id = RecordingId::now_v7();
                wc.execute(
                    "INSERT INTO recordings
                     (id, challenge_id, receiver_agent_id, transmission_id, frequency_hz,
                      started_at, completed_at, outcome, image_path, image_width, image_height,
                      sample_rate_hz, duration_secs, error)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
                    &[
                        &recording_id.as_uuid(),
                        &assignment.challenge_id.as_uuid(),
                        &assignment.receiver_agent_id.as_uuid(),
                        &assignment.transmission_id.as_uuid(),
                        &assignment.frequency_hz,
                        &assignment.expected_start,
                        &now,
                        &outcome_str(outcome),
                        &image_path,
                        &image_width,
                        &image_height,
                        &sample_rate_hz,
                        &duration_secs,
                        &error,
                    ],
                )
                .await?;

                Ok(Recording {
                    id: recording_id,
                    challenge_id: assignment.challenge_id,
                    receiver_agent_id: assignment.receiver_agent_id,
                    transmission_id: assignment.transmission_id,
                    frequency_hz: assignment.frequency_hz,
                    started_at: assignment.expected_start,
                    completed_at: Some(now),
                    outcome: Some(outcome),
                    image_path,
                    image_width,
                    image_height,
                    sample_rate_hz,
                    duration_secs,
                    error,
                })
            })
            .await
    }

    /// §4.6: the transmission this assignment was created for, used by the
    /// Recording Coordinator to find a pending assignment when its
    /// transmission reports `failure` before the receiver starts.
    pub async fn find_assignment_for_transmission(
        &self,
        transmission_id: TransmissionId,
    ) -> Result<Option<RecordingAssignment>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let row = rc
                    .query_opt(
                        "SELECT * FROM recording_assignments WHERE transmission_id = $1",
                        &[&transmission_id.as_uuid()],
                    )
                    .await?;
                row.map(|r| row_to_assignment(&r)).transpose()
            })
            .await
    }

    /// §4.6: cancel one assignment by id (vs.
    /// `cancel_assignments_for_receiver`'s batch-by-receiver form).
    pub async fn cancel_assignment(
        &self,
        id: RecordingAssignmentId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.writer
            .with_write(|wc| async move {
                let updated = wc
                    .execute(
                        "UPDATE recording_assignments
                         SET status = 'cancelled', cancelled_at = $2
                         WHERE id = $1 AND status IN ('pending', 'recording')",
                        &[&id.as_uuid(), &now],
                    )
                    .await?;
                if updated == 0 {
                    return Err(StoreError::Conflict {
                        reason: "recording assignment is not pending or recording".into(),
                    });
                }
                Ok(())
            })
            .await
    }

    /// A receiver going offline (maintenance sweep, §4.7) cancels any
    /// assignment still pending or in progress so a replacement receiver
    /// can be chosen.
    pub async fn cancel_assignments_for_receiver(
        &self,
        receiver_agent_id: AgentId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.writer
            .with_write(|wc| async move {
                wc.execute(
                    "UPDATE recording_assignments
                     SET status = 'cancelled', cancelled_at = $2
                     WHERE receiver_agent_id = $1 AND status IN ('pending', 'recording')",
                    &[&receiver_agent_id.as_uuid(), &now],
                )
                .await
            })
            .await
    }

    pub async fn list_recordings(
        &self,
        challenge_id: Option<ChallengeId>,
        limit: i64,
    ) -> Result<Vec<Recording>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let rows = match challenge_id {
                    Some(cid) => {
                        rc.query(
                            "SELECT * FROM recordings WHERE challenge_id = $1
                             ORDER BY started_at DESC LIMIT $2",
                            &[&cid.as_uuid(), &limit],
                        )
                        .await?
                    }
                    None => {
                        rc.query(
                            "SELECT * FROM recordings ORDER BY started_at DESC LIMIT $1",
                            &[&limit],
                        )
                        .await?
                    }
                };
                rows.iter().map(row_to_recording).collect()
            })
            .await
    }

    pub async fn get_recording(&self, id: RecordingId) -> Result<Option<Recording>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let row = rc
                    .query_opt("SELECT * FROM recordings WHERE id = $1", &[&id.as_uuid()])
                    .await?;
                row.map(|r| row_to_recording(&r)).transpose()
            })
            .await
    }
}
