//! Maintenance Sweeps (§4.7): four independent cooperative background
//! tasks, each ticking on its own period and taking the writer lock only
//! briefly. Adapted from the teacher's `saga_cleanup_task` shape — config
//! struct, `AtomicU64` metrics, a `watch::Receiver<bool>` shutdown signal,
//! one `tokio::select!` loop over several `interval()`s with
//! `MissedTickBehavior::Skip`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use challengectl_store::Persistence;

use crate::auth::TotpReplayCache;
use crate::config::SweepConfig;
use crate::ws::{EventBus, WsEvent};

#[derive(Debug, Default)]
pub struct SweepMetrics {
    pub agents_marked_offline: AtomicU64,
    pub assignments_expired: AtomicU64,
    pub sessions_expired: AtomicU64,
    pub totp_entries_pruned: AtomicU64,
    pub sweep_errors: AtomicU64,
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SweepSnapshot {
        SweepSnapshot {
            agents_marked_offline: self.agents_marked_offline.load(Ordering::Relaxed),
            assignments_expired: self.assignments_expired.load(Ordering::Relaxed),
            sessions_expired: self.sessions_expired.load(Ordering::Relaxed),
            totp_entries_pruned: self.totp_entries_pruned.load(Ordering::Relaxed),
            sweep_errors: self.sweep_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweepSnapshot {
    pub agents_marked_offline: u64,
    pub assignments_expired: u64,
    pub sessions_expired: u64,
    pub totp_entries_pruned: u64,
    pub sweep_errors: u64,
}

/// Runs until `shutdown_rx` reports `true`. Each of the four sweeps has
/// its own tick; they never block each other since only the write they
/// issue takes the writer lock, not the whole cycle.
pub async fn run_sweeps(
    persistence: Persistence,
    events: EventBus,
    config: SweepConfig,
    replay_cache: Arc<TotpReplayCache>,
    metrics: Arc<SweepMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweepMetrics> {
    let mut agent_offline_tick = interval(config.agent_offline_interval);
    agent_offline_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut assignment_expiry_tick = interval(config.assignment_expiry_interval);
    assignment_expiry_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut session_expiry_tick = interval(config.session_expiry_interval);
    session_expiry_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut totp_replay_tick = interval(config.totp_replay_interval);
    totp_replay_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        agent_offline_secs = config.agent_offline_interval.as_secs(),
        assignment_expiry_secs = config.assignment_expiry_interval.as_secs(),
        session_expiry_secs = config.session_expiry_interval.as_secs(),
        totp_replay_secs = config.totp_replay_interval.as_secs(),
        "maintenance sweeps started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("maintenance sweeps shutting down");
                    break;
                }
            }
            _ = agent_offline_tick.tick() => {
                sweep_agent_offline(&persistence, &events, config.agent_stale_after, &metrics).await;
            }
            _ = assignment_expiry_tick.tick() => {
                sweep_assignment_expiry(&persistence, &events, &metrics).await;
            }
            _ = session_expiry_tick.tick() => {
                sweep_session_expiry(&persistence, &metrics).await;
            }
            _ = totp_replay_tick.tick() => {
                sweep_totp_replay(&replay_cache, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        agents_marked_offline = snapshot.agents_marked_offline,
        assignments_expired = snapshot.assignments_expired,
        sessions_expired = snapshot.sessions_expired,
        totp_entries_pruned = snapshot.totp_entries_pruned,
        "maintenance sweeps stopped"
    );

    metrics
}

/// §4.7 agent offline sweep: any agent whose heartbeat has gone silent
/// past `stale_after` and isn't already marked offline loses its owned
/// challenges and gets an `agent_status` event.
async fn sweep_agent_offline(
    persistence: &Persistence,
    events: &EventBus,
    stale_after: std::time::Duration,
    metrics: &SweepMetrics,
) {
    let now = Utc::now();
    let agents = match persistence.store.list_agents().await {
        Ok(agents) => agents,
        Err(e) => {
            tracing::error!(error = %e, "agent offline sweep: failed to list agents");
            metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    for agent in agents {
        if agent.status == challengectl_core::AgentStatus::Offline {
            continue;
        }
        let stale = match agent.last_heartbeat {
            Some(hb) => (now - hb).num_seconds() > stale_after.as_secs() as i64,
            None => true,
        };
        if !stale {
            continue;
        }

        if let Err(e) = persistence.store.mark_agent_offline(agent.id).await {
            tracing::error!(agent_id = %agent.id, error = %e, "failed to mark agent offline");
            metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        if let Err(e) = persistence.store.requeue_owned_by(agent.id).await {
            tracing::error!(agent_id = %agent.id, error = %e, "failed to requeue agent's challenges");
            metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
        }
        if agent.kind == challengectl_core::AgentKind::Receiver {
            if let Err(e) = persistence.recordings.cancel_assignments_for_receiver(agent.id, now).await {
                tracing::error!(agent_id = %agent.id, error = %e, "failed to cancel receiver's assignments");
                metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        metrics.agents_marked_offline.fetch_add(1, Ordering::Relaxed);
        events.broadcast_to_operators(WsEvent::AgentStatus {
            agent_id: agent.id,
            online: false,
            at: now,
        });
    }
}

/// §4.5.6 assignment expiry sweep.
async fn sweep_assignment_expiry(persistence: &Persistence, events: &EventBus, metrics: &SweepMetrics) {
    let now = Utc::now();
    match persistence.store.expire_stale_assignments(now).await {
        Ok(expired) => {
            for challenge_id in expired {
                metrics.assignments_expired.fetch_add(1, Ordering::Relaxed);
                events.broadcast_to_operators(WsEvent::Log {
                    message: format!("challenge {challenge_id} requeued after assignment expiry"),
                    at: now,
                });
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "assignment expiry sweep failed");
            metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

async fn sweep_session_expiry(persistence: &Persistence, metrics: &SweepMetrics) {
    match persistence.identity.expire_sessions(Utc::now()).await {
        Ok(count) if count > 0 => {
            metrics.sessions_expired.fetch_add(count, Ordering::Relaxed);
            tracing::debug!(count, "expired operator sessions");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(error = %e, "session expiry sweep failed");
            metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn sweep_totp_replay(replay_cache: &TotpReplayCache, metrics: &SweepMetrics) {
    let pruned = replay_cache.prune(Utc::now());
    if pruned > 0 {
        metrics.totp_entries_pruned.fetch_add(pruned as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_counters() {
        let metrics = SweepMetrics::new();
        metrics.agents_marked_offline.store(3, Ordering::Relaxed);
        metrics.assignments_expired.store(2, Ordering::Relaxed);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.agents_marked_offline, 3);
        assert_eq!(snapshot.assignments_expired, 2);
    }
}
