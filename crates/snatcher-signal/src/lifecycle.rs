//! Background session lifecycle sweep
//!
//! A single long-lived task periodically reclaims sessions: hard-expired
//! sessions are force-closed regardless of occupancy, idle empty sessions
//! are dropped outright. Failures on one session never abort the sweep.

use std::time::Duration;

use snatcher_core::SessionConfig;
use tracing::{debug, info, warn};

use crate::messages::CloseReason;
use crate::registry::Registry;

/// Result of one sweep pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Sessions force-expired past the hard age ceiling
    pub expired: usize,
    /// Empty sessions reclaimed past the idle threshold
    pub idle: usize,
}

impl SweepStats {
    pub fn total(&self) -> usize {
        self.expired + self.idle
    }
}

/// Run the periodic sweep until the process exits
pub async fn run(registry: Registry, config: SessionConfig) {
    let interval = Duration::from_secs(config.sweep_interval_secs);
    let idle_after = Duration::from_secs(config.idle_expiry_secs);
    let expire_after = Duration::from_secs(config.hard_expiry_secs);

    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so a fresh server does not
    // sweep an empty registry at startup.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let stats = sweep(&registry, idle_after, expire_after);
        if stats.total() > 0 {
            info!(
                "Cleaned up {} stale sessions ({} expired, {} idle)",
                stats.total(),
                stats.expired,
                stats.idle
            );
        }
    }
}

/// Perform one sweep pass over the registry
///
/// Candidates are collected first so no registry-wide lock is held while
/// peers are being notified. Close delivery is best-effort per peer.
pub fn sweep(registry: &Registry, idle_after: Duration, expire_after: Duration) -> SweepStats {
    let (expired, idle) = registry.sweep_candidates(idle_after, expire_after);
    let mut stats = SweepStats::default();

    for id in expired {
        let Some(session) = registry.remove_session(&id) else {
            continue; // emptied and reclaimed since the scan
        };
        for peer in session.peers_snapshot() {
            if !peer.send(CloseReason::Expired.message()) {
                warn!("Failed to deliver expiry close in session {}", id);
            }
        }
        debug!("Expired stale session: {}", id);
        stats.expired += 1;
    }

    for id in idle {
        if registry.remove_session(&id).is_some() {
            debug!("Removed idle session: {}", id);
            stats.idle += 1;
        }
    }

    stats
}
