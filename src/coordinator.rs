use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::StateCache;
use crate::gateway::FloGateway;
use crate::types::Snapshot;
use crate::Result;

/// Observability record for the most recent successful poll cycle.
#[derive(Debug, Clone, Copy)]
pub struct PollStats {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub locations: usize,
    pub devices: usize,
    pub failures: usize,
}

/// Batch-refreshes the shared state cache from the Flo service.
///
/// Exactly one coordinator should exist per session (see `FloSession`); the
/// host's scheduler drives `refresh()` on a fixed interval and is expected
/// not to overlap invocations.
pub struct PollCoordinator {
    gateway: Arc<FloGateway>,
    cache: Arc<StateCache>,
    /// Empty = refresh every location discovered on the account.
    location_ids: Vec<String>,
    last_poll: Mutex<Option<PollStats>>,
}

impl PollCoordinator {
    pub fn new(
        gateway: Arc<FloGateway>,
        cache: Arc<StateCache>,
        location_ids: Vec<String>,
    ) -> Self {
        Self {
            gateway,
            cache,
            location_ids,
            last_poll: Mutex::new(None),
        }
    }

    /// One full poll cycle: bypass the gateway cache, fetch every in-scope
    /// location and device, then publish the batch atomically.
    ///
    /// A transport failure on the location listing aborts the cycle before
    /// any cache write; the previous snapshots stay intact and the next
    /// scheduled cycle retries. A failure on an individual device is logged
    /// and skipped so the rest of the batch still lands.
    pub async fn refresh(&self) -> Result<PollStats> {
        let cycle_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let started_at = Utc::now();

        self.gateway.clear_cache();
        let discovered = self.gateway.locations().await?;

        let in_scope: Vec<_> = if self.location_ids.is_empty() {
            discovered.iter().collect()
        } else {
            discovered
                .iter()
                .filter(|loc| self.location_ids.contains(&loc.id))
                .collect()
        };
        if !self.location_ids.is_empty() && in_scope.len() < self.location_ids.len() {
            warn!(
                cycle = %cycle_id,
                configured = self.location_ids.len(),
                found = in_scope.len(),
                "some configured locations were not returned by the service"
            );
        }

        let mut batch: Vec<(String, Snapshot)> = Vec::new();
        let mut devices = 0usize;
        let mut failures = 0usize;

        for location in &in_scope {
            // Location goes into the batch ahead of its devices so device
            // subscribers never observe a stale parent.
            batch.push((location.id.clone(), Snapshot::Location((*location).clone())));

            for device_id in &location.device_ids {
                match self.gateway.device(device_id).await {
                    Ok(Some(device)) => {
                        batch.push((device.id.clone(), Snapshot::Device(device)));
                        devices += 1;
                    }
                    Ok(None) => {
                        warn!(cycle = %cycle_id, device = %device_id, "device not found, keeping previous snapshot");
                        failures += 1;
                    }
                    Err(e) => {
                        warn!(cycle = %cycle_id, device = %device_id, "device refresh failed: {e}");
                        failures += 1;
                    }
                }
            }
        }

        let locations = in_scope.len();
        self.cache.apply_batch(batch);

        let stats = PollStats {
            started_at,
            duration: started.elapsed(),
            locations,
            devices,
            failures,
        };
        *self.last_poll.lock().expect("stats lock poisoned") = Some(stats);
        self.gateway.log_cycle(&cycle_id, locations, devices, failures);
        debug!(
            cycle = %cycle_id,
            locations,
            devices,
            failures,
            duration_ms = stats.duration.as_millis() as u64,
            "poll cycle complete"
        );
        Ok(stats)
    }

    /// Stats from the most recent successful cycle, if any.
    pub fn last_poll(&self) -> Option<PollStats> {
        *self.last_poll.lock().expect("stats lock poisoned")
    }

    pub fn cache(&self) -> &Arc<StateCache> {
        &self.cache
    }
}
