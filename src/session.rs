use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::cache::StateCache;
use crate::coordinator::PollCoordinator;
use crate::gateway::FloGateway;

/// Application-assembly context for one Flo account session.
///
/// Owns the gateway and the shared state cache, and enforces the
/// one-coordinator-per-session rule: however many independent entity setups
/// ask for the coordinator, only the first request constructs it and every
/// later request gets the same `Arc`. This is what keeps N entities from
/// each scheduling their own redundant remote poll.
pub struct FloSession {
    gateway: Arc<FloGateway>,
    cache: Arc<StateCache>,
    coordinator: OnceLock<Arc<PollCoordinator>>,
}

impl FloSession {
    pub fn new(gateway: FloGateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
            cache: Arc::new(StateCache::new()),
            coordinator: OnceLock::new(),
        }
    }

    pub fn gateway(&self) -> Arc<FloGateway> {
        self.gateway.clone()
    }

    pub fn cache(&self) -> Arc<StateCache> {
        self.cache.clone()
    }

    /// The session's poll coordinator, created on first request.
    /// `location_ids` only takes effect on that first call; later callers
    /// share the already-configured instance.
    pub fn coordinator(&self, location_ids: Vec<String>) -> Arc<PollCoordinator> {
        let mut created = false;
        let coordinator = self.coordinator.get_or_init(|| {
            created = true;
            Arc::new(PollCoordinator::new(
                self.gateway.clone(),
                self.cache.clone(),
                location_ids,
            ))
        });
        if !created {
            debug!("reusing existing poll coordinator for session");
        }
        coordinator.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> FloSession {
        FloSession::new(FloGateway::builder("user@example.com", "secret").build())
    }

    #[test]
    fn coordinator_created_once() {
        let session = session();
        let first = session.coordinator(vec!["loc-1".to_string()]);
        let second = session.coordinator(vec!["loc-2".to_string()]);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn gateway_and_cache_are_shared() {
        let session = session();
        assert!(Arc::ptr_eq(&session.cache(), &session.cache()));
        assert!(Arc::ptr_eq(&session.gateway(), &session.gateway()));
    }
}
