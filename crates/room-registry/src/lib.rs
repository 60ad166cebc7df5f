//! Endpoint registry for room attendants.
//!
//! Tracks which peers are currently connected to this room and hands out
//! their callable endpoints. The relay core consumes the registry only
//! through [`EndpointDirectory`], a lookup-only view, so tunnel handling
//! stays decoupled from connection lifecycle.
//!
//! Eviction is this crate's concern: the connection lifecycle unregisters a
//! peer when its transport goes away, and a reconnecting peer replaces its
//! stale entry on register. The tunnel layer never mutates the registry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use room_proto::Identity;
use room_transport::Endpoint;

/// Lookup-only view of the attendants of a room.
///
/// The tunnel handler resolves targets through this trait, so tests can
/// substitute a canned directory without a live registry.
pub trait EndpointDirectory: Send + Sync {
    /// The endpoint currently registered for `identity`, if any.
    fn lookup(&self, identity: &Identity) -> Option<Arc<dyn Endpoint>>;

    fn contains(&self, identity: &Identity) -> bool {
        self.lookup(identity).is_some()
    }
}

/// One registered attendant.
#[derive(Clone)]
struct Registered {
    endpoint: Arc<dyn Endpoint>,
    joined_at: DateTime<Utc>,
}

/// A currently connected peer, as reported by [`EndpointRegistry::attendants`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attendant {
    pub identity: Identity,
    pub joined_at: DateTime<Utc>,
}

/// Registry of connected endpoints, keyed by peer identity.
///
/// Cheap to clone; all clones share the same map.
#[derive(Clone, Default)]
pub struct EndpointRegistry {
    endpoints: Arc<DashMap<Identity, Registered>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self {
            endpoints: Arc::new(DashMap::new()),
        }
    }

    /// Registers `endpoint` under its identity.
    ///
    /// A stale entry for the same identity is replaced, which covers peers
    /// reconnecting before their old connection was torn down. Returns true
    /// if an entry was replaced.
    pub fn register(&self, endpoint: Arc<dyn Endpoint>) -> bool {
        let identity = endpoint.identity();
        let replaced = self
            .endpoints
            .insert(
                identity,
                Registered {
                    endpoint,
                    joined_at: Utc::now(),
                },
            )
            .is_some();
        if replaced {
            warn!(peer = %identity.short(), "endpoint re-registered, replacing stale entry");
        } else {
            info!(peer = %identity.short(), "endpoint registered");
        }
        replaced
    }

    /// Removes the entry for `identity`. Returns true if one existed.
    ///
    /// Removes whatever is registered, so this belongs to administrative
    /// paths. Connection teardown must use
    /// [`EndpointRegistry::unregister_endpoint`] instead: a reconnecting
    /// peer replaces its entry, and the old connection's teardown must not
    /// evict the replacement.
    pub fn unregister(&self, identity: &Identity) -> bool {
        let removed = self.endpoints.remove(identity).is_some();
        if removed {
            info!(peer = %identity.short(), "endpoint unregistered");
        }
        removed
    }

    /// Removes `endpoint`'s entry only while it is still the registered one.
    /// Returns true if it was removed.
    ///
    /// The guard is pointer identity on the registered `Arc`, so callers
    /// must pass the same handle they registered.
    pub fn unregister_endpoint(&self, endpoint: &Arc<dyn Endpoint>) -> bool {
        let identity = endpoint.identity();
        let removed = self
            .endpoints
            .remove_if(&identity, |_, registered| {
                Arc::ptr_eq(&registered.endpoint, endpoint)
            })
            .is_some();
        if removed {
            info!(peer = %identity.short(), "endpoint unregistered");
        } else {
            debug!(peer = %identity.short(), "skipping unregister, entry no longer ours");
        }
        removed
    }

    /// All currently connected peers, most recent join last.
    pub fn attendants(&self) -> Vec<Attendant> {
        let mut all: Vec<Attendant> = self
            .endpoints
            .iter()
            .map(|entry| Attendant {
                identity: *entry.key(),
                joined_at: entry.value().joined_at,
            })
            .collect();
        all.sort_by_key(|a| a.joined_at);
        all
    }

    pub fn count(&self) -> usize {
        self.endpoints.len()
    }
}

impl EndpointDirectory for EndpointRegistry {
    fn lookup(&self, identity: &Identity) -> Option<Arc<dyn Endpoint>> {
        self.endpoints
            .get(identity)
            .map(|entry| entry.value().endpoint.clone())
    }

    fn contains(&self, identity: &Identity) -> bool {
        self.endpoints.contains_key(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use room_proto::Keypair;
    use room_transport::memory::MemoryEndpoint;

    fn echo_endpoint() -> (Identity, Arc<dyn Endpoint>) {
        let identity = Keypair::generate().identity();
        (identity, Arc::new(MemoryEndpoint::echo(identity)))
    }

    #[test]
    fn test_register_lookup() {
        let registry = EndpointRegistry::new();
        let (identity, endpoint) = echo_endpoint();

        assert!(!registry.register(endpoint));

        let found = registry.lookup(&identity).unwrap();
        assert_eq!(found.identity(), identity);
        assert!(registry.contains(&identity));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_lookup_unknown() {
        let registry = EndpointRegistry::new();
        let stranger = Keypair::generate().identity();

        assert!(registry.lookup(&stranger).is_none());
        assert!(!registry.contains(&stranger));
    }

    #[test]
    fn test_reregister_replaces() {
        let registry = EndpointRegistry::new();
        let identity = Keypair::generate().identity();

        let first: Arc<dyn Endpoint> = Arc::new(MemoryEndpoint::echo(identity));
        let second: Arc<dyn Endpoint> = Arc::new(MemoryEndpoint::echo(identity));

        assert!(!registry.register(first));
        assert!(registry.register(second.clone()));

        assert_eq!(registry.count(), 1);
        let found = registry.lookup(&identity).unwrap();
        assert!(Arc::ptr_eq(&found, &second));
    }

    #[test]
    fn test_stale_teardown_spares_replacement() {
        let registry = EndpointRegistry::new();
        let identity = Keypair::generate().identity();

        let first: Arc<dyn Endpoint> = Arc::new(MemoryEndpoint::echo(identity));
        let second: Arc<dyn Endpoint> = Arc::new(MemoryEndpoint::echo(identity));

        registry.register(first.clone());
        assert!(registry.register(second.clone()));

        // The replaced connection tears down late; the live entry stays put.
        assert!(!registry.unregister_endpoint(&first));
        let found = registry.lookup(&identity).unwrap();
        assert!(Arc::ptr_eq(&found, &second));

        // The live connection's own teardown still removes it.
        assert!(registry.unregister_endpoint(&second));
        assert!(registry.lookup(&identity).is_none());
    }

    #[test]
    fn test_unregister() {
        let registry = EndpointRegistry::new();
        let (identity, endpoint) = echo_endpoint();

        registry.register(endpoint);
        assert!(registry.unregister(&identity));
        assert!(!registry.unregister(&identity));
        assert!(registry.lookup(&identity).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_attendants_ordered_by_join() {
        let registry = EndpointRegistry::new();
        let (first_id, first) = echo_endpoint();
        let (second_id, second) = echo_endpoint();

        registry.register(first);
        std::thread::sleep(std::time::Duration::from_millis(2));
        registry.register(second);

        let attendants = registry.attendants();
        assert_eq!(attendants.len(), 2);
        assert_eq!(attendants[0].identity, first_id);
        assert_eq!(attendants[1].identity, second_id);
        assert!(attendants[0].joined_at <= attendants[1].joined_at);
    }

    #[test]
    fn test_clones_share_state() {
        let registry = EndpointRegistry::new();
        let view = registry.clone();
        let (identity, endpoint) = echo_endpoint();

        registry.register(endpoint);
        assert!(view.contains(&identity));

        view.unregister(&identity);
        assert_eq!(registry.count(), 0);
    }
}
