//! Connection-name bookkeeping shared by the providers.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Ticket for one registration of a connection name.
///
/// Re-registering a name issues a new ticket; only the holder of the
/// current ticket can remove the name again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

#[derive(Debug, Default)]
struct Entries {
    next: u64,
    names: HashMap<String, RegistrationId>,
}

/// Connection names currently handed out by a provider.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: Mutex<Entries>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records `name`; a name that is already present is taken over by the
    /// new registration.
    pub fn register(&self, name: &str) -> RegistrationId {
        let mut entries = self.lock();
        entries.next += 1;
        let id = RegistrationId(entries.next);
        if entries.names.insert(name.to_string(), id).is_some() {
            warn!(
                connection = name,
                "connection name is still in use, the old connection is replaced"
            );
        }
        id
    }

    /// Removes `name` if `id` is its current registration.
    ///
    /// Returns `false` when the name is unknown or was taken over since.
    pub fn unregister(&self, name: &str, id: RegistrationId) -> bool {
        let mut entries = self.lock();
        match entries.names.get(name) {
            Some(current) if *current == id => {
                entries.names.remove(name);
                true
            }
            Some(_) => {
                debug!(connection = name, "stale registration, name kept for its new owner");
                false
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().names.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty());

        let id = registry.register("main");
        assert!(registry.contains("main"));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister("main", id));
        assert!(!registry.unregister("main", id));
        assert!(!registry.contains("main"));
    }

    #[test]
    fn test_stale_ticket_keeps_new_owner() {
        let registry = ConnectionRegistry::new();
        let old = registry.register("main");
        let new = registry.register("main");
        assert_ne!(old, new);
        assert_eq!(registry.len(), 1);

        assert!(!registry.unregister("main", old));
        assert!(registry.contains("main"));

        assert!(registry.unregister("main", new));
        assert!(registry.is_empty());
    }
}
