//! Side table associating loaded modules with their policies.

use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::{
    metadata::identity::ModuleId,
    policy::CasPolicy,
    runtime::domain::LoadedModule,
};

struct PolicyEntry {
    module: Weak<LoadedModule>,
    policy: Arc<CasPolicy>,
}

/// Policies of sandboxed modules, keyed by module identity.
///
/// Entries hold the module weakly: once a module is unloaded and its last strong reference is
/// gone, the next lookup evicts the entry instead of handing out a stale policy.
#[derive(Default)]
pub struct PolicyTable {
    entries: DashMap<ModuleId, PolicyEntry>,
}

impl PolicyTable {
    /// Creates an empty table
    #[must_use]
    pub fn new() -> Self {
        PolicyTable {
            entries: DashMap::new(),
        }
    }

    /// Associates `policy` with `module`, replacing any previous association
    pub fn register(&self, module: &Arc<LoadedModule>, policy: Arc<CasPolicy>) {
        log::debug!("registered policy for {} ({} grants)", module.name(), policy.len());
        self.entries.insert(
            module.id,
            PolicyEntry {
                module: Arc::downgrade(module),
                policy,
            },
        );
    }

    /// The policy of a live module
    #[must_use]
    pub fn get(&self, module: ModuleId) -> Option<Arc<CasPolicy>> {
        let policy = {
            let entry = self.entries.get(&module)?;
            if entry.module.strong_count() > 0 {
                return Some(entry.policy.clone());
            }
            entry.policy.clone()
        };
        self.entries.remove(&module);
        log::warn!("evicted policy of unloaded module {} ({} grants)", module, policy.len());
        None
    }

    /// Drops the association of `module`, returning the policy it had
    pub fn remove(&self, module: ModuleId) -> Option<Arc<CasPolicy>> {
        self.entries.remove(&module).map(|(_, entry)| entry.policy)
    }

    /// Removes every entry whose module is gone, returning how many were removed
    pub fn evict_dead(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.module.strong_count() > 0);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            log::warn!("evicted {} policies of unloaded modules", evicted);
        }
        evicted
    }

    /// Number of registered policies, including not yet evicted dead ones
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no policy is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{identity::LoadContextId, module::ModuleDef},
        runtime::domain::Domain,
    };

    #[test]
    fn test_unloaded_module_is_evicted() {
        let domain = Domain::new();
        let context = domain.create_context(true);
        let table = PolicyTable::new();

        let kept = domain.load(ModuleDef::new("Kept"), LoadContextId::DEFAULT).unwrap();
        let dropped = domain.load(ModuleDef::new("Dropped"), context).unwrap();
        table.register(&kept, Arc::new(CasPolicy::empty()));
        table.register(&dropped, Arc::new(CasPolicy::empty()));
        let dropped_id = dropped.id;

        domain.unload_context(context).unwrap();
        assert!(table.get(dropped_id).is_some(), "still referenced here");

        drop(dropped);
        assert!(table.get(dropped_id).is_none());
        assert_eq!(table.len(), 1);
        assert!(table.get(kept.id).is_some());
    }

    #[test]
    fn test_evict_dead() {
        let domain = Domain::new();
        let context = domain.create_context(true);
        let table = PolicyTable::new();
        {
            let module = domain.load(ModuleDef::new("Plugin"), context).unwrap();
            table.register(&module, Arc::new(CasPolicy::empty()));
        }
        domain.unload_context(context).unwrap();
        assert_eq!(table.evict_dead(), 1);
        assert!(table.is_empty());
    }
}
