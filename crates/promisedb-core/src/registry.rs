//! Adapter registries
//!
//! [`get_or_create_singleton`] keeps one adapter per engine type: the first
//! call decides the database, later calls get that same adapter back whatever
//! they pass. [`Registry`] is the explicit alternative, keyed by database name.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;

use tracing::debug;

use crate::config::DbConfig;
use crate::db::PromiseDb;
use crate::engine::StorageEngine;

thread_local! {
    // One slot per engine type. WASM is single-threaded, so per-thread is per-process there.
    static SINGLETONS: RefCell<HashMap<TypeId, Box<dyn Any>>> = RefCell::new(HashMap::new());
}

/// Return the adapter for engine `E`, creating it over `E::default()` on the
/// first call. Later calls ignore `name` and `version`.
pub fn get_or_create_singleton<E>(name: &str, version: Option<u32>) -> PromiseDb<E>
where
    E: StorageEngine + Default + 'static,
{
    SINGLETONS.with(|slots| {
        let mut slots = slots.borrow_mut();
        let slot = slots.entry(TypeId::of::<E>()).or_insert_with(|| {
            debug!(database = name, ?version, "creating singleton adapter");
            let config = DbConfig {
                name: name.to_string(),
                version,
            };
            Box::new(PromiseDb::new(config, E::default()))
        });
        match slot.downcast_ref::<PromiseDb<E>>() {
            Some(db) => db.clone(),
            None => unreachable!("singleton slot keyed by TypeId holds another type"),
        }
    })
}

/// Adapters keyed by database name, all over clones of one engine.
pub struct Registry<E: StorageEngine + Clone> {
    engine: E,
    adapters: RefCell<HashMap<String, PromiseDb<E>>>,
}

impl<E: StorageEngine + Clone> Registry<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            adapters: RefCell::new(HashMap::new()),
        }
    }

    /// The adapter for `config.name`, created from `config` if there is none.
    /// An existing adapter keeps the version it was created with.
    pub fn get_or_create(&self, config: DbConfig) -> PromiseDb<E> {
        self.adapters
            .borrow_mut()
            .entry(config.name.clone())
            .or_insert_with(|| PromiseDb::new(config, self.engine.clone()))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<PromiseDb<E>> {
        self.adapters.borrow().get(name).cloned()
    }

    /// Drop the adapter for `name`, closing its connection.
    pub fn remove(&self, name: &str) -> Option<PromiseDb<E>> {
        let removed = self.adapters.borrow_mut().remove(name);
        if let Some(db) = &removed {
            db.close();
        }
        removed
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.borrow().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;

    #[test]
    fn test_singleton_ignores_later_arguments() {
        let first = get_or_create_singleton::<MemoryEngine>("PromiseDB", None);
        let second = get_or_create_singleton::<MemoryEngine>("Other", Some(9));

        assert!(first.ptr_eq(&second));
        assert_eq!(second.config(), &DbConfig::new("PromiseDB"));
    }

    #[test]
    fn test_registry_keyed_by_name() {
        let registry = Registry::new(MemoryEngine::new());
        let a = registry.get_or_create(DbConfig::new("a"));
        let a_again = registry.get_or_create(DbConfig::new("a").with_version(4));
        let b = registry.get_or_create(DbConfig::new("b"));

        assert!(a.ptr_eq(&a_again));
        assert_eq!(a_again.config().version, None);
        assert!(!a.ptr_eq(&b));
        assert_eq!(registry.names(), vec!["a", "b"]);

        assert!(registry.remove("a").is_some());
        assert!(registry.get("a").is_none());
        assert!(registry.get("b").is_some());
    }
}
