//! Pool of service instances available to automations.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::InputSlot;

/// Service instances keyed by the type they are registered as.
///
/// Registering `Arc<dyn Capability>` makes the service available to every
/// automation that asks for `dyn Capability`, regardless of its concrete
/// type. The pool may change while a run is in progress; every attempt
/// resolves its inputs afresh.
#[derive(Default)]
pub struct ServicePool {
    services: RwLock<HashMap<TypeId, Entry>>,
}

struct Entry {
    type_name: &'static str,
    /// Always an `Arc<T>` for the `T` of the key.
    value: Box<dyn Any + Send + Sync>,
}

impl ServicePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a service.
    pub fn with<T>(self, service: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.insert(service);
        self
    }

    /// Register `service` as a `T`, replacing any previous `T`.
    pub fn insert<T>(&self, service: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<T>();
        let previous = self.write().insert(
            TypeId::of::<T>(),
            Entry {
                type_name,
                value: Box::new(service),
            },
        );
        if previous.is_some() {
            debug!(service = type_name, "replaced service");
        }
    }

    /// Remove the service registered as a `T`.
    pub fn remove<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.write().remove(&TypeId::of::<T>()).is_some()
    }

    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.read()
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value.downcast_ref::<Arc<T>>())
            .cloned()
    }

    pub fn contains(&self, slot: &InputSlot) -> bool {
        self.read().contains_key(&slot.type_id())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TypeId, Entry>> {
        self.services.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TypeId, Entry>> {
        self.services.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for ServicePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.read().values().map(|e| e.type_name).collect();
        f.debug_struct("ServicePool").field("services", &names).finish()
    }
}
