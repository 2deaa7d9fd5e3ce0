//! Routing of port messages to their receivers.

use std::any::TypeId;
use std::sync::Mutex;

use crate::component::{type_path, ComponentRef};
use crate::domain::{Domain, DomainManager, SyncPolicy};
use crate::lock_manager::{LockManager, LockSubject, SubjectLock};

/// Type of the component declaring a port.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Owner {
    type_id: TypeId,
    type_path: &'static str,
}

impl Owner {
    pub(crate) fn of<C: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            type_path: type_path::<C>(),
        }
    }

    /// Domain of the owner type in the global manager.
    pub(crate) fn domain(&self) -> Domain {
        DomainManager::global().resolve_type_id(self.type_id, self.type_path)
    }
}

/// Type path of an optional port owner, for reports.
pub(crate) fn owner_path(owner: Option<Owner>) -> &'static str {
    owner.map_or("<unknown>", |owner| owner.type_path)
}

/// Domain of a receiver, cached until the global manager changes
/// generation.
#[derive(Debug, Default)]
pub(crate) struct CachedDomain {
    cached: Mutex<Option<(u64, Domain)>>,
}

impl CachedDomain {
    pub(crate) fn resolve(&self, receiver: &ComponentRef) -> Domain {
        let manager = DomainManager::global();
        // Read before resolving: a concurrent rebinding then leaves a stale
        // generation in the cache, which forces a new resolution next time.
        let generation = manager.generation();

        let mut cached = self.cached.lock().unwrap();
        if let Some((cached_generation, domain)) = &*cached {
            if *cached_generation == generation {
                return domain.clone();
            }
        }
        let domain = manager.resolve_ref(receiver);
        *cached = Some((generation, domain.clone()));

        domain
    }
}

/// Lock that guards a call to `receiver` in `domain`, if any.
pub(crate) fn guard_lock(domain: &Domain, receiver: &ComponentRef) -> Option<SubjectLock> {
    let subject = match domain.sync_policy() {
        SyncPolicy::Asynchronous => return None,
        SyncPolicy::ComponentSync => LockSubject::Component(receiver.clone()),
        SyncPolicy::DomainSync => LockSubject::Domain(domain.clone()),
    };

    Some(LockManager::global().get_or_create_lock(&subject))
}

/// Runs `f` while holding `lock`, if any.
pub(crate) fn run_guarded<R>(lock: Option<&SubjectLock>, f: impl FnOnce() -> R) -> R {
    match lock {
        Some(lock) => {
            let _guard = LockManager::global().acquire(lock);
            f()
        }
        None => f(),
    }
}
