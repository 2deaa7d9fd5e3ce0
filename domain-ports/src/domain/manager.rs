use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam_utils::sync::ShardedLock;

use crate::component::{parent_namespace, type_path, ComponentRef};
use crate::error::PortsError;

use super::{DispatchPolicy, Domain, SyncPolicy};

#[derive(Default)]
struct Registry {
    // Keyed by component address; the reference doubles as liveness probe.
    instances: HashMap<usize, (ComponentRef, Domain)>,
    types: HashMap<TypeId, Domain>,
    namespaces: HashMap<String, Domain>,
}

impl Registry {
    fn evict_dead_instances(&mut self) {
        self.instances.retain(|_, (component, _)| component.is_alive());
    }

    fn resolve_type(&self, type_id: TypeId, type_path: &str) -> Option<Domain> {
        if let Some(domain) = self.types.get(&type_id) {
            return Some(domain.clone());
        }

        std::iter::successors(Some(type_path), |&path| parent_namespace(path))
            .find_map(|namespace| self.namespaces.get(namespace))
            .cloned()
    }
}

/// Registry of domain bindings.
///
/// A component is resolved to a domain by looking up, in order:
///
/// 1. a binding of the component instance itself,
/// 2. a binding of its type,
/// 3. a binding of its type path or of one of the enclosing namespaces, from
///    the most to the least specific,
/// 4. the default domain, which dispatches on the sender's thread with
///    component-level synchronization.
///
/// Instance bindings do not keep the component alive and are ignored once it
/// is dropped. Every mutation of the registry bumps a generation counter,
/// which lets callers cache resolutions.
///
/// ```
/// use std::sync::Arc;
/// use domain_ports::{DispatchPolicy, Domain, DomainManager, SyncPolicy};
///
/// struct Printer;
///
/// let manager = DomainManager::new();
/// let pool = Domain::new("pool", DispatchPolicy::Parallel, SyncPolicy::ComponentSync)?;
/// manager.bind_type::<Printer>(pool.clone());
///
/// let printer = Arc::new(Printer);
/// assert_eq!(manager.resolve(&printer), pool);
/// # Ok::<(), domain_ports::PortsError>(())
/// ```
pub struct DomainManager {
    registry: ShardedLock<Registry>,
    generation: AtomicU64,
    default_domain: Domain,
}

impl DomainManager {
    /// Creates a manager with no binding.
    pub fn new() -> Self {
        let default_domain = Domain::builder("default")
            .dispatch(DispatchPolicy::SameThread)
            .sync(SyncPolicy::ComponentSync)
            .into_domain();

        Self::with_default_domain(default_domain)
    }

    /// Creates a manager with no binding and a custom default domain.
    pub fn with_default_domain(default_domain: Domain) -> Self {
        Self {
            registry: ShardedLock::new(Registry::default()),
            generation: AtomicU64::new(0),
            default_domain,
        }
    }

    /// The process-wide manager used by port dispatch.
    pub fn global() -> &'static DomainManager {
        static GLOBAL: OnceLock<DomainManager> = OnceLock::new();

        GLOBAL.get_or_init(DomainManager::new)
    }

    /// Domain used for components without any binding.
    pub fn default_domain(&self) -> &Domain {
        &self.default_domain
    }

    /// Resolves the domain of a component instance.
    pub fn resolve<C: Send + Sync + 'static>(&self, component: &Arc<C>) -> Domain {
        self.resolve_ref(&ComponentRef::new(component))
    }

    /// Resolves the domain of a component designated by a handle.
    pub fn resolve_ref(&self, component: &ComponentRef) -> Domain {
        let registry = self.registry.read().unwrap();

        if let Some((bound, domain)) = registry.instances.get(&component.addr()) {
            if bound.is_alive() {
                return domain.clone();
            }
        }

        registry
            .resolve_type(component.type_id(), component.type_path())
            .unwrap_or_else(|| self.default_domain.clone())
    }

    /// Resolves the domain of a component type, ignoring instance bindings.
    pub fn resolve_type<C: ?Sized + 'static>(&self) -> Domain {
        self.resolve_type_id(TypeId::of::<C>(), type_path::<C>())
    }

    pub(crate) fn resolve_type_id(&self, type_id: TypeId, type_path: &str) -> Domain {
        self.registry
            .read()
            .unwrap()
            .resolve_type(type_id, type_path)
            .unwrap_or_else(|| self.default_domain.clone())
    }

    /// Binds a component instance to a domain, replacing any previous binding.
    pub fn bind_instance<C: Send + Sync + 'static>(&self, component: &Arc<C>, domain: Domain) {
        let component = ComponentRef::new(component);
        self.mutate(|registry| {
            registry.evict_dead_instances();
            registry
                .instances
                .insert(component.addr(), (component, domain));
        });
    }

    /// Binds a component type to a domain, replacing any previous binding.
    pub fn bind_type<C: ?Sized + 'static>(&self, domain: Domain) {
        self.mutate(|registry| {
            registry.types.insert(TypeId::of::<C>(), domain);
        });
    }

    /// Binds a namespace to a domain, replacing any previous binding.
    ///
    /// A namespace is a `::`-separated path prefix of component type paths,
    /// such as `my_app::billing`. A full type path is accepted too, in which
    /// case the binding applies to every instantiation of a generic type.
    pub fn bind_namespace(&self, namespace: &str, domain: Domain) -> Result<(), PortsError> {
        let namespace = namespace.trim().trim_end_matches("::");
        if namespace.is_empty() {
            return Err(PortsError::ArgumentInvalid(
                "the namespace should not be empty".into(),
            ));
        }
        self.mutate(|registry| {
            registry.namespaces.insert(namespace.to_owned(), domain);
        });

        Ok(())
    }

    /// Removes the binding of a component instance.
    pub fn unbind_instance<C: Send + Sync + 'static>(&self, component: &Arc<C>) -> Option<Domain> {
        let addr = ComponentRef::new(component).addr();
        self.mutate(|registry| {
            registry.evict_dead_instances();
            registry.instances.remove(&addr).map(|(_, domain)| domain)
        })
    }

    /// Removes the binding of a component type.
    pub fn unbind_type<C: ?Sized + 'static>(&self) -> Option<Domain> {
        self.mutate(|registry| registry.types.remove(&TypeId::of::<C>()))
    }

    /// Removes the binding of a namespace.
    pub fn unbind_namespace(&self, namespace: &str) -> Option<Domain> {
        let namespace = namespace.trim().trim_end_matches("::");
        self.mutate(|registry| registry.namespaces.remove(namespace))
    }

    /// Invalidates cached resolutions without changing any binding.
    pub fn invalidate(&self) {
        self.mutate(|_| {});
    }

    /// Current generation of the registry.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// All distinct domains known to the manager, the default domain
    /// included.
    pub fn domains(&self) -> Vec<Domain> {
        let registry = self.registry.read().unwrap();

        let mut domains = vec![self.default_domain.clone()];
        let bound = registry
            .instances
            .values()
            .filter(|(component, _)| component.is_alive())
            .map(|(_, domain)| domain)
            .chain(registry.types.values())
            .chain(registry.namespaces.values());
        for domain in bound {
            if !domains.contains(domain) {
                domains.push(domain.clone());
            }
        }

        domains
    }

    /// Blocks until the pools of all known domains are quiescent.
    pub fn await_quiescence(&self) {
        for domain in self.domains() {
            domain.await_quiescence();
        }
    }

    /// Releases the pools of all known domains and clears every binding.
    pub fn release(&self) {
        let domains = self.domains();
        self.mutate(|registry| *registry = Registry::default());
        for domain in domains {
            domain.release();
        }
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
        let mut registry = self.registry.write().unwrap();
        let result = f(&mut registry);
        // Bumped under the write lock so that a reader observing the new
        // generation also observes the new bindings.
        self.generation.fetch_add(1, Ordering::AcqRel);

        result
    }
}

impl Default for DomainManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DomainManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainManager")
            .field("generation", &self.generation())
            .field("default_domain", &self.default_domain)
            .finish_non_exhaustive()
    }
}
