//! Non-owning component identity.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

/// A non-owning handle to a component instance.
///
/// A component is any value shared through an `Arc`. The handle records the
/// address of the instance, its concrete type and its type path, together with
/// a weak probe used to tell whether the instance is still alive.
///
/// Holding a `ComponentRef` never keeps the component alive. Because the weak
/// probe keeps the allocation itself reserved, however, two handles with the
/// same address always designate the same instance, even after it was
/// dropped.
#[derive(Clone)]
pub struct ComponentRef {
    addr: usize,
    probe: Weak<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_path: &'static str,
}

impl ComponentRef {
    /// Creates a handle to the specified component.
    pub fn new<C: Send + Sync + 'static>(component: &Arc<C>) -> Self {
        Self::from_weak(&Arc::downgrade(component))
    }

    /// Creates a handle from a weak reference to a component.
    ///
    /// The weak reference may be dangling, in which case the handle is created
    /// dead.
    pub fn from_weak<C: Send + Sync + 'static>(component: &Weak<C>) -> Self {
        let probe: Weak<dyn Any + Send + Sync> = component.clone();

        Self {
            addr: component.as_ptr() as *const () as usize,
            probe,
            type_id: TypeId::of::<C>(),
            type_path: type_path::<C>(),
        }
    }

    /// Returns `true` if the component has not been dropped yet.
    pub fn is_alive(&self) -> bool {
        self.probe.strong_count() > 0
    }

    /// Returns `true` if this handle designates the specified component.
    pub fn refers_to<C: Send + Sync + 'static>(&self, component: &Arc<C>) -> bool {
        self.addr == Arc::as_ptr(component) as *const () as usize
    }

    /// Returns the `TypeId` of the component.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the type path of the component, without generic arguments.
    pub fn type_path(&self) -> &'static str {
        self.type_path
    }

    pub(crate) fn addr(&self) -> usize {
        self.addr
    }
}

impl PartialEq for ComponentRef {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for ComponentRef {}

impl Hash for ComponentRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRef")
            .field("type_path", &self.type_path)
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Returns the path of a type with its generic arguments stripped, e.g.
/// `app::net::Client` for `app::net::Client<u8>`.
pub(crate) fn type_path<C: ?Sized>() -> &'static str {
    let name = std::any::type_name::<C>();
    match name.find('<') {
        Some(pos) => &name[..pos],
        None => name,
    }
}

/// Returns the enclosing namespace of a path, e.g. `app::net` for
/// `app::net::Client`.
pub(crate) fn parent_namespace(path: &str) -> Option<&str> {
    path.rfind("::").map(|pos| &path[..pos])
}
