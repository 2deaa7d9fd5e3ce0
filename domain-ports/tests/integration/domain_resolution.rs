//! Resolution of component domains.

use std::any;
use std::sync::Arc;

use domain_ports::{DispatchPolicy, Domain, DomainManager, PortsError, SyncPolicy};

mod billing {
    pub(crate) mod invoices {
        pub(crate) struct Invoice;
    }

    pub(crate) struct Ledger;
}

struct Unbound;

fn same_thread(name: &str) -> Domain {
    Domain::new(name, DispatchPolicy::SameThread, SyncPolicy::Asynchronous).unwrap()
}

/// Namespace enclosing a type, e.g. `a::b` for `a::b::C`.
fn namespace_of<T>() -> &'static str {
    let path = any::type_name::<T>();

    path.rsplit_once("::").map_or(path, |(namespace, _)| namespace)
}

#[test]
fn resolution_precedence() {
    let manager = DomainManager::new();
    let instance_domain = same_thread("instance");
    let type_domain = same_thread("type");
    let namespace_domain = same_thread("namespace");

    let invoice = Arc::new(billing::invoices::Invoice);
    let other_invoice = Arc::new(billing::invoices::Invoice);
    assert_eq!(manager.resolve(&invoice), *manager.default_domain());

    manager
        .bind_namespace(namespace_of::<billing::Ledger>(), namespace_domain.clone())
        .unwrap();
    assert_eq!(manager.resolve(&invoice), namespace_domain);

    manager.bind_type::<billing::invoices::Invoice>(type_domain.clone());
    assert_eq!(manager.resolve(&invoice), type_domain);

    manager.bind_instance(&invoice, instance_domain.clone());
    assert_eq!(manager.resolve(&invoice), instance_domain);
    assert_eq!(manager.resolve(&other_invoice), type_domain);
    assert_eq!(manager.resolve_type::<billing::invoices::Invoice>(), type_domain);

    manager.unbind_instance(&invoice);
    manager.unbind_type::<billing::invoices::Invoice>();
    assert_eq!(manager.resolve(&invoice), namespace_domain);

    assert_eq!(manager.resolve(&Arc::new(Unbound)), *manager.default_domain());
}

#[test]
fn resolution_prefers_most_specific_namespace() {
    let manager = DomainManager::new();
    let outer = same_thread("outer");
    let inner = same_thread("inner");

    let outer_namespace = namespace_of::<billing::Ledger>();
    let inner_namespace = namespace_of::<billing::invoices::Invoice>();
    manager.bind_namespace(outer_namespace, outer.clone()).unwrap();
    manager.bind_namespace(inner_namespace, inner.clone()).unwrap();

    assert_eq!(manager.resolve(&Arc::new(billing::invoices::Invoice)), inner);
    assert_eq!(manager.resolve(&Arc::new(billing::Ledger)), outer);

    manager.unbind_namespace(inner_namespace);
    assert_eq!(manager.resolve(&Arc::new(billing::invoices::Invoice)), outer);
}

#[test]
fn resolution_generation_tracks_mutations() {
    let manager = DomainManager::new();
    let domain = same_thread("generations");
    let ledger = Arc::new(billing::Ledger);

    let g0 = manager.generation();
    manager.bind_instance(&ledger, domain.clone());
    let g1 = manager.generation();
    manager.bind_instance(&ledger, domain.clone());
    let g2 = manager.generation();
    manager.invalidate();
    let g3 = manager.generation();
    manager.unbind_instance(&ledger);
    let g4 = manager.generation();

    assert!(g0 < g1 && g1 < g2 && g2 < g3 && g3 < g4);
}

#[test]
fn resolution_ignores_dropped_instances() {
    let manager = DomainManager::new();
    let domain = same_thread("dropped");

    let ledger = Arc::new(billing::Ledger);
    manager.bind_instance(&ledger, domain.clone());
    assert!(manager.domains().contains(&domain));
    drop(ledger);

    let ledger = Arc::new(billing::Ledger);
    assert_eq!(manager.resolve(&ledger), *manager.default_domain());
    assert!(!manager.domains().contains(&domain));
}

#[test]
fn resolution_rejects_empty_namespace() {
    let manager = DomainManager::new();

    for namespace in ["", "  ", "::"] {
        assert!(matches!(
            manager.bind_namespace(namespace, same_thread("empty")),
            Err(PortsError::ArgumentInvalid(_))
        ));
    }
}

#[test]
fn resolution_release_clears_bindings() {
    let manager = DomainManager::new();
    let domain = Domain::builder("released-binding")
        .dispatch(DispatchPolicy::Parallel)
        .max_pool_size(1)
        .build()
        .unwrap();
    manager.bind_type::<billing::Ledger>(domain.clone());
    domain.executor().unwrap().spawn(|| ()).unwrap().get().unwrap();

    manager.release();

    assert_eq!(
        manager.resolve(&Arc::new(billing::Ledger)),
        *manager.default_domain()
    );
    assert!(domain.executor().unwrap().is_released());
}
