use super::*;
use entitymap_core::{HasManySpec, Row, Value};
use entitymap_memory::MemoryBackend;

use crate::test_support::{customer, fixture, order, seed_shop, shop_backend};

#[test]
fn test_config_defaults_and_json() {
    let config = RepositoryConfig::default();
    assert_eq!(config.name, "default");
    assert_eq!(config.lazy_load_threshold, 3);
    assert!(config.detect_lazy_loads);

    let config = RepositoryConfig::from_json(r#"{"name": "shop", "lazy_load_threshold": 10}"#)
        .unwrap();
    assert_eq!(config.name, "shop");
    assert_eq!(config.lazy_load_threshold, 10);
    assert!(config.detect_lazy_loads);

    assert!(RepositoryConfig::from_json("{not json").is_err());
}

#[test]
fn test_register_backend_fills_derived_fields() {
    let (repo, _handle) = fixture();
    assert_eq!(
        repo.model_names().collect::<Vec<_>>(),
        vec!["Customer", "Group", "Order"]
    );
    let customer = repo.model("Customer").unwrap();
    assert_eq!(customer.backend, "memory");
    let groups = &customer.has_many["groups"];
    assert_eq!(
        groups.junction.as_ref().unwrap().reciprocal.as_deref(),
        Some("customers")
    );
    assert!(repo.model("Order").unwrap().belongs_to["customer"].use_index);
    assert!(repo.model("Membership").is_none());
}

#[test]
fn test_register_backend_twice_fails() {
    let (mut repo, _handle) = fixture();
    let (again, _) = shop_backend();
    let err = repo.register_backend(Box::new(again)).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(repo.debug_state().backends, 1);
}

#[test]
fn test_register_rejects_duplicate_model_across_backends() {
    let (mut repo, _handle) = fixture();
    let other = MemoryBackend::new("archive").with_model(order());
    assert!(matches!(
        repo.register_backend(Box::new(other)),
        Err(Error::Configuration(_))
    ));
}

#[test]
fn test_register_rejects_dangling_relation() {
    let mut repo = Repository::new(RepositoryConfig::new("broken"));
    let backend = MemoryBackend::new("memory")
        .with_model(customer().has_many("invoices", HasManySpec::new("Invoice", "customer_id")));
    assert!(matches!(
        repo.register_backend(Box::new(backend)),
        Err(Error::Configuration(_))
    ));
    assert_eq!(repo.debug_state().models, 0);
}

#[test]
fn test_rename_property_requires_empty_map() {
    let (mut repo, handle) = fixture();
    seed_shop(&handle);

    repo.rename_property("Customer", "name", "full_name").unwrap();
    let alice = repo.get("Customer", 1, &GetOptions::default()).unwrap();
    assert_eq!(repo.value(alice, "full_name").unwrap(), Value::from("Alice"));
    assert!(repo.value(alice, "name").is_err());

    let err = repo.rename_property("Customer", "email", "mail").unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[test]
fn test_rename_property_follows_back_pointer() {
    let (mut repo, _handle) = fixture();
    repo.rename_property("Order", "customer", "buyer").unwrap();
    let orders = &repo.model("Customer").unwrap().has_many["orders"];
    assert_eq!(orders.belongs_to.as_deref(), Some("buyer"));
}

#[test]
fn test_skip_property() {
    let (mut repo, handle) = fixture();
    seed_shop(&handle);

    repo.skip_property("Customer", "email").unwrap();
    let alice = repo.get("Customer", 1, &GetOptions::default()).unwrap();
    assert!(matches!(
        repo.value(alice, "email"),
        Err(Error::UnknownProperty { .. })
    ));
}

#[test]
fn test_rename_model_updates_relation_targets() {
    let (mut repo, _handle) = fixture();
    repo.rename_model("Order", "Purchase").unwrap();
    assert!(repo.model("Order").is_none());
    assert_eq!(repo.model("Purchase").unwrap().name, "Purchase");
    assert_eq!(
        repo.model("Customer").unwrap().has_many["orders"].model,
        "Purchase"
    );
    assert!(repo.rename_model("Purchase", "Customer").is_err());
}

#[test]
fn test_handles_are_scoped_to_their_repository() {
    let (mut first, handle) = fixture();
    seed_shop(&handle);
    let (second, _) = fixture();

    let alice = first.get("Customer", 1, &GetOptions::default()).unwrap();
    assert!(first.contains(alice));
    assert!(!second.contains(alice));
    assert!(matches!(second.instance(alice), Err(Error::NotBound(_))));
}

#[test]
fn test_deleted_handles_keep_only_their_id() {
    let (mut repo, handle) = fixture();
    seed_shop(&handle);
    let (other, _) = fixture();

    let alice = repo.get("Customer", 1, &GetOptions::default()).unwrap();
    let carol = repo.create("Customer", Row::new()).unwrap();
    repo.delete(alice).unwrap();
    repo.delete(carol).unwrap();

    let info = repo.debug_state();
    assert_eq!(info.mapped, 0);
    assert_eq!(info.deleted, 2);
    assert_eq!(repo.index_of(alice), None);
    assert_eq!(repo.state_of(alice), Some(ObjectState::Deleted));
    assert_eq!(other.state_of(alice), None);
    assert!(matches!(repo.instance(carol), Err(Error::InvalidState(_))));
}

#[test]
fn test_debug_state_counts_by_state() {
    let (mut repo, handle) = fixture();
    seed_shop(&handle);

    let alice = repo.get("Customer", 1, &GetOptions::default()).unwrap();
    repo.create("Customer", Row::new().with("name", "Carol"))
        .unwrap();
    repo.set(alice, "email", "alice@shop.test").unwrap();
    repo.save(alice, &SaveOptions::default()).unwrap();

    let info = repo.debug_state();
    assert_eq!(info.name, "shop");
    assert_eq!(info.mapped, 2);
    assert_eq!(info.new, 1);
    assert_eq!(info.saved, 1);
    assert_eq!(info.retrieved, 0);
    assert_eq!(info.saving, 0);

    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["mapped"], 2);
}

#[test]
fn test_lazy_load_tracking() {
    let mut repo = Repository::new(RepositoryConfig::new("shop").lazy_load_threshold(1));
    let (backend, handle) = shop_backend();
    repo.register_backend(Box::new(backend)).unwrap();
    seed_shop(&handle);

    for id in [10, 11] {
        let order = repo.get("Order", id, &GetOptions::default()).unwrap();
        repo.related(order, "customer").unwrap();
    }
    assert_eq!(repo.lazy_load_count("Order", "customer"), 2);
    assert_eq!(repo.lazy_load_stats().total_loads, 2);

    repo.reset_lazy_load_stats();
    assert_eq!(repo.lazy_load_count("Order", "customer"), 0);
}
