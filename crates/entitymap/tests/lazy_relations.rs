#![cfg(feature = "memory")]

mod fixtures;

use entitymap::prelude::*;
use fixtures::{ADMINS, ALICE, BOB, STAFF, shop};

#[test]
fn has_many_resolves_once_and_reuses_mapped_children() {
    let (mut repo, handle) = shop();

    let alice = repo.get("Customer", ALICE, &GetOptions::default()).unwrap();
    let lamp = repo.get("Order", 10, &GetOptions::default()).unwrap();
    assert!(!repo.is_resolved(alice, "orders").unwrap());

    let orders = repo.related_many(alice, "orders").unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0], lamp);
    assert_eq!(repo.related_many(alice, "orders").unwrap(), orders);
    assert_eq!(handle.count_for(CallKind::Related, "Order"), 1);

    let bob = repo.get("Customer", BOB, &GetOptions::default()).unwrap();
    assert!(repo.related_many(bob, "orders").unwrap().is_empty());
}

#[test]
fn explicit_resolve_is_a_no_op_when_resolved() {
    let (mut repo, handle) = shop();

    let alice = repo.get("Customer", ALICE, &GetOptions::default()).unwrap();
    repo.resolve(alice, "orders").unwrap();
    repo.resolve(alice, "orders").unwrap();
    assert!(repo.is_resolved(alice, "orders").unwrap());
    assert_eq!(handle.count(CallKind::Related), 1);

    assert!(matches!(
        repo.resolve(alice, "name"),
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn pending_collections_push_work_to_the_backend() {
    let (mut repo, handle) = shop();

    let orders = repo
        .all("Order")
        .unwrap()
        .where_(&mut repo, "customer", Operator::Eq, ALICE)
        .unwrap()
        .order_by(&mut repo, "product", false)
        .unwrap();
    assert_eq!(orders.count(&mut repo).unwrap(), 2);
    assert_eq!(repo.debug_state().mapped, 0);

    let mut orders = orders;
    let desk = orders.first(&mut repo).unwrap().unwrap();
    assert_eq!(repo.value(desk, "product").unwrap(), Value::from("Desk"));
    assert!(!orders.is_realized());

    let ids = orders.to_vec(&mut repo).unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], desk);
    assert_eq!(handle.count(CallKind::All), 3);
}

#[test]
fn many_to_many_members_carry_bridge_fields() {
    let (mut repo, handle) = shop();

    let alice = repo.get("Customer", ALICE, &GetOptions::default()).unwrap();
    let members = repo.members(alice, "groups").unwrap();
    assert_eq!(members.len(), 2);
    assert!(members.iter().all(|m| m.junction().is_some()));
    assert_eq!(handle.count_for(CallKind::Related, "Membership"), 1);
    assert_eq!(handle.count_for(CallKind::All, "Group"), 1);

    let admins = repo.get("Group", ADMINS, &GetOptions::default()).unwrap();
    let staff = repo.get("Group", STAFF, &GetOptions::default()).unwrap();
    assert_eq!(handle.count(CallKind::Get), 1);

    // Instance properties first, bridge fields second.
    assert_eq!(
        repo.member_value(alice, "groups", admins, "title").unwrap(),
        Value::from("Admins")
    );
    assert_eq!(
        repo.member_value(alice, "groups", admins, "role").unwrap(),
        Value::from("admin")
    );
    assert_eq!(
        repo.member_value(alice, "groups", staff, "role").unwrap(),
        Value::from("member")
    );
    assert!(matches!(
        repo.member_value(alice, "groups", admins, "rank"),
        Err(Error::UnknownProperty { .. })
    ));
}

#[test]
fn closed_junctions_reject_unknown_bridge_fields() {
    let (mut repo, _handle) = shop();

    let alice = repo.get("Customer", ALICE, &GetOptions::default()).unwrap();
    let admins = repo.get("Group", ADMINS, &GetOptions::default()).unwrap();
    repo.resolve(alice, "groups").unwrap();

    let err = repo
        .set_member_value(alice, "groups", admins, "rank", 1_i64)
        .unwrap_err();
    assert!(matches!(err, Error::UnknownProperty { .. }));

    let bob = repo.get("Customer", BOB, &GetOptions::default()).unwrap();
    assert!(
        repo.set_member_value(alice, "groups", bob, "role", "admin")
            .unwrap_err()
            .is_not_found()
    );
}

#[test]
fn new_instances_start_with_empty_collections() {
    let (mut repo, handle) = shop();

    let carol = repo.create("Customer", Row::new().with("name", "Carol")).unwrap();
    assert!(repo.related_many(carol, "orders").unwrap().is_empty());
    assert!(repo.members(carol, "groups").unwrap().is_empty());
    assert!(handle.log().calls().is_empty());
}

#[test]
fn new_instance_foreign_key_resolves_lazily() {
    let (mut repo, handle) = shop();

    let rug = repo
        .create(
            "Order",
            Row::new().with("product", "Rug").with("customer", ALICE),
        )
        .unwrap();
    assert_eq!(repo.related_key(rug, "customer").unwrap(), Some(Value::Int(ALICE)));
    assert!(handle.log().calls().is_empty());

    let alice = repo.related(rug, "customer").unwrap().unwrap();
    assert_eq!(repo.value(alice, "name").unwrap(), Value::from("Alice"));
}

#[test]
fn duplicated_container_adopts_the_original_value() {
    let (mut repo, handle) = shop();

    let lamp = repo.get("Order", 10, &GetOptions::default()).unwrap();
    let copy = repo.duplicate(lamp).unwrap();
    assert_eq!(repo.value(copy, "id").unwrap(), Value::Null);
    assert_eq!(repo.value(copy, "product").unwrap(), Value::from("Lamp"));

    let alice = repo.related(copy, "customer").unwrap().unwrap();
    assert_eq!(repo.related(lamp, "customer").unwrap(), Some(alice));
    assert_eq!(handle.count_for(CallKind::Get, "Customer"), 1);
}

#[test]
fn lazy_loads_are_counted_per_relation() {
    let (mut repo, _handle) = shop();

    for id in [10, 11] {
        let order = repo.get("Order", id, &GetOptions::default()).unwrap();
        repo.related(order, "customer").unwrap();
    }
    let alice = repo.get("Customer", ALICE, &GetOptions::default()).unwrap();
    repo.related_many(alice, "orders").unwrap();

    assert_eq!(repo.lazy_load_count("Order", "customer"), 2);
    assert_eq!(repo.lazy_load_count("Customer", "orders"), 1);
    let stats = repo.lazy_load_stats();
    assert_eq!(stats.total_loads, 3);
    assert_eq!(stats.relations_loaded, 2);
}
