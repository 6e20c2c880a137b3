#![cfg(feature = "memory")]

mod fixtures;

use entitymap::prelude::*;
use fixtures::{ADMINS, ALICE, BOB, GUESTS, STAFF, shop, writes};

fn membership_rows(handle: &MemoryHandle) -> Vec<(Value, Value, Value)> {
    handle
        .rows("Membership")
        .iter()
        .map(|row| {
            (
                row.get_or_null("customer_id"),
                row.get_or_null("group_id"),
                row.get_or_null("role"),
            )
        })
        .collect()
}

#[test]
fn replacing_members_writes_only_the_difference() {
    let (mut repo, handle) = shop();

    let alice = repo.get("Customer", ALICE, &GetOptions::default()).unwrap();
    repo.members(alice, "groups").unwrap();
    let admins = repo.get("Group", ADMINS, &GetOptions::default()).unwrap();
    let staff = repo.get("Group", STAFF, &GetOptions::default()).unwrap();
    let guests = repo.get("Group", GUESTS, &GetOptions::default()).unwrap();
    assert_eq!(repo.related_many(admins, "customers").unwrap(), vec![alice]);
    assert!(repo.related_many(guests, "customers").unwrap().is_empty());
    handle.clear_log();

    repo.set_related_many(alice, "groups", vec![staff.into(), guests.into()])
        .unwrap();
    repo.save(alice, &SaveOptions::default()).unwrap();

    let log = handle.log();
    let calls = log.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].kind, CallKind::Delete);
    assert_eq!(calls[0].model, "Membership");
    assert_eq!(calls[0].row.get_or_null("group_id"), Value::Int(ADMINS));
    assert_eq!(calls[1].kind, CallKind::Add);
    assert_eq!(calls[1].model, "Membership");
    assert_eq!(calls[1].row.get_or_null("customer_id"), Value::Int(ALICE));
    assert_eq!(calls[1].row.get_or_null("group_id"), Value::Int(GUESTS));

    // The other side sees the change without another fetch.
    assert_eq!(repo.related_many(guests, "customers").unwrap(), vec![alice]);
    assert!(repo.related_many(admins, "customers").unwrap().is_empty());
    assert_eq!(handle.log().calls().len(), 2);

    assert_eq!(
        membership_rows(&handle),
        vec![
            (Value::Int(ALICE), Value::Int(STAFF), Value::from("member")),
            (Value::Int(ALICE), Value::Int(GUESTS), Value::Null),
        ]
    );
}

#[test]
fn saving_again_is_a_no_op() {
    let (mut repo, handle) = shop();

    let alice = repo.get("Customer", ALICE, &GetOptions::default()).unwrap();
    let guests = repo.get("Group", GUESTS, &GetOptions::default()).unwrap();
    repo.push_related(alice, "groups", guests).unwrap();
    repo.save(alice, &SaveOptions::default()).unwrap();
    assert_eq!(writes(&handle).len(), 1);

    repo.save(alice, &SaveOptions::default()).unwrap();
    repo.save(guests, &SaveOptions::default()).unwrap();
    assert_eq!(writes(&handle).len(), 1);
}

#[test]
fn bridge_field_changes_update_the_junction_row() {
    let (mut repo, handle) = shop();

    let alice = repo.get("Customer", ALICE, &GetOptions::default()).unwrap();
    let admins = repo.get("Group", ADMINS, &GetOptions::default()).unwrap();
    repo.related_many(admins, "customers").unwrap();

    repo.set_member_value(alice, "groups", admins, "role", "owner")
        .unwrap();
    // Instance properties still route to the linked instance.
    repo.set_member_value(alice, "groups", admins, "title", "Owners")
        .unwrap();
    assert_eq!(repo.value(admins, "title").unwrap(), Value::from("Owners"));

    repo.save(alice, &SaveOptions::default()).unwrap();
    assert_eq!(
        writes(&handle),
        vec![
            (CallKind::Update, "Group".to_string()),
            (CallKind::Update, "Membership".to_string()),
        ]
    );
    assert_eq!(
        repo.member_value(admins, "customers", alice, "role").unwrap(),
        Value::from("owner")
    );
    assert_eq!(membership_rows(&handle)[0].2, Value::from("owner"));
}

#[test]
fn new_owner_links_after_it_has_an_identity() {
    let (mut repo, handle) = shop();

    let carol = repo.create("Customer", Row::new().with("name", "Carol")).unwrap();
    let guests = repo.get("Group", GUESTS, &GetOptions::default()).unwrap();
    repo.push_related(carol, "groups", guests).unwrap();
    repo.set_member_value(carol, "groups", guests, "role", "member")
        .unwrap();

    assert_eq!(repo.save(carol, &SaveOptions::default()).unwrap(), 1);
    assert_eq!(
        writes(&handle),
        vec![
            (CallKind::Add, "Customer".to_string()),
            (CallKind::Add, "Membership".to_string()),
        ]
    );
    assert_eq!(
        membership_rows(&handle).pop().unwrap(),
        (Value::Int(3), Value::Int(GUESTS), Value::from("member"))
    );
}

#[test]
fn unsaved_targets_are_saved_before_linking() {
    let (mut repo, handle) = shop();

    let alice = repo.get("Customer", ALICE, &GetOptions::default()).unwrap();
    let ops = repo.create("Group", Row::new().with("title", "Ops")).unwrap();
    repo.push_related(alice, "groups", ops).unwrap();

    assert_eq!(repo.save(alice, &SaveOptions::default()).unwrap(), 1);
    assert_eq!(
        writes(&handle),
        vec![
            (CallKind::Add, "Group".to_string()),
            (CallKind::Add, "Membership".to_string()),
        ]
    );
    assert_eq!(repo.value(ops, "id").unwrap(), Value::Int(103));
    assert_eq!(
        membership_rows(&handle).pop().unwrap(),
        (Value::Int(ALICE), Value::Int(103), Value::Null)
    );
}

#[test]
fn kept_links_survive_until_a_normal_save() {
    let (mut repo, handle) = shop();

    let alice = repo.get("Customer", ALICE, &GetOptions::default()).unwrap();
    let admins = repo.get("Group", ADMINS, &GetOptions::default()).unwrap();
    assert!(repo.remove_related(alice, "groups", admins).unwrap());

    let keep = SaveOptions::new().keep_missing_related_instances(true);
    repo.save(alice, &keep).unwrap();
    assert!(writes(&handle).is_empty());
    assert_eq!(membership_rows(&handle).len(), 2);

    repo.save(alice, &SaveOptions::default()).unwrap();
    assert_eq!(
        writes(&handle),
        vec![(CallKind::Delete, "Membership".to_string())]
    );
    assert_eq!(membership_rows(&handle).len(), 1);
}

#[test]
fn linking_both_sides_writes_one_row() {
    let (mut repo, handle) = shop();

    let bob = repo.get("Customer", BOB, &GetOptions::default()).unwrap();
    let guests = repo.get("Group", GUESTS, &GetOptions::default()).unwrap();
    repo.push_related(bob, "groups", guests).unwrap();
    repo.push_related(guests, "customers", bob).unwrap();

    repo.save(bob, &SaveOptions::default()).unwrap();
    assert_eq!(
        writes(&handle),
        vec![(CallKind::Add, "Membership".to_string())]
    );
    assert_eq!(
        membership_rows(&handle).pop().unwrap(),
        (Value::Int(BOB), Value::Int(GUESTS), Value::Null)
    );

    repo.save(guests, &SaveOptions::default()).unwrap();
    assert_eq!(writes(&handle).len(), 1);
}

#[test]
fn unloaded_reciprocal_sees_the_change_after_save() {
    let (mut repo, handle) = shop();

    let alice = repo.get("Customer", ALICE, &GetOptions::default()).unwrap();
    let guests = repo.get("Group", GUESTS, &GetOptions::default()).unwrap();
    let admins = repo.get("Group", ADMINS, &GetOptions::default()).unwrap();
    assert!(!repo.is_resolved(guests, "customers").unwrap());
    assert!(!repo.is_resolved(admins, "customers").unwrap());

    assert!(repo.remove_related(alice, "groups", admins).unwrap());
    repo.push_related(alice, "groups", guests).unwrap();
    repo.set_member_value(alice, "groups", guests, "role", "member")
        .unwrap();
    repo.save(alice, &SaveOptions::default()).unwrap();
    let calls = handle.log().calls().len();

    assert_eq!(repo.related_many(guests, "customers").unwrap(), vec![alice]);
    assert_eq!(
        repo.member_value(guests, "customers", alice, "role").unwrap(),
        Value::from("member")
    );
    assert!(repo.related_many(admins, "customers").unwrap().is_empty());
    assert_eq!(handle.log().calls().len(), calls);

    // Loading during the save is not a lazy load.
    assert_eq!(repo.lazy_load_count("Group", "customers"), 0);
}
