//! Shop fixture shared by the integration tests.
//!
//! Customers own orders (one-to-many, mirrored by `Order.customer`) and
//! belong to groups through the `Membership` junction, which carries a
//! `role` column.

#![allow(dead_code)]

use entitymap::prelude::*;

pub const ALICE: i64 = 1;
pub const BOB: i64 = 2;
pub const ADMINS: i64 = 100;
pub const STAFF: i64 = 101;
pub const GUESTS: i64 = 102;

pub fn customer() -> ModelConfig {
    ModelConfig::new("Customer")
        .identity(["id"])
        .columns(["id", "name", "email", "tags"])
        .default_value("name", "anonymous")
        .filter("tags", ValueFilter::Csv)
        .has_many(
            "orders",
            HasManySpec::new("Order", "customer_id").belongs_to("customer"),
        )
        .has_many(
            "groups",
            HasManySpec::through(
                "Group",
                "customer_id",
                JunctionSpec::new("Membership", "group_id")
                    .field("role", "role")
                    .closed(true),
            ),
        )
}

pub fn order() -> ModelConfig {
    ModelConfig::new("Order")
        .identity(["id"])
        .columns(["id", "product"])
        .belongs_to("customer", BelongsToSpec::new("customer_id", "Customer"))
}

pub fn group() -> ModelConfig {
    ModelConfig::new("Group")
        .identity(["id"])
        .columns(["id", "title"])
        .has_many(
            "customers",
            HasManySpec::through(
                "Customer",
                "group_id",
                JunctionSpec::new("Membership", "customer_id")
                    .field("role", "role")
                    .closed(true),
            ),
        )
}

pub fn membership() -> ModelConfig {
    ModelConfig::new("Membership")
        .identity(["customer_id", "group_id"])
        .columns(["customer_id", "group_id", "role"])
}

/// Empty shop backend and a handle onto its tables.
pub fn backend() -> (MemoryBackend, MemoryHandle) {
    let backend = MemoryBackend::new("memory")
        .with_model(customer())
        .with_model(order())
        .with_model(group())
        .with_junction(membership());
    let handle = backend.handle();
    (backend, handle)
}

/// Repository over a seeded shop. The call log starts empty.
pub fn shop() -> (Repository, MemoryHandle) {
    let (backend, handle) = backend();
    seed(&handle);
    let mut repo = Repository::new(RepositoryConfig::new("shop"));
    repo.register_backend(Box::new(backend))
        .expect("shop models register");
    (repo, handle)
}

/// Alice has orders 10 and 11 and is admin of Admins and member of Staff.
/// Bob has nothing. Order 12 has no customer.
pub fn seed(handle: &MemoryHandle) {
    handle.seed(
        &customer(),
        Row::new()
            .with("id", ALICE)
            .with("name", "Alice")
            .with("email", "alice@example.com")
            .with("tags", "vip,early"),
    );
    handle.seed(
        &customer(),
        Row::new()
            .with("id", BOB)
            .with("name", "Bob")
            .with("email", Value::Null)
            .with("tags", Value::Null),
    );
    for (id, product, customer_id) in [
        (10_i64, "Lamp", Value::Int(ALICE)),
        (11, "Desk", Value::Int(ALICE)),
        (12, "Chair", Value::Null),
    ] {
        handle.seed(
            &order(),
            Row::new()
                .with("id", id)
                .with("product", product)
                .with("customer_id", customer_id),
        );
    }
    for (id, title) in [(ADMINS, "Admins"), (STAFF, "Staff"), (GUESTS, "Guests")] {
        handle.seed(&group(), Row::new().with("id", id).with("title", title));
    }
    for (group_id, role) in [(ADMINS, "admin"), (STAFF, "member")] {
        handle.seed(
            &membership(),
            Row::new()
                .with("customer_id", ALICE)
                .with("group_id", group_id)
                .with("role", role),
        );
    }
}

/// Backend writes as (kind, model) pairs, in order.
pub fn writes(handle: &MemoryHandle) -> Vec<(CallKind, String)> {
    handle
        .log()
        .writes()
        .into_iter()
        .map(|call| (call.kind, call.model.clone()))
        .collect()
}
