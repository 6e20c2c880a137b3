//! Shared fixture for unit tests: a small shop with customers, orders,
//! groups and a `Membership` junction carrying a `role` column.

use entitymap_core::{BelongsToSpec, HasManySpec, JunctionSpec, ModelConfig, Row, Value};
use entitymap_memory::{MemoryBackend, MemoryHandle};

use crate::{Repository, RepositoryConfig};

pub(crate) fn customer() -> ModelConfig {
    ModelConfig::new("Customer")
        .identity(["id"])
        .columns(["id", "name", "email"])
        .default_value("name", "anonymous")
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

pub(crate) fn order() -> ModelConfig {
    ModelConfig::new("Order")
        .identity(["id"])
        .columns(["id", "product"])
        .belongs_to("customer", BelongsToSpec::new("customer_id", "Customer"))
}

pub(crate) fn group() -> ModelConfig {
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

pub(crate) fn membership() -> ModelConfig {
    ModelConfig::new("Membership")
        .identity(["customer_id", "group_id"])
        .columns(["customer_id", "group_id", "role"])
}

pub(crate) fn shop_backend() -> (MemoryBackend, MemoryHandle) {
    let backend = MemoryBackend::new("memory")
        .with_model(customer())
        .with_model(order())
        .with_model(group())
        .with_junction(membership());
    let handle = backend.handle();
    (backend, handle)
}

pub(crate) fn fixture() -> (Repository, MemoryHandle) {
    let (backend, handle) = shop_backend();
    let mut repo = Repository::new(RepositoryConfig::new("shop"));
    repo.register_backend(Box::new(backend))
        .expect("shop models register");
    (repo, handle)
}

/// Alice (1) has orders 10 and 11 and belongs to Admins as admin and to
/// Staff as member. Bob (2) has nothing. Order 12 has no customer.
pub(crate) fn seed_shop(handle: &MemoryHandle) {
    for (id, name, email) in [
        (1_i64, "Alice", Value::from("alice@example.com")),
        (2, "Bob", Value::Null),
    ] {
        handle.seed(
            &customer(),
            Row::new().with("id", id).with("name", name).with("email", email),
        );
    }
    for (id, product, customer_id) in [
        (10_i64, "Lamp", Value::Int(1)),
        (11, "Desk", Value::Int(1)),
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
    for (id, title) in [(100_i64, "Admins"), (101, "Staff"), (102, "Guests")] {
        handle.seed(&group(), Row::new().with("id", id).with("title", title));
    }
    for (group_id, role) in [(100_i64, "admin"), (101, "member")] {
        handle.seed(
            &membership(),
            Row::new()
                .with("customer_id", 1_i64)
                .with("group_id", group_id)
                .with("role", role),
        );
    }
}
