//! entitymap: a data-mapper repository for Rust.
//!
//! `entitymap` binds raw backend rows to live instances and keeps exactly
//! one instance per (model, identity). Relations are resolved lazily on
//! first access, and graphs of related instances are persisted by a
//! cascading save that stays correct on cycles.
//!
//! # Crates
//!
//! - [`core`]: values, rows, model configuration, queries and the
//!   [`Backend`] contract
//! - [`repository`]: the identity map, relation resolution and cascades
//! - [`memory`]: an in-memory backend (feature `memory`, on by default)
//!
//! # Quick Start
//!
//! ```ignore
//! use entitymap::prelude::*;
//!
//! let customer = ModelConfig::new("Customer")
//!     .identity(["id"])
//!     .columns(["id", "name"])
//!     .has_many("orders", HasManySpec::new("Order", "customer_id"));
//! let order = ModelConfig::new("Order")
//!     .identity(["id"])
//!     .columns(["id", "product"])
//!     .belongs_to("customer", BelongsToSpec::new("customer_id", "Customer"));
//!
//! let backend = MemoryBackend::new("db").with_model(customer).with_model(order);
//! let mut repo = Repository::new(RepositoryConfig::default());
//! repo.register_backend(Box::new(backend))?;
//!
//! let alice = repo.create("Customer", Row::new().with("name", "Alice"))?;
//! let lamp = repo.create("Order", Row::new().with("product", "Lamp"))?;
//! repo.push_related(alice, "orders", lamp)?;
//! repo.save(alice, &SaveOptions::default())?;
//! ```

pub use entitymap_core as core;
pub use entitymap_repository as repository;

#[cfg(feature = "memory")]
pub use entitymap_memory as memory;

pub use entitymap_core::{
    Backend, BelongsToSpec, Condition, Error, HasManySpec, JunctionSpec, ModelConfig, Operator,
    Order, PropertyKind, Query, Result, Row, Value, ValueFilter,
};
pub use entitymap_repository::{
    Collection, GetOptions, Index, Instance, InstanceId, Junction, Key, LazyLoadStats,
    LifecycleEvent, LifecycleHooks, Member, ObjectState, Placeholder, Preload, RelationSlot,
    ReloadOptions, Repository, RepositoryConfig, RepositoryDebugInfo, SaveOptions,
};

#[cfg(feature = "memory")]
pub use entitymap_memory::{CallKind, MemoryBackend, MemoryHandle};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use entitymap_core::{
        Backend, BelongsToSpec, Condition, Error, HasManySpec, JunctionSpec, ModelConfig,
        Operator, Query, Result, Row, Value, ValueFilter,
    };
    pub use entitymap_repository::{
        Collection, GetOptions, InstanceId, LifecycleEvent, Member, ObjectState, Preload,
        ReloadOptions, Repository, RepositoryConfig, SaveOptions,
    };

    #[cfg(feature = "memory")]
    pub use entitymap_memory::{CallKind, MemoryBackend, MemoryHandle};
}
