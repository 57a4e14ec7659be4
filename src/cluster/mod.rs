//! Cluster-service view lifecycle.
//!
//! A cluster service owns named "views" — handles onto one namespace's
//! membership and leadership state, backed by an external election
//! mechanism. Views are created lazily, shared through reference counting,
//! and started/stopped exactly when the first holder arrives and the last
//! one leaves.

pub mod error;
pub mod event_bus;
pub mod memory;
pub mod refcount;
pub mod registry;
pub mod selector;
pub mod service;
pub mod view;

pub use error::ClusterError;
pub use event_bus::EventBus;
pub use memory::{MemoryClusterMember, MemoryClusterService, MemoryClusterView};
pub use refcount::{ReferenceCount, TransitionFn};
pub use registry::{ClusterViewRegistry, ViewFactory};
pub use selector::{
    lookup_service, lookup_service_with, mandatory_lookup_service, mandatory_lookup_service_with,
    SelectByAttribute, SelectByOrder, SelectFirst, SelectSingle, ServiceSelector,
};
pub use service::{ClusterService, ClusterServiceRegistry};
pub use view::{ClusterEvent, ClusterMember, ClusterView};
