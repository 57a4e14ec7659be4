//! Reference-counted cluster views with leadership-driven route control.
//!
//! `routelect` is the coordination layer between a pluggable leader-election
//! backend and a route runtime: cluster services hand out reference-counted
//! views onto named election namespaces, and route policies start or stop
//! their routes as the local member gains or loses leadership of one of
//! those namespaces.

pub mod cluster;
pub mod route;

pub use cluster::{
    ClusterError, ClusterEvent, ClusterMember, ClusterService, ClusterServiceRegistry,
    ClusterView, ClusterViewRegistry, EventBus, MemoryClusterService, MemoryClusterView,
    ReferenceCount,
};
pub use route::{ClusteredRoutePolicy, RouteController, RouteEngineError, RouteStatus};
