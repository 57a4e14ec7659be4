//! Leadership-driven route control.
//!
//! Routes attached to a [`policy::ClusteredRoutePolicy`] are taken out of
//! the route engine's own warm-up sequence and started or stopped purely in
//! response to leadership of a cluster namespace.

pub mod engine;
pub mod policy;

pub use engine::{RouteController, RouteEngineError, RouteStatus};
pub use policy::ClusteredRoutePolicy;
