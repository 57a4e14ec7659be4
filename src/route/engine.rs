//! Boundary to the route runtime that actually starts and stops routes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Route engine errors cross this boundary opaquely.
pub type RouteEngineError = Box<dyn std::error::Error + Send + Sync>;

/// Lifecycle state reported by the route runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteStatus {
    Starting,
    Started,
    Stopping,
    Stopped,
    Suspended,
}

impl RouteStatus {
    /// Whether a start request is admissible in this state.
    pub fn is_startable(&self) -> bool {
        matches!(self, RouteStatus::Stopped | RouteStatus::Suspended)
    }

    /// Whether a stop request is admissible in this state.
    pub fn is_stoppable(&self) -> bool {
        matches!(self, RouteStatus::Started | RouteStatus::Suspended)
    }
}

/// The route runtime as seen by clustering: start, stop, status, and the
/// auto-startup override that keeps managed routes out of the engine's own
/// warm-up sequence.
#[async_trait]
pub trait RouteController: Send + Sync + 'static {
    /// Current lifecycle state of `route_id`.
    fn route_status(&self, route_id: &str) -> RouteStatus;

    /// Start `route_id`.
    async fn start_route(&self, route_id: &str) -> Result<(), RouteEngineError>;

    /// Stop `route_id`.
    async fn stop_route(&self, route_id: &str) -> Result<(), RouteEngineError>;

    /// Override the engine's auto-startup flag for `route_id`.
    fn set_auto_startup(&self, route_id: &str, enabled: bool);
}
