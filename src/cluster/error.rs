use serde::{Deserialize, Serialize};

/// Errors surfaced by cluster-view and route-control operations
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ClusterError {
    /// No cluster service is registered, or the selector matched none
    NoServiceAvailable(String),
    /// Attempt to rebind a policy whose view is already bound
    AlreadyBound(String),
    /// The election backend failed while starting or stopping a view
    Backend(String),
    /// The route engine rejected a start or stop request
    RouteControl(String),
}

impl std::fmt::Display for ClusterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterError::NoServiceAvailable(msg) => {
                write!(f, "No cluster service available: {}", msg)
            }
            ClusterError::AlreadyBound(msg) => write!(f, "Already bound: {}", msg),
            ClusterError::Backend(msg) => write!(f, "Cluster backend error: {}", msg),
            ClusterError::RouteControl(msg) => write!(f, "Route control error: {}", msg),
        }
    }
}

impl std::error::Error for ClusterError {}
