//! The election-backend boundary: views, members, and cluster events.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::cluster::error::ClusterError;

/// One participant in a cluster view.
///
/// Implementations usually hand out point-in-time snapshots; callers re-query
/// the view rather than hold members across leadership changes.
pub trait ClusterMember: Send + Sync {
    /// Stable identifier of the member within its namespace.
    fn id(&self) -> &str;

    /// Whether this member currently holds leadership.
    fn is_leader(&self) -> bool;

    /// Whether this member is the local process.
    fn is_local(&self) -> bool;
}

/// Leadership and membership changes published by a view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterEvent {
    /// Leadership moved; `leader` is the new leader's id, if any.
    LeadershipChanged { leader: Option<String> },
    /// A member joined the view.
    MemberAdded { member_id: String },
    /// A member left the view.
    MemberRemoved { member_id: String },
}

/// A named membership/leadership view backed by an external election
/// mechanism.
///
/// This crate owns the *holder* lifecycle — when a view starts and stops, and
/// who may stop it — while the election protocol behind it belongs to the
/// backend. Start and stop are assumed bounded: the registry invokes them
/// under its write lock.
#[async_trait]
pub trait ClusterView: Send + Sync + 'static {
    /// The namespace this view coordinates.
    fn namespace(&self) -> &str;

    /// The local member, or `None` while the backend has not joined yet.
    fn local_member(&self) -> Option<Arc<dyn ClusterMember>>;

    /// The current leader, if one is elected.
    fn leader(&self) -> Option<Arc<dyn ClusterMember>>;

    /// Snapshot of the current membership.
    fn members(&self) -> Vec<Arc<dyn ClusterMember>>;

    /// Subscribe to leadership and membership events.
    fn subscribe(&self) -> broadcast::Receiver<ClusterEvent>;

    /// Join the election for this namespace.
    async fn start(&self) -> Result<(), ClusterError>;

    /// Leave the election, relinquishing leadership if held.
    async fn stop(&self) -> Result<(), ClusterError>;
}
