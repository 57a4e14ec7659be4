//! In-process cluster backend with deterministic, manually-driven elections.
//!
//! Leadership in a memory view moves only when told to (`elect`,
//! `clear_leader`), which makes it suitable for single-process deployments
//! and for driving leadership scenarios in tests without a real coordination
//! backend.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use slog::{info, Logger};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::cluster::error::ClusterError;
use crate::cluster::event_bus::EventBus;
use crate::cluster::registry::ClusterViewRegistry;
use crate::cluster::service::ClusterService;
use crate::cluster::view::{ClusterEvent, ClusterMember, ClusterView};

/// Point-in-time member snapshot handed out by [`MemoryClusterView`].
#[derive(Clone, Debug)]
pub struct MemoryClusterMember {
    id: String,
    leader: bool,
    local: bool,
}

impl ClusterMember for MemoryClusterMember {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_leader(&self) -> bool {
        self.leader
    }

    fn is_local(&self) -> bool {
        self.local
    }
}

struct ViewState {
    members: BTreeSet<String>,
    leader: Option<String>,
    running: bool,
}

/// One namespace's election state, local to this process.
pub struct MemoryClusterView {
    namespace: String,
    local_member_id: String,
    state: RwLock<ViewState>,
    events: EventBus<ClusterEvent>,
    logger: Logger,
}

impl MemoryClusterView {
    fn new(namespace: &str, local_member_id: String, logger: Logger) -> Self {
        let mut members = BTreeSet::new();
        members.insert(local_member_id.clone());
        Self {
            namespace: namespace.to_string(),
            local_member_id,
            state: RwLock::new(ViewState {
                members,
                leader: None,
                running: false,
            }),
            events: EventBus::default(),
            logger,
        }
    }

    /// Hand leadership to `member_id`, adding it to the view if unknown.
    pub fn elect(&self, member_id: &str) {
        let mut state = self.state.write().unwrap();
        state.members.insert(member_id.to_string());
        if state.leader.as_deref() == Some(member_id) {
            return;
        }
        state.leader = Some(member_id.to_string());
        info!(self.logger, "leadership assigned";
            "namespace" => %self.namespace, "leader" => member_id);
        self.events.publish(ClusterEvent::LeadershipChanged {
            leader: Some(member_id.to_string()),
        });
    }

    /// Drop leadership entirely; the view has no leader afterwards.
    pub fn clear_leader(&self) {
        let mut state = self.state.write().unwrap();
        if state.leader.take().is_some() {
            self.events
                .publish(ClusterEvent::LeadershipChanged { leader: None });
        }
    }

    /// Add a member to the view.
    pub fn add_member(&self, member_id: &str) {
        let mut state = self.state.write().unwrap();
        if state.members.insert(member_id.to_string()) {
            self.events.publish(ClusterEvent::MemberAdded {
                member_id: member_id.to_string(),
            });
        }
    }

    /// Remove a member from the view, clearing leadership if it led.
    pub fn remove_member(&self, member_id: &str) {
        let mut state = self.state.write().unwrap();
        if state.members.remove(member_id) {
            if state.leader.as_deref() == Some(member_id) {
                state.leader = None;
                self.events
                    .publish(ClusterEvent::LeadershipChanged { leader: None });
            }
            self.events.publish(ClusterEvent::MemberRemoved {
                member_id: member_id.to_string(),
            });
        }
    }

    fn member_snapshot(&self, id: &str, state: &ViewState) -> MemoryClusterMember {
        MemoryClusterMember {
            id: id.to_string(),
            leader: state.leader.as_deref() == Some(id),
            local: id == self.local_member_id,
        }
    }
}

#[async_trait]
impl ClusterView for MemoryClusterView {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn local_member(&self) -> Option<Arc<dyn ClusterMember>> {
        let state = self.state.read().unwrap();
        if !state.running {
            return None;
        }
        Some(Arc::new(self.member_snapshot(&self.local_member_id, &state)))
    }

    fn leader(&self) -> Option<Arc<dyn ClusterMember>> {
        let state = self.state.read().unwrap();
        let leader = state.leader.clone()?;
        Some(Arc::new(self.member_snapshot(&leader, &state)))
    }

    fn members(&self) -> Vec<Arc<dyn ClusterMember>> {
        let state = self.state.read().unwrap();
        state
            .members
            .iter()
            .map(|id| Arc::new(self.member_snapshot(id, &state)) as Arc<dyn ClusterMember>)
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    async fn start(&self) -> Result<(), ClusterError> {
        let mut state = self.state.write().unwrap();
        if !state.running {
            state.running = true;
            info!(self.logger, "view started"; "namespace" => %self.namespace);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ClusterError> {
        let mut state = self.state.write().unwrap();
        if state.running {
            state.running = false;
            if state.leader.as_deref() == Some(self.local_member_id.as_str()) {
                state.leader = None;
                self.events
                    .publish(ClusterEvent::LeadershipChanged { leader: None });
            }
            info!(self.logger, "view stopped"; "namespace" => %self.namespace);
        }
        Ok(())
    }
}

/// Cluster service over [`MemoryClusterView`] namespaces.
pub struct MemoryClusterService {
    id: String,
    local_member_id: String,
    order: i32,
    attributes: HashMap<String, String>,
    registry: ClusterViewRegistry<MemoryClusterView>,
}

impl MemoryClusterService {
    /// Create a service with a generated local member id.
    pub fn new(id: &str, logger: Logger) -> Self {
        Self::with_local_member(id, &Uuid::new_v4().to_string(), logger)
    }

    /// Create a service whose views report `local_member_id` as the local
    /// member. Tests use fixed ids to drive elections deterministically.
    pub fn with_local_member(id: &str, local_member_id: &str, logger: Logger) -> Self {
        let member = local_member_id.to_string();
        let view_logger = logger.clone();
        let factory = Box::new(move |namespace: &str| {
            Ok(Arc::new(MemoryClusterView::new(
                namespace,
                member.clone(),
                view_logger.clone(),
            )))
        });
        Self {
            id: id.to_string(),
            local_member_id: local_member_id.to_string(),
            order: 0,
            attributes: HashMap::new(),
            registry: ClusterViewRegistry::new(factory, logger),
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// The member id this service's views report as local.
    pub fn local_member_id(&self) -> &str {
        &self.local_member_id
    }

    /// Drive the election for `namespace` by hand.
    pub async fn elect(&self, namespace: &str, member_id: &str) -> Result<(), ClusterError> {
        match self.registry.find_view(namespace).await {
            Some(view) => {
                view.elect(member_id);
                Ok(())
            }
            None => Err(ClusterError::Backend(format!(
                "no view exists for namespace '{}'",
                namespace
            ))),
        }
    }

    /// Clear the leader of `namespace`, leaving the election open.
    pub async fn clear_leader(&self, namespace: &str) -> Result<(), ClusterError> {
        match self.registry.find_view(namespace).await {
            Some(view) => {
                view.clear_leader();
                Ok(())
            }
            None => Err(ClusterError::Backend(format!(
                "no view exists for namespace '{}'",
                namespace
            ))),
        }
    }

    /// Current reference count of `namespace`'s view. Diagnostics only.
    pub async fn view_refs(&self, namespace: &str) -> Option<i64> {
        self.registry.view_refs(namespace).await
    }
}

#[async_trait]
impl ClusterService for MemoryClusterService {
    fn id(&self) -> &str {
        &self.id
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn attributes(&self) -> HashMap<String, String> {
        self.attributes.clone()
    }

    async fn start(&self) -> Result<(), ClusterError> {
        self.registry.start().await
    }

    async fn stop(&self) -> Result<(), ClusterError> {
        self.registry.stop().await
    }

    async fn get_view(&self, namespace: &str) -> Result<Arc<dyn ClusterView>, ClusterError> {
        let view: Arc<dyn ClusterView> = self.registry.get_view(namespace).await?;
        Ok(view)
    }

    async fn release_view(&self, view: Arc<dyn ClusterView>) -> Result<(), ClusterError> {
        self.registry.release_view(view.as_ref()).await
    }

    async fn namespaces(&self) -> Vec<String> {
        self.registry.namespaces().await
    }

    async fn start_view(&self, namespace: &str) -> Result<(), ClusterError> {
        self.registry.start_view(namespace).await
    }

    async fn stop_view(&self, namespace: &str) -> Result<(), ClusterError> {
        self.registry.stop_view(namespace).await
    }

    async fn is_leader(&self, namespace: &str) -> bool {
        self.registry.is_leader(namespace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_logger() -> Logger {
        use slog::Drain;
        let decorator = slog_term::PlainDecorator::new(std::io::stdout());
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        Logger::root(drain, slog::o!())
    }

    #[tokio::test]
    async fn test_election_drives_local_leadership() {
        let service = MemoryClusterService::with_local_member("svc", "m-local", create_logger());
        service.start().await.unwrap();
        let view = service.get_view("group-1").await.unwrap();

        assert!(!service.is_leader("group-1").await);

        service.elect("group-1", "m-local").await.unwrap();
        assert!(service.is_leader("group-1").await);

        service.elect("group-1", "m-other").await.unwrap();
        assert!(!service.is_leader("group-1").await);

        service.release_view(view).await.unwrap();
    }

    #[tokio::test]
    async fn test_election_publishes_leadership_events() {
        let service = MemoryClusterService::with_local_member("svc", "m-local", create_logger());
        service.start().await.unwrap();
        let view = service.get_view("group-1").await.unwrap();
        let mut events = view.subscribe();

        service.elect("group-1", "m-local").await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            ClusterEvent::LeadershipChanged {
                leader: Some("m-local".to_string())
            }
        );

        // Re-electing the current leader is not an edge and publishes nothing.
        service.elect("group-1", "m-local").await.unwrap();
        service.clear_leader("group-1").await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            ClusterEvent::LeadershipChanged { leader: None }
        );
    }

    #[tokio::test]
    async fn test_stopping_view_relinquishes_local_leadership() {
        let service = MemoryClusterService::with_local_member("svc", "m-local", create_logger());
        service.start().await.unwrap();
        let view = service.get_view("group-1").await.unwrap();
        service.elect("group-1", "m-local").await.unwrap();
        assert!(service.is_leader("group-1").await);

        // Last release stops the view; the local member is gone and so is
        // its leadership.
        service.release_view(view).await.unwrap();
        assert!(!service.is_leader("group-1").await);
    }

    #[tokio::test]
    async fn test_membership_changes_emit_events() {
        let service = MemoryClusterService::with_local_member("svc", "m-local", create_logger());
        service.start().await.unwrap();
        let view = service.get_view("group-1").await.unwrap();
        let mut events = view.subscribe();

        let typed = self::typed_view(&service, "group-1").await;
        typed.add_member("m-2");
        typed.elect("m-2");
        typed.remove_member("m-2");

        assert_eq!(
            events.recv().await.unwrap(),
            ClusterEvent::MemberAdded {
                member_id: "m-2".to_string()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ClusterEvent::LeadershipChanged {
                leader: Some("m-2".to_string())
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ClusterEvent::LeadershipChanged { leader: None }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ClusterEvent::MemberRemoved {
                member_id: "m-2".to_string()
            }
        );

        service.release_view(view).await.unwrap();
    }

    async fn typed_view(service: &MemoryClusterService, namespace: &str) -> Arc<MemoryClusterView> {
        service.registry.find_view(namespace).await.unwrap()
    }

    #[tokio::test]
    async fn test_member_and_leader_snapshots() {
        let service = MemoryClusterService::with_local_member("svc", "m-local", create_logger());
        assert_eq!(service.local_member_id(), "m-local");
        service.start().await.unwrap();
        let view = service.get_view("group-1").await.unwrap();

        let typed = typed_view(&service, "group-1").await;
        typed.add_member("m-2");
        typed.elect("m-2");

        let members = view.members();
        assert_eq!(members.len(), 2);

        let leader = view.leader().unwrap();
        assert_eq!(leader.id(), "m-2");
        assert!(leader.is_leader());
        assert!(!leader.is_local());

        let local = view.local_member().unwrap();
        assert_eq!(local.id(), "m-local");
        assert!(local.is_local());
        assert!(!local.is_leader());

        service.release_view(view).await.unwrap();
    }

    #[tokio::test]
    async fn test_electing_unknown_namespace_fails() {
        let service = MemoryClusterService::with_local_member("svc", "m-local", create_logger());
        let result = service.elect("never-requested", "m-local").await;
        assert!(matches!(result, Err(ClusterError::Backend(_))));
    }
}
