//! Leadership-driven start/stop control for a set of managed routes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use slog::{error, info, warn, Logger};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::cluster::error::ClusterError;
use crate::cluster::refcount::ReferenceCount;
use crate::cluster::selector::{mandatory_lookup_service_with, SelectSingle, ServiceSelector};
use crate::cluster::service::{ClusterService, ClusterServiceRegistry};
use crate::cluster::view::{ClusterEvent, ClusterView};
use crate::route::engine::RouteController;

/// Mutually exclusive sets tracking where each managed route currently is.
#[derive(Default)]
struct RouteSets {
    started: HashSet<String>,
    stopped: HashSet<String>,
}

/// Ties a set of routes to one namespace's leadership: the routes run while
/// the local member leads and stop while it does not.
///
/// One policy instance may be shared by several routes. Each `on_init`
/// retains the policy and each `shutdown` releases it; the last release
/// silences the leadership listener and hands the view back to the cluster
/// service. Route start/stop failures during a leadership flip are logged
/// and do not abort the rest of the batch — the next edge retries.
pub struct ClusteredRoutePolicy {
    namespace: String,
    controller: Arc<dyn RouteController>,
    services: Option<ClusterServiceRegistry>,
    selector: Box<dyn ServiceSelector>,
    initial_delay: StdMutex<Duration>,
    cluster_service: StdMutex<Option<Arc<dyn ClusterService>>>,
    view: Mutex<Option<Arc<dyn ClusterView>>>,
    view_bound: AtomicBool,
    leader: AtomicBool,
    context_started: AtomicBool,
    routes: Mutex<RouteSets>,
    refs: Mutex<ReferenceCount>,
    listener: Mutex<Option<JoinHandle<()>>>,
    logger: Logger,
}

impl ClusteredRoutePolicy {
    /// Policy that resolves its cluster service from `services` at start
    /// time, requiring exactly one registered service.
    pub fn for_namespace(
        controller: Arc<dyn RouteController>,
        services: ClusterServiceRegistry,
        namespace: impl Into<String>,
        logger: Logger,
    ) -> Arc<Self> {
        Self::new_internal(
            controller,
            Some(services),
            Box::new(SelectSingle),
            None,
            namespace.into(),
            logger,
        )
    }

    /// As [`ClusteredRoutePolicy::for_namespace`], with an explicit service
    /// selection strategy.
    pub fn for_namespace_with_selector(
        controller: Arc<dyn RouteController>,
        services: ClusterServiceRegistry,
        selector: Box<dyn ServiceSelector>,
        namespace: impl Into<String>,
        logger: Logger,
    ) -> Arc<Self> {
        Self::new_internal(controller, Some(services), selector, None, namespace.into(), logger)
    }

    /// Policy bound to an explicit cluster service instance.
    pub fn with_service(
        controller: Arc<dyn RouteController>,
        service: Arc<dyn ClusterService>,
        namespace: impl Into<String>,
        logger: Logger,
    ) -> Arc<Self> {
        Self::new_internal(
            controller,
            None,
            Box::new(SelectSingle),
            Some(service),
            namespace.into(),
            logger,
        )
    }

    fn new_internal(
        controller: Arc<dyn RouteController>,
        services: Option<ClusterServiceRegistry>,
        selector: Box<dyn ServiceSelector>,
        service: Option<Arc<dyn ClusterService>>,
        namespace: String,
        logger: Logger,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let teardown_ref = weak.clone();
            let refs = ReferenceCount::on(
                || async { Ok::<(), ClusterError>(()) },
                move || {
                    let weak = teardown_ref.clone();
                    async move {
                        match weak.upgrade() {
                            Some(policy) => policy.teardown().await,
                            None => Ok(()),
                        }
                    }
                },
            );
            Self {
                namespace,
                controller,
                services,
                selector,
                initial_delay: StdMutex::new(Duration::ZERO),
                cluster_service: StdMutex::new(service),
                view: Mutex::new(None),
                view_bound: AtomicBool::new(false),
                leader: AtomicBool::new(false),
                context_started: AtomicBool::new(false),
                routes: Mutex::new(RouteSets::default()),
                refs: Mutex::new(refs),
                listener: Mutex::new(None),
                logger,
            }
        })
    }

    /// The namespace this policy binds its routes to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Whether this policy currently believes the local member leads.
    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    /// Grace delay between the context-started signal and the first
    /// leadership evaluation. Takes effect if set before the signal arrives.
    pub fn set_initial_delay(&self, delay: Duration) {
        *self.initial_delay.lock().unwrap() = delay;
    }

    /// Inject the cluster service instead of resolving one at start time.
    ///
    /// Rebinding after the view is bound is a programming error.
    pub fn set_cluster_service(
        &self,
        service: Arc<dyn ClusterService>,
    ) -> Result<(), ClusterError> {
        if self.view_bound.load(Ordering::SeqCst) {
            return Err(ClusterError::AlreadyBound(format!(
                "cluster view for namespace '{}' is already bound",
                self.namespace
            )));
        }
        *self.cluster_service.lock().unwrap() = Some(service);
        Ok(())
    }

    /// Attach `route_id` to this policy.
    ///
    /// The route's auto-startup is disabled so the engine never starts it
    /// unsupervised; from here on only leadership transitions move it.
    pub async fn on_init(&self, route_id: &str) -> Result<(), ClusterError> {
        self.controller.set_auto_startup(route_id, false);
        self.refs.lock().await.retain().await?;
        {
            let mut routes = self.routes.lock().await;
            routes.stopped.insert(route_id.to_string());
        }
        info!(self.logger, "route attached to clustered policy";
            "route" => route_id, "namespace" => %self.namespace);
        // No-op until leadership is known; idempotent if it already is.
        self.apply_leadership().await;
        Ok(())
    }

    /// Bind to the cluster: resolve the service (injected or looked up) and
    /// retain the view for the configured namespace. Idempotent once bound.
    ///
    /// Failing here is fatal for the attached routes: without a view they
    /// never receive leadership and never start.
    pub async fn start(&self) -> Result<(), ClusterError> {
        let mut view_slot = self.view.lock().await;
        if view_slot.is_some() {
            return Ok(());
        }
        let service = match self.cluster_service.lock().unwrap().clone() {
            Some(service) => service,
            None => {
                let services = self.services.as_ref().ok_or_else(|| {
                    ClusterError::NoServiceAvailable(
                        "no cluster service injected and no registry to search".to_string(),
                    )
                })?;
                mandatory_lookup_service_with(services, self.selector.as_ref())?
            }
        };
        let view = service.get_view(&self.namespace).await?;
        *self.cluster_service.lock().unwrap() = Some(service);
        *view_slot = Some(view);
        self.view_bound.store(true, Ordering::SeqCst);
        info!(self.logger, "policy bound to cluster view"; "namespace" => %self.namespace);
        Ok(())
    }

    /// Context-started notification. May legitimately be delivered twice
    /// (synchronously for an already-started context and again as an event);
    /// only the first delivery schedules the leadership listener.
    pub async fn on_context_started(self: &Arc<Self>) {
        if self.context_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let delay = *self.initial_delay.lock().unwrap();
        let policy = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            policy.run_leadership_listener().await;
        });
        *self.listener.lock().await = Some(handle);
    }

    /// Listener body: one subscription, one initial evaluation, then events
    /// until the channel closes or the task is aborted at teardown.
    async fn run_leadership_listener(self: Arc<Self>) {
        let view = self.view.lock().await.clone();
        let Some(view) = view else {
            warn!(self.logger, "context started but no cluster view is bound; routes stay stopped";
                "namespace" => %self.namespace);
            return;
        };
        let mut events = view.subscribe();
        self.evaluate_leadership(view.as_ref()).await;
        loop {
            match events.recv().await {
                Ok(ClusterEvent::LeadershipChanged { .. }) => {
                    self.evaluate_leadership(view.as_ref()).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    // Missed events collapse into one evaluation of the
                    // current state.
                    self.evaluate_leadership(view.as_ref()).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn evaluate_leadership(&self, view: &dyn ClusterView) {
        let is_leader = view
            .local_member()
            .map(|member| member.is_leader())
            .unwrap_or(false);
        self.set_leader(is_leader).await;
    }

    /// Record a leadership value. Edges trigger route transitions; repeated
    /// values are ignored. Normally driven by the leadership listener;
    /// exposed for custom wiring.
    pub async fn set_leader(&self, is_leader: bool) {
        if self.leader.swap(is_leader, Ordering::SeqCst) == is_leader {
            return;
        }
        if is_leader {
            info!(self.logger, "leadership taken, starting managed routes";
                "namespace" => %self.namespace);
        } else {
            info!(self.logger, "leadership lost, stopping managed routes";
                "namespace" => %self.namespace);
        }
        self.apply_leadership().await;
    }

    /// Apply the current leadership value to the managed routes.
    ///
    /// The flag is re-read under the route-set lock: if it flipped while we
    /// waited, the action applied is the current one, not the edge that
    /// queued us.
    async fn apply_leadership(&self) {
        let mut routes = self.routes.lock().await;
        if self.is_leader() {
            self.do_start_managed_routes(&mut routes).await;
        } else {
            self.do_stop_managed_routes(&mut routes).await;
        }
    }

    async fn do_start_managed_routes(&self, routes: &mut RouteSets) {
        let pending: Vec<String> = routes.stopped.iter().cloned().collect();
        for route_id in pending {
            if !self.is_leader() {
                // Leadership flipped mid-batch; the queued transition will
                // stop whatever already started.
                break;
            }
            if !self.controller.route_status(&route_id).is_startable() {
                continue;
            }
            match self.controller.start_route(&route_id).await {
                Ok(()) => {
                    routes.stopped.remove(&route_id);
                    routes.started.insert(route_id);
                }
                Err(e) => {
                    error!(self.logger, "failed to start managed route";
                        "route" => %route_id, "error" => %e);
                }
            }
        }
    }

    async fn do_stop_managed_routes(&self, routes: &mut RouteSets) {
        let pending: Vec<String> = routes.started.iter().cloned().collect();
        for route_id in pending {
            if self.is_leader() {
                break;
            }
            if !self.controller.route_status(&route_id).is_stoppable() {
                continue;
            }
            match self.controller.stop_route(&route_id).await {
                Ok(()) => {
                    routes.started.remove(&route_id);
                    routes.stopped.insert(route_id);
                }
                Err(e) => {
                    error!(self.logger, "failed to stop managed route";
                        "route" => %route_id, "error" => %e);
                }
            }
        }
    }

    /// Detach one route attachment.
    ///
    /// The last detachment silences the leadership listener, releases the
    /// view back to the cluster service, and forces the leadership flag to
    /// false. Route state is deliberately left untouched.
    pub async fn shutdown(&self) -> Result<(), ClusterError> {
        self.refs.lock().await.release().await
    }

    async fn teardown(&self) -> Result<(), ClusterError> {
        if let Some(listener) = self.listener.lock().await.take() {
            listener.abort();
        }
        let view = self.view.lock().await.take();
        if let Some(view) = view {
            let service = self.cluster_service.lock().unwrap().clone();
            if let Some(service) = service {
                service.release_view(view).await?;
            }
        }
        self.view_bound.store(false, Ordering::SeqCst);
        // Plain store: tearing down must not start or stop routes.
        self.leader.store(false, Ordering::SeqCst);
        info!(self.logger, "clustered route policy torn down"; "namespace" => %self.namespace);
        Ok(())
    }
}
