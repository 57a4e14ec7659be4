//! Reference-counted registry of cluster views, one holder per namespace.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use slog::{debug, info, warn, Logger};
use tokio::sync::RwLock;

use crate::cluster::error::ClusterError;
use crate::cluster::refcount::ReferenceCount;
use crate::cluster::view::ClusterView;

/// Constructs the backend view for a namespace on first request.
///
/// The returned view must report the namespace it was built for.
pub type ViewFactory<V> = Box<dyn Fn(&str) -> Result<Arc<V>, ClusterError> + Send + Sync>;

/// Pairs a view with the reference count arbitrating its lifecycle.
struct ViewHolder<V: ClusterView> {
    view: Arc<V>,
    refs: ReferenceCount,
}

impl<V: ClusterView> ViewHolder<V> {
    fn new(view: Arc<V>, running: Arc<AtomicBool>) -> Self {
        let activate_view = Arc::clone(&view);
        let activate_running = Arc::clone(&running);
        let deactivate_view = Arc::clone(&view);
        let refs = ReferenceCount::on(
            move || {
                let view = Arc::clone(&activate_view);
                let running = Arc::clone(&activate_running);
                async move {
                    // A retain before the owning service starts defers the
                    // backend start to the service's own start().
                    if running.load(Ordering::SeqCst) {
                        view.start().await
                    } else {
                        Ok(())
                    }
                }
            },
            move || {
                let view = Arc::clone(&deactivate_view);
                let running = Arc::clone(&running);
                async move {
                    if running.load(Ordering::SeqCst) {
                        view.stop().await
                    } else {
                        Ok(())
                    }
                }
            },
        );
        Self { view, refs }
    }
}

/// Namespace → holder map with reference-counted view start/stop.
///
/// All map mutations and holder side effects happen under one write lock;
/// enumeration and leadership queries take the read side. Holders are never
/// removed once created: a fully released namespace keeps its (stopped) view
/// so a later `get_view` resumes it instead of rebuilding backend state.
pub struct ClusterViewRegistry<V: ClusterView> {
    views: RwLock<HashMap<String, ViewHolder<V>>>,
    running: Arc<AtomicBool>,
    factory: ViewFactory<V>,
    logger: Logger,
}

impl<V: ClusterView> ClusterViewRegistry<V> {
    pub fn new(factory: ViewFactory<V>, logger: Logger) -> Self {
        Self {
            views: RwLock::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(false)),
            factory,
            logger,
        }
    }

    /// Whether the owning service is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Retain the view for `namespace`, creating its holder on first request.
    ///
    /// The first retain starts the view if the owning service is running;
    /// otherwise the start is deferred until [`ClusterViewRegistry::start`].
    /// Backend start errors propagate with the retain already counted, so the
    /// caller can observe and release the partially started holder.
    pub async fn get_view(&self, namespace: &str) -> Result<Arc<V>, ClusterError> {
        let mut views = self.views.write().await;
        let holder = match views.entry(namespace.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let view = (self.factory)(namespace)?;
                debug!(self.logger, "created view holder"; "namespace" => namespace);
                entry.insert(ViewHolder::new(view, Arc::clone(&self.running)))
            }
        };
        holder.refs.retain().await?;
        Ok(Arc::clone(&holder.view))
    }

    /// Release one retain of `view`, stopping it on the last release.
    ///
    /// Releasing a view whose namespace is unknown, or releasing more often
    /// than retained, is a logged no-op.
    pub async fn release_view(&self, view: &dyn ClusterView) -> Result<(), ClusterError> {
        let namespace = view.namespace().to_string();
        let mut views = self.views.write().await;
        match views.get_mut(&namespace) {
            Some(holder) => holder.refs.release().await,
            None => {
                debug!(self.logger, "release for unknown namespace ignored";
                    "namespace" => %namespace);
                Ok(())
            }
        }
    }

    /// Snapshot of every namespace requested so far, held or not.
    pub async fn namespaces(&self) -> Vec<String> {
        self.views.read().await.keys().cloned().collect()
    }

    /// Look up the view for `namespace` without retaining it.
    ///
    /// Administrative/diagnostic use only; the returned handle confers no
    /// lifecycle ownership.
    pub async fn find_view(&self, namespace: &str) -> Option<Arc<V>> {
        self.views
            .read()
            .await
            .get(namespace)
            .map(|holder| Arc::clone(&holder.view))
    }

    /// Current reference count for `namespace`. Diagnostics only.
    pub async fn view_refs(&self, namespace: &str) -> Option<i64> {
        self.views
            .read()
            .await
            .get(namespace)
            .map(|holder| holder.refs.get())
    }

    /// Force-start the view for `namespace`, bypassing the reference count.
    ///
    /// Operational override; a warning no-op for unknown namespaces.
    pub async fn start_view(&self, namespace: &str) -> Result<(), ClusterError> {
        let views = self.views.write().await;
        match views.get(namespace) {
            Some(holder) => {
                info!(self.logger, "force-starting view"; "namespace" => namespace);
                holder.view.start().await
            }
            None => {
                warn!(self.logger, "cannot force-start unknown view"; "namespace" => namespace);
                Ok(())
            }
        }
    }

    /// Force-stop the view for `namespace`, bypassing the reference count.
    ///
    /// Operational override; a warning no-op for unknown namespaces.
    pub async fn stop_view(&self, namespace: &str) -> Result<(), ClusterError> {
        let views = self.views.write().await;
        match views.get(namespace) {
            Some(holder) => {
                info!(self.logger, "force-stopping view"; "namespace" => namespace);
                holder.view.stop().await
            }
            None => {
                warn!(self.logger, "cannot force-stop unknown view"; "namespace" => namespace);
                Ok(())
            }
        }
    }

    /// Whether the local member currently leads `namespace`.
    ///
    /// Never errors: unknown namespaces and absent local members read as
    /// "not leader".
    pub async fn is_leader(&self, namespace: &str) -> bool {
        self.views
            .read()
            .await
            .get(namespace)
            .and_then(|holder| holder.view.local_member())
            .map(|member| member.is_leader())
            .unwrap_or(false)
    }

    /// Mark the owning service running and start every currently-held view.
    pub async fn start(&self) -> Result<(), ClusterError> {
        self.running.store(true, Ordering::SeqCst);
        let views = self.views.write().await;
        for (namespace, holder) in views.iter() {
            if holder.refs.get() > 0 {
                info!(self.logger, "starting held view"; "namespace" => namespace.as_str());
                holder.view.start().await?;
            }
        }
        Ok(())
    }

    /// Stop every currently-held view and mark the service stopped.
    pub async fn stop(&self) -> Result<(), ClusterError> {
        self.running.store(false, Ordering::SeqCst);
        let views = self.views.write().await;
        for (namespace, holder) in views.iter() {
            if holder.refs.get() > 0 {
                info!(self.logger, "stopping held view"; "namespace" => namespace.as_str());
                holder.view.stop().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::event_bus::EventBus;
    use crate::cluster::view::{ClusterEvent, ClusterMember};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::broadcast;

    struct RecordingView {
        namespace: String,
        starts: AtomicUsize,
        stops: AtomicUsize,
        events: EventBus<ClusterEvent>,
    }

    impl RecordingView {
        fn new(namespace: &str) -> Self {
            Self {
                namespace: namespace.to_string(),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                events: EventBus::default(),
            }
        }
    }

    #[async_trait]
    impl ClusterView for RecordingView {
        fn namespace(&self) -> &str {
            &self.namespace
        }

        fn local_member(&self) -> Option<Arc<dyn ClusterMember>> {
            None
        }

        fn leader(&self) -> Option<Arc<dyn ClusterMember>> {
            None
        }

        fn members(&self) -> Vec<Arc<dyn ClusterMember>> {
            Vec::new()
        }

        fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
            self.events.subscribe()
        }

        async fn start(&self) -> Result<(), ClusterError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<(), ClusterError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn create_logger() -> Logger {
        use slog::Drain;
        let decorator = slog_term::PlainDecorator::new(std::io::stdout());
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        Logger::root(drain, slog::o!())
    }

    fn recording_registry() -> ClusterViewRegistry<RecordingView> {
        ClusterViewRegistry::new(
            Box::new(|namespace| Ok(Arc::new(RecordingView::new(namespace)))),
            create_logger(),
        )
    }

    // === Holder sharing ===

    #[tokio::test]
    async fn test_repeated_get_view_shares_one_started_view() {
        let registry = recording_registry();
        registry.start().await.unwrap();

        let first = registry.get_view("group-1").await.unwrap();
        let second = registry.get_view("group-1").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.starts.load(Ordering::SeqCst), 1);
        assert_eq!(registry.view_refs("group-1").await, Some(2));
    }

    #[tokio::test]
    async fn test_extra_release_is_idempotent() {
        let registry = recording_registry();
        registry.start().await.unwrap();

        let view = registry.get_view("group-1").await.unwrap();
        registry.release_view(view.as_ref()).await.unwrap();
        assert_eq!(view.stops.load(Ordering::SeqCst), 1);

        // One more release than retains: no error, no second stop.
        registry.release_view(view.as_ref()).await.unwrap();
        assert_eq!(view.stops.load(Ordering::SeqCst), 1);
        assert_eq!(registry.view_refs("group-1").await, Some(0));
    }

    #[tokio::test]
    async fn test_released_namespace_keeps_its_holder() {
        let registry = recording_registry();
        registry.start().await.unwrap();

        let view = registry.get_view("group-1").await.unwrap();
        registry.release_view(view.as_ref()).await.unwrap();

        // The holder stays registered after the last release; only the
        // underlying view is stopped.
        assert_eq!(registry.namespaces().await, vec!["group-1".to_string()]);

        let again = registry.get_view("group-1").await.unwrap();
        assert!(Arc::ptr_eq(&view, &again));
        assert_eq!(again.starts.load(Ordering::SeqCst), 2);
    }

    // === Deferred start ===

    #[tokio::test]
    async fn test_view_start_deferred_until_service_starts() {
        let registry = recording_registry();
        assert!(!registry.is_running());

        let view = registry.get_view("group-1").await.unwrap();
        assert_eq!(view.starts.load(Ordering::SeqCst), 0);

        registry.start().await.unwrap();
        assert!(registry.is_running());
        assert_eq!(view.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_service_stop_stops_held_views_once() {
        let registry = recording_registry();
        registry.start().await.unwrap();

        let view = registry.get_view("group-1").await.unwrap();
        registry.stop().await.unwrap();
        assert_eq!(view.stops.load(Ordering::SeqCst), 1);

        // Releasing after the service stopped must not stop the view again.
        registry.release_view(view.as_ref()).await.unwrap();
        assert_eq!(view.stops.load(Ordering::SeqCst), 1);
    }

    // === Administrative surface ===

    #[tokio::test]
    async fn test_empty_registry_queries() {
        let registry = recording_registry();
        assert!(registry.namespaces().await.is_empty());
        assert!(!registry.is_leader("anything").await);
    }

    #[tokio::test]
    async fn test_forced_start_stop_of_unknown_namespace_is_noop() {
        let registry = recording_registry();
        registry.start_view("missing").await.unwrap();
        registry.stop_view("missing").await.unwrap();
        assert!(registry.namespaces().await.is_empty());
    }

    #[tokio::test]
    async fn test_forced_start_bypasses_reference_count() {
        let registry = recording_registry();
        registry.start().await.unwrap();
        let view = registry.get_view("group-1").await.unwrap();
        registry.release_view(view.as_ref()).await.unwrap();

        registry.start_view("group-1").await.unwrap();
        assert_eq!(view.starts.load(Ordering::SeqCst), 2);
        assert_eq!(registry.view_refs("group-1").await, Some(0));
    }

    #[tokio::test]
    async fn test_release_for_unknown_namespace_is_ignored() {
        let registry = recording_registry();
        let stray = RecordingView::new("never-requested");
        registry.release_view(&stray).await.unwrap();
        assert!(registry.namespaces().await.is_empty());
    }
}
