use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, PoisonError, RwLock},
};

use anyhow::{Context, Result};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinSet,
};

use crate::{
    config::{InstanceConfig, PluginDescriptor},
    dom::{Document, NodeId},
    error::{DomError, LoadError, PluginError, RuntimeError},
    gate::{self, GateEvent},
    loader::{load_with_timeout, ResourceLoader},
    registry::ElementRegistry,
    routes::{build_plugin_routes, RouteTable},
};

/// Per-plugin readiness, observable through a watch channel. Settles exactly
/// once: `Ready` never follows `Failed` and vice versa, and a settled plugin
/// never goes back to `Pending` (plugins are not hot-unloaded in a session).
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Availability {
    #[default]
    Pending,
    Ready,
    Failed(PluginError),
}

impl Availability {
    pub fn is_settled(&self) -> bool {
        !matches!(self, Availability::Pending)
    }
}

/// Run-time view of one configured plugin.
#[derive(Debug, Clone)]
pub struct PluginStatus {
    pub config: PluginDescriptor,
    pub availability: watch::Receiver<Availability>,
}

impl PluginStatus {
    /// Waits until the plugin settles.
    pub async fn settled(&self) -> Result<(), PluginError> {
        let mut rx = self.availability.clone();
        loop {
            let current = rx.borrow_and_update().clone();
            match current {
                Availability::Ready => return Ok(()),
                Availability::Failed(err) => return Err(err),
                Availability::Pending => {
                    if rx.changed().await.is_err() {
                        return Err(PluginError::HostShutdown);
                    }
                }
            }
        }
    }
}

/// One embeddable plug, with its display label already resolved.
#[derive(Debug, Clone)]
pub struct PlugView {
    pub plugin_id: String,
    pub location: String,
    pub component_tag: String,
    pub label: String,
    pub path: Option<String>,
}

/// Owns plugin configuration, drives loading to settlement, and exposes
/// per-plugin and aggregate readiness.
pub struct PluginRuntime {
    loader: Arc<dyn ResourceLoader>,
    registry: ElementRegistry,
    routes: Arc<RouteTable>,
    document: Arc<Document>,
    state: RwLock<Option<RuntimeState>>,
}

struct RuntimeState {
    default_language: String,
    plugins: Vec<PluginHandle>,
}

#[derive(Clone)]
struct PluginHandle {
    config: PluginDescriptor,
    availability: watch::Receiver<Availability>,
}

impl PluginRuntime {
    pub fn new(
        loader: Arc<dyn ResourceLoader>,
        registry: ElementRegistry,
        routes: Arc<RouteTable>,
        document: Arc<Document>,
    ) -> Self {
        Self {
            loader,
            registry,
            routes,
            document,
            state: RwLock::new(None),
        }
    }

    /// Consumes an instance configuration and drives every plugin to
    /// settlement.
    ///
    /// Resource loads fan out in parallel with no ordering guarantee; one
    /// element gate runs over the union of all plugins' tags. The returned
    /// outcome is `Ok` only if every plugin settled available; the first
    /// failure of any kind becomes the error. Remaining in-flight work keeps
    /// running in the background so sibling plugins still settle on their own
    /// merits. Calling `init` again replaces statuses and routes wholesale.
    pub async fn init(&self, config: InstanceConfig) -> Result<()> {
        config.validate()?;
        self.routes.install(build_plugin_routes(&config.plugins));

        let mut handles = Vec::with_capacity(config.plugins.len());
        let mut trackers = HashMap::new();
        let mut tag_owners: HashMap<String, Vec<String>> = HashMap::new();
        for plugin in &config.plugins {
            let (tx, rx) = watch::channel(Availability::Pending);
            let tags = plugin.component_tags();
            for tag in &tags {
                tag_owners
                    .entry(tag.clone())
                    .or_default()
                    .push(plugin.id.clone());
            }
            trackers.insert(
                plugin.id.clone(),
                PluginTracker {
                    pending_resources: plugin.ui_resources.len(),
                    pending_tags: tags,
                    sender: tx,
                    settled: false,
                },
            );
            handles.push(PluginHandle {
                config: plugin.clone(),
                availability: rx,
            });
        }

        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            *state = Some(RuntimeState {
                default_language: config.default_language.clone(),
                plugins: handles,
            });
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        for plugin in &config.plugins {
            for resource in &plugin.ui_resources {
                let url = resource.resolved_url(&config.base_url);
                let loader = self.loader.clone();
                let events = events_tx.clone();
                let plugin_id = plugin.id.clone();
                tasks.spawn(async move {
                    let result = load_with_timeout(loader.as_ref(), &url).await;
                    let _ = events.send(InitEvent::Resource { plugin_id, result });
                });
            }
        }

        let tag_union: HashSet<String> = tag_owners.keys().cloned().collect();
        let (gate_tx, mut gate_rx) = mpsc::unbounded_channel();
        tasks.spawn(gate::watch_custom_elements(
            self.registry.clone(),
            tag_union,
            gate_tx,
        ));
        let gate_events = events_tx.clone();
        tasks.spawn(async move {
            while let Some(event) = gate_rx.recv().await {
                if gate_events.send(InitEvent::Gate(event)).is_err() {
                    break;
                }
            }
        });
        drop(events_tx);

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let orchestrator = Orchestrator {
            unsettled: trackers.len(),
            trackers,
            tag_owners,
            outcome: Some(outcome_tx),
        };
        tokio::spawn(async move {
            orchestrator.run(events_rx).await;
            // Loads are never cancelled; late results are simply discarded.
            let mut tasks = tasks;
            while let Some(result) = tasks.join_next().await {
                if let Err(err) = result {
                    tracing::error!(error = %err, "plugin load task aborted");
                }
            }
        });

        outcome_rx
            .await
            .context("plugin orchestration ended before reporting an outcome")?
            .map_err(anyhow::Error::from)
    }

    pub fn plugin_status(&self, id: &str) -> Result<PluginStatus, RuntimeError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let state = state.as_ref().ok_or(RuntimeError::NotInitialized)?;
        state
            .plugins
            .iter()
            .find(|handle| handle.config.id == id)
            .map(|handle| PluginStatus {
                config: handle.config.clone(),
                availability: handle.availability.clone(),
            })
            .ok_or_else(|| RuntimeError::UnknownPlugin(id.to_string()))
    }

    /// Synchronous lookup of the plugs offered for one named slot of the
    /// host UI, with display labels resolved via the fallback chain. Only
    /// callable after the initial configuration has been consumed.
    pub fn plugs_for_location(
        &self,
        location: &str,
        current_language: &str,
    ) -> Result<Vec<PlugView>, RuntimeError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let state = state.as_ref().ok_or(RuntimeError::NotInitialized)?;
        let mut views = Vec::new();
        for handle in &state.plugins {
            for plug in &handle.config.ui_plugs {
                if plug.location != location {
                    continue;
                }
                views.push(PlugView {
                    plugin_id: handle.config.id.clone(),
                    location: plug.location.clone(),
                    component_tag: plug.component_tag.clone(),
                    label: plug.label_for(current_language, &state.default_language),
                    path: plug.path.clone(),
                });
            }
        }
        Ok(views)
    }

    /// Low-level DOM mutation: creates an element of `tag`, applies `attrs`
    /// as string attributes, and appends it under `parent`. Performs no
    /// registry validation; callers must sequence this after availability.
    pub fn insert_element(
        &self,
        parent: NodeId,
        tag: &str,
        attrs: &[(&str, &str)],
    ) -> Result<NodeId, DomError> {
        self.document.insert_element(parent, tag, attrs)
    }

    pub fn document(&self) -> Arc<Document> {
        self.document.clone()
    }

    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.clone()
    }
}

enum InitEvent {
    Resource {
        plugin_id: String,
        result: Result<(), LoadError>,
    },
    Gate(GateEvent),
}

struct PluginTracker {
    pending_resources: usize,
    pending_tags: HashSet<String>,
    sender: watch::Sender<Availability>,
    settled: bool,
}

/// Partitions the global wait into per-plugin views: each plugin settles on
/// its own resources and tags only, so one plugin's failure never
/// contaminates a sibling's status.
struct Orchestrator {
    trackers: HashMap<String, PluginTracker>,
    tag_owners: HashMap<String, Vec<String>>,
    unsettled: usize,
    outcome: Option<oneshot::Sender<Result<(), PluginError>>>,
}

impl Orchestrator {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<InitEvent>) {
        let ids: Vec<String> = self.trackers.keys().cloned().collect();
        for id in &ids {
            self.try_ready(id);
        }
        self.maybe_finish();
        while let Some(event) = events.recv().await {
            match event {
                InitEvent::Resource { plugin_id, result } => self.on_resource(&plugin_id, result),
                InitEvent::Gate(GateEvent::TagDefined(tag)) => self.on_tag_defined(&tag),
                InitEvent::Gate(GateEvent::TimedOut { missing }) => self.on_gate_timeout(&missing),
            }
        }
        self.maybe_finish();
    }

    fn on_resource(&mut self, plugin_id: &str, result: Result<(), LoadError>) {
        match result {
            Ok(()) => {
                metrics::counter!("plugdeck_resource_loads_total", "outcome" => "ok")
                    .increment(1);
                if let Some(tracker) = self.trackers.get_mut(plugin_id) {
                    if !tracker.settled && tracker.pending_resources > 0 {
                        tracker.pending_resources -= 1;
                    }
                }
                self.try_ready(plugin_id);
            }
            Err(err) => {
                let outcome = match &err {
                    LoadError::Timeout { .. } => "timeout",
                    LoadError::Failed { .. } => "error",
                };
                metrics::counter!("plugdeck_resource_loads_total", "outcome" => outcome)
                    .increment(1);
                self.fail(plugin_id, PluginError::Resource(err));
            }
        }
    }

    fn on_tag_defined(&mut self, tag: &str) {
        let owners = self.tag_owners.get(tag).cloned().unwrap_or_default();
        for id in owners {
            if let Some(tracker) = self.trackers.get_mut(&id) {
                tracker.pending_tags.remove(tag);
            }
            self.try_ready(&id);
        }
    }

    fn on_gate_timeout(&mut self, missing: &[String]) {
        tracing::warn!(
            missing = missing.join(", "),
            "custom elements never registered before the ceiling"
        );
        // Only plugins still waiting on a tag fail; settled plugins stay as
        // they are.
        let victims: Vec<String> = self
            .trackers
            .iter()
            .filter(|(_, tracker)| !tracker.settled && !tracker.pending_tags.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        for id in victims {
            let mut missing_tags: Vec<String> =
                self.trackers[&id].pending_tags.iter().cloned().collect();
            missing_tags.sort();
            self.fail(&id, PluginError::ElementTimeout { missing_tags });
        }
    }

    fn try_ready(&mut self, plugin_id: &str) {
        let Some(tracker) = self.trackers.get_mut(plugin_id) else {
            return;
        };
        if tracker.settled || tracker.pending_resources > 0 || !tracker.pending_tags.is_empty() {
            return;
        }
        tracker.settled = true;
        self.unsettled -= 1;
        let _ = tracker.sender.send(Availability::Ready);
        tracing::info!(plugin = plugin_id, "plugin available");
        metrics::counter!("plugdeck_plugins_total", "outcome" => "available").increment(1);
        self.maybe_finish();
    }

    fn fail(&mut self, plugin_id: &str, err: PluginError) {
        let Some(tracker) = self.trackers.get_mut(plugin_id) else {
            return;
        };
        if tracker.settled {
            return;
        }
        tracker.settled = true;
        self.unsettled -= 1;
        tracing::warn!(plugin = plugin_id, error = %err, "plugin unavailable");
        metrics::counter!("plugdeck_plugins_total", "outcome" => "failed").increment(1);
        let _ = tracker.sender.send(Availability::Failed(err.clone()));
        if let Some(outcome) = self.outcome.take() {
            let _ = outcome.send(Err(err));
        }
    }

    fn maybe_finish(&mut self) {
        if self.unsettled == 0 {
            if let Some(outcome) = self.outcome.take() {
                let _ = outcome.send(Ok(()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::config::{LocalizedLabel, Resource, UiPlug};

    #[derive(Default)]
    struct ScriptedLoader {
        fail: HashSet<String>,
        hang: HashSet<String>,
    }

    #[async_trait]
    impl ResourceLoader for ScriptedLoader {
        async fn load(&self, url: &str) -> Result<(), LoadError> {
            if self.hang.contains(url) {
                std::future::pending::<()>().await;
            }
            if self.fail.contains(url) {
                return Err(LoadError::Failed {
                    url: url.to_string(),
                    reason: "connection refused".into(),
                });
            }
            Ok(())
        }
    }

    fn plugin(id: &str, urls: &[&str], tags: &[&str]) -> PluginDescriptor {
        PluginDescriptor {
            id: id.into(),
            path: id.into(),
            ui_resources: urls
                .iter()
                .map(|url| Resource::Script {
                    url: (*url).to_string(),
                })
                .collect(),
            ui_plugs: tags
                .iter()
                .map(|tag| UiPlug {
                    location: "footer.menu".into(),
                    component_tag: (*tag).to_string(),
                    path: None,
                    labels: Vec::new(),
                })
                .collect(),
        }
    }

    fn instance(plugins: Vec<PluginDescriptor>) -> InstanceConfig {
        InstanceConfig {
            base_url: "https://comments.example.com".into(),
            default_language: "en".into(),
            plugins,
        }
    }

    fn runtime_with(loader: ScriptedLoader) -> (PluginRuntime, ElementRegistry) {
        let registry = ElementRegistry::new();
        let runtime = PluginRuntime::new(
            Arc::new(loader),
            registry.clone(),
            Arc::new(RouteTable::new()),
            Arc::new(Document::new()),
        );
        (runtime, registry)
    }

    #[tokio::test(start_paused = true)]
    async fn zero_plugins_initialize_immediately() {
        let (runtime, _) = runtime_with(ScriptedLoader::default());
        let start = Instant::now();
        runtime.init(instance(Vec::new())).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn plugin_becomes_available_when_resources_and_tags_settle() {
        let (runtime, registry) = runtime_with(ScriptedLoader::default());
        registry.define("sso-settings");
        runtime
            .init(instance(vec![plugin(
                "sso",
                &["https://cdn.example.com/sso.js"],
                &["sso-settings"],
            )]))
            .await
            .unwrap();
        let status = runtime.plugin_status("sso").unwrap();
        status.settled().await.unwrap();
        assert_eq!(*status.availability.borrow(), Availability::Ready);
        // A settled signal stays settled.
        status.settled().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_resource_makes_the_plugin_unavailable() {
        let mut loader = ScriptedLoader::default();
        loader.fail.insert("https://cdn.example.com/sso.js".into());
        let (runtime, registry) = runtime_with(loader);
        registry.define("sso-settings");
        let outcome = runtime
            .init(instance(vec![plugin(
                "sso",
                &["https://cdn.example.com/sso.js"],
                &["sso-settings"],
            )]))
            .await;
        assert!(outcome.is_err());
        let status = runtime.plugin_status("sso").unwrap();
        let err = status.settled().await.unwrap_err();
        assert!(matches!(err, PluginError::Resource(LoadError::Failed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn sibling_failure_does_not_contaminate() {
        let mut loader = ScriptedLoader::default();
        loader.fail.insert("https://cdn.example.com/b.js".into());
        let (runtime, registry) = runtime_with(loader);
        registry.define("a-widget");
        registry.define("b-widget");
        let outcome = runtime
            .init(instance(vec![
                plugin("a", &["https://cdn.example.com/a.js"], &["a-widget"]),
                plugin("b", &["https://cdn.example.com/b.js"], &["b-widget"]),
            ]))
            .await;
        assert!(outcome.is_err());
        runtime
            .plugin_status("a")
            .unwrap()
            .settled()
            .await
            .unwrap();
        let err = runtime
            .plugin_status("b")
            .unwrap()
            .settled()
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Resource(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_resource_times_out_after_the_ceiling() {
        let mut loader = ScriptedLoader::default();
        loader.hang.insert("https://cdn.example.com/slow.js".into());
        let (runtime, _) = runtime_with(loader);
        let start = Instant::now();
        let outcome = runtime
            .init(instance(vec![plugin(
                "slow",
                &["https://cdn.example.com/slow.js"],
                &[],
            )]))
            .await;
        assert!(outcome.is_err());
        assert!(start.elapsed() >= Duration::from_secs(30));
        let err = runtime
            .plugin_status("slow")
            .unwrap()
            .settled()
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PluginError::Resource(LoadError::Timeout {
                url: "https://cdn.example.com/slow.js".into(),
                timeout_secs: 30,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gate_timeout_fails_only_plugins_still_waiting() {
        let (runtime, registry) = runtime_with(ScriptedLoader::default());
        registry.define("a-widget");
        let outcome = runtime
            .init(instance(vec![
                plugin("a", &["https://cdn.example.com/a.js"], &["a-widget"]),
                plugin("b", &["https://cdn.example.com/b.js"], &["b-widget"]),
            ]))
            .await;
        assert!(outcome.is_err());
        runtime
            .plugin_status("a")
            .unwrap()
            .settled()
            .await
            .unwrap();
        let err = runtime
            .plugin_status("b")
            .unwrap()
            .settled()
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PluginError::ElementTimeout {
                missing_tags: vec!["b-widget".into()],
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn plug_lookup_requires_initialization_and_resolves_labels() {
        let (runtime, registry) = runtime_with(ScriptedLoader::default());
        assert_eq!(
            runtime.plugs_for_location("footer.menu", "fr").unwrap_err(),
            RuntimeError::NotInitialized
        );

        registry.define("sso-settings");
        let mut descriptor = plugin("sso", &[], &["sso-settings"]);
        descriptor.ui_plugs[0].labels = vec![
            LocalizedLabel {
                language: "en".into(),
                text: "SSO settings".into(),
            },
            LocalizedLabel {
                language: "de".into(),
                text: "SSO-Einstellungen".into(),
            },
        ];
        runtime.init(instance(vec![descriptor])).await.unwrap();

        let views = runtime.plugs_for_location("footer.menu", "fr").unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].label, "SSO settings");
        assert!(runtime
            .plugs_for_location("navbar.menu", "fr")
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reinitialization_replaces_plugins_and_routes_wholesale() {
        let (runtime, registry) = runtime_with(ScriptedLoader::default());
        registry.define("a-widget");
        registry.define("b-widget");

        let mut first = plugin("a", &[], &["a-widget"]);
        first.ui_plugs[0].path = Some("page".into());
        runtime.init(instance(vec![first])).await.unwrap();
        assert_eq!(runtime.routes().routes()[0].path, "a/page");

        let mut second = plugin("b", &[], &["b-widget"]);
        second.ui_plugs[0].path = Some("page".into());
        runtime.init(instance(vec![second])).await.unwrap();
        let routes = runtime.routes().routes();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].path, "b/page");
        assert_eq!(
            runtime.plugin_status("a").unwrap_err(),
            RuntimeError::UnknownPlugin("a".into())
        );
    }
}
