use crate::{
    dom::{Document, NodeId},
    error::{MountError, PluginError},
    runtime::PluginRuntime,
};

/// Attribute set on every mounted element, naming the owning plugin.
pub const PLUGIN_ID_ATTR: &str = "data-plugin-id";

#[derive(Debug, Clone, PartialEq)]
pub enum MountState {
    Idle,
    Waiting,
    Mounted(NodeId),
    /// The owning plugin failed to load; the error is retained so the host
    /// UI can offer a "show technical details" affordance.
    Failed(PluginError),
}

/// Bridges one plugin's availability signal to a live DOM mutation for one
/// embedding point, slot-based or routed.
///
/// State machine: `Idle → Waiting → Mounted` or `Idle → Waiting → Failed`.
/// There is no automatic retry and no transition back to `Waiting`.
pub struct PlugMountPoint {
    plugin_id: String,
    component_tag: String,
    state: MountState,
}

impl PlugMountPoint {
    pub fn new(plugin_id: impl Into<String>, component_tag: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            component_tag: component_tag.into(),
            state: MountState::Idle,
        }
    }

    pub fn state(&self) -> &MountState {
        &self.state
    }

    pub fn error(&self) -> Option<&PluginError> {
        match &self.state {
            MountState::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Waits for the plugin to settle and mounts its custom element under
    /// `parent` exactly once. A settled mount point is left untouched.
    pub async fn attach(
        &mut self,
        runtime: &PluginRuntime,
        parent: NodeId,
    ) -> Result<(), MountError> {
        if matches!(self.state, MountState::Mounted(_) | MountState::Failed(_)) {
            return Ok(());
        }
        let status = runtime.plugin_status(&self.plugin_id)?;
        self.state = MountState::Waiting;
        match status.settled().await {
            Ok(()) => {
                let node = runtime.insert_element(
                    parent,
                    &self.component_tag,
                    &[(PLUGIN_ID_ATTR, self.plugin_id.as_str())],
                )?;
                self.state = MountState::Mounted(node);
            }
            Err(err) => {
                self.state = MountState::Failed(err);
            }
        }
        Ok(())
    }

    /// Removes the previously inserted element from the document. Must be
    /// called when the embedding point goes away: the custom element may
    /// hold open resources that have to be released promptly. Runs before
    /// any resubscription; a non-mounted point resets without touching the
    /// document.
    pub fn destroy(&mut self, document: &Document) {
        if let MountState::Mounted(node) = self.state {
            if let Err(err) = document.remove(node) {
                tracing::debug!(
                    plugin = %self.plugin_id,
                    error = %err,
                    "mounted element was already detached"
                );
            }
        }
        self.state = MountState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        config::{InstanceConfig, PluginDescriptor, Resource, UiPlug},
        error::LoadError,
        loader::ResourceLoader,
        registry::ElementRegistry,
        routes::RouteTable,
    };

    struct ScriptedLoader {
        fail: HashSet<String>,
    }

    #[async_trait]
    impl ResourceLoader for ScriptedLoader {
        async fn load(&self, url: &str) -> Result<(), LoadError> {
            if self.fail.contains(url) {
                return Err(LoadError::Failed {
                    url: url.to_string(),
                    reason: "connection refused".into(),
                });
            }
            Ok(())
        }
    }

    fn instance(fail: bool) -> (PluginRuntime, ElementRegistry) {
        let registry = ElementRegistry::new();
        let mut failing = HashSet::new();
        if fail {
            failing.insert("https://cdn.example.com/sso.js".to_string());
        }
        let runtime = PluginRuntime::new(
            Arc::new(ScriptedLoader { fail: failing }),
            registry.clone(),
            Arc::new(RouteTable::new()),
            Arc::new(Document::new()),
        );
        (runtime, registry)
    }

    fn config() -> InstanceConfig {
        InstanceConfig {
            base_url: "https://comments.example.com".into(),
            default_language: "en".into(),
            plugins: vec![PluginDescriptor {
                id: "sso".into(),
                path: "sso".into(),
                ui_resources: vec![Resource::Script {
                    url: "https://cdn.example.com/sso.js".into(),
                }],
                ui_plugs: vec![UiPlug {
                    location: "footer.menu".into(),
                    component_tag: "sso-settings".into(),
                    path: None,
                    labels: Vec::new(),
                }],
            }],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn mounts_the_custom_element_once_available() {
        let (runtime, registry) = instance(false);
        registry.define("sso-settings");
        runtime.init(config()).await.unwrap();

        let document = runtime.document();
        let parent = document.root();
        let mut mount = PlugMountPoint::new("sso", "sso-settings");
        mount.attach(&runtime, parent).await.unwrap();

        let node = match mount.state() {
            MountState::Mounted(node) => *node,
            state => panic!("expected a mounted state, got {state:?}"),
        };
        assert!(document.contains(parent, node));
        assert_eq!(document.tag(node).unwrap(), "sso-settings");
        assert_eq!(
            document.attr(node, PLUGIN_ID_ATTR).unwrap(),
            Some("sso".to_string())
        );

        // A second attach on a settled mount point inserts nothing.
        mount.attach(&runtime, parent).await.unwrap();
        assert_eq!(document.children(parent).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_plugin_retains_the_error_for_display() {
        let (runtime, registry) = instance(true);
        registry.define("sso-settings");
        let _ = runtime.init(config()).await;

        let document = runtime.document();
        let mut mount = PlugMountPoint::new("sso", "sso-settings");
        mount.attach(&runtime, document.root()).await.unwrap();

        assert!(matches!(mount.state(), MountState::Failed(_)));
        assert!(mount.error().is_some());
        assert!(document.children(document.root()).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_removes_the_element_from_its_parent() {
        let (runtime, registry) = instance(false);
        registry.define("sso-settings");
        runtime.init(config()).await.unwrap();

        let document = runtime.document();
        let parent = document.root();
        let mut mount = PlugMountPoint::new("sso", "sso-settings");
        mount.attach(&runtime, parent).await.unwrap();
        let node = match mount.state() {
            MountState::Mounted(node) => *node,
            state => panic!("expected a mounted state, got {state:?}"),
        };

        mount.destroy(&document);
        assert!(!document.contains(parent, node));
        assert_eq!(*mount.state(), MountState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_plugin_is_a_programming_error() {
        let (runtime, _) = instance(false);
        runtime.init(InstanceConfig::default()).await.unwrap();
        let document = runtime.document();
        let mut mount = PlugMountPoint::new("ghost", "ghost-widget");
        let err = mount.attach(&runtime, document.root()).await.unwrap_err();
        assert!(matches!(err, MountError::Runtime(_)));
    }
}
