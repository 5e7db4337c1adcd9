use std::{
    collections::HashSet,
    sync::{PoisonError, RwLock},
};

use crate::config::{PluginDescriptor, UiPlug};

/// Stable parent route reserved for plugin pages. Installed routes are its
/// children and are replaced wholesale on every configuration reload.
pub const PLUGIN_ROUTE_PARENT: &str = "/plugin";

/// One installed route. Carries the originating descriptors as route data so
/// the mount point can resolve which custom element to instantiate without a
/// second lookup.
#[derive(Debug, Clone)]
pub struct PluginRoute {
    /// Path relative to the plugin parent route.
    pub path: String,
    pub plugin: PluginDescriptor,
    pub plug: UiPlug,
}

/// Derives router entries for every plug that has a standalone path.
///
/// Two plugs composing to the identical path keep only the first occurrence
/// in iteration order; the first-registered plug owns the path.
pub fn build_plugin_routes(plugins: &[PluginDescriptor]) -> Vec<PluginRoute> {
    let mut seen = HashSet::new();
    let mut routes = Vec::new();
    for plugin in plugins {
        for plug in &plugin.ui_plugs {
            let Some(sub_path) = plug.path.as_deref().filter(|path| !path.is_empty()) else {
                continue;
            };
            let path = join_route(&plugin.path, sub_path);
            if !seen.insert(path.clone()) {
                tracing::warn!(
                    path = %path,
                    plugin = %plugin.id,
                    "duplicate plugin route dropped"
                );
                continue;
            }
            routes.push(PluginRoute {
                path,
                plugin: plugin.clone(),
                plug: plug.clone(),
            });
        }
    }
    routes
}

fn join_route(plugin_path: &str, plug_path: &str) -> String {
    format!(
        "{}/{}",
        plugin_path.trim_matches('/'),
        plug_path.trim_matches('/')
    )
}

/// The routing table seen by the host: a single mutable resource owned here,
/// replaced wholesale, never merged.
#[derive(Debug, Default)]
pub struct RouteTable {
    children: RwLock<Vec<PluginRoute>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent(&self) -> &'static str {
        PLUGIN_ROUTE_PARENT
    }

    /// Replaces the children of the plugin parent route. Idempotent across
    /// repeated configuration reloads.
    pub fn install(&self, routes: Vec<PluginRoute>) {
        let mut children = self
            .children
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *children = routes;
    }

    /// Looks up a route by path, accepting either the parent-relative form
    /// or the full path including the parent prefix.
    pub fn resolve(&self, path: &str) -> Option<PluginRoute> {
        let relative = path
            .strip_prefix(PLUGIN_ROUTE_PARENT)
            .unwrap_or(path)
            .trim_matches('/');
        self.children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|route| route.path == relative)
            .cloned()
    }

    pub fn routes(&self) -> Vec<PluginRoute> {
        self.children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
