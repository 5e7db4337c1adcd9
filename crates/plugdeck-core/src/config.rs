use std::{collections::HashSet, str::FromStr};

use anyhow::{bail, Context, Result};
use http::Uri;
use serde::{Deserialize, Serialize};

/// Label used when a plug carries no label for the current or the default
/// language.
pub const UNNAMED_PLUG_LABEL: &str = "(unnamed)";

/// Instance configuration as served by the configuration endpoint. Treated
/// as immutable for the session; a reload replaces the whole object.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct InstanceConfig {
    /// Origin used to resolve relative resource URLs.
    pub base_url: String,
    /// Language used when a label is missing for the current UI language.
    pub default_language: String,
    pub plugins: Vec<PluginDescriptor>,
}

/// One installable extension. The full set is replaced wholesale on each
/// configuration reload; no incremental diffing.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct PluginDescriptor {
    pub id: String,
    pub path: String,
    pub ui_resources: Vec<Resource>,
    pub ui_plugs: Vec<UiPlug>,
}

/// A fetchable asset required before the plugin's custom elements can
/// function.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Resource {
    #[serde(rename = "script")]
    Script { url: String },
}

impl Resource {
    pub fn url(&self) -> &str {
        match self {
            Resource::Script { url } => url,
        }
    }

    /// Resolves the resource URL against the instance base URL. Absolute
    /// URLs are passed through untouched.
    pub fn resolved_url(&self, base_url: &str) -> String {
        let url = self.url();
        if url.contains("://") {
            url.to_string()
        } else {
            format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                url.trim_start_matches('/')
            )
        }
    }
}

/// One mount point a plugin offers: a named slot in the host UI, a
/// standalone routed page when `path` is set, or both.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UiPlug {
    pub location: String,
    pub component_tag: String,
    pub path: Option<String>,
    pub labels: Vec<LocalizedLabel>,
}

impl UiPlug {
    /// Display label fallback chain: current UI language, then the instance
    /// default language, then a literal placeholder.
    pub fn label_for(&self, current_language: &str, default_language: &str) -> String {
        self.label_in(current_language)
            .or_else(|| self.label_in(default_language))
            .unwrap_or(UNNAMED_PLUG_LABEL)
            .to_string()
    }

    fn label_in(&self, language: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|label| label.language == language)
            .map(|label| label.text.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LocalizedLabel {
    pub language: String,
    pub text: String,
}

impl InstanceConfig {
    /// Validates structural invariants and provides actionable error messages.
    pub fn validate(&self) -> Result<()> {
        if !self.base_url.is_empty() {
            Uri::from_str(&self.base_url)
                .with_context(|| format!("invalid base url `{}`", self.base_url))?;
        }
        let mut plugin_ids = HashSet::new();
        for plugin in &self.plugins {
            plugin.validate()?;
            if !plugin_ids.insert(plugin.id.clone()) {
                bail!("duplicate plugin id `{}`", plugin.id);
            }
            if self.base_url.is_empty()
                && plugin
                    .ui_resources
                    .iter()
                    .any(|resource| !resource.url().contains("://"))
            {
                bail!(
                    "plugin `{}` declares relative resource URLs but no base url is configured",
                    plugin.id
                );
            }
        }
        Ok(())
    }
}

impl PluginDescriptor {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            bail!("plugin id must not be empty");
        }
        for resource in &self.ui_resources {
            if resource.url().trim().is_empty() {
                bail!("plugin `{}` declares a resource without a url", self.id);
            }
        }
        for plug in &self.ui_plugs {
            if plug.component_tag.trim().is_empty() {
                bail!("plugin `{}` declares a plug without a component tag", self.id);
            }
        }
        Ok(())
    }

    /// Deduplicated set of custom-element tags this plugin registers.
    pub fn component_tags(&self) -> HashSet<String> {
        self.ui_plugs
            .iter()
            .map(|plug| plug.component_tag.clone())
            .collect()
    }
}
