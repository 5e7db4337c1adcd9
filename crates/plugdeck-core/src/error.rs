use thiserror::Error;

/// Terminal outcome of a single resource load. Cloneable because it travels
/// through availability signals as data rather than being thrown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("failed to load resource `{url}`: {reason}")]
    Failed { url: String, reason: String },
    #[error("resource `{url}` did not load within {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },
}

/// Why a plugin is permanently unavailable for this session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error(transparent)]
    Resource(#[from] LoadError),
    #[error("custom elements never registered: {}", missing_tags.join(", "))]
    ElementTimeout { missing_tags: Vec<String> },
    #[error("host shut down before the plugin settled")]
    HostShutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("plugin runtime has not consumed a configuration yet")]
    NotInitialized,
    #[error("unknown plugin `{0}`")]
    UnknownPlugin(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("node is not attached to this document")]
    Detached,
}

/// Programming errors surfaced by a mount point, as opposed to plugin
/// failures, which are retained on the mount point's state for display.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MountError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Dom(#[from] DomError),
}
