pub mod broker;
pub mod config;
pub mod dom;
pub mod error;
pub mod gate;
pub mod loader;
pub mod mount;
pub mod registry;
pub mod routes;
pub mod runtime;

pub use plugdeck_plugin_sdk as sdk;

/// Returns the crate version baked in at compile time.
pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
