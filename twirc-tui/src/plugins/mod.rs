//! Plugins shipped with the client.

pub mod log;
pub mod ping;
pub mod say;

use crate::plugin::Registry;

/// Registry of all built-in plugins, keyed by the name used in
/// `/load` and the `plugins` config list.
pub fn builtin() -> Registry {
    let mut registry = Registry::default();
    registry.register("ping", |host| Ok(Box::new(ping::PingPlugin::new(host))));
    registry.register("log", |host| Ok(Box::new(log::LogPlugin::new(host))));
    registry.register("say", |host| Ok(Box::new(say::SayPlugin::new(host))));
    registry
}
