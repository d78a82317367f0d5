pub mod events;
pub mod host;
pub mod manifest;

pub use events::{EventContext, PluginEvent, PromptEntry};
pub use host::{
    CommandReturn, CommandSpec, Plugin, PluginHost, PluginInfo, PluginToolSpec, StaticPluginHost,
};
pub use manifest::PluginManifest;
