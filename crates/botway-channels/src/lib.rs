pub mod registry;
pub mod traits;
#[cfg(feature = "webchat")]
pub mod webchat;

pub use registry::AdapterRegistry;
pub use traits::{EventListener, EventType, ListenerSet, PlatformAdapter};
#[cfg(feature = "webchat")]
pub use webchat::WebChatAdapter;
