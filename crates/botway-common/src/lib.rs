pub mod chain;
pub mod error;
pub mod event;
pub mod types;

pub use chain::{ForwardNode, ImageSource, MessageChain, MessageElement};
pub use error::{Error, RequesterError, Result};
pub use event::{MessageEvent, MessageEventKind, PlatformObject, Sender};
pub use types::{LauncherType, session_key};
