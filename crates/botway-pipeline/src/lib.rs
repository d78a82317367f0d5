pub mod app;
pub mod pool;
pub mod query;
pub mod scope;
pub mod session;
pub mod stage;
pub mod stages;
pub mod store;

pub use app::{Application, StageDeps};
pub use pool::QueryPool;
pub use query::{Query, QueryResponse};
pub use scope::{LifecycleScope, TaskScopes};
pub use session::{Conversation, Prompt, Session, SessionManager};
pub use stage::{ResultType, RuntimePipeline, Stage, StageEngine, StageOutput, StageResult};
pub use store::ConversationStore;
