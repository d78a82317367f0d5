use std::collections::HashMap;
use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle scopes tasks are tagged with. Platform, plugin and provider
/// tokens are children of the application token, so cancelling the
/// application tears everything down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleScope {
    Application,
    Platform,
    Plugin,
    Provider,
}

const CHILD_SCOPES: [LifecycleScope; 3] = [
    LifecycleScope::Platform,
    LifecycleScope::Plugin,
    LifecycleScope::Provider,
];

/// Cancellation roots per scope. Tasks spawned through a scope stop at
/// their next suspension point once the scope is cancelled.
pub struct TaskScopes {
    application: CancellationToken,
    children: HashMap<LifecycleScope, CancellationToken>,
}

impl Default for TaskScopes {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScopes {
    pub fn new() -> Self {
        let application = CancellationToken::new();
        let children = CHILD_SCOPES
            .iter()
            .map(|scope| (*scope, application.child_token()))
            .collect();
        Self {
            application,
            children,
        }
    }

    pub fn token(&self, scope: LifecycleScope) -> CancellationToken {
        match scope {
            LifecycleScope::Application => self.application.clone(),
            other => self.children[&other].clone(),
        }
    }

    pub fn cancel(&self, scope: LifecycleScope) {
        debug!("cancelling scope {scope:?}");
        self.token(scope).cancel();
    }

    pub fn is_cancelled(&self, scope: LifecycleScope) -> bool {
        self.token(scope).is_cancelled()
    }

    /// Spawn a future bound to a scope: it is dropped at its next await
    /// point when the scope is cancelled.
    pub fn spawn<F>(&self, scope: LifecycleScope, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token(scope);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = future => {}
            }
        })
    }
}
