use std::collections::HashMap;
use std::sync::Arc;

use botway_common::Result;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::traits::PlatformAdapter;

/// Named registry of platform adapters. The application spawns one
/// long-running task per adapter and kills them all on shutdown.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        let name = adapter.platform().to_string();
        info!("registered platform adapter: {name}");
        self.adapters.insert(name, adapter);
    }

    pub fn get(&self, platform: &str) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(platform).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PlatformAdapter>> {
        self.adapters.values()
    }

    /// Spawn each adapter's listen loop. The returned handles run until the
    /// adapter exits or is killed.
    pub fn spawn_all(&self) -> Vec<JoinHandle<()>> {
        self.adapters
            .values()
            .map(|adapter| {
                let adapter = Arc::clone(adapter);
                tokio::spawn(async move {
                    let platform = adapter.platform().to_string();
                    info!("starting adapter '{platform}'");
                    if let Err(e) = adapter.run().await {
                        warn!("adapter '{platform}' exited with error: {e}");
                    }
                })
            })
            .collect()
    }

    pub async fn kill_all(&self) -> Result<()> {
        for adapter in self.adapters.values() {
            let platform = adapter.platform();
            match adapter.kill().await {
                Ok(true) => info!("adapter '{platform}' shut down"),
                Ok(false) => warn!("adapter '{platform}' did not confirm shutdown"),
                Err(e) => warn!("adapter '{platform}' shutdown error: {e}"),
            }
        }
        Ok(())
    }
}
