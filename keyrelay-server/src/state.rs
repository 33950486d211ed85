//! Application State
//!
//! The gateway state from `keyrelay-core` plus what only the daemon needs:
//! where the config file lives so admin edits survive a restart.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use keyrelay_core::modules::save_config;
use keyrelay_core::AppState as GatewayState;
use keyrelay_types::GatewayConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub(crate) inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub gateway: GatewayState,
    pub config_path: PathBuf,
    /// Serializes admin edits that touch both the config and the key pool
    admin_edits: Mutex<()>,
}

impl AppState {
    pub fn new(gateway: GatewayState, config_path: PathBuf) -> Self {
        Self {
            inner: Arc::new(AppStateInner { gateway, config_path, admin_edits: Mutex::new(()) }),
        }
    }

    /// Select the backend, restore key state and wire everything together.
    pub async fn bootstrap(config: GatewayConfig, config_path: PathBuf) -> Result<Self> {
        let gateway = GatewayState::bootstrap(config)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize gateway: {}", e))?;
        Ok(Self::new(gateway, config_path))
    }

    pub fn gateway(&self) -> &GatewayState {
        &self.inner.gateway
    }

    pub fn config_path(&self) -> &Path {
        &self.inner.config_path
    }

    /// Held for the whole of a config + pool edit so concurrent edits cannot
    /// leave the two disagreeing.
    pub async fn lock_admin_edits(&self) -> MutexGuard<'_, ()> {
        self.inner.admin_edits.lock().await
    }

    /// Write the live configuration back to disk.
    pub async fn persist_config(&self) -> Result<(), String> {
        let config = self.gateway().config.read().await.clone();
        let path = self.inner.config_path.clone();
        match tokio::task::spawn_blocking(move || save_config(&path, &config)).await {
            Ok(Ok(())) => {
                tracing::info!("Saved config to {}", self.config_path().display());
                Ok(())
            },
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("spawn_blocking panicked: {e}")),
        }
    }
}
