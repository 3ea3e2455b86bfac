//! Host-bridge collaborators.
//!
//! The core never touches files or processes directly; it goes through these traits.
//! `local` provides the on-disk/child-process implementation used by the binary.

#[cfg(test)]
pub(crate) mod fake;
pub(crate) mod local;
mod opener;

use crate::error::BridgeResult;
use crate::model::{AppConfig, ConfigProfile};
use async_trait::async_trait;

pub(crate) use local::LocalBridge;
pub(crate) use opener::SystemOpener;

/// Persistence of profiles, their content, the active pointer and app settings.
#[async_trait]
pub(crate) trait ConfigStore: Send + Sync {
    async fn list_configs(&self) -> BridgeResult<Vec<ConfigProfile>>;
    async fn save_config(&self, profile: &ConfigProfile) -> BridgeResult<()>;
    async fn write_config_file(&self, path: &str, content: &str) -> BridgeResult<()>;
    /// `None` clears the pointer.
    async fn set_active_config(&self, id: Option<&str>) -> BridgeResult<()>;
    async fn remove_config(&self, id: &str) -> BridgeResult<()>;
    async fn get_active_config(&self) -> BridgeResult<Option<ConfigProfile>>;
    async fn get_active_config_content(&self) -> BridgeResult<String>;
    async fn get_app_config(&self) -> BridgeResult<AppConfig>;
    async fn update_app_config(&self, config: &AppConfig) -> BridgeResult<()>;
}

/// Spawning, killing and observing the controlled process.
#[async_trait]
pub(crate) trait ProcessControl: Send + Sync {
    async fn start_service(&self, config_path: &str) -> BridgeResult<()>;
    async fn stop_service(&self) -> BridgeResult<()>;
    async fn get_service_status(&self) -> BridgeResult<bool>;
    async fn get_version(&self) -> BridgeResult<String>;
}

/// Hands a file to the desktop's default application.
#[async_trait]
pub(crate) trait FileOpener: Send + Sync {
    async fn open(&self, path: &str) -> BridgeResult<()>;
}
