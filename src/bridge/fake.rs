//! In-memory bridge for unit tests: records calls, injects failures.

use super::{ConfigStore, FileOpener, ProcessControl};
use crate::error::{BridgeError, BridgeResult};
use crate::model::{AppConfig, ConfigProfile};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

pub(crate) struct FakeState {
    pub configs: Vec<ConfigProfile>,
    pub active: Option<String>,
    pub contents: HashMap<String, String>,
    pub running: bool,
    pub app: AppConfig,
    pub calls: Vec<String>,
    pub failing: HashSet<&'static str>,
    /// Simulate a collaborator that does not clear the pointer on removal.
    pub keep_active_on_remove: bool,
}

pub(crate) struct FakeBridge {
    state: Mutex<FakeState>,
}

impl FakeBridge {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                configs: Vec::new(),
                active: None,
                contents: HashMap::new(),
                running: false,
                app: AppConfig {
                    config_dir: "/configs".into(),
                    singbox_path: "sing-box".into(),
                },
                calls: Vec::new(),
                failing: HashSet::new(),
                keep_active_on_remove: false,
            }),
        }
    }

    /// Seed a profile (with content) without recording a call.
    pub fn seed(&self, id: &str, name: &str, content: &str) -> ConfigProfile {
        let profile = ConfigProfile {
            id: id.into(),
            name: name.into(),
            path: format!("/configs/{id}.json"),
        };
        let mut state = self.lock();
        state.contents.insert(profile.path.clone(), content.into());
        state.configs.push(profile.clone());
        profile
    }

    pub fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn fail(&self, op: &'static str) {
        self.lock().failing.insert(op);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn set_running(&self, running: bool) {
        self.lock().running = running;
    }

    fn record(&self, op: &'static str) -> BridgeResult<MutexGuard<'_, FakeState>> {
        let mut state = self.lock();
        state.calls.push(op.to_string());
        if state.failing.contains(op) {
            return Err(BridgeError::Command(format!("{op} injected failure")));
        }
        Ok(state)
    }
}

/// Relative paths land under `/configs`, as the local bridge roots them in `config_dir`.
fn stored_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/configs/{path}")
    }
}

#[async_trait]
impl ConfigStore for FakeBridge {
    async fn list_configs(&self) -> BridgeResult<Vec<ConfigProfile>> {
        Ok(self.record("listConfigs")?.configs.clone())
    }

    async fn save_config(&self, profile: &ConfigProfile) -> BridgeResult<()> {
        self.record("saveConfig")?.configs.push(ConfigProfile {
            path: stored_path(&profile.path),
            ..profile.clone()
        });
        Ok(())
    }

    async fn write_config_file(&self, path: &str, content: &str) -> BridgeResult<()> {
        self.record("writeConfigFile")?
            .contents
            .insert(stored_path(path), content.into());
        Ok(())
    }

    async fn set_active_config(&self, id: Option<&str>) -> BridgeResult<()> {
        self.record("setActiveConfig")?.active = id.map(str::to_string);
        Ok(())
    }

    async fn remove_config(&self, id: &str) -> BridgeResult<()> {
        let mut state = self.record("removeConfig")?;
        state.configs.retain(|c| c.id != id);
        if !state.keep_active_on_remove && state.active.as_deref() == Some(id) {
            state.active = None;
        }
        Ok(())
    }

    async fn get_active_config(&self) -> BridgeResult<Option<ConfigProfile>> {
        let state = self.record("getActiveConfig")?;
        // A dangling pointer is reported as-is; the registry has to notice.
        Ok(state.active.as_ref().map(|id| {
            state
                .configs
                .iter()
                .find(|c| &c.id == id)
                .cloned()
                .unwrap_or_else(|| ConfigProfile {
                    id: id.clone(),
                    name: String::new(),
                    path: String::new(),
                })
        }))
    }

    async fn get_active_config_content(&self) -> BridgeResult<String> {
        let state = self.record("getActiveConfigContent")?;
        let active = state
            .active
            .as_ref()
            .and_then(|id| state.configs.iter().find(|c| &c.id == id))
            .ok_or_else(|| BridgeError::Command("no active profile".into()))?;
        state
            .contents
            .get(&active.path)
            .cloned()
            .ok_or_else(|| BridgeError::Command("content missing".into()))
    }

    async fn get_app_config(&self) -> BridgeResult<AppConfig> {
        Ok(self.record("getAppConfig")?.app.clone())
    }

    async fn update_app_config(&self, config: &AppConfig) -> BridgeResult<()> {
        self.record("updateAppConfig")?.app = config.clone();
        Ok(())
    }
}

#[async_trait]
impl ProcessControl for FakeBridge {
    async fn start_service(&self, _config_path: &str) -> BridgeResult<()> {
        let mut state = self.record("startService")?;
        if state.running {
            return Err(BridgeError::Command("service is already running".into()));
        }
        state.running = true;
        Ok(())
    }

    async fn stop_service(&self) -> BridgeResult<()> {
        let mut state = self.record("stopService")?;
        if !state.running {
            return Err(BridgeError::Command("service is not running".into()));
        }
        state.running = false;
        Ok(())
    }

    async fn get_service_status(&self) -> BridgeResult<bool> {
        Ok(self.record("getServiceStatus")?.running)
    }

    async fn get_version(&self) -> BridgeResult<String> {
        self.record("getVersion")?;
        Ok("1.8.4".into())
    }
}

#[async_trait]
impl FileOpener for FakeBridge {
    async fn open(&self, _path: &str) -> BridgeResult<()> {
        self.record("open")?;
        Ok(())
    }
}
