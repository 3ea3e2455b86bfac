//! On-disk profile registry and child-process control.
//!
//! Layout under the app data directory:
//! - `app_config.json`: [`AppConfig`]
//! - `configs.json`: profile metadata and the active pointer
//! - `<config_dir>/<id>.json`: profile content
//! - `state.lock`: advisory lock taken around every read-modify-write of the files above
//! - `service.lock`: held by the instance that owns the running sing-box, holds its pid
//!
//! A console and one-shot commands may share the directory, so nothing is kept in memory:
//! every call re-reads the files under the lock.

use super::{ConfigStore, ProcessControl};
use crate::error::{BridgeError, BridgeResult};
use crate::model::{AppConfig, ConfigProfile};
use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

const APP_DIR_NAME: &str = "singbox-manager";
const APP_CONFIG_FILENAME: &str = "app_config.json";
const CONFIGS_STATE_FILENAME: &str = "configs.json";
const STATE_LOCK_FILENAME: &str = "state.lock";
const SERVICE_LOCK_FILENAME: &str = "service.lock";

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryState {
    #[serde(default)]
    configs: Vec<ConfigProfile>,
    #[serde(default)]
    active_config_id: Option<String>,
}

impl RegistryState {
    fn active(&self) -> Option<&ConfigProfile> {
        let id = self.active_config_id.as_deref()?;
        self.configs.iter().find(|c| c.id == id)
    }
}

/// A sing-box child plus the lease that makes it visible to other instances.
struct OwnedService {
    child: Child,
    /// Locked for as long as the child is tracked. Dropping it releases the lease.
    _lease: File,
}

pub(crate) struct LocalBridge {
    root: PathBuf,
    service: Mutex<Option<OwnedService>>,
}

impl LocalBridge {
    pub fn default_root() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME)
    }

    /// Open (creating if needed) the data directory at `root`.
    pub fn open(root: PathBuf) -> BridgeResult<Self> {
        std::fs::create_dir_all(&root)?;
        let state = {
            let _lock = lock_state(&root)?;
            read_state(&root)?
        };
        log::info!(
            "[bridge] {} profiles in {}",
            state.configs.len(),
            root.display()
        );
        Ok(Self {
            root,
            service: Mutex::new(None),
        })
    }

    /// Run file work on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> BridgeResult<T>
    where
        F: FnOnce(&Path) -> BridgeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || f(&root))
            .await
            .map_err(|e| BridgeError::Command(format!("storage task failed: {e}")))?
    }

    /// `configs.json` as it is on disk right now.
    async fn current_state(&self) -> BridgeResult<RegistryState> {
        self.blocking(|root| {
            let _lock = lock_state(root)?;
            read_state(root)
        })
        .await
    }

    /// Locked read-modify-write of `configs.json`. Nothing is written when `f` fails.
    async fn update_state<T, F>(&self, f: F) -> BridgeResult<T>
    where
        F: FnOnce(&Path, &mut RegistryState) -> BridgeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.blocking(move |root| {
            let _lock = lock_state(root)?;
            let mut state = read_state(root)?;
            let out = f(root, &mut state)?;
            write_state(root, &state)?;
            Ok(out)
        })
        .await
    }

    /// Map `path` into `config_dir`. Foreign absolute paths keep only their file name.
    fn resolve_in_config_dir(config_dir: &Path, path: &str) -> BridgeResult<PathBuf> {
        let candidate = PathBuf::from(path);
        if candidate.is_absolute() {
            if candidate.starts_with(config_dir) {
                return Ok(candidate);
            }
            let file_name = candidate
                .file_name()
                .ok_or_else(|| BridgeError::Command(format!("invalid file name: {path}")))?;
            return Ok(config_dir.join(file_name));
        }
        if candidate
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(BridgeError::Command(format!(
                "path escapes the config directory: {path}"
            )));
        }
        Ok(config_dir.join(candidate))
    }
}

fn open_lock_file(path: &Path) -> BridgeResult<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

/// Block until this instance holds the data-directory lock. Released when the file drops.
fn lock_state(root: &Path) -> BridgeResult<File> {
    let lock = open_lock_file(&root.join(STATE_LOCK_FILENAME))?;
    lock.lock_exclusive()?;
    Ok(lock)
}

fn read_state(root: &Path) -> BridgeResult<RegistryState> {
    let path = root.join(CONFIGS_STATE_FILENAME);
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(serde_json::from_str(&content).unwrap_or_else(|error| {
            log::warn!(
                "[bridge] failed to parse {}: {error}, treating it as empty",
                path.display()
            );
            RegistryState::default()
        })),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            Ok(RegistryState::default())
        }
        Err(error) => Err(error.into()),
    }
}

fn write_state(root: &Path, state: &RegistryState) -> BridgeResult<()> {
    let content = serde_json::to_string_pretty(state)?;
    std::fs::write(root.join(CONFIGS_STATE_FILENAME), content)?;
    Ok(())
}

fn default_app_config(root: &Path) -> AppConfig {
    AppConfig {
        config_dir: root.join("configs").to_string_lossy().into_owned(),
        singbox_path: "sing-box".into(),
    }
}

/// Caller holds the state lock; a missing file is created with defaults.
fn load_app_config(root: &Path) -> BridgeResult<AppConfig> {
    let path = root.join(APP_CONFIG_FILENAME);
    if !path.exists() {
        log::info!("[bridge] no app config at {}, writing defaults", path.display());
        let config = default_app_config(root);
        std::fs::write(&path, serde_json::to_string_pretty(&config)?)?;
        return Ok(config);
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content).unwrap_or_else(|error| {
        log::warn!("[bridge] failed to parse {}: {error}", path.display());
        default_app_config(root)
    }))
}

fn locked_app_config(root: &Path) -> BridgeResult<AppConfig> {
    let _lock = lock_state(root)?;
    load_app_config(root)
}

fn is_contended(error: &std::io::Error) -> bool {
    error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Take the service lease for this process. Fails if another instance holds it.
fn acquire_lease(root: &Path) -> BridgeResult<File> {
    let mut lease = open_lock_file(&root.join(SERVICE_LOCK_FILENAME))?;
    if let Err(error) = lease.try_lock_exclusive() {
        if is_contended(&error) {
            return Err(owned_elsewhere(&lease_owner(root)));
        }
        return Err(error.into());
    }
    lease.set_len(0)?;
    write!(lease, "{}", std::process::id())?;
    lease.flush()?;
    Ok(lease)
}

/// Pid of the instance holding the lease, or `None` when nobody does.
fn lease_held_elsewhere(root: &Path) -> BridgeResult<Option<String>> {
    let lease = open_lock_file(&root.join(SERVICE_LOCK_FILENAME))?;
    match lease.try_lock_exclusive() {
        // Closing the probe handle releases the lock again.
        Ok(()) => Ok(None),
        Err(error) if is_contended(&error) => Ok(Some(lease_owner(root))),
        Err(error) => Err(error.into()),
    }
}

fn lease_owner(root: &Path) -> String {
    std::fs::read_to_string(root.join(SERVICE_LOCK_FILENAME))
        .map(|pid| pid.trim().to_string())
        .ok()
        .filter(|pid| !pid.is_empty())
        .unwrap_or_else(|| "unknown".into())
}

fn owned_elsewhere(pid: &str) -> BridgeError {
    BridgeError::Command(format!(
        "service is running in another session (pid {pid}); stop it there"
    ))
}

#[async_trait]
impl ConfigStore for LocalBridge {
    async fn list_configs(&self) -> BridgeResult<Vec<ConfigProfile>> {
        Ok(self.current_state().await?.configs)
    }

    async fn save_config(&self, profile: &ConfigProfile) -> BridgeResult<()> {
        let profile = profile.clone();
        self.update_state(move |root, state| {
            let config_dir = PathBuf::from(load_app_config(root)?.config_dir);
            std::fs::create_dir_all(&config_dir)?;
            let full_path = LocalBridge::resolve_in_config_dir(&config_dir, &profile.path)?;
            if state.configs.iter().any(|c| c.id == profile.id) {
                return Err(BridgeError::Command(format!(
                    "profile {} already exists",
                    profile.id
                )));
            }
            let stored = ConfigProfile {
                path: full_path.to_string_lossy().into_owned(),
                ..profile
            };
            log::info!("[bridge] saving profile {:?}", stored);
            state.configs.push(stored);
            Ok(())
        })
        .await
    }

    async fn write_config_file(&self, path: &str, content: &str) -> BridgeResult<()> {
        let (path, content) = (path.to_string(), content.to_string());
        self.blocking(move |root| {
            let config_dir = PathBuf::from(locked_app_config(root)?.config_dir);
            let full_path = LocalBridge::resolve_in_config_dir(&config_dir, &path)?;
            log::info!("[bridge] writing profile content to {}", full_path.display());
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full_path, content)?;
            Ok(())
        })
        .await
    }

    async fn set_active_config(&self, id: Option<&str>) -> BridgeResult<()> {
        let id = id.map(str::to_string);
        self.update_state(move |_, state| {
            if let Some(id) = id.as_deref() {
                if !state.configs.iter().any(|c| c.id == id) {
                    return Err(BridgeError::Command(format!("unknown profile: {id}")));
                }
            }
            log::info!("[bridge] active profile -> {:?}", id);
            state.active_config_id = id;
            Ok(())
        })
        .await
    }

    async fn remove_config(&self, id: &str) -> BridgeResult<()> {
        let target = id.to_string();
        let removed = self
            .update_state(move |_, state| {
                let Some(index) = state.configs.iter().position(|c| c.id == target) else {
                    return Err(BridgeError::Command(format!("unknown profile: {target}")));
                };
                if state.active_config_id.as_deref() == Some(target.as_str()) {
                    state.active_config_id = None;
                }
                Ok(state.configs.remove(index))
            })
            .await?;

        if let Err(error) = tokio::fs::remove_file(&removed.path).await {
            if error.kind() != std::io::ErrorKind::NotFound {
                log::warn!("[bridge] failed to delete {}: {error}", removed.path);
            }
        }
        log::info!("[bridge] removed profile {id}");
        Ok(())
    }

    async fn get_active_config(&self) -> BridgeResult<Option<ConfigProfile>> {
        Ok(self.current_state().await?.active().cloned())
    }

    async fn get_active_config_content(&self) -> BridgeResult<String> {
        let path = self
            .current_state()
            .await?
            .active()
            .map(|c| c.path.clone())
            .ok_or_else(|| BridgeError::Command("no active profile".into()))?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| BridgeError::Command(format!("failed to read {path}: {e}")))
    }

    async fn get_app_config(&self) -> BridgeResult<AppConfig> {
        self.blocking(locked_app_config).await
    }

    async fn update_app_config(&self, config: &AppConfig) -> BridgeResult<()> {
        let config = config.clone();
        self.blocking(move |root| {
            let _lock = lock_state(root)?;
            let current = load_app_config(root)?;
            // Empty fields mean "keep what is there".
            let merged = AppConfig {
                config_dir: if config.config_dir.is_empty() {
                    current.config_dir
                } else {
                    config.config_dir
                },
                singbox_path: if config.singbox_path.is_empty() {
                    current.singbox_path
                } else {
                    config.singbox_path
                },
            };
            log::info!("[bridge] updating app config: {:?}", merged);
            std::fs::write(
                root.join(APP_CONFIG_FILENAME),
                serde_json::to_string_pretty(&merged)?,
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ProcessControl for LocalBridge {
    async fn start_service(&self, config_path: &str) -> BridgeResult<()> {
        let mut service = self.service.lock().await;
        if let Some(owned) = service.as_mut() {
            if owned.child.try_wait()?.is_none() {
                return Err(BridgeError::Command("service is already running".into()));
            }
            *service = None;
        }

        if !tokio::fs::try_exists(config_path).await? {
            return Err(BridgeError::Command(format!(
                "config file '{config_path}' not found"
            )));
        }

        let (singbox_path, lease) = self
            .blocking(|root| {
                let lease = acquire_lease(root)?;
                Ok((locked_app_config(root)?.singbox_path, lease))
            })
            .await?;
        log::info!("[bridge] spawning {singbox_path} run -c {config_path}");
        let child = Command::new(&singbox_path)
            .args(["run", "-c", config_path])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::Command(format!("failed to start service: {e}")))?;
        *service = Some(OwnedService {
            child,
            _lease: lease,
        });
        Ok(())
    }

    async fn stop_service(&self) -> BridgeResult<()> {
        let mut service = self.service.lock().await;
        let tracked = service.take();
        let Some(mut owned) = tracked else {
            drop(service);
            return match self.blocking(lease_held_elsewhere).await? {
                Some(pid) => Err(owned_elsewhere(&pid)),
                None => Err(BridgeError::Command("service is not running".into())),
            };
        };
        if let Err(error) = owned.child.kill().await {
            // Put it back: we do not know whether it is still alive.
            *service = Some(owned);
            return Err(BridgeError::Command(format!(
                "failed to stop service: {error}"
            )));
        }
        log::info!("[bridge] service stopped");
        Ok(())
    }

    /// True while this instance's child lives or another instance holds the service lease.
    async fn get_service_status(&self) -> BridgeResult<bool> {
        let mut service = self.service.lock().await;
        if let Some(owned) = service.as_mut() {
            match owned.child.try_wait()? {
                None => return Ok(true),
                Some(status) => {
                    log::warn!("[bridge] service exited on its own: {status}");
                    *service = None;
                }
            }
        }
        drop(service);

        let owner = self.blocking(lease_held_elsewhere).await?;
        if let Some(pid) = &owner {
            log::debug!("[bridge] service owned by another session (pid {pid})");
        }
        Ok(owner.is_some())
    }

    async fn get_version(&self) -> BridgeResult<String> {
        let singbox_path = self.blocking(locked_app_config).await?.singbox_path;
        let output = Command::new(&singbox_path)
            .arg("version")
            .output()
            .await
            .map_err(|e| BridgeError::Command(format!("failed to execute {singbox_path} version: {e}")))?;
        let text = String::from_utf8_lossy(&output.stdout);
        parse_version(&text).ok_or_else(|| {
            BridgeError::Command(format!("no version in output of {singbox_path} version"))
        })
    }
}

/// Extract `X.Y.Z` following the word `version`.
fn parse_version(text: &str) -> Option<String> {
    let mut words = text.split_whitespace();
    while let Some(word) = words.next() {
        if word != "version" {
            continue;
        }
        let candidate = words.next()?;
        let parts: Vec<&str> = candidate.splitn(3, '.').collect();
        if parts.len() != 3 {
            continue;
        }
        let patch: String = parts[2].chars().take_while(|c| c.is_ascii_digit()).collect();
        let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
        if numeric(parts[0]) && numeric(parts[1]) && numeric(&patch) {
            return Some(format!("{}.{}.{}", parts[0], parts[1], patch));
        }
    }
    None
}

/// Point the app config at a stand-in sing-box that only sleeps.
#[cfg(all(test, unix))]
pub(crate) async fn install_sleeping_singbox(bridge: &LocalBridge) {
    use std::os::unix::fs::PermissionsExt;
    let script = bridge.root.join("fake-sing-box");
    std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    bridge
        .update_app_config(&AppConfig {
            config_dir: String::new(),
            singbox_path: script.to_string_lossy().into_owned(),
        })
        .await
        .unwrap();
}
