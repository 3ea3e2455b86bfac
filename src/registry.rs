//! Profile registry and the single active pointer.
//!
//! The storage collaborator is the source of truth; nothing here is cached across calls.

use crate::bridge::{ConfigStore, FileOpener};
use crate::error::{CoreError, Result};
use crate::lifecycle::LifecycleController;
use crate::model::ConfigProfile;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) struct ConfigRegistry {
    store: Arc<dyn ConfigStore>,
    opener: Arc<dyn FileOpener>,
    lifecycle: Arc<LifecycleController>,
    last_id: AtomicU64,
}

impl ConfigRegistry {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        opener: Arc<dyn FileOpener>,
        lifecycle: Arc<LifecycleController>,
    ) -> Self {
        Self {
            store,
            opener,
            lifecycle,
            last_id: AtomicU64::new(0),
        }
    }

    pub async fn list(&self) -> Result<Vec<ConfigProfile>> {
        self.store
            .list_configs()
            .await
            .map_err(CoreError::transport("listConfigs"))
    }

    /// Validate, then persist metadata and content. The active pointer is not touched.
    /// Returns the profile as storage recorded it.
    pub async fn create(&self, name: &str, content: &str) -> Result<ConfigProfile> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation("profile name must not be empty".into()));
        }
        serde_json::from_str::<serde_json::Value>(content)
            .map_err(|e| CoreError::Validation(format!("profile content is not valid JSON: {e}")))?;

        let id = self.next_id().to_string();
        let profile = ConfigProfile {
            id: id.clone(),
            name: name.to_string(),
            path: format!("{id}.json"),
        };

        self.store
            .save_config(&profile)
            .await
            .map_err(CoreError::transport("saveConfig"))?;

        if let Err(source) = self.store.write_config_file(&profile.path, content).await {
            log::warn!("[registry] content write for {id} failed, rolling back metadata");
            if let Err(error) = self.store.remove_config(&id).await {
                log::warn!("[registry] rollback of {id} failed: {error}");
            }
            return Err(CoreError::Transport {
                op: "writeConfigFile",
                source,
            });
        }

        log::info!("[registry] created profile {name} ({id})");
        match self.list().await {
            Ok(profiles) => Ok(profiles
                .into_iter()
                .find(|p| p.id == id)
                .unwrap_or(profile)),
            Err(error) => {
                log::warn!("[registry] could not re-read {id} after creating it: {error}");
                Ok(profile)
            }
        }
    }

    /// `None` clears the pointer. Refused while the process is running or mid-command.
    pub async fn activate(&self, id: Option<&str>) -> Result<()> {
        self.ensure_stopped().await?;

        let current = self.active().await?;
        if current.as_ref().map(|p| p.id.as_str()) == id {
            log::debug!("[registry] {:?} already active", id);
            return Ok(());
        }

        self.store
            .set_active_config(id)
            .await
            .map_err(CoreError::transport("setActiveConfig"))?;
        log::info!("[registry] active profile -> {:?}", id);
        Ok(())
    }

    /// Delete a profile. If it was active, the pointer is verified cleared afterwards.
    /// Removing the active profile changes the pointer, so it is refused while running.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let pointer = self
            .store
            .get_active_config()
            .await
            .map_err(CoreError::transport("getActiveConfig"))?;
        if pointer.is_some_and(|p| p.id == id) {
            self.ensure_stopped().await?;
        }

        self.store
            .remove_config(id)
            .await
            .map_err(CoreError::transport("removeConfig"))?;

        let pointer = self
            .store
            .get_active_config()
            .await
            .map_err(CoreError::transport("getActiveConfig"))?;
        if pointer.as_ref().is_some_and(|p| p.id == id) {
            log::warn!("[registry] storage kept removed profile {id} active, clearing it");
            self.store
                .set_active_config(None)
                .await
                .map_err(CoreError::transport("setActiveConfig"))?;
        }
        log::info!("[registry] removed profile {id}");
        Ok(())
    }

    /// Active profile, with a dangling pointer reported as none.
    pub async fn active(&self) -> Result<Option<ConfigProfile>> {
        let Some(pointer) = self
            .store
            .get_active_config()
            .await
            .map_err(CoreError::transport("getActiveConfig"))?
        else {
            return Ok(None);
        };
        let profiles = self.list().await?;
        Ok(profiles.into_iter().find(|p| p.id == pointer.id))
    }

    pub async fn find(&self, id: &str) -> Result<ConfigProfile> {
        self.list()
            .await?
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| CoreError::Validation(format!("unknown profile: {id}")))
    }

    /// Not retried on failure.
    pub async fn open_externally(&self, path: &str) -> Result<()> {
        self.opener
            .open(path)
            .await
            .map_err(CoreError::transport("openExternally"))
    }

    /// Pointer changes need a stopped process. The belief may be stale (another session
    /// can own the process), so it is re-read unless a command is in flight.
    async fn ensure_stopped(&self) -> Result<()> {
        let running = if self.lifecycle.status().is_busy() {
            true
        } else {
            self.lifecycle.poll_status().await?.is_running()
        };
        if running {
            return Err(CoreError::Conflict(format!(
                "service {}; stop it before switching profiles",
                self.lifecycle.status().label()
            )));
        }
        Ok(())
    }

    fn next_id(&self) -> u64 {
        let now = (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64;
        let mut last = self.last_id.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self
                .last_id
                .compare_exchange(last, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::fake::FakeBridge;
    use crate::model::ServiceStatus;

    struct Fixture {
        bridge: Arc<FakeBridge>,
        lifecycle: Arc<LifecycleController>,
        registry: ConfigRegistry,
    }

    fn fixture() -> Fixture {
        let bridge = Arc::new(FakeBridge::new());
        let lifecycle = Arc::new(LifecycleController::new(bridge.clone()));
        let registry = ConfigRegistry::new(bridge.clone(), bridge.clone(), lifecycle.clone());
        Fixture {
            bridge,
            lifecycle,
            registry,
        }
    }

    #[tokio::test]
    async fn empty_name_is_rejected_before_any_storage_call() {
        let f = fixture();
        for name in ["", "   "] {
            let err = f.registry.create(name, "{}").await.unwrap_err();
            assert!(matches!(err, CoreError::Validation(_)));
        }
        assert!(f.bridge.calls().is_empty());
    }

    #[tokio::test]
    async fn bad_json_is_rejected_before_persistence() {
        let f = fixture();
        f.bridge.seed("1", "A", "{}");
        for content in ["", "{", "not json", r#"{"a":}"#] {
            let err = f.registry.create("B", content).await.unwrap_err();
            assert!(matches!(err, CoreError::Validation(_)), "{content}");
        }
        assert!(f.bridge.calls().is_empty());
        assert_eq!(f.registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_persists_metadata_then_content() {
        let f = fixture();
        let created = f.registry.create(" Home ", r#"{"log":{}}"#).await.unwrap();
        assert_eq!(created.name, "Home");
        assert_eq!(created.path, format!("/configs/{}.json", created.id));
        assert_eq!(
            f.bridge.calls(),
            vec!["saveConfig", "writeConfigFile", "listConfigs"]
        );

        let listed = f.registry.list().await.unwrap();
        assert_eq!(listed, vec![created.clone()]);
        assert_eq!(
            f.bridge.lock().contents.get(&created.path).map(String::as_str),
            Some(r#"{"log":{}}"#)
        );
        assert!(f.bridge.lock().active.is_none());
    }

    #[tokio::test]
    async fn ids_are_unique_within_a_millisecond() {
        let f = fixture();
        let a = f.registry.create("a", "{}").await.unwrap();
        let b = f.registry.create("b", "{}").await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(b.id.parse::<u64>().unwrap() > a.id.parse::<u64>().unwrap());
    }

    #[tokio::test]
    async fn failed_content_write_rolls_back_metadata() {
        let f = fixture();
        f.bridge.fail("writeConfigFile");
        let err = f.registry.create("a", "{}").await.unwrap_err();
        assert!(matches!(err, CoreError::Transport { op: "writeConfigFile", .. }));
        assert!(f.bridge.lock().configs.is_empty());
    }

    #[tokio::test]
    async fn activate_while_running_is_a_conflict() {
        let f = fixture();
        let a = f.bridge.seed("1", "A", "{}");
        f.bridge.seed("2", "B", "{}");
        f.registry.activate(Some("1")).await.unwrap();
        f.lifecycle.start(Some(&a)).await.unwrap();

        let err = f.registry.activate(Some("2")).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert_eq!(f.bridge.lock().active.as_deref(), Some("1"));

        let err = f.registry.activate(None).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn reactivating_active_profile_is_a_noop() {
        let f = fixture();
        f.bridge.seed("1", "A", "{}");
        f.registry.activate(Some("1")).await.unwrap();
        f.bridge.clear_calls();
        f.registry.activate(Some("1")).await.unwrap();
        assert!(!f.bridge.calls().iter().any(|c| c == "setActiveConfig"));
    }

    #[tokio::test]
    async fn removing_active_profile_clears_pointer() {
        let f = fixture();
        f.bridge.seed("1", "A", "{}");
        f.registry.activate(Some("1")).await.unwrap();
        f.registry.remove("1").await.unwrap();
        assert!(f.registry.active().await.unwrap().is_none());
        assert!(f.bridge.lock().active.is_none());
    }

    #[tokio::test]
    async fn removal_clears_pointer_the_storage_left_behind() {
        let f = fixture();
        f.bridge.seed("1", "A", "{}");
        f.bridge.lock().keep_active_on_remove = true;
        f.registry.activate(Some("1")).await.unwrap();

        f.registry.remove("1").await.unwrap();
        assert!(f.bridge.lock().active.is_none());
        assert!(f.bridge.calls().iter().filter(|c| *c == "setActiveConfig").count() == 2);
    }

    #[tokio::test]
    async fn dangling_pointer_reads_as_no_active_profile() {
        let f = fixture();
        f.bridge.lock().active = Some("ghost".into());
        assert!(f.registry.active().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_failure_is_reported_once() {
        let f = fixture();
        f.bridge.fail("open");
        assert!(f.registry.open_externally("/configs/1.json").await.is_err());
        assert_eq!(f.bridge.calls(), vec!["open"]);
    }

    #[tokio::test]
    async fn activate_start_conflict_scenario() {
        let f = fixture();
        f.bridge.seed("1", "A", "{}");
        f.bridge.seed("2", "B", "{}");
        assert!(f.registry.active().await.unwrap().is_none());

        f.registry.activate(Some("1")).await.unwrap();
        assert_eq!(f.registry.active().await.unwrap().unwrap().id, "1");

        let err = f.lifecycle.start(None).await.unwrap_err();
        assert!(matches!(err, CoreError::Precondition(_)));

        let active = f.registry.active().await.unwrap();
        f.lifecycle.start(active.as_ref()).await.unwrap();
        assert!(f.lifecycle.status().is_running());

        let err = f.registry.activate(Some("2")).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn activation_rechecks_the_process_instead_of_trusting_belief() {
        let f = fixture();
        f.bridge.seed("1", "A", "{}");
        // Started elsewhere: this controller still believes it is stopped.
        f.bridge.set_running(true);
        assert_eq!(f.lifecycle.status().observed, ServiceStatus::Stopped);

        let err = f.registry.activate(Some("1")).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert!(f.bridge.lock().active.is_none());
        assert!(f.lifecycle.status().confirmed);

        f.bridge.set_running(false);
        f.registry.activate(Some("1")).await.unwrap();
    }

    #[tokio::test]
    async fn status_read_failure_blocks_activation() {
        let f = fixture();
        f.bridge.seed("1", "A", "{}");
        f.bridge.fail("getServiceStatus");
        let err = f.registry.activate(Some("1")).await.unwrap_err();
        assert!(matches!(err, CoreError::Transport { op: "getServiceStatus", .. }));
        assert!(f.bridge.lock().active.is_none());
    }

    #[tokio::test]
    async fn only_the_active_profile_is_pinned_while_running() {
        let f = fixture();
        let a = f.bridge.seed("1", "A", "{}");
        f.bridge.seed("2", "B", "{}");
        f.registry.activate(Some("1")).await.unwrap();
        f.lifecycle.start(Some(&a)).await.unwrap();

        let err = f.registry.remove("1").await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert_eq!(f.bridge.lock().active.as_deref(), Some("1"));

        f.registry.remove("2").await.unwrap();
        assert_eq!(f.registry.list().await.unwrap(), vec![a]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn another_session_running_the_service_blocks_pointer_changes() {
        use crate::bridge::local::install_sleeping_singbox;
        use crate::bridge::LocalBridge;

        let tmp = tempfile::tempdir().unwrap();
        let opener = Arc::new(FakeBridge::new());
        let session = |bridge: &Arc<LocalBridge>| {
            let lifecycle = Arc::new(LifecycleController::new(bridge.clone()));
            let registry = ConfigRegistry::new(bridge.clone(), opener.clone(), lifecycle.clone());
            (lifecycle, registry)
        };

        let console = Arc::new(LocalBridge::open(tmp.path().to_path_buf()).unwrap());
        install_sleeping_singbox(&console).await;
        let (console_lifecycle, console_registry) = session(&console);
        let a = console_registry.create("A", "{}").await.unwrap();
        let b = console_registry.create("B", "{}").await.unwrap();
        assert_eq!(console_registry.list().await.unwrap(), vec![a.clone(), b.clone()]);
        console_registry.activate(Some(&a.id)).await.unwrap();
        console_lifecycle.start(Some(&a)).await.unwrap();

        let one_shot = Arc::new(LocalBridge::open(tmp.path().to_path_buf()).unwrap());
        let (_, one_shot_registry) = session(&one_shot);
        let err = one_shot_registry.activate(Some(&b.id)).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)), "{err}");
        let err = one_shot_registry.remove(&a.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)), "{err}");
        assert_eq!(
            one_shot_registry.active().await.unwrap().map(|p| p.id),
            Some(a.id.clone())
        );

        console_lifecycle.stop().await.unwrap();
        one_shot_registry.activate(Some(&b.id)).await.unwrap();
        assert_eq!(
            console_registry.active().await.unwrap().map(|p| p.id),
            Some(b.id)
        );
    }
}
