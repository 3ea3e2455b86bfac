//! Facade over registry, lifecycle and topology.
//!
//! Foreground actions always end in exactly one notification (success or error) and
//! return the outcome. Background polls only log.

use crate::bridge::{ConfigStore, FileOpener, ProcessControl};
use crate::error::{CoreError, Result};
use crate::lifecycle::{LifecycleController, StatusSnapshot, StatusView};
use crate::model::{
    AppConfig, ConfigProfile, LatencyResult, PollSettings, ProbeSettings, ProxyGroup,
};
use crate::notify::{Notification, NotificationSink};
use crate::registry::ConfigRegistry;
use crate::scheduler::{spawn_recurring, RecurringTask};
use crate::topology::TopologyClient;
use std::sync::Arc;

pub(crate) struct Manager {
    store: Arc<dyn ConfigStore>,
    registry: ConfigRegistry,
    lifecycle: Arc<LifecycleController>,
    topology: TopologyClient,
    sink: Arc<dyn NotificationSink>,
}

/// Handles to the two background polls. They are independent and never coalesced.
pub(crate) struct Polls {
    status: RecurringTask,
    topology: RecurringTask,
}

impl Polls {
    /// Stop rescheduling; in-flight runs finish first.
    pub async fn cancel(self) {
        log::debug!(
            "[console] cancelling {} and {}",
            self.status.name(),
            self.topology.name()
        );
        futures::future::join(self.status.cancel(), self.topology.cancel()).await;
    }
}

impl Manager {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        process: Arc<dyn ProcessControl>,
        opener: Arc<dyn FileOpener>,
        http: reqwest::Client,
        probe: ProbeSettings,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let lifecycle = Arc::new(LifecycleController::new(process));
        let registry = ConfigRegistry::new(store.clone(), opener, lifecycle.clone());
        let topology = TopologyClient::new(store.clone(), http, probe, sink.clone());
        Self {
            store,
            registry,
            lifecycle,
            topology,
            sink,
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        self.lifecycle.status()
    }

    pub fn subscribe(&self) -> StatusView {
        self.lifecycle.subscribe()
    }

    fn report<T>(
        &self,
        outcome: Result<T>,
        ok: impl FnOnce(&T) -> Notification,
        failed: &str,
    ) -> Result<T> {
        match &outcome {
            Ok(value) => self.sink.notify(ok(value)),
            Err(e) => self.sink.notify(Notification::error(failed, e.to_string())),
        }
        outcome
    }

    /// All profiles plus the active id, if any.
    pub async fn profiles(&self) -> Result<(Vec<ConfigProfile>, Option<String>)> {
        let outcome = async {
            let profiles = self.registry.list().await?;
            let active = self.registry.active().await?.map(|p| p.id);
            Ok::<_, CoreError>((profiles, active))
        }
        .await;
        if let Err(e) = &outcome {
            self.sink
                .notify(Notification::error("Listing failed", e.to_string()));
        }
        outcome
    }

    pub async fn add(&self, name: &str, content: &str) -> Result<ConfigProfile> {
        let outcome = self.registry.create(name, content).await;
        self.report(
            outcome,
            |p| Notification::success("Profile added", format!("{} ({})", p.name, p.id)),
            "Add failed",
        )
    }

    /// `None` clears the active pointer.
    pub async fn activate(&self, id: Option<&str>) -> Result<()> {
        let outcome = async {
            if let Some(id) = id {
                self.registry.find(id).await?;
            }
            self.registry.activate(id).await
        }
        .await;
        if outcome.is_ok() {
            self.topology.reset();
        }
        self.report(
            outcome,
            |_| match id {
                Some(id) => Notification::success("Profile activated", id.to_string()),
                None => Notification::success("Profile deactivated", "no active profile"),
            },
            "Activate failed",
        )
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let outcome = async {
            let was_active = self.registry.active().await?.is_some_and(|p| p.id == id);
            self.registry.find(id).await?;
            self.registry.remove(id).await?;
            Ok::<_, CoreError>(was_active)
        }
        .await;
        if let Ok(true) = outcome {
            self.topology.reset();
        }
        self.report(
            outcome.map(|_| ()),
            |_| Notification::success("Profile removed", id.to_string()),
            "Remove failed",
        )
    }

    /// Hand the profile's file to the system editor.
    pub async fn edit(&self, id: &str) -> Result<()> {
        let outcome = async {
            let profile = self.registry.find(id).await?;
            self.registry.open_externally(&profile.path).await?;
            Ok::<_, CoreError>(profile)
        }
        .await;
        self.report(
            outcome.map(|_| ()),
            |_| Notification::success("Opened", id.to_string()),
            "Edit failed",
        )
    }

    pub async fn start(&self) -> Result<()> {
        let outcome = async {
            let active = self.registry.active().await?;
            self.lifecycle.start(active.as_ref()).await?;
            Ok::<_, CoreError>(active)
        }
        .await;
        if outcome.is_ok() {
            self.topology.reset();
        }
        self.report(
            outcome.map(|_| ()),
            |_| Notification::success("Service started", "sing-box is running"),
            "Start failed",
        )
    }

    pub async fn stop(&self) -> Result<()> {
        let outcome = self.lifecycle.stop().await;
        if outcome.is_ok() {
            self.topology.reset();
        }
        self.report(
            outcome,
            |_| Notification::success("Service stopped", "sing-box is stopped"),
            "Stop failed",
        )
    }

    pub async fn restart(&self) -> Result<()> {
        let outcome = async {
            let active = self.registry.active().await?;
            self.lifecycle.restart(active.as_ref()).await
        }
        .await;
        // Once the process was touched, the old snapshot is stale whichever half failed.
        if matches!(outcome, Ok(()) | Err(CoreError::Restart { .. })) {
            self.topology.reset();
        }
        self.report(
            outcome,
            |_| Notification::success("Service restarted", "sing-box is running"),
            "Restart failed",
        )
    }

    pub async fn version(&self) -> Result<String> {
        let outcome = self.lifecycle.version().await;
        if let Err(e) = &outcome {
            self.sink
                .notify(Notification::error("Version unavailable", e.to_string()));
        }
        outcome
    }

    pub async fn settings(&self) -> Result<AppConfig> {
        let outcome = self
            .store
            .get_app_config()
            .await
            .map_err(CoreError::transport("getAppConfig"));
        if let Err(e) = &outcome {
            self.sink
                .notify(Notification::error("Settings unavailable", e.to_string()));
        }
        outcome
    }

    /// Change the engine path and/or config directory. Empty values keep the current setting.
    pub async fn update_settings(
        &self,
        singbox_path: Option<&str>,
        config_dir: Option<&str>,
    ) -> Result<AppConfig> {
        let outcome = async {
            let mut app = self
                .store
                .get_app_config()
                .await
                .map_err(CoreError::transport("getAppConfig"))?;
            if let Some(path) = singbox_path.map(str::trim).filter(|p| !p.is_empty()) {
                app.singbox_path = path.to_string();
            }
            if let Some(dir) = config_dir.map(str::trim).filter(|d| !d.is_empty()) {
                app.config_dir = dir.to_string();
            }
            self.store
                .update_app_config(&app)
                .await
                .map_err(CoreError::transport("updateAppConfig"))?;
            Ok::<_, CoreError>(app)
        }
        .await;
        self.report(
            outcome,
            |_| Notification::success("Settings saved", "app_config.json updated"),
            "Settings failed",
        )
    }

    /// Foreground read: always asks the control API, falling back to the last snapshot.
    pub async fn groups(&self) -> Vec<ProxyGroup> {
        self.topology.fetch_topology().await;
        self.topology.groups()
    }

    pub async fn select(&self, group: &str, node: &str) -> Result<()> {
        self.topology.select_node(group, node).await
    }

    pub async fn delay(&self, group: &str) -> LatencyResult {
        self.topology.measure_latency(group).await
    }

    /// One reconciliation read. Failures are logged, never notified.
    pub async fn poll_status(&self) {
        if let Err(e) = self.lifecycle.poll_status().await {
            log::warn!("[lifecycle] status poll failed: {e}");
        }
    }

    /// Background refresh, only while the process is believed running.
    pub async fn refresh_topology(&self) {
        if self.lifecycle.status().is_running() {
            self.topology.fetch_topology().await;
        }
    }

    pub fn spawn_polls(self: &Arc<Self>, settings: PollSettings) -> Polls {
        let manager = self.clone();
        let status = spawn_recurring("status-poll", settings.status_interval, move || {
            let manager = manager.clone();
            async move { manager.poll_status().await }
        });
        let manager = self.clone();
        let topology = spawn_recurring("topology-poll", settings.topology_interval, move || {
            let manager = manager.clone();
            async move { manager.refresh_topology().await }
        });
        Polls { status, topology }
    }
}
