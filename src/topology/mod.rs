//! Live view of the running process's proxy groups.
//!
//! The control-API address is only known by reading the active profile, so the client resolves
//! it lazily and caches it until [`TopologyClient::reset`] is called (profile switch, stop).
//! Background reads (`fetch_topology`, `measure_latency`) degrade silently to stale or empty
//! data. Node selection is a foreground action and always ends in a notification.

mod api;
mod endpoint;
#[cfg(test)]
pub(crate) mod mock;

use crate::bridge::ConfigStore;
use crate::error::{CoreError, EndpointIssue, Result};
use crate::model::{LatencyResult, ProbeSettings, ProxyGroup, Topology};
use crate::notify::{Notification, NotificationSink};
use api::ControlApi;
use endpoint::Endpoint;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

pub(crate) struct TopologyClient {
    store: Arc<dyn ConfigStore>,
    http: reqwest::Client,
    probe: ProbeSettings,
    sink: Arc<dyn NotificationSink>,
    api: Mutex<Option<ControlApi>>,
    snapshot: watch::Sender<Topology>,
}

impl TopologyClient {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        http: reqwest::Client,
        probe: ProbeSettings,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let (snapshot, _) = watch::channel(Topology::new());
        Self {
            store,
            http,
            probe,
            sink,
            api: Mutex::new(None),
            snapshot,
        }
    }

    /// Read the active profile and extract its control-API address.
    pub async fn resolve_endpoint(&self) -> Result<Endpoint> {
        let active = self
            .store
            .get_active_config()
            .await
            .map_err(|e| CoreError::NoEndpoint(EndpointIssue::NoActiveProfile(e.to_string())))?;
        if active.is_none() {
            return Err(CoreError::NoEndpoint(EndpointIssue::NoActiveProfile(
                "none selected".into(),
            )));
        }
        let content = self
            .store
            .get_active_config_content()
            .await
            .map_err(|e| CoreError::NoEndpoint(EndpointIssue::NoActiveProfile(e.to_string())))?;
        endpoint::resolve(&content).map_err(CoreError::NoEndpoint)
    }

    /// Drop the cached endpoint and the last snapshot.
    pub fn reset(&self) {
        if let Ok(mut api) = self.api.lock() {
            *api = None;
        }
        self.snapshot.send_replace(Topology::new());
    }

    pub fn snapshot(&self) -> Topology {
        self.snapshot.borrow().clone()
    }

    /// Selectable groups of the current snapshot.
    pub fn groups(&self) -> Vec<ProxyGroup> {
        selectable_groups(&self.snapshot.borrow())
    }

    /// Refresh the snapshot. Any failure keeps and returns the previous one.
    pub async fn fetch_topology(&self) -> Topology {
        let api = match self.api().await {
            Ok(api) => api,
            Err(e) => {
                log::debug!("[topology] fetch skipped: {e}");
                return self.snapshot();
            }
        };
        match api.proxies().await {
            Ok(topology) => {
                log::debug!("[topology] fetched {} entries", topology.len());
                self.snapshot.send_replace(topology.clone());
                topology
            }
            Err(e) => {
                log::debug!("[topology] fetch from {} failed: {e}", api.base());
                self.snapshot()
            }
        }
    }

    pub async fn select_node(&self, group: &str, node: &str) -> Result<()> {
        let outcome = match self.api().await {
            Ok(api) => api.select(group, node).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => {
                log::info!("[topology] {group} -> {node}");
                self.fetch_topology().await;
                self.sink.notify(Notification::success(
                    "Node switched",
                    format!("{group} now uses {node}"),
                ));
                Ok(())
            }
            Err(e) => {
                log::warn!("[topology] switching {group} to {node} failed: {e}");
                self.sink
                    .notify(Notification::error("Switch failed", e.to_string()));
                Err(e)
            }
        }
    }

    /// Probe every member of `group`. Failure yields an empty map.
    pub async fn measure_latency(&self, group: &str) -> LatencyResult {
        let api = match self.api().await {
            Ok(api) => api,
            Err(e) => {
                log::debug!("[topology] latency probe skipped: {e}");
                return LatencyResult::new();
            }
        };
        api.group_delay(group, &self.probe)
            .await
            .unwrap_or_else(|e| {
                log::debug!("[topology] latency probe for {group} failed: {e}");
                LatencyResult::new()
            })
    }

    async fn api(&self) -> Result<ControlApi> {
        if let Some(api) = self.cached() {
            return Ok(api);
        }
        let endpoint = self.resolve_endpoint().await?;
        let api = ControlApi::new(self.http.clone(), &endpoint)?;
        log::info!("[topology] control API at {}", api.base());
        if let Ok(mut slot) = self.api.lock() {
            *slot = Some(api.clone());
        }
        Ok(api)
    }

    fn cached(&self) -> Option<ControlApi> {
        self.api.lock().ok().and_then(|slot| slot.clone())
    }
}

/// Only `Selector` and `URLTest` entries are actionable.
pub(crate) fn selectable_groups(topology: &Topology) -> Vec<ProxyGroup> {
    topology
        .values()
        .filter(|g| g.group_type.is_selectable())
        .cloned()
        .collect()
}
