//! Start/stop/restart of the controlled process.
//!
//! Every command outcome is written to the status store as provisional belief.
//! Only [`LifecycleController::poll_status`] produces confirmed state.

use super::status::{StatusSnapshot, StatusStore, StatusView};
use crate::bridge::ProcessControl;
use crate::error::{CoreError, RestartPhase, Result};
use crate::model::{ConfigProfile, ServiceStatus, Transition};
use std::sync::Arc;

pub(crate) struct LifecycleController {
    process: Arc<dyn ProcessControl>,
    status: StatusStore,
}

impl LifecycleController {
    pub fn new(process: Arc<dyn ProcessControl>) -> Self {
        Self {
            process,
            status: StatusStore::new(),
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn subscribe(&self) -> StatusView {
        self.status.subscribe()
    }

    pub async fn start(&self, profile: Option<&ConfigProfile>) -> Result<()> {
        let profile = profile.ok_or_else(no_profile)?;
        self.status.begin(Transition::Starting);
        match self.process.start_service(&profile.path).await {
            Ok(()) => {
                log::info!("[lifecycle] started with profile {} ({})", profile.name, profile.id);
                self.status.settle(ServiceStatus::Running);
                Ok(())
            }
            Err(source) => {
                log::warn!("[lifecycle] start failed: {source}");
                self.status.settle(ServiceStatus::Stopped);
                Err(CoreError::Transport {
                    op: "startService",
                    source,
                })
            }
        }
    }

    /// On failure the belief is left as it was; the process may still be running.
    pub async fn stop(&self) -> Result<()> {
        self.status.begin(Transition::Stopping);
        match self.process.stop_service().await {
            Ok(()) => {
                log::info!("[lifecycle] stopped");
                self.status.settle(ServiceStatus::Stopped);
                Ok(())
            }
            Err(source) => {
                log::warn!("[lifecycle] stop failed: {source}");
                self.status.abandon();
                Err(CoreError::Transport {
                    op: "stopService",
                    source,
                })
            }
        }
    }

    /// Stop then start, sequentially. A failed stop short-circuits; start is not attempted.
    pub async fn restart(&self, profile: Option<&ConfigProfile>) -> Result<()> {
        let profile = profile.ok_or_else(no_profile)?;
        self.stop().await.map_err(|e| CoreError::Restart {
            phase: RestartPhase::Stopping,
            source: Box::new(e),
        })?;
        self.start(Some(profile)).await.map_err(|e| CoreError::Restart {
            phase: RestartPhase::Starting,
            source: Box::new(e),
        })
    }

    /// Reconciliation read. Failures leave the belief untouched.
    pub async fn poll_status(&self) -> Result<ServiceStatus> {
        let running = self
            .process
            .get_service_status()
            .await
            .map_err(CoreError::transport("getServiceStatus"))?;
        let observed = ServiceStatus::from_running(running);
        let before = self.status.snapshot();
        if before.observed != observed {
            log::info!("[lifecycle] poll: {} -> {}", before.observed, observed);
        }
        self.status.reconcile(observed);
        Ok(observed)
    }

    pub async fn version(&self) -> Result<String> {
        self.process
            .get_version()
            .await
            .map_err(CoreError::transport("getVersion"))
    }
}

fn no_profile() -> CoreError {
    CoreError::Precondition("no active profile; activate one first".into())
}
