use super::FileOpener;
use crate::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// How long to wait for the opener's exit status. Some openers stay attached to the editor.
const OPENER_GRACE: Duration = Duration::from_secs(2);

pub(crate) struct SystemOpener;

impl SystemOpener {
    fn command(path: &str) -> Command {
        #[cfg(target_os = "windows")]
        {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", "start", "", path]);
            cmd
        }

        #[cfg(target_os = "macos")]
        {
            let mut cmd = Command::new("open");
            cmd.arg(path);
            cmd
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let mut cmd = Command::new("xdg-open");
            cmd.arg(path);
            cmd
        }
    }
}

#[async_trait]
impl FileOpener for SystemOpener {
    async fn open(&self, path: &str) -> BridgeResult<()> {
        log::info!("[bridge] opening {path} externally");
        let child = Self::command(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| BridgeError::Command(format!("failed to launch opener: {e}")))?;
        settle(child, OPENER_GRACE, path).await
    }
}

/// A non-zero exit within `grace` is a failure. Still running afterwards counts as launched.
async fn settle(mut child: Child, grace: Duration, path: &str) -> BridgeResult<()> {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => {
            let status = status?;
            if status.success() {
                Ok(())
            } else {
                Err(BridgeError::Command(format!(
                    "opener exited with {status} for {path}"
                )))
            }
        }
        Err(_) => {
            log::debug!("[bridge] opener for {path} still running, leaving it detached");
            Ok(())
        }
    }
}
