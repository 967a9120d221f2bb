use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

pub const SCRAPER_TIMEOUT: Duration = Duration::from_secs(30);
pub const SHEETS_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// An out-of-process job launched by a trigger endpoint
#[derive(Debug, Clone)]
pub struct TriggerJob {
    pub name: String,
    pub command: String,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    /// Message reported on success
    pub success_message: String,
}

/// Body of a trigger endpoint response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl TriggerOutcome {
    fn failed(error: String, stderr: String) -> Self {
        Self {
            success: false,
            output: None,
            message: None,
            error: Some(error),
            stderr: Some(stderr),
        }
    }
}

impl TriggerJob {
    pub fn scraper(command: &str, working_dir: PathBuf) -> Self {
        Self {
            name: "scraper".to_string(),
            command: command.to_string(),
            working_dir,
            timeout: SCRAPER_TIMEOUT,
            success_message: "Scraper completed successfully".to_string(),
        }
    }

    pub fn sheets_sync(command: &str, working_dir: PathBuf) -> Self {
        Self {
            name: "sheets-sync".to_string(),
            command: command.to_string(),
            working_dir,
            timeout: SHEETS_SYNC_TIMEOUT,
            success_message: "Google Sheets sync completed successfully".to_string(),
        }
    }

    /// Run the command through the shell, capturing stdout and stderr
    pub async fn run(&self) -> TriggerOutcome {
        info!(job = %self.name, command = %self.command, "Starting trigger job");
        let child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(job = %self.name, "Failed to start job: {}", e);
                return TriggerOutcome::failed(
                    format!("Failed to start command: {}", e),
                    String::new(),
                );
            }
            Err(_) => {
                warn!(job = %self.name, "Job timed out after {:?}", self.timeout);
                return TriggerOutcome::failed(
                    format!("Command timed out after {}s: {}", self.timeout.as_secs(), self.command),
                    String::new(),
                );
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            info!(job = %self.name, "Trigger job finished");
            TriggerOutcome {
                success: true,
                output: Some(stdout),
                message: Some(self.success_message.clone()),
                error: None,
                stderr: None,
            }
        } else {
            warn!(job = %self.name, status = %output.status, "Trigger job failed");
            TriggerOutcome::failed(
                format!("Command failed ({}): {}\n{}", output.status, self.command, stderr),
                stderr,
            )
        }
    }
}
