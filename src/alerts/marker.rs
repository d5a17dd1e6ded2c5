//! Durable failure marker.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

use crate::resilience::types::ResilienceError;

/// Errors from marker persistence.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Marker I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Marker at {path} is not a valid failure report: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// What went wrong, and what a human has to do about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub incident_id: Uuid,
    pub script_name: String,
    pub error_code: i32,
    pub error_message: String,
    pub required_action: String,
    pub marker_path: PathBuf,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

impl FailureReport {
    pub fn new(
        script_name: impl Into<String>,
        error_code: i32,
        error_message: impl Into<String>,
        required_action: impl Into<String>,
        marker_path: impl Into<PathBuf>,
    ) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            incident_id: Uuid::new_v4(),
            script_name: script_name.into(),
            error_code,
            error_message: error_message.into(),
            required_action: required_action.into(),
            marker_path: marker_path.into(),
            created_at,
        }
    }

    /// Report for a failed resilience call, with a suggested action.
    pub fn from_error(script_name: impl Into<String>, error: &ResilienceError, marker_path: impl Into<PathBuf>) -> Self {
        let marker_path = marker_path.into();
        let action = match error {
            ResilienceError::InvalidInput(_) => "Fix the invocation, then remove the marker".to_string(),
            ResilienceError::CircuitOpen { retry_after, .. } => format!(
                "Dependency is failing; wait at least {}s, then remove the marker",
                retry_after.as_secs()
            ),
            _ => format!(
                "Investigate the failure, then remove {} to allow the next run",
                marker_path.display()
            ),
        };
        Self::new(script_name, error.exit_signal().code(), error.to_string(), action, marker_path)
    }
}

/// A marker file that blocks further runs until cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureMarker {
    path: PathBuf,
}

impl FailureMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker named after `script_name` inside `dir`.
    pub fn in_dir(dir: &Path, script_name: &str) -> Self {
        let file: String = script_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        Self::new(dir.join(format!("{}.failed", file)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `report` as pretty JSON, creating parent directories.
    pub async fn write(&self, report: &FailureReport) -> Result<(), AlertError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| self.io_error(e))?;
        }
        let body = serde_json::to_vec_pretty(report).map_err(|e| AlertError::Corrupt {
            path: self.path.clone(),
            source: e,
        })?;
        fs::write(&self.path, body).await.map_err(|e| self.io_error(e))?;
        tracing::warn!(
            marker = %self.path.display(),
            script = %report.script_name,
            incident_id = %report.incident_id,
            "Failure marker written"
        );
        Ok(())
    }

    /// The stored report, or `None` when no marker exists.
    pub async fn check(&self) -> Result<Option<FailureReport>, AlertError> {
        let body = match fs::read(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| AlertError::Corrupt {
                path: self.path.clone(),
                source: e,
            })
    }

    /// Remove the marker. Returns whether one existed.
    pub async fn clear(&self) -> Result<bool, AlertError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::info!(marker = %self.path.display(), "Failure marker cleared");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> AlertError {
        AlertError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
