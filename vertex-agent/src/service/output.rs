//! Workload output forwarding
//!
//! Reader loops that turn runner output into log lines, and the observer
//! through which runners report status and progress.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use uuid::Uuid;
use vertex_core::domain::instance::InstanceStatus;
use vertex_core::domain::log::{DownloadProgress, LogLineKind, LogMessage};

use super::lifecycle::{InstanceEntry, InstanceService};
use crate::runner::{OutputStream, RunObserver};

/// Prefix of output lines that carry a JSON download progress payload
pub const DOWNLOAD_MARKER: &str = "!!DOWNLOAD!!";

/// Reads `stream` line by line until it closes, forwarding each line
///
/// Lines are split on `\n` only; invalid UTF-8 is replaced.
pub(super) async fn pump(
    service: InstanceService,
    uuid: Uuid,
    stream: OutputStream,
    kind: LogLineKind,
) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                let (kind, message) = classify(kind, line);
                service.log(uuid, kind, message);
            }
            Err(e) => {
                debug!("Output of instance {} closed: {}", uuid, e);
                break;
            }
        }
    }
}

/// Retags download-marked lines; everything else keeps the stream's kind
fn classify(kind: LogLineKind, line: &str) -> (LogLineKind, LogMessage) {
    match line.strip_prefix(DOWNLOAD_MARKER) {
        Some(payload) => {
            let message = match serde_json::from_str::<DownloadProgress>(payload.trim()) {
                Ok(progress) => LogMessage::Download(progress),
                Err(_) => LogMessage::Text(payload.trim().to_string()),
            };
            (LogLineKind::DownloadProgress, message)
        }
        None => (kind, LogMessage::Text(line.to_string())),
    }
}

/// Routes runner reports of one instance back into the service
pub(super) struct Observer {
    pub(super) service: InstanceService,
    pub(super) entry: Arc<InstanceEntry>,
}

impl RunObserver for Observer {
    fn on_status(&self, status: InstanceStatus) {
        self.service.set_status(&self.entry, status);
    }

    fn on_progress(&self, progress: DownloadProgress) {
        self.service
            .log(self.entry.uuid, LogLineKind::DownloadProgress, progress);
    }

    fn on_error(&self, message: String) {
        self.service
            .log(self.entry.uuid, LogLineKind::AgentErr, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line_keeps_kind() {
        let (kind, message) = classify(LogLineKind::ProcessErr, "warning: low memory");
        assert_eq!(kind, LogLineKind::ProcessErr);
        assert_eq!(message, LogMessage::Text("warning: low memory".to_string()));
    }

    #[test]
    fn test_download_marker_is_retagged() {
        let line = format!(
            "{}{}",
            DOWNLOAD_MARKER, r#"{"id":"model","status":"Downloading","current":10,"total":20}"#
        );
        let (kind, message) = classify(LogLineKind::ProcessOut, &line);

        assert_eq!(kind, LogLineKind::DownloadProgress);
        match message {
            LogMessage::Download(progress) => {
                assert_eq!(progress.id, "model");
                assert_eq!(progress.current, Some(10));
            }
            other => panic!("unexpected message {:?}", other),
        }

        let (kind, message) = classify(LogLineKind::ProcessOut, "!!DOWNLOAD!!50%");
        assert_eq!(kind, LogLineKind::DownloadProgress);
        assert_eq!(message, LogMessage::Text("50%".to_string()));
    }
}
