//! Log domain types

use serde::{Deserialize, Serialize};

/// Origin of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogLineKind {
    /// Narration produced by the agent (start/stop messages)
    AgentOut,
    /// Failures reported by the agent
    AgentErr,
    /// Standard output of the workload
    ProcessOut,
    /// Standard error of the workload
    ProcessErr,
    /// Image pull or build progress
    DownloadProgress,
}

/// Structured progress of an image pull or build step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    #[serde(default)]
    pub id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl std::fmt::Display for DownloadProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.id.is_empty() {
            write!(f, "{}: ", self.id)?;
        }
        write!(f, "{}", self.status)?;
        match (self.current, self.total) {
            (Some(current), Some(total)) => write!(f, " ({}/{})", current, total),
            (Some(current), None) => write!(f, " ({})", current),
            _ => Ok(()),
        }
    }
}

/// Payload of a log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogMessage {
    Text(String),
    Download(DownloadProgress),
}

impl std::fmt::Display for LogMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogMessage::Text(text) => write!(f, "{}", text),
            LogMessage::Download(progress) => write!(f, "{}", progress),
        }
    }
}

impl From<&str> for LogMessage {
    fn from(text: &str) -> Self {
        LogMessage::Text(text.to_string())
    }
}

impl From<String> for LogMessage {
    fn from(text: String) -> Self {
        LogMessage::Text(text)
    }
}

impl From<DownloadProgress> for LogMessage {
    fn from(progress: DownloadProgress) -> Self {
        LogMessage::Download(progress)
    }
}

/// One observable unit of instance output
///
/// `id` increases monotonically per instance logger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub id: u64,
    pub kind: LogLineKind,
    pub message: LogMessage,
}
