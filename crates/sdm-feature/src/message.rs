// message.rs — Interactive messages and the channels they are addressed to.
//
// A message is a list of attachments; each attachment may carry buttons
// bound to a command with parameters. Delivery is fire-and-forget from the
// caller's point of view: the rollout engine logs a failed delivery and
// moves on.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MessageError;

/// A button that invokes a command when pressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub text: String,
    pub command: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// Button bound to `command` with the given parameters.
pub fn button_for_command<'a>(
    text: impl Into<String>,
    command: impl Into<String>,
    parameters: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Action {
    Action {
        text: text.into(),
        command: command.into(),
        parameters: parameters
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub text: String,
    /// Plain-text rendering for clients that cannot show attachments.
    pub fallback: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn with_attachment(attachment: Attachment) -> Self {
        Self {
            attachments: vec![attachment],
        }
    }

    /// Every button across all attachments.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.attachments.iter().flat_map(|a| a.actions.iter())
    }
}

/// Delivers messages to chat channels.
pub trait MessageClient: Send + Sync {
    /// Send `message` to the channel(s) associated with `channel`.
    fn address_channels(&self, message: &Message, channel: &str) -> Result<(), MessageError>;
}

/// A delivered message, as written to the outbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentMessage {
    pub channel: String,
    pub message: Message,
    pub sent_at: DateTime<Utc>,
}

/// Logs messages through `tracing` and optionally appends them to a JSONL
/// outbox file for another process to deliver.
#[derive(Debug, Clone, Default)]
pub struct LogMessageClient {
    outbox: Option<PathBuf>,
}

impl LogMessageClient {
    pub fn new() -> Self {
        Self { outbox: None }
    }

    pub fn with_outbox(path: impl AsRef<Path>) -> Self {
        Self {
            outbox: Some(path.as_ref().to_path_buf()),
        }
    }

    fn append(&self, path: &Path, sent: &SentMessage) -> Result<(), MessageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| MessageError::IoError {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| MessageError::IoError {
                path: path.display().to_string(),
                source,
            })?;
        let json = serde_json::to_string(sent)?;
        writeln!(file, "{}", json).map_err(|source| MessageError::IoError {
            path: path.display().to_string(),
            source,
        })
    }
}

impl MessageClient for LogMessageClient {
    fn address_channels(&self, message: &Message, channel: &str) -> Result<(), MessageError> {
        for attachment in &message.attachments {
            tracing::info!(channel = %channel, "{}", attachment.text);
        }
        if let Some(path) = &self.outbox {
            let sent = SentMessage {
                channel: channel.to_string(),
                message: message.clone(),
                sent_at: Utc::now(),
            };
            self.append(path, &sent)?;
        }
        Ok(())
    }
}

/// Keeps every message in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingMessageClient {
    sent: Mutex<Vec<(String, Message)>>,
}

impl RecordingMessageClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(channel, message)` pairs in delivery order.
    pub fn sent(&self) -> Vec<(String, Message)> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl MessageClient for RecordingMessageClient {
    fn address_channels(&self, message: &Message, channel: &str) -> Result<(), MessageError> {
        let mut sent = self.sent.lock().map_err(|_| MessageError::DeliveryFailed {
            channel: channel.to_string(),
            reason: "recorder lock poisoned".to_string(),
        })?;
        sent.push((channel.to_string(), message.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn offer() -> Message {
        Message::with_attachment(Attachment {
            text: "Accept new feature x?".into(),
            fallback: "accept feature".into(),
            actions: vec![button_for_command(
                "Accept feature x",
                "tr-x",
                [("targets.owner", "acme"), ("targets.repo", "widgets")],
            )],
        })
    }

    #[test]
    fn button_carries_parameters() {
        let message = offer();
        let action = message.actions().next().unwrap();
        assert_eq!(action.command, "tr-x");
        assert_eq!(action.parameters["targets.owner"], "acme");
        assert_eq!(action.parameters["targets.repo"], "widgets");
    }

    #[test]
    fn log_client_appends_to_outbox() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/outbox.jsonl");
        let client = LogMessageClient::with_outbox(&path);
        client.address_channels(&offer(), "widgets").unwrap();
        client.address_channels(&offer(), "gadgets").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let sent: Vec<SentMessage> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].channel, "widgets");
        assert_eq!(sent[1].message, offer());
    }

    #[test]
    fn log_client_without_outbox_succeeds() {
        LogMessageClient::new()
            .address_channels(&offer(), "widgets")
            .unwrap();
    }

    #[test]
    fn recording_client_keeps_order() {
        let client = RecordingMessageClient::new();
        client.address_channels(&offer(), "a").unwrap();
        client.address_channels(&Message::default(), "b").unwrap();
        let channels: Vec<String> = client.sent().into_iter().map(|(c, _)| c).collect();
        assert_eq!(channels, vec!["a", "b"]);
    }
}
