use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::diff::changes_between;
use crate::stream::JsonObject;

/// How inbound payloads are written to the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    /// Every payload verbatim.
    Full,
    /// First payload verbatim, then only the fields that changed.
    Diffed,
}

pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    seen: Option<JsonObject>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            seen: None,
        })
    }

    pub fn log_command(&mut self, transport: &str, payload: &JsonObject) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "transport": transport,
            "body": payload,
        });
        self.write_line(&entry);
    }

    pub fn log_refresh(&mut self, transport: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "refresh",
            "transport": transport,
        });
        self.write_line(&entry);
    }

    pub fn log_inbound(&mut self, payload: &JsonObject) {
        let entry = match self.mode {
            MessageLogMode::Full => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "in",
                "body": payload,
            }),
            MessageLogMode::Diffed => {
                if let Some(seen) = self.seen.as_mut() {
                    let changes: Vec<Value> = changes_between(seen, payload)
                        .into_iter()
                        .map(|c| json!({ "path": c.path, "old": c.old, "new": c.new }))
                        .collect();
                    seen.extend(payload.iter().map(|(k, v)| (k.clone(), v.clone())));
                    json!({
                        "ts": Utc::now().to_rfc3339(),
                        "dir": "in",
                        "changes": changes,
                    })
                } else {
                    self.seen = Some(payload.clone());
                    json!({
                        "ts": Utc::now().to_rfc3339(),
                        "dir": "in",
                        "full": true,
                        "body": payload,
                    })
                }
            }
        };
        self.write_line(&entry);
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write message log entry: {e}");
        }
    }
}
