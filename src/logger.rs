use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

pub enum MessageLogMode {
    /// Log every API request, command, and poll cycle summary.
    Full,
    /// Log only state-changing commands (valve, mode, health test).
    Commands,
}

pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { mode, file })
    }

    pub fn log_request(&mut self, method: &str, path: &str) {
        if matches!(self.mode, MessageLogMode::Commands) {
            return;
        }
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
        });
        self.write_line(&entry);
    }

    pub fn log_command(&mut self, action: &str, target: &str, body: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "action": action,
            "target": target,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_cycle(&mut self, cycle_id: &str, locations: usize, devices: usize, failures: usize) {
        if matches!(self.mode, MessageLogMode::Commands) {
            return;
        }
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cycle",
            "cycle": cycle_id,
            "locations": locations,
            "devices": devices,
            "failures": failures,
        });
        self.write_line(&entry);
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}
