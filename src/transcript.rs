//! Log of text exchanged over the session, plus the preset commands.

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::json;

/// Commands offered for one-tap sending, with a description each.
pub const QUICK_COMMANDS: &[(&str, &str)] = &[
   ("AT", "Basic AT command test"),
   ("AT+VERSION", "Query firmware version"),
   ("Hello World", "Send a greeting"),
   ("LED_ON", "Turn the LED on"),
   ("LED_OFF", "Turn the LED off"),
   ("SENSOR_READ", "Read sensor data"),
];

pub fn quick_commands_json() -> serde_json::Value {
   QUICK_COMMANDS
      .iter()
      .enumerate()
      .map(|(index, (command, description))| {
         json!({ "index": index, "command": command, "description": description })
      })
      .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
   Outgoing,
   Incoming,
}

#[derive(Debug, Clone)]
pub struct ChatEntry {
   pub content: String,
   pub direction: Direction,
   /// Send outcome; always `true` for incoming entries.
   pub success: bool,
   pub timestamp: DateTime<Local>,
}

impl ChatEntry {
   pub fn to_json(&self) -> serde_json::Value {
      json!({
         "content": self.content,
         "direction": self.direction,
         "success": self.success,
         "timestamp": self.timestamp.to_rfc3339(),
         "time": self.timestamp.format("%H:%M:%S").to_string(),
      })
   }
}

/// Append-only, ordered; only [`Transcript::clear`] removes entries.
#[derive(Debug, Default)]
pub struct Transcript {
   entries: Vec<ChatEntry>,
}

impl Transcript {
   pub const fn new() -> Self {
      Self {
         entries: Vec::new(),
      }
   }

   pub fn record_outgoing(&mut self, content: impl Into<String>, success: bool) {
      self.entries.push(ChatEntry {
         content: content.into(),
         direction: Direction::Outgoing,
         success,
         timestamp: Local::now(),
      });
   }

   /// Empty reads are not recorded.
   pub fn record_incoming(&mut self, content: &str) {
      if content.is_empty() {
         return;
      }
      self.entries.push(ChatEntry {
         content: content.to_owned(),
         direction: Direction::Incoming,
         success: true,
         timestamp: Local::now(),
      });
   }

   pub fn clear(&mut self) {
      self.entries.clear();
   }

   pub fn entries(&self) -> &[ChatEntry] {
      &self.entries
   }
}
