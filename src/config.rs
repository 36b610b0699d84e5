//! Configuration management for the SPP chat service.
//!
//! This module handles loading and saving configuration from disk,
//! including adapter selection, RFCOMM parameters and device aliases.

use std::{
   env, fs,
   path::{Path, PathBuf},
   time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SppError};

/// Main configuration structure for the service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
   /// Adapter to use (e.g. `hci0`); the default adapter when unset.
   #[serde(default)]
   pub adapter: Option<String>,

   /// Fixed RFCOMM channel. When unset the channel is resolved through SDP.
   #[serde(default)]
   pub rfcomm_channel: Option<u8>,

   #[serde(default = "default_discovery_timeout")]
   pub discovery_timeout_sec: u64,

   #[serde(default = "default_receive_timeout")]
   pub receive_timeout_ms: u64,

   /// Bound on one send, so a peer that stops reading cannot stall the
   /// service.
   #[serde(default = "default_send_timeout")]
   pub send_timeout_ms: u64,

   #[serde(default)]
   pub known_devices: Vec<KnownDevice>,
}

/// A device alias, used when the adapter reports no name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct KnownDevice {
   pub address: String,
   pub name: String,
}

const fn default_discovery_timeout() -> u64 {
   12
}

const fn default_receive_timeout() -> u64 {
   5000
}

const fn default_send_timeout() -> u64 {
   5000
}

impl Default for Config {
   fn default() -> Self {
      Self {
         adapter: None,
         rfcomm_channel: None,
         discovery_timeout_sec: default_discovery_timeout(),
         receive_timeout_ms: default_receive_timeout(),
         send_timeout_ms: default_send_timeout(),
         known_devices: vec![],
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   pub fn save_to(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(home) = env::var("SPPCHAT_HOME") {
         PathBuf::from(home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Some(dir) = dirs::config_dir() {
         dir
      } else {
         return Err(SppError::ConfigDirNotFound);
      };

      Ok(config_dir.join("sppchat").join("config.toml"))
   }

   pub const fn discovery_timeout(&self) -> Duration {
      Duration::from_secs(self.discovery_timeout_sec)
   }

   pub const fn receive_timeout(&self) -> Duration {
      Duration::from_millis(self.receive_timeout_ms)
   }

   pub const fn send_timeout(&self) -> Duration {
      Duration::from_millis(self.send_timeout_ms)
   }

   /// Returns the configured alias for `address`, compared case-insensitively.
   pub fn known_name(&self, address: &str) -> Option<&str> {
      self
         .known_devices
         .iter()
         .find(|d| d.address.eq_ignore_ascii_case(address))
         .map(|d| d.name.as_str())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_missing_file_writes_defaults() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("sppchat").join("config.toml");

      let config = Config::load_from(&path).unwrap();
      assert_eq!(config, Config::default());
      assert!(path.exists());
   }

   #[test]
   fn test_partial_file_uses_defaults() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("config.toml");
      fs::write(
         &path,
         "rfcomm_channel = 3\n\n[[known_devices]]\naddress = \"AA:BB:CC:DD:EE:FF\"\nname = \"HC-05\"\n",
      )
      .unwrap();

      let config = Config::load_from(&path).unwrap();
      assert_eq!(config.rfcomm_channel, Some(3));
      assert_eq!(config.discovery_timeout_sec, 12);
      assert_eq!(config.receive_timeout(), Duration::from_millis(5000));
      assert_eq!(config.send_timeout(), Duration::from_millis(5000));
      assert_eq!(config.known_name("aa:bb:cc:dd:ee:ff"), Some("HC-05"));
      assert_eq!(config.known_name("11:22:33:44:55:66"), None);
   }

   #[test]
   fn test_save_then_load() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("config.toml");
      let config = Config {
         adapter: Some("hci1".into()),
         discovery_timeout_sec: 30,
         ..Config::default()
      };
      config.save_to(&path).unwrap();
      assert_eq!(Config::load_from(&path).unwrap(), config);
   }

   #[test]
   fn test_malformed_file_is_an_error() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("config.toml");
      fs::write(&path, "discovery_timeout_sec = \"soon\"").unwrap();
      assert!(matches!(Config::load_from(&path), Err(SppError::TomlParse(_))));
   }
}
