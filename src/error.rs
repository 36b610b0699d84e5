//! Error types for the SPP chat service.
//!
//! Every fallible operation in the service returns [`SppError`]. Failures
//! on the connect/send/receive path are turned into status messages or
//! boolean outcomes by the session; the variants here are what reaches the
//! D-Bus layer and `main`.

use bluer::ErrorKind;
use thiserror::Error;

/// Main error type for the SPP chat service.
#[derive(Error, Debug)]
pub enum SppError {
   #[error("Bluetooth error: {0}")]
   Bluetooth(bluer::Error),

   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("D-Bus connection error: {0}")]
   DBusConnection(#[from] zbus::fdo::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Bluetooth permission denied")]
   PermissionDenied,

   #[error("Bluetooth adapter unavailable")]
   AdapterUnavailable,

   #[error("Bluetooth adapter is powered off")]
   AdapterDisabled,

   #[error("Invalid Bluetooth address: {0}")]
   InvalidAddress(String),

   #[error("Device not connected")]
   NotConnected,

   #[error("Connection closed by peer")]
   ConnectionClosed,

   #[error("Connection attempt superseded by a newer one")]
   ConnectionSuperseded,

   #[error("Request timeout")]
   RequestTimeout,

   #[error("Profile connection was not handed over by bluetoothd")]
   ProfileHandoff,

   #[error("Manager has been shut down")]
   ManagerShutdown,

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),
}

impl From<bluer::Error> for SppError {
   fn from(err: bluer::Error) -> Self {
      match err.kind {
         ErrorKind::NotAuthorized | ErrorKind::NotPermitted => Self::PermissionDenied,
         _ => Self::Bluetooth(err),
      }
   }
}

/// Convenience type alias for Results with `SppError`.
pub type Result<T> = std::result::Result<T, SppError>;
