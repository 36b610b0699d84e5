//! Event handling system for adapter and session updates.
//!
//! The manager publishes state changes here; `main` forwards them to
//! D-Bus signals.

use std::sync::Arc;

use bluer::Address;
use smol_str::SmolStr;

use crate::bluetooth::device::Device;

/// Events that can be emitted by the service.
#[derive(Debug, Clone)]
pub enum SppEvent {
   AdapterStateChanged(bool),
   ScanStarted,
   ScanFinished,
   DeviceFound(Device),
   PairedDevicesRefreshed(usize),
   StatusChanged(SmolStr),
   Connected(Address),
   Disconnected(Address),
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event to all registered listeners.
   fn emit(&self, event: SppEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;
