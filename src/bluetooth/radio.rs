//! Platform adapter abstraction.
//!
//! [`Radio`] is everything the service consumes from the Bluetooth stack.
//! The BlueZ implementation lives in [`crate::bluetooth::bluez`].

use std::future::Future;

use bluer::Address;
use tokio::{
   io::{AsyncRead, AsyncWrite},
   sync::mpsc,
   task::JoinHandle,
};
use uuid::Uuid;

use crate::{bluetooth::device::Device, error::Result};

/// Serial Port Profile service class.
pub const SPP_SERVICE: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805f9b34fb);

/// Events delivered by the adapter once registered.
#[derive(Debug, Clone)]
pub enum RadioEvent {
   AdapterStateChanged(bool),
   DeviceFound(Device),
   DiscoveryStarted,
   DiscoveryFinished,
}

/// Keeps an event subscription alive; dropping it deregisters.
#[derive(Debug, Default)]
pub struct Registration {
   tasks: Vec<JoinHandle<()>>,
}

impl Registration {
   pub const fn new() -> Self {
      Self { tasks: Vec::new() }
   }

   pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
      self.tasks.push(task);
      self
   }
}

impl Drop for Registration {
   fn drop(&mut self) {
      for task in &self.tasks {
         task.abort();
      }
   }
}

pub trait Radio: Send + Sync + 'static {
   type Stream: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static;

   /// Permission gate checked before discovery, connection and device queries.
   fn has_permissions(&self) -> bool;

   fn is_enabled(&self) -> impl Future<Output = Result<bool>> + Send;

   /// Starts delivering [`RadioEvent`]s to `events` until the returned
   /// registration is dropped.
   fn register(
      &self,
      events: mpsc::Sender<RadioEvent>,
   ) -> impl Future<Output = Result<Registration>> + Send;

   fn is_discovering(&self) -> bool;

   fn start_discovery(&self) -> impl Future<Output = Result<()>> + Send;

   fn cancel_discovery(&self) -> impl Future<Output = Result<()>> + Send;

   fn bonded_devices(&self) -> impl Future<Output = Result<Vec<Device>>> + Send;

   fn device(&self, address: Address) -> impl Future<Output = Result<Device>> + Send;

   /// Opens a stream to `service` on `address`. Blocks until the radio
   /// handshake completes or fails.
   fn connect(
      &self,
      address: Address,
      service: Uuid,
   ) -> impl Future<Output = Result<Self::Stream>> + Send;
}
