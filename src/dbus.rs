use std::str::FromStr;

use bluer::Address;
use log::info;
use zbus::{fdo, interface, object_server::SignalEmitter};

use crate::{
   bluetooth::{device::Device, manager::BluetoothManager},
   error::SppError,
   lookup,
   transcript::{self, QUICK_COMMANDS},
};

pub const SERVICE_NAME: &str = "org.sppchat";
pub const OBJECT_PATH: &str = "/org/sppchat/manager";

pub struct SppChatService {
   bluetooth_manager: BluetoothManager,
}

impl SppChatService {
   pub const fn new(bluetooth_manager: BluetoothManager) -> Self {
      Self { bluetooth_manager }
   }
}

fn parse_address(address: &str) -> fdo::Result<Address> {
   if !lookup::is_valid_mac_address(address) {
      return Err(fdo::Error::InvalidArgs(format!(
         "Invalid Bluetooth address: {address}"
      )));
   }
   Address::from_str(&lookup::format_mac_address(address))
      .map_err(|e| fdo::Error::InvalidArgs(e.to_string()))
}

fn non_empty(text: &str) -> fdo::Result<()> {
   if text.is_empty() {
      return Err(fdo::Error::InvalidArgs("Nothing to send".into()));
   }
   Ok(())
}

fn failed(err: SppError) -> fdo::Error {
   match err {
      SppError::PermissionDenied => fdo::Error::AccessDenied(err.to_string()),
      SppError::InvalidAddress(_) => fdo::Error::InvalidArgs(err.to_string()),
      _ => fdo::Error::Failed(err.to_string()),
   }
}

fn devices_json(devices: &[Device]) -> String {
   serde_json::Value::from_iter(devices.iter().map(Device::to_json)).to_string()
}

#[interface(name = "org.sppchat.Manager")]
impl SppChatService {
   async fn start_scan(&self) -> fdo::Result<()> {
      self.bluetooth_manager.start_scan().await.map_err(failed)
   }

   async fn stop_scan(&self) -> fdo::Result<()> {
      self.bluetooth_manager.stop_scan().await.map_err(failed)
   }

   async fn refresh_paired(&self) -> fdo::Result<u32> {
      let count = self
         .bluetooth_manager
         .refresh_paired()
         .await
         .map_err(failed)?;
      Ok(u32::try_from(count).unwrap_or(u32::MAX))
   }

   /// Waits for the attempt to resolve. `false` means it failed or a newer
   /// attempt replaced it; `ConnectionStatus` has the reason.
   async fn connect_device(&self, address: String) -> fdo::Result<bool> {
      let addr = parse_address(&address)?;
      info!("Connect requested for {address}");
      match self.bluetooth_manager.connect(addr).await {
         Ok(connected) => Ok(connected),
         Err(SppError::ConnectionSuperseded) => Ok(false),
         Err(e) => Err(failed(e)),
      }
   }

   async fn disconnect(&self) -> fdo::Result<()> {
      self.bluetooth_manager.disconnect().await.map_err(failed)
   }

   async fn send(&self, text: String) -> fdo::Result<bool> {
      non_empty(&text)?;
      self.bluetooth_manager.send(text).await.map_err(failed)
   }

   async fn send_quick_command(&self, index: u32) -> fdo::Result<bool> {
      let (command, _) = usize::try_from(index)
         .ok()
         .and_then(|i| QUICK_COMMANDS.get(i))
         .ok_or_else(|| fdo::Error::InvalidArgs(format!("No quick command #{index}")))?;
      self.bluetooth_manager.send(*command).await.map_err(failed)
   }

   /// One read; an empty string means nothing was received.
   async fn receive(&self) -> fdo::Result<String> {
      let received = self.bluetooth_manager.receive().await.map_err(failed)?;
      Ok(received.unwrap_or_default())
   }

   async fn get_discovered_devices(&self) -> String {
      devices_json(&self.bluetooth_manager.discovered_devices().await)
   }

   async fn get_paired_devices(&self) -> String {
      devices_json(&self.bluetooth_manager.paired_devices().await)
   }

   async fn get_device_details(&self, address: String) -> fdo::Result<String> {
      let addr = parse_address(&address)?;
      let device = self
         .bluetooth_manager
         .device_details(addr)
         .await
         .map_err(failed)?;
      Ok(device.details_json().to_string())
   }

   async fn get_transcript(&self) -> String {
      let entries = self.bluetooth_manager.transcript().await;
      serde_json::Value::from_iter(entries.iter().map(|e| e.to_json())).to_string()
   }

   async fn clear_transcript(&self) -> fdo::Result<()> {
      self
         .bluetooth_manager
         .clear_transcript()
         .await
         .map_err(failed)
   }

   async fn get_quick_commands(&self) -> String {
      transcript::quick_commands_json().to_string()
   }

   // Signals
   #[zbus(signal)]
   pub async fn adapter_state_changed(
      emitter: &SignalEmitter<'_>,
      enabled: bool,
   ) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn scan_started(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn scan_finished(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn device_found(
      emitter: &SignalEmitter<'_>,
      address: &str,
      device: &str,
   ) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn paired_devices_refreshed(emitter: &SignalEmitter<'_>, count: u32)
   -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn status_changed(emitter: &SignalEmitter<'_>, status: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn connected(emitter: &SignalEmitter<'_>, address: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn disconnected(emitter: &SignalEmitter<'_>, address: &str) -> zbus::Result<()>;

   // Properties for polling-free updates
   #[zbus(property)]
   async fn bluetooth_enabled(&self) -> bool {
      self
         .bluetooth_manager
         .state()
         .await
         .is_ok_and(|s| s.bluetooth_enabled)
   }

   #[zbus(property)]
   async fn scanning(&self) -> bool {
      self
         .bluetooth_manager
         .state()
         .await
         .is_ok_and(|s| s.scanning)
   }

   #[zbus(property)]
   async fn connection_status(&self) -> String {
      self
         .bluetooth_manager
         .state()
         .await
         .map(|s| s.status.to_string())
         .unwrap_or_default()
   }

   #[zbus(property)]
   async fn session_state(&self) -> String {
      self
         .bluetooth_manager
         .state()
         .await
         .map(|s| s.session.to_string())
         .unwrap_or_default()
   }
}
