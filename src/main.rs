//! SPP chat D-Bus service.
//!
//! Discovers Bluetooth Classic devices, holds one RFCOMM serial session
//! and exchanges text over it, exposing everything on the session bus.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use log::{error, info, warn};
use tokio::{signal, sync::Notify, time};
use zbus::{Connection, connection, object_server::InterfaceRef};

use bluetooth::{bluez::BluezRadio, manager::BluetoothManager};
use dbus::SppChatService;
use event::{EventBus, SppEvent};

mod bluetooth;
mod config;
mod dbus;
mod error;
mod event;
mod lookup;
mod transcript;

use crate::{dbus::SppChatServiceSignals, error::Result};

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting sppchatd...");

   // Load configuration
   let config = config::Config::load()?;
   info!(
      "Loaded configuration with {} known devices",
      config.known_devices.len()
   );

   let radio = match BluezRadio::new(&config).await {
      Ok(radio) => radio,
      Err(e) => {
         error!("Bluetooth is not available on this system: {e}");
         return Err(e);
      },
   };

   // Create event channel
   let event_bus = EventProcessor::new();

   // Create Bluetooth manager with event sender and config
   let bluetooth_manager = BluetoothManager::new(radio, config, event_bus.clone()).await?;

   // Create D-Bus service
   let service = SppChatService::new(bluetooth_manager.clone());

   // Build D-Bus connection
   let connection = connection::Builder::session()?
      .name(dbus::SERVICE_NAME)?
      .serve_at(dbus::OBJECT_PATH, service)?
      .build()
      .await?;

   info!("sppchatd D-Bus service started at {}", dbus::SERVICE_NAME);

   // Start event processor
   event_bus.spawn_dispatcher(connection).await?;

   // Wait for shutdown signal
   signal::ctrl_c().await?;
   info!("Shutting down sppchatd...");
   bluetooth_manager.shutdown().await;

   Ok(())
}

struct EventProcessor {
   queue: SegQueue<SppEvent>,
   notifier: Notify,
}

impl EventProcessor {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }
}

impl EventProcessor {
   async fn recv(self: &Arc<Self>) -> Option<SppEvent> {
      loop {
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         let notify = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   async fn dispatch(&self, iface: &InterfaceRef<SppChatService>, event: SppEvent) -> Result<()> {
      let emitter = iface.signal_emitter();
      match event {
         SppEvent::AdapterStateChanged(enabled) => {
            iface.adapter_state_changed(enabled).await?;
            iface.get().await.bluetooth_enabled_changed(emitter).await?;
         },
         SppEvent::ScanStarted => {
            iface.scan_started().await?;
            iface.get().await.scanning_changed(emitter).await?;
         },
         SppEvent::ScanFinished => {
            iface.scan_finished().await?;
            iface.get().await.scanning_changed(emitter).await?;
         },
         SppEvent::DeviceFound(device) => {
            iface
               .device_found(&device.address.to_string(), &device.to_json().to_string())
               .await?;
         },
         SppEvent::PairedDevicesRefreshed(count) => {
            iface
               .paired_devices_refreshed(u32::try_from(count).unwrap_or(u32::MAX))
               .await?;
         },
         SppEvent::StatusChanged(status) => {
            iface.status_changed(&status).await?;
            let service = iface.get().await;
            service.connection_status_changed(emitter).await?;
            service.session_state_changed(emitter).await?;
         },
         SppEvent::Connected(addr) => {
            iface.connected(&addr.to_string()).await?;
         },
         SppEvent::Disconnected(addr) => {
            iface.disconnected(&addr.to_string()).await?;
         },
      }
      Ok(())
   }

   async fn spawn_dispatcher(self: Arc<Self>, connection: Connection) -> Result<()> {
      let iface = connection
         .object_server()
         .interface::<_, SppChatService>(dbus::OBJECT_PATH)
         .await?;
      tokio::spawn(async move {
         while let Some(event) = self.recv().await {
            if let Err(e) = self.dispatch(&iface, event).await {
               warn!("Error dispatching event: {e}");
            }
         }
      });

      Ok(())
   }
}

impl EventBus for EventProcessor {
   fn emit(&self, event: SppEvent) {
      self.queue.push(event);
      self.notifier.notify_waiters();
   }
}
