//! Bluetooth manager for the SPP chat service.
//!
//! A single actor task owns the device registry, the session and the
//! transcript. [`BluetoothManager`] is the handle callers use to talk to
//! it; every command is answered over a oneshot channel.

use std::sync::Arc;

use bluer::Address;
use log::{debug, info, warn};
use smol_str::SmolStr;
use tokio::{
   select,
   sync::{mpsc, oneshot},
   task::JoinHandle,
};

use crate::{
   bluetooth::{
      device::Device,
      radio::{Radio, RadioEvent, Registration, SPP_SERVICE},
      registry::DeviceRegistry,
      session::{Completion, Session, SessionState},
   },
   config::Config,
   error::{Result, SppError},
   event::{EventSender, SppEvent},
   lookup,
   transcript::{ChatEntry, Transcript},
};

/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 1000;

/// Snapshot of the published state.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerState {
   pub bluetooth_enabled: bool,
   pub scanning: bool,
   pub session: SessionState,
   pub target: Option<Address>,
   pub status: SmolStr,
}

// === Commands ===

#[derive(Debug)]
enum ManagerCommand {
   StartScan(oneshot::Sender<Result<()>>),
   StopScan(oneshot::Sender<Result<()>>),
   RefreshPaired(oneshot::Sender<Result<usize>>),
   Connect(Address, oneshot::Sender<Result<bool>>),
   Disconnect(oneshot::Sender<()>),
   Send(String, oneshot::Sender<bool>),
   Receive(oneshot::Sender<Option<String>>),
   GetDiscovered(oneshot::Sender<Vec<Device>>),
   GetPaired(oneshot::Sender<Vec<Device>>),
   GetState(oneshot::Sender<ManagerState>),
   GetDeviceDetails(Address, oneshot::Sender<Result<Device>>),
   GetTranscript(oneshot::Sender<Vec<ChatEntry>>),
   ClearTranscript(oneshot::Sender<()>),
   Shutdown(oneshot::Sender<()>),
}

enum Loopback<S> {
   ConnectFinished {
      attempt: u64,
      address: Address,
      result: Result<S>,
      name: SmolStr,
   },
}

// === Main Manager ===

/// Handle to the manager actor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BluetoothManager {
   inbox: mpsc::Sender<ManagerCommand>,
}

impl BluetoothManager {
   /// Registers for adapter events, loads the paired list and spawns the
   /// actor.
   pub async fn new<R: Radio>(radio: R, config: Config, event_tx: EventSender) -> Result<Self> {
      let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      let actor = ManagerActor::new(Arc::new(radio), config, event_tx, command_rx).await?;
      tokio::spawn(actor.run());
      Ok(Self { inbox: command_tx })
   }

   async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand) -> Result<T> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(make(tx))
         .await
         .map_err(|_| SppError::ManagerShutdown)?;
      rx.await.map_err(|_| SppError::ManagerShutdown)
   }

   /// Clears the discovered set and starts a new discovery.
   pub async fn start_scan(&self) -> Result<()> {
      self.request(ManagerCommand::StartScan).await?
   }

   pub async fn stop_scan(&self) -> Result<()> {
      self.request(ManagerCommand::StopScan).await?
   }

   /// Replaces the paired set; returns its new size.
   pub async fn refresh_paired(&self) -> Result<usize> {
      self.request(ManagerCommand::RefreshPaired).await?
   }

   /// Connects to `address` and waits for the outcome.
   ///
   /// `Ok(false)` means the attempt failed; the status message carries
   /// the reason.
   pub async fn connect(&self, address: Address) -> Result<bool> {
      self
         .request(|tx| ManagerCommand::Connect(address, tx))
         .await?
   }

   pub async fn disconnect(&self) -> Result<()> {
      self.request(ManagerCommand::Disconnect).await
   }

   pub async fn send(&self, text: impl Into<String>) -> Result<bool> {
      let text = text.into();
      self.request(|tx| ManagerCommand::Send(text, tx)).await
   }

   pub async fn receive(&self) -> Result<Option<String>> {
      self.request(ManagerCommand::Receive).await
   }

   pub async fn discovered_devices(&self) -> Vec<Device> {
      self
         .request(ManagerCommand::GetDiscovered)
         .await
         .unwrap_or_default()
   }

   pub async fn paired_devices(&self) -> Vec<Device> {
      self
         .request(ManagerCommand::GetPaired)
         .await
         .unwrap_or_default()
   }

   pub async fn state(&self) -> Result<ManagerState> {
      self.request(ManagerCommand::GetState).await
   }

   pub async fn device_details(&self, address: Address) -> Result<Device> {
      self
         .request(|tx| ManagerCommand::GetDeviceDetails(address, tx))
         .await?
   }

   pub async fn transcript(&self) -> Vec<ChatEntry> {
      self
         .request(ManagerCommand::GetTranscript)
         .await
         .unwrap_or_default()
   }

   pub async fn clear_transcript(&self) -> Result<()> {
      self.request(ManagerCommand::ClearTranscript).await
   }

   /// Tears the actor down. Safe to call more than once.
   pub async fn shutdown(&self) {
      if self.request(ManagerCommand::Shutdown).await.is_err() {
         debug!("Manager already shut down");
      }
   }
}

// === Manager Actor ===

struct ManagerActor<R: Radio> {
   radio: Arc<R>,
   config: Config,
   event_tx: EventSender,
   command_rx: mpsc::Receiver<ManagerCommand>,
   radio_rx: mpsc::Receiver<RadioEvent>,
   loopback_rx: mpsc::Receiver<Loopback<R::Stream>>,
   loopback_tx: mpsc::Sender<Loopback<R::Stream>>,
   registration: Option<Registration>,

   // State
   registry: DeviceRegistry,
   session: Session<R::Stream>,
   transcript: Transcript,
   bluetooth_enabled: bool,
   scanning: bool,
   published_status: SmolStr,
   connect_task: Option<JoinHandle<()>>,
   connect_reply: Option<oneshot::Sender<Result<bool>>>,
}

impl<R: Radio> ManagerActor<R> {
   async fn new(
      radio: Arc<R>,
      config: Config,
      event_tx: EventSender,
      command_rx: mpsc::Receiver<ManagerCommand>,
   ) -> Result<Self> {
      let (radio_tx, radio_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      let registration = radio.register(radio_tx).await?;
      let bluetooth_enabled = radio.is_enabled().await?;

      let (loopback_tx, loopback_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      let session = Session::new(config.send_timeout(), config.receive_timeout());
      let published_status = session.status().clone();
      let mut actor = Self {
         radio,
         config,
         event_tx,
         command_rx,
         radio_rx,
         loopback_rx,
         loopback_tx,
         registration: Some(registration),
         registry: DeviceRegistry::new(),
         session,
         transcript: Transcript::new(),
         bluetooth_enabled,
         scanning: false,
         published_status,
         connect_task: None,
         connect_reply: None,
      };

      if let Err(e) = actor.refresh_paired().await {
         warn!("Initial paired-device refresh failed: {e}");
      }
      Ok(actor)
   }

   async fn run(mut self) {
      info!("Bluetooth manager starting up");

      loop {
         select! {
            biased;
            Some(msg) = self.loopback_rx.recv() => {
               self.handle_loopback(msg).await;
            }
            Some(event) = self.radio_rx.recv() => {
               self.handle_radio_event(event);
            }
            cmd = self.command_rx.recv() => {
               let Some(cmd) = cmd else {
                  info!("Bluetooth manager shutting down");
                  break;
               };
               if !self.handle_command(cmd).await {
                  break;
               }
            }
         }
         self.publish_status();
      }

      self.cleanup().await;
   }

   async fn handle_command(&mut self, cmd: ManagerCommand) -> bool {
      match cmd {
         ManagerCommand::StartScan(reply) => {
            let _ = reply.send(self.start_scan().await);
         },
         ManagerCommand::StopScan(reply) => {
            let _ = reply.send(self.stop_scan().await);
         },
         ManagerCommand::RefreshPaired(reply) => {
            let _ = reply.send(self.refresh_paired().await);
         },
         ManagerCommand::Connect(addr, reply) => {
            self.connect(addr, reply).await;
         },
         ManagerCommand::Disconnect(reply) => {
            self.disconnect().await;
            let _ = reply.send(());
         },
         ManagerCommand::Send(text, reply) => {
            let _ = reply.send(self.send(text).await);
         },
         ManagerCommand::Receive(reply) => {
            let received = self.session.receive().await;
            if let Some(text) = &received {
               self.transcript.record_incoming(text);
            }
            let _ = reply.send(received);
         },
         ManagerCommand::GetDiscovered(reply) => {
            let _ = reply.send(self.registry.discovered().to_vec());
         },
         ManagerCommand::GetPaired(reply) => {
            let _ = reply.send(self.registry.paired().to_vec());
         },
         ManagerCommand::GetState(reply) => {
            let _ = reply.send(ManagerState {
               bluetooth_enabled: self.bluetooth_enabled,
               scanning: self.scanning,
               session: self.session.state(),
               target: self.session.target(),
               status: self.session.status().clone(),
            });
         },
         ManagerCommand::GetDeviceDetails(addr, reply) => {
            let _ = reply.send(self.device_details(addr).await);
         },
         ManagerCommand::GetTranscript(reply) => {
            let _ = reply.send(self.transcript.entries().to_vec());
         },
         ManagerCommand::ClearTranscript(reply) => {
            self.transcript.clear();
            let _ = reply.send(());
         },
         ManagerCommand::Shutdown(reply) => {
            self.cleanup().await;
            let _ = reply.send(());
            return false;
         },
      }
      true
   }

   fn handle_radio_event(&mut self, event: RadioEvent) {
      match event {
         RadioEvent::AdapterStateChanged(enabled) => {
            info!("Adapter powered: {enabled}");
            self.bluetooth_enabled = enabled;
            self.event_tx.emit(SppEvent::AdapterStateChanged(enabled));
         },
         RadioEvent::DeviceFound(device) => {
            if !self.radio.has_permissions() {
               return;
            }
            if self.registry.on_device_found(device.clone()) {
               debug!("Discovered {} ({})", device.address, device.display_name().unwrap_or_default());
               self.event_tx.emit(SppEvent::DeviceFound(device));
            }
         },
         RadioEvent::DiscoveryStarted => {
            self.scanning = true;
            self.event_tx.emit(SppEvent::ScanStarted);
         },
         RadioEvent::DiscoveryFinished => {
            self.scanning = false;
            self.event_tx.emit(SppEvent::ScanFinished);
         },
      }
   }

   async fn handle_loopback(&mut self, msg: Loopback<R::Stream>) {
      match msg {
         Loopback::ConnectFinished {
            attempt,
            address,
            result,
            name,
         } => {
            let completion = self
               .session
               .complete_connect(attempt, address, result, &name)
               .await;
            if completion == Completion::Stale {
               return;
            }

            self.connect_task = None;
            let connected = completion == Completion::Connected;
            if connected {
               self.event_tx.emit(SppEvent::Connected(address));
            }
            if let Some(reply) = self.connect_reply.take() {
               let _ = reply.send(Ok(connected));
            }
         },
      }
   }

   /// Empty input is neither written nor recorded.
   async fn send(&mut self, text: String) -> bool {
      if text.is_empty() {
         return false;
      }
      let sent = self.session.send(text.as_bytes()).await;
      self.transcript.record_outgoing(text, sent);
      sent
   }

   async fn start_scan(&mut self) -> Result<()> {
      if !self.radio.has_permissions() {
         return Err(SppError::PermissionDenied);
      }
      if !self.bluetooth_enabled {
         return Err(SppError::AdapterDisabled);
      }

      if self.radio.is_discovering()
         && let Err(e) = self.radio.cancel_discovery().await
      {
         warn!("Failed to cancel running discovery: {e}");
      }
      self.registry.clear_discovered();
      self.radio.start_discovery().await
   }

   async fn stop_scan(&mut self) -> Result<()> {
      if !self.radio.has_permissions() {
         return Err(SppError::PermissionDenied);
      }
      self.radio.cancel_discovery().await
   }

   async fn refresh_paired(&mut self) -> Result<usize> {
      if !self.radio.has_permissions() {
         return Err(SppError::PermissionDenied);
      }
      let paired = self.radio.bonded_devices().await?;
      let count = paired.len();
      self.registry.set_paired(paired);
      self.event_tx.emit(SppEvent::PairedDevicesRefreshed(count));
      Ok(count)
   }

   async fn device_details(&self, addr: Address) -> Result<Device> {
      if !self.radio.has_permissions() {
         return Err(SppError::PermissionDenied);
      }
      self.radio.device(addr).await
   }

   /// Name for status messages when the adapter reports none.
   fn fallback_name(&self, addr: Address) -> SmolStr {
      if let Some(name) = self.registry.find(addr).and_then(Device::display_name) {
         return name.into();
      }
      self
         .config
         .known_name(&addr.to_string())
         .map_or_else(|| SmolStr::new_static(lookup::UNKNOWN_DEVICE), SmolStr::from)
   }

   async fn connect(&mut self, addr: Address, reply: oneshot::Sender<Result<bool>>) {
      if !self.radio.has_permissions() {
         let _ = reply.send(Err(SppError::PermissionDenied));
         return;
      }

      // Inquiry and paging share the radio; a running scan slows connects.
      if self.radio.is_discovering()
         && let Err(e) = self.radio.cancel_discovery().await
      {
         debug!("Failed to cancel discovery before connect: {e}");
      }

      self.abandon_attempt();
      let previous = self.connected_target();
      let attempt = self.session.begin_connect(addr).await;
      if let Some(prev) = previous {
         self.event_tx.emit(SppEvent::Disconnected(prev));
      }

      let radio = self.radio.clone();
      let loopback = self.loopback_tx.clone();
      let fallback = self.fallback_name(addr);
      self.connect_task = Some(tokio::spawn(async move {
         let result = radio.connect(addr, SPP_SERVICE).await;
         let name = if result.is_ok() {
            radio
               .device(addr)
               .await
               .ok()
               .and_then(|d| d.display_name().map(SmolStr::from))
               .unwrap_or(fallback)
         } else {
            fallback
         };
         let msg = Loopback::ConnectFinished {
            attempt,
            address: addr,
            result,
            name,
         };
         if loopback.send(msg).await.is_err() {
            warn!("Manager gone before connect to {addr} finished");
         }
      }));
      self.connect_reply = Some(reply);
   }

   async fn disconnect(&mut self) {
      self.abandon_attempt();
      let previous = self.connected_target();
      self.session.disconnect().await;
      if let Some(prev) = previous {
         info!("Disconnected from {prev}");
         self.event_tx.emit(SppEvent::Disconnected(prev));
      }
   }

   fn connected_target(&self) -> Option<Address> {
      if self.session.state() == SessionState::Connected {
         self.session.target()
      } else {
         None
      }
   }

   /// Aborts the in-flight connect, if any, and answers its caller.
   fn abandon_attempt(&mut self) {
      if let Some(task) = self.connect_task.take() {
         task.abort();
      }
      if let Some(reply) = self.connect_reply.take() {
         let _ = reply.send(Err(SppError::ConnectionSuperseded));
      }
   }

   fn publish_status(&mut self) {
      if self.session.status() != &self.published_status {
         self.published_status = self.session.status().clone();
         self
            .event_tx
            .emit(SppEvent::StatusChanged(self.published_status.clone()));
      }
   }

   async fn cleanup(&mut self) {
      if self.registration.is_none() {
         return;
      }
      info!("Cleaning up Bluetooth manager");

      if self.radio.is_discovering()
         && let Err(e) = self.radio.cancel_discovery().await
      {
         debug!("Ignoring discovery cancel error during teardown: {e}");
      }
      self.disconnect().await;
      self.publish_status();
      // Dropping the registration stops adapter event delivery.
      self.registration = None;
   }
}
