//! BlueZ implementation of [`Radio`].

use std::{pin::pin, time::Duration};

use bluer::{
   AdapterEvent, AdapterProperty, Address, AddressType, Session,
   rfcomm::{Profile, ReqError, Role, SocketAddr, Stream},
};
use futures::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use smol_str::SmolStr;
use tokio::{select, sync::mpsc, task::JoinHandle, time};
use uuid::Uuid;

use crate::{
   bluetooth::{
      device::{BondState, Device, DeviceType},
      radio::{Radio, RadioEvent, Registration},
   },
   config::Config,
   error::{Result, SppError},
};

/// How long bluetoothd gets to hand over the socket once the profile
/// connect has returned.
const PROFILE_HANDOFF_TIMEOUT: Duration = Duration::from_secs(5);

/// GAP and GATT service classes; a BR/EDR device exposing them also
/// speaks LE.
const GAP_SERVICE: Uuid = Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);
const GATT_SERVICE: Uuid = Uuid::from_u128(0x00001801_0000_1000_8000_00805f9b34fb);

pub struct BluezRadio {
   session: Session,
   adapter: bluer::Adapter,
   channel: Option<u8>,
   discovery_timeout: Duration,
   events: Mutex<Option<mpsc::Sender<RadioEvent>>>,
   discovery: Mutex<Option<JoinHandle<()>>>,
}

impl BluezRadio {
   /// Opens the configured adapter, or the default one.
   ///
   /// Fails with [`SppError::AdapterUnavailable`] when bluetoothd is not
   /// running or the adapter does not exist.
   pub async fn new(config: &Config) -> Result<Self> {
      let session = Session::new().await.map_err(|e| {
         warn!("Failed to open BlueZ session: {e}");
         SppError::AdapterUnavailable
      })?;

      let adapter = match &config.adapter {
         Some(name) => session.adapter(name),
         None => session.default_adapter().await,
      }
      .map_err(|e| {
         warn!("No usable Bluetooth adapter: {e}");
         SppError::AdapterUnavailable
      })?;

      // The proxy is lazy; touch a property to make sure the adapter exists.
      match adapter.is_powered().await {
         Ok(powered) => info!("Using adapter {} (powered: {powered})", adapter.name()),
         Err(e) => match SppError::from(e) {
            SppError::PermissionDenied => return Err(SppError::PermissionDenied),
            e => {
               warn!("Adapter {} unavailable: {e}", adapter.name());
               return Err(SppError::AdapterUnavailable);
            },
         },
      }

      Ok(Self {
         session,
         adapter,
         channel: config.rfcomm_channel,
         discovery_timeout: config.discovery_timeout(),
         events: Mutex::new(None),
         discovery: Mutex::new(None),
      })
   }

   fn events(&self) -> Result<mpsc::Sender<RadioEvent>> {
      self.events.lock().clone().ok_or(SppError::AdapterUnavailable)
   }

   async fn connect_channel(&self, address: Address, channel: u8) -> Result<Stream> {
      debug!("Connecting to {address} on RFCOMM channel {channel}");
      Ok(Stream::connect(SocketAddr::new(address, channel)).await?)
   }

   /// Lets bluetoothd resolve the channel through SDP and hand the socket
   /// to a client profile registered for `service`.
   async fn connect_profile(&self, address: Address, service: Uuid) -> Result<Stream> {
      let profile = Profile {
         uuid: service,
         role: Some(Role::Client),
         require_authentication: Some(false),
         require_authorization: Some(false),
         auto_connect: Some(false),
         ..Default::default()
      };
      let mut handle = self.session.register_profile(profile).await?;
      let device = self.adapter.device(address)?;
      debug!("Connecting profile {service} on {address}");

      let mut connect = pin!(device.connect_profile(&service));
      let mut handoff = pin!(time::sleep(Duration::MAX));
      let mut connected = false;

      loop {
         select! {
            res = &mut connect, if !connected => {
               res?;
               connected = true;
               handoff.as_mut().reset(time::Instant::now() + PROFILE_HANDOFF_TIMEOUT);
            }
            req = handle.next() => {
               let Some(req) = req else {
                  return Err(SppError::ProfileHandoff);
               };
               if req.device() == address {
                  return Ok(req.accept()?);
               }
               debug!("Rejecting profile request from {}", req.device());
               req.reject(ReqError::Rejected);
            }
            () = &mut handoff, if connected => {
               return Err(SppError::RequestTimeout);
            }
         }
      }
   }
}

async fn snapshot(device: &bluer::Device) -> Result<Device> {
   let uuids = device.uuids().await?.map(|set| {
      let mut uuids: Vec<_> = set.into_iter().collect();
      uuids.sort();
      uuids
   });
   let kind = match device.address_type().await? {
      AddressType::BrEdr => {
         let le = uuids
            .as_ref()
            .is_some_and(|u| u.contains(&GAP_SERVICE) || u.contains(&GATT_SERVICE));
         if le { DeviceType::Dual } else { DeviceType::Classic }
      },
      _ => DeviceType::Le,
   };
   let bond_state = if device.is_paired().await? {
      BondState::Bonded
   } else {
      BondState::Unbonded
   };

   Ok(Device {
      address: device.address(),
      name: device.name().await?.map(SmolStr::from),
      kind,
      bond_state,
      class: device.class().await?,
      uuids,
      rssi: device.rssi().await?,
   })
}

impl Radio for BluezRadio {
   type Stream = Stream;

   /// BlueZ enforces access through D-Bus policy; denials surface as
   /// errors from the calls themselves.
   fn has_permissions(&self) -> bool {
      true
   }

   async fn is_enabled(&self) -> Result<bool> {
      Ok(self.adapter.is_powered().await?)
   }

   async fn register(&self, events: mpsc::Sender<RadioEvent>) -> Result<Registration> {
      let mut adapter_events = self.adapter.events().await?;
      *self.events.lock() = Some(events.clone());

      let name = SmolStr::from(self.adapter.name());
      let monitor = tokio::spawn(async move {
         while let Some(event) = adapter_events.next().await {
            if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event
               && events.send(RadioEvent::AdapterStateChanged(powered)).await.is_err()
            {
               break;
            }
         }
         debug!("Adapter event monitor for {name} stopped");
      });
      Ok(Registration::new().with_task(monitor))
   }

   fn is_discovering(&self) -> bool {
      self
         .discovery
         .lock()
         .as_ref()
         .is_some_and(|task| !task.is_finished())
   }

   async fn start_discovery(&self) -> Result<()> {
      let events = self.events()?;
      let found = self.adapter.discover_devices().await?;
      let adapter = self.adapter.clone();
      let window = self.discovery_timeout;

      let task = tokio::spawn(async move {
         let _ = events.send(RadioEvent::DiscoveryStarted).await;
         let mut found = pin!(found);
         let scan = async {
            while let Some(event) = found.next().await {
               let AdapterEvent::DeviceAdded(addr) = event else {
                  continue;
               };
               let device = match adapter.device(addr) {
                  Ok(device) => device,
                  Err(e) => {
                     debug!("Lost track of {addr}: {e}");
                     continue;
                  },
               };
               match snapshot(&device).await {
                  Ok(device) => {
                     if events.send(RadioEvent::DeviceFound(device)).await.is_err() {
                        return;
                     }
                  },
                  Err(e) => debug!("Could not read properties of {addr}: {e}"),
               }
            }
         };
         if time::timeout(window, scan).await.is_err() {
            debug!("Discovery window of {window:?} elapsed");
         }
         let _ = events.send(RadioEvent::DiscoveryFinished).await;
      });

      if let Some(previous) = self.discovery.lock().replace(task) {
         previous.abort();
      }
      Ok(())
   }

   async fn cancel_discovery(&self) -> Result<()> {
      let running = self.discovery.lock().take().filter(|task| !task.is_finished());
      if let Some(task) = running {
         task.abort();
         debug!("Discovery cancelled");
         self.events()?.send(RadioEvent::DiscoveryFinished).await.ok();
      }
      Ok(())
   }

   async fn bonded_devices(&self) -> Result<Vec<Device>> {
      let mut paired = Vec::new();
      for addr in self.adapter.device_addresses().await? {
         let device = self.adapter.device(addr)?;
         if !device.is_paired().await? {
            continue;
         }
         match snapshot(&device).await {
            Ok(device) => paired.push(device),
            Err(e) => warn!("Skipping paired device {addr}: {e}"),
         }
      }
      Ok(paired)
   }

   async fn device(&self, address: Address) -> Result<Device> {
      let device = self.adapter.device(address)?;
      snapshot(&device).await
   }

   async fn connect(&self, address: Address, service: Uuid) -> Result<Stream> {
      match self.channel {
         Some(channel) => self.connect_channel(address, channel).await,
         None => self.connect_profile(address, service).await,
      }
   }
}
