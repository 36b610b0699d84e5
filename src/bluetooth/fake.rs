//! In-memory [`Radio`] for tests.

use std::{
   collections::{HashMap, HashSet},
   future,
   io,
   sync::{
      Arc,
      atomic::{AtomicBool, Ordering},
   },
};

use bluer::Address;
use parking_lot::Mutex;
use tokio::{
   io::{DuplexStream, duplex},
   sync::{Notify, mpsc},
};
use uuid::Uuid;

use crate::{
   bluetooth::{
      device::Device,
      radio::{Radio, RadioEvent, Registration},
   },
   error::{Result, SppError},
};

#[derive(Default)]
pub struct FakeState {
   pub permissions: bool,
   pub enabled: bool,
   pub discovering: bool,
   pub fail_connect: bool,
   /// Connects to these addresses wait for [`FakeRadio::release_held`].
   pub held: HashSet<Address>,
   pub bonded: Vec<Device>,
   pub devices: HashMap<Address, Device>,
   /// Far ends of every stream handed out.
   pub peers: Vec<DuplexStream>,
   pub events: Option<mpsc::Sender<RadioEvent>>,
   pub deregistered: Arc<AtomicBool>,
   pub connect_calls: usize,
   pub discovery_starts: usize,
   pub discovery_cancels: usize,
}

impl FakeState {
   pub fn ready() -> Self {
      Self {
         permissions: true,
         enabled: true,
         ..Self::default()
      }
   }
}

#[derive(Clone)]
pub struct FakeRadio {
   state: Arc<Mutex<FakeState>>,
   release: Arc<Notify>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
   fn drop(&mut self) {
      self.0.store(true, Ordering::SeqCst);
   }
}

impl FakeRadio {
   pub fn new(state: FakeState) -> Self {
      Self {
         state: Arc::new(Mutex::new(state)),
         release: Arc::new(Notify::new()),
      }
   }

   pub fn state(&self) -> Arc<Mutex<FakeState>> {
      self.state.clone()
   }

   pub fn add_device(&self, device: Device) {
      self.state.lock().devices.insert(device.address, device);
   }

   pub async fn emit(&self, event: RadioEvent) {
      let tx = self.state.lock().events.clone();
      if let Some(tx) = tx {
         let _ = tx.send(event).await;
      }
   }

   pub fn take_peer(&self, index: usize) -> DuplexStream {
      self.state.lock().peers.remove(index)
   }

   pub fn pop_peer(&self) -> Option<DuplexStream> {
      self.state.lock().peers.pop()
   }

   pub fn release_held(&self) {
      self.state.lock().held.clear();
      self.release.notify_waiters();
   }
}

impl Radio for FakeRadio {
   type Stream = DuplexStream;

   fn has_permissions(&self) -> bool {
      self.state.lock().permissions
   }

   async fn is_enabled(&self) -> Result<bool> {
      Ok(self.state.lock().enabled)
   }

   async fn register(&self, events: mpsc::Sender<RadioEvent>) -> Result<Registration> {
      let flag = {
         let mut state = self.state.lock();
         state.events = Some(events);
         DropFlag(state.deregistered.clone())
      };
      let task = tokio::spawn(async move {
         let _flag = flag;
         future::pending::<()>().await;
      });
      Ok(Registration::new().with_task(task))
   }

   fn is_discovering(&self) -> bool {
      self.state.lock().discovering
   }

   async fn start_discovery(&self) -> Result<()> {
      {
         let mut state = self.state.lock();
         state.discovering = true;
         state.discovery_starts += 1;
      }
      self.emit(RadioEvent::DiscoveryStarted).await;
      Ok(())
   }

   async fn cancel_discovery(&self) -> Result<()> {
      let was_discovering = {
         let mut state = self.state.lock();
         let was = state.discovering;
         if was {
            state.discovering = false;
            state.discovery_cancels += 1;
         }
         was
      };
      if was_discovering {
         self.emit(RadioEvent::DiscoveryFinished).await;
      }
      Ok(())
   }

   async fn bonded_devices(&self) -> Result<Vec<Device>> {
      Ok(self.state.lock().bonded.clone())
   }

   async fn device(&self, address: Address) -> Result<Device> {
      self
         .state
         .lock()
         .devices
         .get(&address)
         .cloned()
         .ok_or_else(|| SppError::InvalidAddress(address.to_string()))
   }

   async fn connect(&self, address: Address, _service: Uuid) -> Result<DuplexStream> {
      let held = {
         let mut state = self.state.lock();
         state.connect_calls += 1;
         state.held.contains(&address)
      };
      if held {
         self.release.notified().await;
      }

      let mut state = self.state.lock();
      if state.fail_connect {
         return Err(SppError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "host is down",
         )));
      }
      let (ours, theirs) = duplex(4096);
      state.peers.push(theirs);
      Ok(ours)
   }
}
