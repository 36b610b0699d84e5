//! Discovered and paired device sets.

use crate::bluetooth::device::Device;

/// Owns the discovered set and the paired set.
///
/// Discovered devices keep arrival order, are keyed by address and are
/// only ever removed all at once when a new scan starts. The paired set is
/// replaced wholesale on every refresh.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
   discovered: Vec<Device>,
   paired: Vec<Device>,
}

impl DeviceRegistry {
   pub const fn new() -> Self {
      Self {
         discovered: Vec::new(),
         paired: Vec::new(),
      }
   }

   /// Records a discovery result. Returns `true` if the device was added.
   ///
   /// Devices without a usable name are dropped, as are repeat
   /// notifications for an address already present.
   pub fn on_device_found(&mut self, device: Device) -> bool {
      if device.display_name().is_none() {
         return false;
      }
      if self.discovered.iter().any(|d| d.address == device.address) {
         return false;
      }
      self.discovered.push(device);
      true
   }

   pub fn clear_discovered(&mut self) {
      self.discovered.clear();
   }

   pub fn set_paired(&mut self, devices: Vec<Device>) {
      self.paired = devices;
   }

   pub fn discovered(&self) -> &[Device] {
      &self.discovered
   }

   pub fn paired(&self) -> &[Device] {
      &self.paired
   }

   /// Looks `address` up in the discovered set, then in the paired set.
   pub fn find(&self, address: bluer::Address) -> Option<&Device> {
      self
         .discovered
         .iter()
         .chain(&self.paired)
         .find(|d| d.address == address)
   }
}
