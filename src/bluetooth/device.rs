//! Remote device snapshot as reported by the adapter.

use bluer::Address;
use serde_json::json;
use smol_str::SmolStr;
use uuid::Uuid;

use crate::lookup;

/// Transport(s) a remote device speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum DeviceType {
   Classic,
   Le,
   Dual,
   #[default]
   Unknown,
}

/// Pairing relationship with the local adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum BondState {
   #[default]
   Unbonded,
   Bonding,
   Bonded,
}

/// Major device class, bits 8..=12 of the class-of-device value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr)]
pub enum MajorDeviceClass {
   Misc = 0x00,
   Computer = 0x01,
   Phone = 0x02,
   Networking = 0x03,
   AudioVideo = 0x04,
   Peripheral = 0x05,
   Imaging = 0x06,
   Wearable = 0x07,
   Toy = 0x08,
   Health = 0x09,
   Uncategorized = 0x1F,
}

impl MajorDeviceClass {
   pub fn from_class_of_device(cod: u32) -> Option<Self> {
      Self::from_repr(((cod >> 8) & 0x1F) as u8)
   }
}

/// Snapshot of one remote device.
///
/// The address is the identity; every other field may change between
/// snapshots of the same device.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
   pub address: Address,
   pub name: Option<SmolStr>,
   pub kind: DeviceType,
   pub bond_state: BondState,
   pub class: Option<u32>,
   pub uuids: Option<Vec<Uuid>>,
   pub rssi: Option<i16>,
}

impl Device {
   pub const fn new(address: Address) -> Self {
      Self {
         address,
         name: None,
         kind: DeviceType::Unknown,
         bond_state: BondState::Unbonded,
         class: None,
         uuids: None,
         rssi: None,
      }
   }

   pub fn with_name(mut self, name: impl Into<SmolStr>) -> Self {
      self.name = Some(name.into());
      self
   }

   /// The name trimmed of whitespace, or `None` when it is missing or blank.
   pub fn display_name(&self) -> Option<&str> {
      self
         .name
         .as_deref()
         .map(str::trim)
         .filter(|n| !n.is_empty())
   }

   pub fn major_class(&self) -> Option<MajorDeviceClass> {
      self.class.and_then(MajorDeviceClass::from_class_of_device)
   }

   pub fn to_json(&self) -> serde_json::Value {
      json!({
         "address": self.address.to_string(),
         "name": self.display_name(),
         "type": self.kind.to_string(),
         "bond_state": self.bond_state.to_string(),
         "class": self.class,
         "rssi": self.rssi,
         "uuids": self.uuids.as_ref().map(|u| u.iter().map(Uuid::to_string).collect::<Vec<_>>()),
      })
   }

   /// Detailed description with every label resolved.
   pub fn details_json(&self) -> serde_json::Value {
      let services = self.uuids.as_ref().map(|uuids| {
         uuids
            .iter()
            .map(|u| {
               let id = u.to_string();
               json!({ "uuid": id, "name": lookup::service_name_by_uuid(&id) })
            })
            .collect::<Vec<_>>()
      });
      json!({
         "address": lookup::format_mac_address(&self.address.to_string()),
         "name": self.display_name().unwrap_or(lookup::UNKNOWN_DEVICE),
         "type": lookup::device_type_description(self.kind),
         "bond_state": lookup::bond_state_description(self.bond_state),
         "class": lookup::device_class_description(self.major_class()),
         "rssi": self.rssi,
         "signal": self.rssi.map(|r| lookup::signal_strength_description(r.into())),
         "distance_m": self.rssi.map(|r| lookup::estimate_distance(r.into(), lookup::DEFAULT_TX_POWER)),
         "supports_spp": lookup::device_supports_uuid(self, lookup::SPP_UUID),
         "services": services,
      })
   }
}
