//! Static label tables and signal-strength arithmetic.
//!
//! Everything here is a pure function of its inputs.

use std::sync::LazyLock;

use regex::Regex;

use crate::bluetooth::device::{BondState, Device, DeviceType, MajorDeviceClass};

pub const SPP_UUID: &str = "00001101-0000-1000-8000-00805F9B34FB";
pub const A2DP_UUID: &str = "0000110D-0000-1000-8000-00805F9B34FB";
pub const HID_UUID: &str = "00001124-0000-1000-8000-00805F9B34FB";
pub const HSP_UUID: &str = "00001108-0000-1000-8000-00805F9B34FB";
pub const HFP_UUID: &str = "0000111E-0000-1000-8000-00805F9B34FB";
pub const OBEX_UUID: &str = "00001105-0000-1000-8000-00805F9B34FB";
pub const HEART_RATE_UUID: &str = "0000180D-0000-1000-8000-00805F9B34FB";
pub const BATTERY_UUID: &str = "0000180F-0000-1000-8000-00805F9B34FB";
pub const DEVICE_INFO_UUID: &str = "0000180A-0000-1000-8000-00805F9B34FB";

pub const UNKNOWN_SERVICE: &str = "Unknown service";
pub const UNKNOWN_DEVICE: &str = "Unknown device";

/// Reference transmit power at one metre, in dBm.
pub const DEFAULT_TX_POWER: i32 = -59;

const KNOWN_SERVICES: &[(&str, &str)] = &[
   (SPP_UUID, "Serial Port (SPP)"),
   (A2DP_UUID, "Advanced Audio Distribution (A2DP)"),
   (HID_UUID, "Human Interface Device (HID)"),
   (HSP_UUID, "Headset (HSP)"),
   (HFP_UUID, "Hands-Free (HFP)"),
   (OBEX_UUID, "Object Exchange (OBEX)"),
   (HEART_RATE_UUID, "Heart Rate"),
   (BATTERY_UUID, "Battery Service"),
   (DEVICE_INFO_UUID, "Device Information"),
];

static MAC_PATTERN: LazyLock<Regex> =
   LazyLock::new(|| Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})$").unwrap());

pub fn service_name_by_uuid(uuid: &str) -> &'static str {
   KNOWN_SERVICES
      .iter()
      .find(|(id, _)| id.eq_ignore_ascii_case(uuid))
      .map_or(UNKNOWN_SERVICE, |(_, name)| name)
}

pub fn device_supports_uuid(device: &Device, uuid: &str) -> bool {
   device
      .uuids
      .as_ref()
      .is_some_and(|uuids| uuids.iter().any(|u| u.to_string().eq_ignore_ascii_case(uuid)))
}

pub const fn device_type_description(kind: DeviceType) -> &'static str {
   match kind {
      DeviceType::Classic => "Classic",
      DeviceType::Le => "Low Energy (BLE)",
      DeviceType::Dual => "Dual mode",
      DeviceType::Unknown => "Unknown type",
   }
}

pub const fn bond_state_description(state: BondState) -> &'static str {
   match state {
      BondState::Unbonded => "Not paired",
      BondState::Bonding => "Pairing",
      BondState::Bonded => "Paired",
   }
}

pub const fn device_class_description(class: Option<MajorDeviceClass>) -> &'static str {
   match class {
      Some(MajorDeviceClass::AudioVideo) => "Audio/Video",
      Some(MajorDeviceClass::Computer) => "Computer",
      Some(MajorDeviceClass::Health) => "Health",
      Some(MajorDeviceClass::Imaging) => "Imaging",
      Some(MajorDeviceClass::Misc) => "Misc",
      Some(MajorDeviceClass::Networking) => "Networking",
      Some(MajorDeviceClass::Peripheral) => "Peripheral",
      Some(MajorDeviceClass::Phone) => "Phone",
      Some(MajorDeviceClass::Toy) => "Toy",
      Some(MajorDeviceClass::Uncategorized) => "Uncategorized",
      Some(MajorDeviceClass::Wearable) => "Wearable",
      None => "Unknown class",
   }
}

/// Uppercases and regroups hex digits into colon-separated octets.
///
/// Existing `:`/`-` separators are dropped first, so already formatted
/// input comes back unchanged.
pub fn format_mac_address(address: &str) -> String {
   let digits: Vec<char> = address
      .chars()
      .filter(|c| !matches!(c, ':' | '-'))
      .map(|c| c.to_ascii_uppercase())
      .collect();
   digits
      .chunks(2)
      .map(|pair| pair.iter().collect::<String>())
      .collect::<Vec<_>>()
      .join(":")
}

pub fn is_valid_mac_address(address: &str) -> bool {
   MAC_PATTERN.is_match(address)
}

pub const fn signal_strength_description(rssi: i32) -> &'static str {
   match rssi {
      -30.. => "Excellent",
      -50.. => "Very strong",
      -60.. => "Strong",
      -70.. => "Medium",
      -80.. => "Weak",
      _ => "Very weak",
   }
}

/// Approximate distance in metres; `-1.0` when the reading is invalid.
pub fn estimate_distance(rssi: i32, tx_power: i32) -> f64 {
   if rssi == 0 {
      return -1.0;
   }

   let ratio = f64::from(tx_power) / f64::from(rssi);
   if ratio < 1.0 {
      ratio.powi(10)
   } else {
      0.89976 * ratio.powf(7.7095) + 0.111
   }
}

#[cfg(test)]
mod tests {
   use bluer::Address;
   use uuid::Uuid;

   use super::*;

   #[test]
   fn test_format_mac_address() {
      assert_eq!(format_mac_address("aabbccddeeff"), "AA:BB:CC:DD:EE:FF");
      assert_eq!(format_mac_address("aa-bb-cc-dd-ee-ff"), "AA:BB:CC:DD:EE:FF");
      assert_eq!(format_mac_address("AA:BB:CC:DD:EE:FF"), "AA:BB:CC:DD:EE:FF");
      assert_eq!(format_mac_address("abc"), "AB:C");
      assert_eq!(format_mac_address(""), "");
   }

   #[test]
   fn test_mac_validation() {
      assert!(is_valid_mac_address("AA:BB:CC:DD:EE:FF"));
      assert!(is_valid_mac_address("aa-bb-cc-dd-ee-ff"));
      assert!(!is_valid_mac_address("AABBCCDDEEFF"));
      assert!(!is_valid_mac_address("AA:BB:CC:DD:EE"));
      assert!(!is_valid_mac_address("GG:BB:CC:DD:EE:FF"));
      assert!(!is_valid_mac_address(" AA:BB:CC:DD:EE:FF"));
   }

   #[test]
   fn test_service_lookup() {
      assert_eq!(service_name_by_uuid(SPP_UUID), "Serial Port (SPP)");
      assert_eq!(
         service_name_by_uuid("0000180f-0000-1000-8000-00805f9b34fb"),
         "Battery Service"
      );
      assert_eq!(
         service_name_by_uuid("12345678-0000-1000-8000-00805f9b34fb"),
         UNKNOWN_SERVICE
      );
   }

   #[test]
   fn test_device_supports_uuid() {
      let mut dev = Device::new(Address::any());
      assert!(!device_supports_uuid(&dev, SPP_UUID));

      dev.uuids = Some(vec![Uuid::parse_str(HFP_UUID).unwrap()]);
      assert!(!device_supports_uuid(&dev, SPP_UUID));
      assert!(device_supports_uuid(&dev, &HFP_UUID.to_lowercase()));
   }

   #[test]
   fn test_signal_buckets() {
      assert_eq!(signal_strength_description(-20), "Excellent");
      assert_eq!(signal_strength_description(-30), "Excellent");
      assert_eq!(signal_strength_description(-31), "Very strong");
      assert_eq!(signal_strength_description(-60), "Strong");
      assert_eq!(signal_strength_description(-75), "Weak");
      assert_eq!(signal_strength_description(-80), "Weak");
      assert_eq!(signal_strength_description(-81), "Very weak");
   }

   #[test]
   fn test_distance_invalid_reading() {
      for tx in [-80, -59, -40, 0, 4] {
         assert_eq!(estimate_distance(0, tx), -1.0);
      }
   }

   #[test]
   fn test_distance_branches() {
      // At the reference power the estimate is about one metre.
      let at_reference = estimate_distance(-59, DEFAULT_TX_POWER);
      assert!((at_reference - 1.01076).abs() < 1e-4, "was {at_reference}");

      // tx/rssi >= 1
      let near = estimate_distance(-50, DEFAULT_TX_POWER);
      assert!(near > 1.0 && near < 6.0, "was {near}");

      // tx/rssi < 1
      let far = estimate_distance(-90, DEFAULT_TX_POWER);
      assert!((far - (59.0f64 / 90.0).powi(10)).abs() < 1e-12);
   }

   #[test]
   fn test_labels() {
      assert_eq!(device_type_description(DeviceType::Le), "Low Energy (BLE)");
      assert_eq!(bond_state_description(BondState::Bonding), "Pairing");
      assert_eq!(device_class_description(None), "Unknown class");
      assert_eq!(
         device_class_description(Some(MajorDeviceClass::Wearable)),
         "Wearable"
      );
   }
}
