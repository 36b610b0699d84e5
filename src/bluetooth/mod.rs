//! Bluetooth layer of the SPP chat service.
//!
//! The platform adapter sits behind [`radio::Radio`]; the registry, the
//! session and its transport are driven by the [`manager`] actor.

pub mod bluez;
pub mod device;
pub mod manager;
pub mod radio;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(test)]
pub mod fake;
