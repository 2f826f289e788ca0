//! Interface to the USB host silicon driver.
//!
//! The bridge never talks to hardware directly; it drives an implementor
//! of [`UsbHost`]. On target that is the MAX3421E driver, in tests a mock.
//! All calls are synchronous and must not be re-entered.

pub mod descriptor;
#[cfg(feature = "embedded")]
pub mod max3421e;

use crate::endpoint::EndpointToken;
use crate::error::UsbError;
use crate::registry::DeviceKind;

/// Edge reported by the root port since the last poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HotplugEvent {
    None,
    Connected,
    Disconnected,
}

/// Where a HID interface of a given kind was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceLocation {
    pub port: u8,
    pub interface: u8,
}

pub trait UsbHost {
    /// Consume the pending connect/disconnect edge, if any.
    fn poll_hotplug(&mut self) -> HotplugEvent;

    /// Reset and re-enumerate the device on the root port.
    fn reinit_root_device(&mut self) -> Result<(), UsbError>;

    /// Tear down and bring up the whole host stack (used by recovery).
    fn reinit_stack(&mut self) -> Result<(), UsbError>;

    /// `true` once the root device is enumerated and configured.
    fn root_device_ready(&self) -> bool;

    /// Search enumerated devices for an interface of `kind`.
    fn search_device(&mut self, kind: DeviceKind) -> Option<DeviceLocation>;

    /// Interrupt IN endpoint the driver recorded for `location`.
    fn endpoint_token(&self, location: DeviceLocation) -> Option<EndpointToken>;

    /// Write back the token after a toggle so a later lookup agrees.
    fn store_endpoint_token(&mut self, location: DeviceLocation, token: EndpointToken);

    fn device_connected(&self, port: u8) -> bool;

    fn select_port(&mut self, port: u8);

    /// Run one IN transaction on the selected port. Received bytes land
    /// in `buf`; the return value is how many.
    fn transact_in(&mut self, token: EndpointToken, buf: &mut [u8]) -> Result<usize, UsbError>;
}
