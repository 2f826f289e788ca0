//! Control requests and the descriptor walk used to enumerate a HID
//! device.

use heapless::Vec;

use crate::endpoint::EndpointToken;
use crate::registry::DeviceKind;

/// HID interfaces tracked per device (keyboard, mouse, one vendor extra).
pub const MAX_HID_INTERFACES: usize = 3;

const DESC_TYPE_DEVICE: u8 = 0x01;
const DESC_TYPE_CONFIGURATION: u8 = 0x02;
const DESC_TYPE_INTERFACE: u8 = 0x04;
const DESC_TYPE_ENDPOINT: u8 = 0x05;

const CLASS_HID: u8 = 0x03;
const SUBCLASS_BOOT: u8 = 0x01;
const PROTOCOL_KEYBOARD: u8 = 0x01;
const PROTOCOL_MOUSE: u8 = 0x02;

/// Standard 8-byte SETUP packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub const fn get_descriptor(desc_type: u8, desc_index: u8, length: u16) -> Self {
        Self {
            request_type: 0x80,
            request: 0x06,
            value: ((desc_type as u16) << 8) | (desc_index as u16),
            index: 0,
            length,
        }
    }

    pub const fn device_descriptor(length: u16) -> Self {
        Self::get_descriptor(DESC_TYPE_DEVICE, 0, length)
    }

    pub const fn configuration_descriptor(length: u16) -> Self {
        Self::get_descriptor(DESC_TYPE_CONFIGURATION, 0, length)
    }

    pub const fn set_address(address: u8) -> Self {
        Self {
            request_type: 0x00,
            request: 0x05,
            value: address as u16,
            index: 0,
            length: 0,
        }
    }

    pub const fn set_configuration(config: u8) -> Self {
        Self {
            request_type: 0x00,
            request: 0x09,
            value: config as u16,
            index: 0,
            length: 0,
        }
    }

    /// HID SET_IDLE with duration 0: report only on change.
    pub const fn hid_set_idle(interface: u8) -> Self {
        Self {
            request_type: 0x21,
            request: 0x0A,
            value: 0,
            index: interface as u16,
            length: 0,
        }
    }

    /// HID SET_PROTOCOL; `boot` selects the fixed boot report layout.
    pub const fn hid_set_protocol(interface: u8, boot: bool) -> Self {
        Self {
            request_type: 0x21,
            request: 0x0B,
            value: if boot { 0 } else { 1 },
            index: interface as u16,
            length: 0,
        }
    }

    pub fn is_device_to_host(&self) -> bool {
        self.request_type & 0x80 != 0
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let [v0, v1] = self.value.to_le_bytes();
        let [i0, i1] = self.index.to_le_bytes();
        let [l0, l1] = self.length.to_le_bytes();
        [self.request_type, self.request, v0, v1, i0, i1, l0, l1]
    }
}

/// One HID interface with its interrupt IN endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HidInterface {
    pub number: u8,
    pub kind: DeviceKind,
    /// Boot-protocol capable (subclass 1).
    pub boot: bool,
    pub endpoint: EndpointToken,
    pub max_packet: u16,
}

/// What enumeration needs from a configuration descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigSummary {
    pub config_value: u8,
    pub interfaces: Vec<HidInterface, MAX_HID_INTERFACES>,
}

/// `bMaxPacketSize0` from the first 8 bytes of a device descriptor.
pub fn ep0_max_packet(device_desc: &[u8]) -> Option<u8> {
    match device_desc {
        [_, DESC_TYPE_DEVICE, _, _, _, _, _, size, ..] if *size > 0 => Some(*size),
        _ => None,
    }
}

/// `wTotalLength` from a configuration descriptor header.
pub fn config_total_length(header: &[u8]) -> Option<u16> {
    match header {
        [_, DESC_TYPE_CONFIGURATION, lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

fn classify(subclass: u8, protocol: u8) -> DeviceKind {
    match (subclass, protocol) {
        (SUBCLASS_BOOT, PROTOCOL_KEYBOARD) => DeviceKind::Keyboard,
        (SUBCLASS_BOOT, PROTOCOL_MOUSE) => DeviceKind::Mouse,
        _ => DeviceKind::OtherHid,
    }
}

/// Walk a full configuration descriptor and collect every HID interface
/// that has an interrupt IN endpoint. Truncated trailing descriptors are
/// ignored.
pub fn parse_configuration(data: &[u8]) -> Option<ConfigSummary> {
    if data.len() < 9 || data[1] != DESC_TYPE_CONFIGURATION {
        return None;
    }

    let mut summary = ConfigSummary {
        config_value: data[5],
        interfaces: Vec::new(),
    };
    // (number, subclass, protocol) of the HID interface being walked.
    let mut current: Option<(u8, u8, u8)> = None;

    let mut offset = usize::from(data[0]);
    while offset + 2 <= data.len() {
        let len = usize::from(data[offset]);
        if len < 2 || offset + len > data.len() {
            break;
        }
        let desc = &data[offset..offset + len];

        match desc[1] {
            DESC_TYPE_INTERFACE if len >= 9 => {
                current = (desc[5] == CLASS_HID).then_some((desc[2], desc[6], desc[7]));
            }
            DESC_TYPE_ENDPOINT if len >= 7 => {
                let is_in = desc[2] & 0x80 != 0;
                let is_interrupt = desc[3] & 0x03 == 0x03;
                if let Some((number, subclass, protocol)) = current.filter(|_| is_in && is_interrupt) {
                    let iface = HidInterface {
                        number,
                        kind: classify(subclass, protocol),
                        boot: subclass == SUBCLASS_BOOT,
                        endpoint: EndpointToken::new(desc[2]),
                        max_packet: u16::from_le_bytes([desc[4], desc[5]]) & 0x07FF,
                    };
                    // First IN endpoint per interface only.
                    current = None;
                    if summary.interfaces.push(iface).is_err() {
                        break;
                    }
                }
            }
            _ => {}
        }

        offset += len;
    }

    Some(summary)
}
