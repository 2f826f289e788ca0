//! MAX3421E SPI USB host controller driving a single root device.
//!
//! Only what a boot keyboard or mouse needs: attach detection, bus
//! reset, enumeration at address 1, SET_CONFIGURATION / SET_IDLE /
//! SET_PROTOCOL, and interrupt IN transfers with caller-managed DATA
//! toggles. No hubs.

use defmt::{debug, info, warn};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use heapless::Vec;

use super::descriptor::{self, HidInterface, SetupPacket, MAX_HID_INTERFACES};
use super::{DeviceLocation, HotplugEvent, UsbHost};
use crate::endpoint::EndpointToken;
use crate::error::UsbError;
use crate::registry::DeviceKind;

/// The only port this controller has.
pub const ROOT_PORT: u8 = 0;

const DEVICE_ADDRESS: u8 = 1;
const NAK_LIMIT: u16 = 500;
const TRANSFER_TIMEOUT_US: u32 = 5_000;
const CONFIG_BUF_LEN: usize = 256;
/// Result code used when the SPI bus itself fails.
const SPI_FAULT: u8 = 0xFF;

mod reg {
    pub const RCVFIFO: u8 = 1;
    pub const SUDFIFO: u8 = 4;
    pub const RCVBC: u8 = 6;
    pub const USBIRQ: u8 = 13;
    pub const USBCTL: u8 = 15;
    pub const PINCTL: u8 = 17;
    pub const REVISION: u8 = 18;
    pub const HIRQ: u8 = 25;
    pub const HIEN: u8 = 26;
    pub const MODE: u8 = 27;
    pub const PERADDR: u8 = 28;
    pub const HCTL: u8 = 29;
    pub const HXFR: u8 = 30;
    pub const HRSL: u8 = 31;
}

mod bit {
    // USBIRQ / USBCTL
    pub const OSCOKIRQ: u8 = 0x01;
    pub const CHIPRES: u8 = 0x20;
    // PINCTL
    pub const FDUPSPI: u8 = 0x10;
    pub const POSINT: u8 = 0x04;
    // MODE
    pub const HOST: u8 = 0x01;
    pub const LOWSPEED: u8 = 0x02;
    pub const SOFKAENAB: u8 = 0x08;
    pub const DMPULLDN: u8 = 0x40;
    pub const DPPULLDN: u8 = 0x80;
    // HIRQ / HIEN
    pub const RCVDAVIRQ: u8 = 0x04;
    pub const CONDETIRQ: u8 = 0x20;
    pub const HXFRDNIRQ: u8 = 0x80;
    // HCTL
    pub const BUSRST: u8 = 0x01;
    pub const SAMPLEBUS: u8 = 0x04;
    pub const RCVTOG0: u8 = 0x10;
    pub const RCVTOG1: u8 = 0x20;
    // HRSL
    pub const KSTATUS: u8 = 0x40;
    pub const JSTATUS: u8 = 0x80;
}

mod hxfr {
    pub const SETUP: u8 = 0x10;
    pub const IN: u8 = 0x00;
    pub const HS_IN: u8 = 0x80;
    pub const HS_OUT: u8 = 0xA0;
}

mod hrsl {
    pub const SUCCESS: u8 = 0x00;
    pub const NAK: u8 = 0x04;
    pub const STALL: u8 = 0x05;
    pub const TIMEOUT: u8 = 0x0E;
}

fn check(code: u8) -> Result<(), UsbError> {
    match code {
        hrsl::SUCCESS => Ok(()),
        hrsl::NAK => Err(UsbError::Nak),
        hrsl::STALL => Err(UsbError::Stall),
        hrsl::TIMEOUT => Err(UsbError::Timeout),
        other => Err(UsbError::Transaction(other)),
    }
}

fn spi_fault<E>(_: E) -> UsbError {
    UsbError::Transaction(SPI_FAULT)
}

struct RootDevice {
    ep0_max_packet: u8,
    interfaces: Vec<HidInterface, MAX_HID_INTERFACES>,
}

pub struct Max3421e<SPI, SS, RST, D> {
    spi: SPI,
    ss: SS,
    reset: RST,
    delay: D,
    attached: bool,
    low_speed: bool,
    pending_edge: HotplugEvent,
    device: Option<RootDevice>,
}

impl<SPI, SS, RST, D> Max3421e<SPI, SS, RST, D>
where
    SPI: SpiBus<u8>,
    SS: OutputPin,
    RST: OutputPin,
    D: DelayNs,
{
    pub fn new(spi: SPI, ss: SS, reset: RST, delay: D) -> Self {
        Self {
            spi,
            ss,
            reset,
            delay,
            attached: false,
            low_speed: false,
            pending_edge: HotplugEvent::None,
            device: None,
        }
    }

    // ════════════════════════════════════════════════════════════════════
    // SPI register access
    // ════════════════════════════════════════════════════════════════════

    fn with_chip<T>(
        &mut self,
        f: impl FnOnce(&mut SPI) -> Result<T, SPI::Error>,
    ) -> Result<T, UsbError> {
        self.ss.set_low().map_err(spi_fault)?;
        let result = f(&mut self.spi).and_then(|v| self.spi.flush().map(|_| v));
        let _ = self.ss.set_high();
        result.map_err(spi_fault)
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, UsbError> {
        self.with_chip(|spi| {
            let mut frame = [reg << 3, 0];
            spi.transfer_in_place(&mut frame)?;
            Ok(frame[1])
        })
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), UsbError> {
        self.with_chip(|spi| spi.write(&[(reg << 3) | 0x02, value]))
    }

    fn read_fifo(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), UsbError> {
        self.with_chip(|spi| {
            spi.write(&[reg << 3])?;
            spi.read(buf)
        })
    }

    fn write_fifo(&mut self, reg: u8, data: &[u8]) -> Result<(), UsbError> {
        self.with_chip(|spi| {
            spi.write(&[(reg << 3) | 0x02])?;
            spi.write(data)
        })
    }

    // ════════════════════════════════════════════════════════════════════
    // Bus state
    // ════════════════════════════════════════════════════════════════════

    fn reset_chip(&mut self) -> Result<(), UsbError> {
        let _ = self.reset.set_low();
        self.delay.delay_ms(1);
        let _ = self.reset.set_high();
        self.delay.delay_ms(1);

        self.write_reg(reg::PINCTL, bit::FDUPSPI | bit::POSINT)?;
        self.write_reg(reg::USBCTL, bit::CHIPRES)?;
        self.write_reg(reg::USBCTL, 0)?;

        let mut waited_ms = 0;
        while self.read_reg(reg::USBIRQ)? & bit::OSCOKIRQ == 0 {
            if waited_ms >= 10 {
                warn!("MAX3421E: oscillator did not start");
                return Err(UsbError::Timeout);
            }
            self.delay.delay_ms(1);
            waited_ms += 1;
        }

        let revision = self.read_reg(reg::REVISION)?;
        debug!("MAX3421E: revision {=u8:#04x}", revision);

        self.write_reg(reg::MODE, bit::HOST | bit::DPPULLDN | bit::DMPULLDN)?;
        self.write_reg(reg::HIEN, bit::CONDETIRQ)?;
        self.write_reg(reg::HIRQ, 0xFF)?;
        Ok(())
    }

    /// Sample J/K and update `attached` / `low_speed`. Returns whether a
    /// device is present.
    fn sample_bus(&mut self) -> Result<bool, UsbError> {
        self.write_reg(reg::HCTL, bit::SAMPLEBUS)?;
        while self.read_reg(reg::HCTL)? & bit::SAMPLEBUS != 0 {}

        let status = self.read_reg(reg::HRSL)? & (bit::JSTATUS | bit::KSTATUS);
        let mut mode = bit::HOST | bit::DPPULLDN | bit::DMPULLDN;
        self.attached = status != 0;
        // In full-speed mode a low-speed device idles in K.
        self.low_speed = status == bit::KSTATUS;
        if self.attached {
            mode |= bit::SOFKAENAB;
            if self.low_speed {
                mode |= bit::LOWSPEED;
            }
        }
        self.write_reg(reg::MODE, mode)?;
        Ok(self.attached)
    }

    fn bus_reset(&mut self) -> Result<(), UsbError> {
        self.write_reg(reg::HCTL, bit::BUSRST)?;
        let mut waited_ms = 0;
        while self.read_reg(reg::HCTL)? & bit::BUSRST != 0 {
            if waited_ms >= 100 {
                return Err(UsbError::Timeout);
            }
            self.delay.delay_ms(1);
            waited_ms += 1;
        }
        self.sample_bus()?;
        // Recovery time after reset before the first request.
        self.delay.delay_ms(20);
        Ok(())
    }

    // ════════════════════════════════════════════════════════════════════
    // Transfers
    // ════════════════════════════════════════════════════════════════════

    /// Launch one transaction and wait for it; returns the HRSL result.
    fn dispatch(&mut self, request: u8) -> Result<u8, UsbError> {
        self.write_reg(reg::HXFR, request)?;
        let mut waited_us = 0;
        while self.read_reg(reg::HIRQ)? & bit::HXFRDNIRQ == 0 {
            if waited_us >= TRANSFER_TIMEOUT_US {
                return Err(UsbError::Timeout);
            }
            self.delay.delay_us(10);
            waited_us += 10;
        }
        self.write_reg(reg::HIRQ, bit::HXFRDNIRQ)?;
        Ok(self.read_reg(reg::HRSL)? & 0x0F)
    }

    /// Control-pipe transaction; NAKs are retried.
    fn dispatch_retrying(&mut self, request: u8) -> Result<(), UsbError> {
        for _ in 0..NAK_LIMIT {
            match check(self.dispatch(request)?) {
                Err(UsbError::Nak) => continue,
                other => return other,
            }
        }
        Err(UsbError::Timeout)
    }

    fn take_in_packet(&mut self, buf: &mut [u8]) -> Result<usize, UsbError> {
        let count = usize::from(self.read_reg(reg::RCVBC)?);
        let n = count.min(buf.len());
        self.read_fifo(reg::RCVFIFO, &mut buf[..n])?;
        self.write_reg(reg::HIRQ, bit::RCVDAVIRQ)?;
        Ok(n)
    }

    fn control(
        &mut self,
        address: u8,
        ep0_max_packet: u8,
        setup: SetupPacket,
        data: &mut [u8],
    ) -> Result<usize, UsbError> {
        self.write_reg(reg::PERADDR, address)?;
        self.write_fifo(reg::SUDFIFO, &setup.to_bytes())?;
        self.dispatch_retrying(hxfr::SETUP)?;

        if !setup.is_device_to_host() || setup.length == 0 {
            self.dispatch_retrying(hxfr::HS_IN)?;
            return Ok(0);
        }

        let want = usize::from(setup.length).min(data.len());
        let max_packet = usize::from(ep0_max_packet.max(8));
        let mut received = 0;
        self.write_reg(reg::HCTL, bit::RCVTOG1)?;
        while received < want {
            self.dispatch_retrying(hxfr::IN)?;
            let n = self.take_in_packet(&mut data[received..want])?;
            received += n;
            if n < max_packet {
                break;
            }
        }
        self.dispatch_retrying(hxfr::HS_OUT)?;
        Ok(received)
    }

    fn enumerate(&mut self) -> Result<RootDevice, UsbError> {
        let mut header = [0u8; 8];
        self.control(0, 8, SetupPacket::device_descriptor(8), &mut header)?;
        let ep0 = descriptor::ep0_max_packet(&header).ok_or(UsbError::Enumeration)?;

        self.control(0, ep0, SetupPacket::set_address(DEVICE_ADDRESS), &mut [])?;
        self.delay.delay_ms(2);

        let mut config = [0u8; CONFIG_BUF_LEN];
        let n = self.control(DEVICE_ADDRESS, ep0, SetupPacket::configuration_descriptor(9), &mut config)?;
        let total = descriptor::config_total_length(&config[..n]).ok_or(UsbError::Enumeration)?;
        let total = usize::from(total).min(CONFIG_BUF_LEN) as u16;
        let n = self.control(
            DEVICE_ADDRESS,
            ep0,
            SetupPacket::configuration_descriptor(total),
            &mut config,
        )?;
        let summary = descriptor::parse_configuration(&config[..n]).ok_or(UsbError::Enumeration)?;
        if summary.interfaces.is_empty() {
            warn!("MAX3421E: device has no HID interface");
            return Err(UsbError::Enumeration);
        }

        self.control(
            DEVICE_ADDRESS,
            ep0,
            SetupPacket::set_configuration(summary.config_value),
            &mut [],
        )?;

        for iface in &summary.interfaces {
            // Not every device supports these; a STALL is fine.
            let _ = self.control(DEVICE_ADDRESS, ep0, SetupPacket::hid_set_idle(iface.number), &mut []);
            if iface.boot {
                let _ = self.control(
                    DEVICE_ADDRESS,
                    ep0,
                    SetupPacket::hid_set_protocol(iface.number, true),
                    &mut [],
                );
            }
            info!(
                "MAX3421E: interface {} {} on EP{}",
                iface.number,
                iface.kind.name(),
                iface.endpoint.address()
            );
        }

        Ok(RootDevice {
            ep0_max_packet: ep0,
            interfaces: summary.interfaces,
        })
    }

    fn interface(&self, location: DeviceLocation) -> Option<&HidInterface> {
        if location.port != ROOT_PORT {
            return None;
        }
        self.device
            .as_ref()?
            .interfaces
            .iter()
            .find(|i| i.number == location.interface)
    }
}

impl<SPI, SS, RST, D> UsbHost for Max3421e<SPI, SS, RST, D>
where
    SPI: SpiBus<u8>,
    SS: OutputPin,
    RST: OutputPin,
    D: DelayNs,
{
    fn poll_hotplug(&mut self) -> HotplugEvent {
        let pending = core::mem::replace(&mut self.pending_edge, HotplugEvent::None);
        if pending != HotplugEvent::None {
            return pending;
        }

        let Ok(irq) = self.read_reg(reg::HIRQ) else {
            return HotplugEvent::None;
        };
        if irq & bit::CONDETIRQ == 0 {
            return HotplugEvent::None;
        }
        if self.write_reg(reg::HIRQ, bit::CONDETIRQ).is_err() {
            return HotplugEvent::None;
        }

        let was_attached = self.attached;
        match self.sample_bus() {
            Ok(true) if !was_attached => HotplugEvent::Connected,
            Ok(false) if was_attached => {
                self.device = None;
                HotplugEvent::Disconnected
            }
            _ => HotplugEvent::None,
        }
    }

    fn reinit_root_device(&mut self) -> Result<(), UsbError> {
        self.device = None;
        if !self.sample_bus()? {
            return Err(UsbError::NotConnected);
        }
        self.bus_reset()?;
        let device = self.enumerate()?;
        info!(
            "MAX3421E: root device ready ({} speed, EP0 {} bytes)",
            if self.low_speed { "low" } else { "full" },
            device.ep0_max_packet
        );
        self.device = Some(device);
        Ok(())
    }

    fn reinit_stack(&mut self) -> Result<(), UsbError> {
        info!("MAX3421E: resetting host controller");
        self.device = None;
        self.attached = false;
        self.pending_edge = HotplugEvent::None;
        self.reset_chip()?;
        if self.sample_bus()? {
            // Let the bridge run its settle and re-enumerate.
            self.pending_edge = HotplugEvent::Connected;
        }
        Ok(())
    }

    fn root_device_ready(&self) -> bool {
        self.device.is_some()
    }

    fn search_device(&mut self, kind: DeviceKind) -> Option<DeviceLocation> {
        let device = self.device.as_ref()?;
        device
            .interfaces
            .iter()
            .find(|i| i.kind == kind)
            .map(|i| DeviceLocation {
                port: ROOT_PORT,
                interface: i.number,
            })
    }

    fn endpoint_token(&self, location: DeviceLocation) -> Option<EndpointToken> {
        self.interface(location).map(|i| i.endpoint)
    }

    fn store_endpoint_token(&mut self, location: DeviceLocation, token: EndpointToken) {
        if location.port != ROOT_PORT {
            return;
        }
        if let Some(iface) = self
            .device
            .as_mut()
            .and_then(|d| d.interfaces.iter_mut().find(|i| i.number == location.interface))
        {
            iface.endpoint = token;
        }
    }

    fn device_connected(&self, port: u8) -> bool {
        port == ROOT_PORT && self.attached
    }

    fn select_port(&mut self, _port: u8) {}

    fn transact_in(&mut self, token: EndpointToken, buf: &mut [u8]) -> Result<usize, UsbError> {
        if self.device.is_none() {
            return Err(UsbError::NotConnected);
        }
        self.write_reg(reg::PERADDR, DEVICE_ADDRESS)?;
        let toggle = if token.toggle_bit() { bit::RCVTOG1 } else { bit::RCVTOG0 };
        self.write_reg(reg::HCTL, toggle)?;
        check(self.dispatch(hxfr::IN | token.address())?)?;
        self.take_in_packet(buf)
    }
}
