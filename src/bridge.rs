//! The bridge engine: one call to [`Bridge::poll`] is one cycle.
//!
//! A cycle runs these steps, strictly in order:
//!
//! 1. **Pending keyboard retry.** A keyboard report the BLE side refused
//!    is re-sent first. While it keeps failing nothing is read from USB,
//!    so newer key events can never overtake it.
//! 2. **Hot-plug edge.** Connect starts the settle countdown; disconnect
//!    cancels it and arms the USB reconnect machine.
//! 3. **Settle.** Once the countdown expires the root device is
//!    re-enumerated and endpoint toggles are resynchronised.
//! 4. **Discovery and eviction.**
//! 5. **Per-device IN transaction**, translate, forward.
//! 6. **Recovery tick.**
//!
//! A cycle stopped at step 1 touches no USB transfer and leaves the
//! reconnect machines frozen. Only the watchdog keeps counting; when it
//! fires, the bridge starts over exactly as [`Bridge::reinitialize`]
//! does, dropping the pending report.
//!
//! The bridge owns all mutable state; transports are borrowed per call.

use crate::ble::{BleHid, BleLinkEvent};
use crate::config::{MAX_PACKET_SIZE, NEW_DEVICE_SETTLE_MS};
use crate::endpoint::EndpointToken;
use crate::error::UsbError;
use crate::hid::{self, CanonicalReport, KeyboardLeds, KeyboardReport};
use crate::recovery::stats::{ErrorStats, StatEvent};
use crate::recovery::watchdog::FeedPolicy;
use crate::recovery::{Recovery, SystemState, TickOutcome};
use crate::registry::{DeviceKind, DeviceRegistry, EndpointBinding, UsbDeviceSlot};
use crate::usb::{DeviceLocation, HotplugEvent, UsbHost};

/// Startup parameters for the bridge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Use this endpoint for the mouse instead of the one the driver
    /// reports (vendor interfaces the driver does not track).
    pub forced_mouse_endpoint: Option<u8>,
    pub feed_policy: FeedPolicy,
}

/// How far a cycle got.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PollStatus {
    /// The pending keyboard report was refused again; USB was not read.
    Blocked,
    /// All steps ran. `forwarded` counts reports the BLE side accepted.
    Completed { forwarded: u8 },
}

pub struct Bridge {
    registry: DeviceRegistry,
    recovery: Recovery,
    pending_keyboard: Option<KeyboardReport>,
    new_device_pending: bool,
    settle_remaining_ms: u16,
    forced_mouse_endpoint: Option<EndpointToken>,
    keyboard_leds: KeyboardLeds,
    ble_connected: bool,
    rx_buf: [u8; MAX_PACKET_SIZE],
}

impl Bridge {
    pub fn new(options: BridgeOptions) -> Self {
        Self {
            registry: DeviceRegistry::new(),
            recovery: Recovery::new(options.feed_policy),
            pending_keyboard: None,
            new_device_pending: false,
            settle_remaining_ms: 0,
            forced_mouse_endpoint: options
                .forced_mouse_endpoint
                .map(EndpointToken::new)
                .filter(|t| t.is_valid()),
            keyboard_leds: KeyboardLeds::default(),
            ble_connected: false,
            rx_buf: [0; MAX_PACKET_SIZE],
        }
    }

    /// Bring the USB side up from scratch: forget every device and any
    /// pending report, then re-initialise the host stack.
    pub fn reinitialize<H: UsbHost>(&mut self, host: &mut H) {
        self.registry.clear();
        self.pending_keyboard = None;
        self.new_device_pending = false;
        self.settle_remaining_ms = 0;
        self.recovery.stats.record(StatEvent::Reset);

        if let Err(_e) = host.reinit_stack() {
            #[cfg(feature = "defmt")]
            defmt::warn!("bridge: host init failed: {}", _e);
            self.recovery.stats.record(StatEvent::UsbEnumFail);
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn recovery(&self) -> &Recovery {
        &self.recovery
    }

    pub fn recovery_mut(&mut self) -> &mut Recovery {
        &mut self.recovery
    }

    pub fn stats(&self) -> &ErrorStats {
        &self.recovery.stats
    }

    pub fn system_state(&self) -> SystemState {
        self.recovery.system_state()
    }

    pub fn pending_keyboard(&self) -> Option<&KeyboardReport> {
        self.pending_keyboard.as_ref()
    }

    /// `true` between a hot-plug connect edge and the root re-init.
    pub fn new_device_pending(&self) -> bool {
        self.new_device_pending
    }

    pub fn keyboard_leds(&self) -> KeyboardLeds {
        self.keyboard_leds
    }

    pub fn ble_connected(&self) -> bool {
        self.ble_connected
    }

    /// Link callback from the BLE HID collaborator.
    pub fn on_ble_event(&mut self, event: BleLinkEvent) {
        match event {
            BleLinkEvent::Connected => {
                self.ble_connected = true;
                self.recovery.ble.link_restored();
                self.recovery.stats.record(StatEvent::BleConnect);
            }
            BleLinkEvent::Disconnected => {
                self.ble_connected = false;
                if !self.recovery.ble.start(&mut self.recovery.stats) {
                    self.recovery.stats.record(StatEvent::BleDisconnect);
                }
            }
            BleLinkEvent::LedOutput(bits) => {
                #[cfg(feature = "defmt")]
                defmt::debug!("bridge: host LEDs {=u8:#04x}", bits);
                self.keyboard_leds = KeyboardLeds(bits);
            }
        }
    }

    /// Run one cycle. `tick_ms` is the time since the previous call.
    pub fn poll<H: UsbHost, B: BleHid>(
        &mut self,
        tick_ms: u16,
        host: &mut H,
        ble: &mut B,
    ) -> PollStatus {
        if !self.retry_pending(ble) {
            let outcome = self.recovery.tick_gated(tick_ms, host, ble);
            self.apply_outcome(outcome);
            return PollStatus::Blocked;
        }

        self.drain_hotplug(host);
        self.advance_settle(tick_ms, host);
        self.discover(host);
        self.evict(host);
        let forwarded = self.service_devices(host, ble);

        self.recovery.watchdog.feed();
        let outcome = self.recovery.tick(tick_ms, host, ble);
        self.apply_outcome(outcome);

        PollStatus::Completed { forwarded }
    }

    /// Step 1. Returns `false` if a pending report is still refused.
    fn retry_pending<B: BleHid>(&mut self, ble: &mut B) -> bool {
        let Some(report) = self.pending_keyboard else {
            return true;
        };
        match ble.send_keyboard(&report) {
            Ok(()) => {
                self.pending_keyboard = None;
                true
            }
            Err(_e) => {
                #[cfg(feature = "defmt")]
                defmt::debug!("bridge: keyboard retry refused: {}", _e);
                self.recovery.stats.record(StatEvent::BleCommFail);
                false
            }
        }
    }

    /// Step 2.
    fn drain_hotplug<H: UsbHost>(&mut self, host: &mut H) {
        match host.poll_hotplug() {
            HotplugEvent::None => {}
            HotplugEvent::Connected => {
                #[cfg(feature = "defmt")]
                defmt::info!("bridge: device attached, settling");
                self.new_device_pending = true;
                self.settle_remaining_ms = NEW_DEVICE_SETTLE_MS;
                self.recovery.stats.record(StatEvent::UsbConnect);
            }
            HotplugEvent::Disconnected => {
                #[cfg(feature = "defmt")]
                defmt::info!("bridge: device detached");
                self.new_device_pending = false;
                self.settle_remaining_ms = 0;
                if !self.recovery.usb.start(&mut self.recovery.stats) {
                    self.recovery.stats.record(StatEvent::UsbDisconnect);
                }
            }
        }
    }

    /// Step 3. Counts the settle time down without blocking; the other
    /// devices keep being serviced meanwhile.
    fn advance_settle<H: UsbHost>(&mut self, tick_ms: u16, host: &mut H) {
        if !self.new_device_pending {
            return;
        }
        if self.settle_remaining_ms > tick_ms {
            self.settle_remaining_ms -= tick_ms;
            return;
        }

        self.new_device_pending = false;
        self.settle_remaining_ms = 0;

        match host.reinit_root_device() {
            Ok(()) => {
                self.recovery.usb.link_restored();
                self.resync_tokens(host);
            }
            Err(_e) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("bridge: root device re-init failed: {}", _e);
                self.recovery.stats.record(StatEvent::UsbEnumFail);
            }
        }
    }

    /// After re-enumeration the driver restarts its endpoints at DATA0.
    /// Driver-bound slots take the driver's view again (or are dropped
    /// if the driver lost them); forced endpoints go back to DATA0.
    fn resync_tokens<H: UsbHost>(&mut self, host: &mut H) {
        self.registry.reset_forced_tokens();
        for index in self.registry.occupied() {
            let Some(slot) = self.registry.get(index) else {
                continue;
            };
            if slot.binding != EndpointBinding::Driver {
                continue;
            }
            let location = DeviceLocation {
                port: slot.port,
                interface: slot.interface,
            };
            match host.endpoint_token(location).filter(|t| t.is_valid()) {
                Some(token) => {
                    if let Some(slot) = self.registry.get_mut(index) {
                        slot.endpoint = token;
                    }
                }
                None => self.registry.remove(index),
            }
        }
    }

    /// Step 4a. At most one slot per kind; kinds already registered are
    /// skipped.
    fn discover<H: UsbHost>(&mut self, host: &mut H) {
        for kind in DeviceKind::DISCOVERABLE {
            if self.registry.find_by_type(kind).is_some() {
                continue;
            }
            let Some(location) = host.search_device(kind) else {
                continue;
            };

            let (endpoint, binding) = match (kind, self.forced_mouse_endpoint) {
                (DeviceKind::Mouse, Some(forced)) => (forced, EndpointBinding::Forced),
                _ => match host.endpoint_token(location) {
                    Some(token) => (token, EndpointBinding::Driver),
                    None => continue,
                },
            };
            if !endpoint.is_valid() {
                continue;
            }

            let slot = UsbDeviceSlot::new(location.port, location.interface, kind, endpoint, binding);
            if self.registry.add(slot).is_err() {
                #[cfg(feature = "defmt")]
                defmt::warn!("bridge: registry full, {} not added", kind.name());
                break;
            }
        }
    }

    /// Step 4b.
    fn evict<H: UsbHost>(&mut self, host: &mut H) {
        for index in self.registry.occupied() {
            let gone = match self.registry.get_mut(index) {
                Some(slot) if !host.device_connected(slot.port) => {
                    slot.connected = false;
                    true
                }
                _ => false,
            };
            if gone {
                self.registry.remove(index);
            }
        }
    }

    /// Step 5.
    fn service_devices<H: UsbHost, B: BleHid>(&mut self, host: &mut H, ble: &mut B) -> u8 {
        let mut forwarded = 0;

        for index in self.registry.occupied() {
            let Some(slot) = self.registry.get(index) else {
                continue;
            };
            let (kind, token, binding) = (slot.kind, slot.endpoint, slot.binding);
            let location = DeviceLocation {
                port: slot.port,
                interface: slot.interface,
            };

            host.select_port(location.port);
            let len = match host.transact_in(token, &mut self.rx_buf) {
                Ok(len) => len.min(MAX_PACKET_SIZE),
                Err(UsbError::Nak) => continue,
                Err(_e) => {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("bridge: IN on port {} failed: {}", location.port, _e);
                    self.recovery.stats.record(StatEvent::UsbCommFail);
                    continue;
                }
            };

            let next = token.toggled();
            if let Some(slot) = self.registry.get_mut(index) {
                slot.endpoint = next;
            }
            if binding == EndpointBinding::Driver {
                host.store_endpoint_token(location, next);
            }

            if len == 0 {
                continue;
            }
            let Some(report) = hid::translate(kind, &self.rx_buf[..len]) else {
                continue;
            };

            let mut bytes = [0u8; hid::KEYBOARD_REPORT_SIZE];
            let written = report.serialize(&mut bytes);
            self.registry.update_report(index, &bytes[..written]);

            if self.forward(report, ble) {
                forwarded += 1;
            }
        }

        forwarded
    }

    fn forward<B: BleHid>(&mut self, report: CanonicalReport, ble: &mut B) -> bool {
        match report {
            CanonicalReport::Keyboard(k) => match ble.send_keyboard(&k) {
                Ok(()) => true,
                Err(_e) => {
                    #[cfg(feature = "defmt")]
                    defmt::debug!("bridge: keyboard report held for retry: {}", _e);
                    self.pending_keyboard = Some(k);
                    self.recovery.stats.record(StatEvent::BleCommFail);
                    false
                }
            },
            CanonicalReport::Mouse(m) => match ble.send_mouse(&m) {
                Ok(()) => true,
                Err(_) => {
                    self.recovery.stats.record(StatEvent::BleCommFail);
                    false
                }
            },
        }
    }

    /// Step 6: react to what the recovery tick did.
    fn apply_outcome(&mut self, outcome: TickOutcome) {
        if outcome.usb_stack_reset {
            self.registry.clear();
            self.new_device_pending = false;
            self.settle_remaining_ms = 0;
        }
        if outcome.safe_recovery {
            self.pending_keyboard = None;
            self.recovery.stats.record(StatEvent::Reset);
        }
        if outcome.report_due {
            self.registry.log_status();
        }
    }
}
