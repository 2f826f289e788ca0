//! Integration tests for the usb2ble bridge engine, driven through
//! scripted USB host and BLE peripheral doubles.

use std::collections::{HashMap, VecDeque};

use usb2ble::ble::{BleHid, BleLinkEvent};
use usb2ble::endpoint::EndpointToken;
use usb2ble::error::{BleError, UsbError};
use usb2ble::hid::{KeyboardReport, MouseReport};
use usb2ble::recovery::reconnect::ReconnectState;
use usb2ble::recovery::SystemState;
use usb2ble::registry::{DeviceKind, EndpointBinding, UsbDeviceSlot};
use usb2ble::usb::{DeviceLocation, HotplugEvent, UsbHost};
use usb2ble::{Bridge, BridgeOptions, PollStatus};

const TICK: u16 = 5;

const KEYBOARD_AT: DeviceLocation = DeviceLocation { port: 0, interface: 0 };
const MOUSE_AT: DeviceLocation = DeviceLocation { port: 0, interface: 1 };

// ── Doubles ───────────────────────────────────────────────────────────────

struct Interface {
    kind: DeviceKind,
    location: DeviceLocation,
    endpoint: EndpointToken,
}

#[derive(Default)]
struct MockHost {
    hotplug: VecDeque<HotplugEvent>,
    interfaces: Vec<Interface>,
    port_connected: bool,
    root_ready: bool,
    root_reinit_fails: bool,
    /// Interfaces the next successful root re-init loses.
    forget_on_reinit: Vec<DeviceKind>,
    root_reinits: u32,
    stack_reinits: u32,
    /// Queued IN results per endpoint number; empty queue means NAK.
    incoming: HashMap<u8, VecDeque<Result<Vec<u8>, UsbError>>>,
    transactions: Vec<EndpointToken>,
    stores: u32,
}

impl MockHost {
    fn with(kinds: &[(DeviceKind, DeviceLocation, u8)]) -> Self {
        Self {
            interfaces: kinds
                .iter()
                .map(|&(kind, location, ep)| Interface {
                    kind,
                    location,
                    endpoint: EndpointToken::new(ep),
                })
                .collect(),
            port_connected: true,
            root_ready: true,
            ..Self::default()
        }
    }

    fn keyboard() -> Self {
        Self::with(&[(DeviceKind::Keyboard, KEYBOARD_AT, 0x81)])
    }

    fn queue(&mut self, endpoint: u8, packet: &[u8]) {
        self.incoming.entry(endpoint).or_default().push_back(Ok(packet.to_vec()));
    }

    fn queue_err(&mut self, endpoint: u8, error: UsbError) {
        self.incoming.entry(endpoint).or_default().push_back(Err(error));
    }

    fn driver_token(&self, kind: DeviceKind) -> EndpointToken {
        self.interfaces
            .iter()
            .find(|i| i.kind == kind)
            .map(|i| i.endpoint)
            .unwrap()
    }
}

impl UsbHost for MockHost {
    fn poll_hotplug(&mut self) -> HotplugEvent {
        self.hotplug.pop_front().unwrap_or(HotplugEvent::None)
    }

    fn reinit_root_device(&mut self) -> Result<(), UsbError> {
        self.root_reinits += 1;
        if self.root_reinit_fails {
            return Err(UsbError::Enumeration);
        }
        let forget = std::mem::take(&mut self.forget_on_reinit);
        self.interfaces.retain(|i| !forget.contains(&i.kind));
        for iface in &mut self.interfaces {
            iface.endpoint = iface.endpoint.with_toggle(false);
        }
        self.root_ready = true;
        Ok(())
    }

    fn reinit_stack(&mut self) -> Result<(), UsbError> {
        self.stack_reinits += 1;
        Ok(())
    }

    fn root_device_ready(&self) -> bool {
        self.root_ready
    }

    fn search_device(&mut self, kind: DeviceKind) -> Option<DeviceLocation> {
        if !self.port_connected {
            return None;
        }
        self.interfaces.iter().find(|i| i.kind == kind).map(|i| i.location)
    }

    fn endpoint_token(&self, location: DeviceLocation) -> Option<EndpointToken> {
        self.interfaces
            .iter()
            .find(|i| i.location == location)
            .map(|i| i.endpoint)
    }

    fn store_endpoint_token(&mut self, location: DeviceLocation, token: EndpointToken) {
        self.stores += 1;
        if let Some(iface) = self.interfaces.iter_mut().find(|i| i.location == location) {
            iface.endpoint = token;
        }
    }

    fn device_connected(&self, port: u8) -> bool {
        port == 0 && self.port_connected
    }

    fn select_port(&mut self, _port: u8) {}

    fn transact_in(&mut self, token: EndpointToken, buf: &mut [u8]) -> Result<usize, UsbError> {
        self.transactions.push(token);
        let next = self
            .incoming
            .get_mut(&token.address())
            .and_then(VecDeque::pop_front)
            .unwrap_or(Err(UsbError::Nak))?;
        buf[..next.len()].copy_from_slice(&next);
        Ok(next.len())
    }
}

#[derive(Default)]
struct MockBle {
    refuse_keyboard: bool,
    refuse_mouse: bool,
    refuse_reconnect: bool,
    keyboard: Vec<KeyboardReport>,
    mouse: Vec<MouseReport>,
    disconnects: u32,
    reconnects: u32,
}

impl BleHid for MockBle {
    fn send_keyboard(&mut self, report: &KeyboardReport) -> Result<(), BleError> {
        if self.refuse_keyboard {
            return Err(BleError::Busy);
        }
        self.keyboard.push(*report);
        Ok(())
    }

    fn send_mouse(&mut self, report: &MouseReport) -> Result<(), BleError> {
        if self.refuse_mouse {
            return Err(BleError::NotConnected);
        }
        self.mouse.push(*report);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
    }

    fn reconnect(&mut self) -> Result<(), BleError> {
        self.reconnects += 1;
        if self.refuse_reconnect {
            return Err(BleError::Busy);
        }
        Ok(())
    }
}

fn run(bridge: &mut Bridge, host: &mut MockHost, ble: &mut MockBle, cycles: u32) {
    for _ in 0..cycles {
        bridge.poll(TICK, host, ble);
    }
}

fn slot(bridge: &Bridge, kind: DeviceKind) -> &UsbDeviceSlot {
    let index = bridge.registry().find_by_type(kind).expect("device registered");
    bridge.registry().get(index).unwrap()
}

const KEY_A: [u8; 8] = [0x02, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00];
const KEY_B: [u8; 8] = [0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00];

// ── Forwarding ────────────────────────────────────────────────────────────

#[test]
fn keyboard_report_is_forwarded_and_toggle_advances() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle::default();
    host.queue(1, &KEY_A);

    let status = bridge.poll(TICK, &mut host, &mut ble);

    assert_eq!(status, PollStatus::Completed { forwarded: 1 });
    assert_eq!(ble.keyboard, vec![KeyboardReport::from_bytes(&KEY_A)]);

    let kb = slot(&bridge, DeviceKind::Keyboard);
    assert_eq!(kb.binding, EndpointBinding::Driver);
    assert!(kb.endpoint.toggle_bit());
    assert_eq!(kb.last_report.as_slice(), &KEY_A);
    // Written back so the driver's view agrees.
    assert_eq!(host.stores, 1);
    assert!(host.driver_token(DeviceKind::Keyboard).toggle_bit());
}

#[test]
fn nak_is_idle_not_an_error() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle::default();

    run(&mut bridge, &mut host, &mut ble, 3);

    assert_eq!(host.transactions.len(), 3);
    assert!(!slot(&bridge, DeviceKind::Keyboard).endpoint.toggle_bit());
    assert_eq!(bridge.stats().usb_comm_fail, 0);
    assert!(ble.keyboard.is_empty());
}

#[test]
fn failed_transaction_counts_and_keeps_toggle() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle::default();
    host.queue_err(1, UsbError::Stall);
    host.queue_err(1, UsbError::Transaction(0x0C));

    run(&mut bridge, &mut host, &mut ble, 2);

    assert_eq!(bridge.stats().usb_comm_fail, 2);
    assert!(!slot(&bridge, DeviceKind::Keyboard).endpoint.toggle_bit());
    assert_eq!(host.stores, 0);
}

#[test]
fn empty_packet_toggles_but_forwards_nothing() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle::default();
    host.queue(1, &[]);

    let status = bridge.poll(TICK, &mut host, &mut ble);

    assert_eq!(status, PollStatus::Completed { forwarded: 0 });
    assert!(slot(&bridge, DeviceKind::Keyboard).endpoint.toggle_bit());
    assert!(ble.keyboard.is_empty());
}

#[test]
fn nkro_keyboard_packet_is_compacted() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle::default();
    // Modifier 0x01, bitmap byte 2 bit 0 = usage 0x04, bit 1 = 0x05.
    let mut nkro = [0u8; 16];
    nkro[0] = 0x01;
    nkro[2] = 0b0000_0011;
    host.queue(1, &nkro);

    bridge.poll(TICK, &mut host, &mut ble);

    assert_eq!(ble.keyboard.len(), 1);
    assert_eq!(ble.keyboard[0].modifier, 0x01);
    assert_eq!(ble.keyboard[0].keycodes, [0x04, 0x05, 0, 0, 0, 0]);
}

#[test]
fn mouse_report_is_normalised() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::with(&[(DeviceKind::Mouse, MOUSE_AT, 0x82)]);
    let mut ble = MockBle::default();
    host.queue(2, &[0x01, 0x05, 0xFB]);

    let status = bridge.poll(TICK, &mut host, &mut ble);

    assert_eq!(status, PollStatus::Completed { forwarded: 1 });
    assert_eq!(
        ble.mouse,
        vec![MouseReport {
            buttons: 0x01,
            x: 5,
            y: -5,
            wheel: 0
        }]
    );
}

#[test]
fn refused_mouse_report_is_dropped_without_blocking() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::with(&[(DeviceKind::Mouse, MOUSE_AT, 0x82)]);
    let mut ble = MockBle {
        refuse_mouse: true,
        ..MockBle::default()
    };
    host.queue(2, &[0x00, 0x01, 0x01]);

    bridge.poll(TICK, &mut host, &mut ble);
    let status = bridge.poll(TICK, &mut host, &mut ble);

    assert_eq!(status, PollStatus::Completed { forwarded: 0 });
    assert_eq!(bridge.stats().ble_comm_fail, 1);
    assert!(bridge.pending_keyboard().is_none());
    assert_eq!(host.transactions.len(), 2);
}

// ── Pending keyboard gate ─────────────────────────────────────────────────

#[test]
fn refused_keyboard_report_blocks_usb_until_sent() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle {
        refuse_keyboard: true,
        ..MockBle::default()
    };
    host.queue(1, &KEY_A);
    host.queue(1, &KEY_B);

    // Read, refused, held.
    assert_eq!(
        bridge.poll(TICK, &mut host, &mut ble),
        PollStatus::Completed { forwarded: 0 }
    );
    assert_eq!(bridge.pending_keyboard(), Some(&KeyboardReport::from_bytes(&KEY_A)));
    assert_eq!(host.transactions.len(), 1);

    // Still refused: nothing is read from USB.
    for _ in 0..3 {
        assert_eq!(bridge.poll(TICK, &mut host, &mut ble), PollStatus::Blocked);
    }
    assert_eq!(host.transactions.len(), 1);
    assert_eq!(bridge.stats().ble_comm_fail, 4);

    // Accepted: the held report goes first, then the next one is read.
    ble.refuse_keyboard = false;
    assert_eq!(
        bridge.poll(TICK, &mut host, &mut ble),
        PollStatus::Completed { forwarded: 1 }
    );
    assert_eq!(
        ble.keyboard,
        vec![KeyboardReport::from_bytes(&KEY_A), KeyboardReport::from_bytes(&KEY_B)]
    );
    assert!(bridge.pending_keyboard().is_none());
}

// ── Discovery and eviction ────────────────────────────────────────────────

#[test]
fn discovery_registers_one_slot_per_kind() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::with(&[
        (DeviceKind::Keyboard, KEYBOARD_AT, 0x81),
        (DeviceKind::Mouse, MOUSE_AT, 0x82),
        (DeviceKind::OtherHid, DeviceLocation { port: 0, interface: 2 }, 0x84),
    ]);
    let mut ble = MockBle::default();

    run(&mut bridge, &mut host, &mut ble, 5);

    assert_eq!(bridge.registry().active_count(), 2);
    assert_eq!(slot(&bridge, DeviceKind::Keyboard).endpoint.address(), 1);
    assert_eq!(slot(&bridge, DeviceKind::Mouse).endpoint.address(), 2);
    assert!(bridge.registry().find_by_type(DeviceKind::OtherHid).is_none());
}

#[test]
fn endpoint_zero_is_never_registered() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::with(&[(DeviceKind::Keyboard, KEYBOARD_AT, 0x80)]);
    let mut ble = MockBle::default();

    run(&mut bridge, &mut host, &mut ble, 2);

    assert_eq!(bridge.registry().active_count(), 0);
    assert!(host.transactions.is_empty());
}

#[test]
fn unplugged_device_is_evicted() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle::default();

    bridge.poll(TICK, &mut host, &mut ble);
    assert_eq!(bridge.registry().active_count(), 1);

    host.port_connected = false;
    bridge.poll(TICK, &mut host, &mut ble);
    assert_eq!(bridge.registry().active_count(), 0);
}

// ── Hot-plug settle ───────────────────────────────────────────────────────

#[test]
fn connect_edge_settles_before_root_reinit() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle::default();
    host.hotplug.push_back(HotplugEvent::Connected);

    // 200 ms at 5 ms per cycle: re-init on the 40th cycle.
    run(&mut bridge, &mut host, &mut ble, 39);
    assert!(bridge.new_device_pending());
    assert_eq!(host.root_reinits, 0);
    // Other devices keep being serviced while settling.
    assert_eq!(host.transactions.len(), 39);

    bridge.poll(TICK, &mut host, &mut ble);
    assert!(!bridge.new_device_pending());
    assert_eq!(host.root_reinits, 1);
    assert_eq!(bridge.stats().usb_connect, 1);
}

#[test]
fn disconnect_edge_cancels_settle() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle::default();
    host.hotplug.push_back(HotplugEvent::Connected);
    host.hotplug.push_back(HotplugEvent::Disconnected);

    run(&mut bridge, &mut host, &mut ble, 60);

    assert!(!bridge.new_device_pending());
    assert_eq!(host.root_reinits, 0);
    assert_eq!(bridge.stats().usb_disconnect, 1);
}

#[test]
fn failed_root_reinit_counts_enumeration_failure() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    host.root_reinit_fails = true;
    let mut ble = MockBle::default();
    host.hotplug.push_back(HotplugEvent::Connected);

    run(&mut bridge, &mut host, &mut ble, 40);

    assert_eq!(host.root_reinits, 1);
    assert_eq!(bridge.stats().usb_enum_fail, 1);
}

#[test]
fn root_reinit_resyncs_driver_tokens() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle::default();
    host.queue(1, &KEY_A);

    bridge.poll(TICK, &mut host, &mut ble);
    assert!(slot(&bridge, DeviceKind::Keyboard).endpoint.toggle_bit());

    host.hotplug.push_back(HotplugEvent::Connected);
    run(&mut bridge, &mut host, &mut ble, 40);

    assert_eq!(host.root_reinits, 1);
    assert!(!slot(&bridge, DeviceKind::Keyboard).endpoint.toggle_bit());
}

#[test]
fn slot_lost_by_driver_is_dropped_on_resync() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle::default();

    bridge.poll(TICK, &mut host, &mut ble);
    assert_eq!(bridge.registry().active_count(), 1);

    host.forget_on_reinit.push(DeviceKind::Keyboard);
    host.hotplug.push_back(HotplugEvent::Connected);
    run(&mut bridge, &mut host, &mut ble, 40);

    assert_eq!(bridge.registry().active_count(), 0);
}

// ── Forced mouse endpoint ─────────────────────────────────────────────────

#[test]
fn forced_mouse_endpoint_overrides_driver_and_resets_on_reinit() {
    let mut bridge = Bridge::new(BridgeOptions {
        forced_mouse_endpoint: Some(0x84),
        ..BridgeOptions::default()
    });
    let mut host = MockHost::with(&[(DeviceKind::Mouse, MOUSE_AT, 0x82)]);
    let mut ble = MockBle::default();
    host.queue(4, &[0x00, 0x02, 0x03]);

    bridge.poll(TICK, &mut host, &mut ble);

    let mouse = slot(&bridge, DeviceKind::Mouse);
    assert_eq!(mouse.binding, EndpointBinding::Forced);
    assert_eq!(mouse.endpoint.address(), 4);
    assert!(mouse.endpoint.toggle_bit());
    assert_eq!(host.transactions[0].address(), 4);
    // Forced tokens are never written back to the driver.
    assert_eq!(host.stores, 0);
    assert_eq!(ble.mouse.len(), 1);

    host.hotplug.push_back(HotplugEvent::Connected);
    run(&mut bridge, &mut host, &mut ble, 40);

    assert!(!slot(&bridge, DeviceKind::Mouse).endpoint.toggle_bit());
}

#[test]
fn forced_endpoint_zero_is_ignored() {
    let mut bridge = Bridge::new(BridgeOptions {
        forced_mouse_endpoint: Some(0x00),
        ..BridgeOptions::default()
    });
    let mut host = MockHost::with(&[(DeviceKind::Mouse, MOUSE_AT, 0x82)]);
    let mut ble = MockBle::default();

    bridge.poll(TICK, &mut host, &mut ble);

    let mouse = slot(&bridge, DeviceKind::Mouse);
    assert_eq!(mouse.binding, EndpointBinding::Driver);
    assert_eq!(mouse.endpoint.address(), 2);
}

// ── Recovery ──────────────────────────────────────────────────────────────

#[test]
fn usb_reconnect_gives_up_and_recovers_on_reenumeration() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    host.root_ready = false;
    let mut ble = MockBle::default();
    host.hotplug.push_back(HotplugEvent::Disconnected);

    bridge.poll(TICK, &mut host, &mut ble);
    assert_eq!(bridge.recovery().usb.state(), ReconnectState::Waiting);
    assert_eq!(bridge.system_state(), SystemState::Recovering);

    // 1 s delay, then three attempts with 500 ms settle and 2 s backoff.
    run(&mut bridge, &mut host, &mut ble, 2000);

    assert_eq!(host.stack_reinits, 3);
    assert_eq!(bridge.stats().usb_reconnect_retry, 3);
    assert_eq!(bridge.recovery().usb.state(), ReconnectState::Idle);
    assert!(bridge.recovery().usb.exhausted());
    assert_eq!(bridge.system_state(), SystemState::Error);
    assert_eq!(bridge.registry().active_count(), 1);

    // The device comes back by itself.
    host.hotplug.push_back(HotplugEvent::Connected);
    run(&mut bridge, &mut host, &mut ble, 40);

    assert_eq!(host.root_reinits, 1);
    assert_eq!(bridge.system_state(), SystemState::Normal);
}

#[test]
fn usb_reconnect_succeeds_when_root_comes_back() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle::default();
    host.hotplug.push_back(HotplugEvent::Disconnected);

    run(&mut bridge, &mut host, &mut ble, 400);

    assert_eq!(host.stack_reinits, 1);
    assert_eq!(bridge.stats().usb_reconnect_retry, 0);
    // Arming counted the disconnect, success counted the connect.
    assert_eq!(bridge.stats().usb_disconnect, 1);
    assert_eq!(bridge.stats().usb_connect, 1);
    assert_eq!(bridge.system_state(), SystemState::Normal);
}

#[test]
fn watchdog_fires_only_when_cycles_stay_blocked() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle::default();

    // A healthy bridge feeds every cycle.
    run(&mut bridge, &mut host, &mut ble, 3000);
    assert_eq!(bridge.stats().watchdog_timeout, 0);

    ble.refuse_keyboard = true;
    host.queue(1, &KEY_A);
    bridge.poll(TICK, &mut host, &mut ble);
    assert!(bridge.pending_keyboard().is_some());

    // 10 s of blocked cycles, counting the 5 ms after the last feed.
    run(&mut bridge, &mut host, &mut ble, 1998);
    assert_eq!(bridge.stats().watchdog_timeout, 0);

    bridge.poll(TICK, &mut host, &mut ble);
    assert_eq!(bridge.stats().watchdog_timeout, 1);
    assert_eq!(host.stack_reinits, 1);
    assert_eq!(ble.disconnects, 1);
    assert_eq!(ble.reconnects, 1);
    assert_eq!(bridge.registry().active_count(), 0);

    // Safe recovery starts over: the stuck report is gone and USB is
    // read again even though the central still refuses keyboard reports.
    assert!(bridge.pending_keyboard().is_none());
    assert_eq!(bridge.stats().reset, 1);
    assert_eq!(
        bridge.poll(TICK, &mut host, &mut ble),
        PollStatus::Completed { forwarded: 0 }
    );
    assert_eq!(bridge.registry().active_count(), 1);

    run(&mut bridge, &mut host, &mut ble, 2000);
    assert_eq!(bridge.stats().watchdog_timeout, 1);
}

#[test]
fn blocked_cycles_leave_usb_recovery_frozen() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle {
        refuse_keyboard: true,
        ..MockBle::default()
    };
    host.queue(1, &KEY_A);
    host.hotplug.push_back(HotplugEvent::Disconnected);

    // Arms the USB reconnect and parks KEY_A as pending.
    bridge.poll(TICK, &mut host, &mut ble);
    assert!(bridge.pending_keyboard().is_some());
    assert_eq!(bridge.recovery().usb.state(), ReconnectState::Waiting);
    let reads = host.transactions.len();

    for _ in 0..400 {
        assert_eq!(bridge.poll(TICK, &mut host, &mut ble), PollStatus::Blocked);
    }
    assert_eq!(host.stack_reinits, 0);
    assert_eq!(host.root_reinits, 0);
    assert_eq!(host.transactions.len(), reads);
    assert_eq!(bridge.recovery().usb.state(), ReconnectState::Waiting);

    // Once the report goes out, the reconnect machine resumes.
    ble.refuse_keyboard = false;
    run(&mut bridge, &mut host, &mut ble, 400);
    assert_eq!(ble.keyboard[0].keycodes[0], 0x04);
    assert_eq!(host.stack_reinits, 1);
    assert_eq!(bridge.recovery().usb.state(), ReconnectState::Idle);
}

#[test]
fn refused_ble_restart_during_safe_recovery_is_counted() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle {
        refuse_keyboard: true,
        refuse_reconnect: true,
        ..MockBle::default()
    };
    host.queue(1, &KEY_A);

    run(&mut bridge, &mut host, &mut ble, 2001);

    assert_eq!(bridge.stats().watchdog_timeout, 1);
    assert_eq!(ble.reconnects, 1);
    assert_eq!(bridge.stats().ble_reconnect_retry, 1);
}

#[test]
fn reinitialize_clears_state_and_resets_stack() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle {
        refuse_keyboard: true,
        ..MockBle::default()
    };
    host.queue(1, &KEY_A);
    bridge.poll(TICK, &mut host, &mut ble);
    assert!(bridge.pending_keyboard().is_some());

    bridge.reinitialize(&mut host);

    assert!(bridge.pending_keyboard().is_none());
    assert_eq!(bridge.registry().active_count(), 0);
    assert_eq!(host.stack_reinits, 1);
    assert_eq!(bridge.stats().reset, 1);
}

// ── BLE link events ───────────────────────────────────────────────────────

#[test]
fn ble_disconnect_starts_reconnect_cycle() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle::default();

    bridge.on_ble_event(BleLinkEvent::Connected);
    assert!(bridge.ble_connected());
    assert_eq!(bridge.stats().ble_connect, 1);

    bridge.on_ble_event(BleLinkEvent::Disconnected);
    assert!(!bridge.ble_connected());
    assert_eq!(bridge.stats().ble_disconnect, 1);
    assert_eq!(bridge.recovery().ble.state(), ReconnectState::Waiting);

    // 1 s delay, disconnect, 100 ms settle, reconnect.
    run(&mut bridge, &mut host, &mut ble, 300);

    assert_eq!(ble.disconnects, 1);
    assert_eq!(ble.reconnects, 1);
    assert_eq!(bridge.recovery().ble.state(), ReconnectState::Idle);
    assert_eq!(bridge.stats().ble_connect, 2);
}

#[test]
fn refused_ble_reconnect_backs_off_then_gives_up() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    let mut host = MockHost::keyboard();
    let mut ble = MockBle {
        refuse_reconnect: true,
        ..MockBle::default()
    };

    bridge.on_ble_event(BleLinkEvent::Disconnected);

    // First attempt after 1 s, then 3 s backoff between five attempts.
    run(&mut bridge, &mut host, &mut ble, 300);
    assert_eq!(bridge.stats().ble_reconnect_retry, 1);
    assert_eq!(bridge.recovery().ble.state(), ReconnectState::Waiting);

    run(&mut bridge, &mut host, &mut ble, 3000);
    assert_eq!(ble.reconnects, 5);
    assert_eq!(bridge.stats().ble_reconnect_retry, 5);
    assert!(bridge.recovery().ble.exhausted());
    assert_eq!(bridge.system_state(), SystemState::Error);

    bridge.on_ble_event(BleLinkEvent::Connected);
    assert_eq!(bridge.system_state(), SystemState::Normal);
}

#[test]
fn repeated_disconnect_while_reconnecting_is_counted_each_time() {
    let mut bridge = Bridge::new(BridgeOptions::default());

    bridge.on_ble_event(BleLinkEvent::Disconnected);
    bridge.on_ble_event(BleLinkEvent::Disconnected);

    // The second one is recorded directly since the machine is busy.
    assert_eq!(bridge.stats().ble_disconnect, 2);
    assert_eq!(bridge.recovery().ble.state(), ReconnectState::Waiting);
}

#[test]
fn led_output_report_is_kept() {
    let mut bridge = Bridge::new(BridgeOptions::default());
    assert!(!bridge.keyboard_leds().caps_lock());

    bridge.on_ble_event(BleLinkEvent::LedOutput(0x02));
    assert!(bridge.keyboard_leds().caps_lock());

    bridge.on_ble_event(BleLinkEvent::LedOutput(0x01));
    assert!(!bridge.keyboard_leds().caps_lock());
}
