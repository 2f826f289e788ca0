//! SoftDevice S140 peripheral: HID-over-GATT and Battery Service.
//!
//! The advertising loop runs in its own task. The bridge reaches the
//! link synchronously through [`SoftdeviceHid`]; link changes flow back
//! to it over [`LINK_EVENTS`].

use core::cell::{Cell, RefCell};

use defmt::{debug, info, warn, Debug2Format};
use embassy_futures::select::select;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::Timer;
use heapless::Vec;
use nrf_softdevice::ble::gatt_server::{self, NotifyValueError};
use nrf_softdevice::ble::peripheral::{self, advertise_pairable, AdvertiseError, ConnectableAdvertisement};
use nrf_softdevice::ble::security::{IoCapabilities, SecurityHandler};
use nrf_softdevice::ble::{Connection, EncryptionInfo, IdentityKey, MasterId, SecurityMode};
use nrf_softdevice::{raw, RawError, Softdevice};
use static_cell::StaticCell;

use super::{BleHid, BleLinkEvent};
use crate::config::{BLE_APPEARANCE, BLE_MAX_BONDS, KEYBOARD_REPORT_ID, MOUSE_REPORT_ID};
use crate::error::BleError;
use crate::hid::{KeyboardReport, MouseReport, REPORT_MAP, REPORT_MAP_LEN};
use crate::settings::{ConnectionSettings, UserSettings};

// Report reference descriptors: [report id, type] with 1 = input, 2 = output.
const KEYBOARD_INPUT_REF: [u8; 2] = [KEYBOARD_REPORT_ID, 1];
const KEYBOARD_OUTPUT_REF: [u8; 2] = [KEYBOARD_REPORT_ID, 2];
const MOUSE_INPUT_REF: [u8; 2] = [MOUSE_REPORT_ID, 1];

// bcdHID 1.11, country 0, remote wake + normally connectable.
const HID_INFORMATION: [u8; 4] = [0x11, 0x01, 0x00, 0x03];

const EMPTY_KEYBOARD: [u8; 8] = [0; 8];
const EMPTY_MOUSE: [u8; 4] = [0; 4];
const LEDS_OFF: [u8; 1] = [0];
const HID_REPORT_MAP: [u8; REPORT_MAP_LEN] = REPORT_MAP;

#[nrf_softdevice::gatt_service(uuid = "180f")]
pub struct BatteryService {
    #[characteristic(uuid = "2a19", security = "justworks", read, notify)]
    pub battery_level: u8,
}

#[nrf_softdevice::gatt_service(uuid = "1812")]
pub struct HidService {
    #[characteristic(uuid = "2a4a", initial_value = "HID_INFORMATION", security = "justworks", read)]
    pub hid_information: [u8; 4],
    #[characteristic(uuid = "2a4b", initial_value = "HID_REPORT_MAP", security = "justworks", read)]
    pub report_map: [u8; REPORT_MAP_LEN],
    #[characteristic(
        uuid = "2a4d",
        initial_value = "EMPTY_KEYBOARD",
        security = "justworks",
        read,
        notify,
        descriptor(uuid = "2908", security = "justworks", value = "KEYBOARD_INPUT_REF")
    )]
    pub keyboard_input: [u8; 8],
    #[characteristic(
        uuid = "2a4d",
        initial_value = "EMPTY_MOUSE",
        security = "justworks",
        read,
        notify,
        descriptor(uuid = "2908", security = "justworks", value = "MOUSE_INPUT_REF")
    )]
    pub mouse_input: [u8; 4],
    #[characteristic(
        uuid = "2a4d",
        initial_value = "LEDS_OFF",
        security = "justworks",
        read,
        write,
        write_without_response,
        descriptor(uuid = "2908", security = "justworks", value = "KEYBOARD_OUTPUT_REF")
    )]
    pub keyboard_output: [u8; 1],
    #[characteristic(uuid = "2a4c", security = "justworks", write_without_response)]
    pub control_point: u8,
}

#[nrf_softdevice::gatt_server]
pub struct Server {
    pub bas: BatteryService,
    pub hid: HidService,
}

/// Link callbacks for the bridge task, drained every tick.
pub static LINK_EVENTS: Channel<CriticalSectionRawMutex, BleLinkEvent, 8> = Channel::new();

/// Latest battery level; notified to the central while connected.
pub static BATTERY_LEVEL: Signal<CriticalSectionRawMutex, u8> = Signal::new();

/// Raised by [`SoftdeviceHid::reconnect`] to retry a failed advertising start.
static ADVERTISE: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Fallback retry period when nobody asks for advertising again.
const ADVERTISE_RETRY_SECS: u64 = 5;

/// What the advertising task is doing right now.
#[derive(Clone, Copy)]
enum Advertiser {
    Idle,
    Advertising,
    Connected,
    Failed(BleError),
}

static ADVERTISER: Mutex<CriticalSectionRawMutex, Cell<Advertiser>> = Mutex::new(Cell::new(Advertiser::Idle));

fn set_advertiser(state: Advertiser) {
    ADVERTISER.lock(|a| a.set(state));
}

struct Link {
    conn: Option<Connection>,
    keyboard_notify: bool,
    mouse_notify: bool,
}

impl Link {
    const fn new() -> Self {
        Self {
            conn: None,
            keyboard_notify: false,
            mouse_notify: false,
        }
    }
}

static LINK: Mutex<CriticalSectionRawMutex, RefCell<Link>> = Mutex::new(RefCell::new(Link::new()));

fn publish(event: BleLinkEvent) {
    if LINK_EVENTS.try_send(event).is_err() {
        warn!("BLE: link event queue full, dropping {}", event);
    }
}

/// The bridge's handle on the BLE link.
pub struct SoftdeviceHid {
    server: &'static Server,
}

impl SoftdeviceHid {
    pub fn new(server: &'static Server) -> Self {
        Self { server }
    }

    fn connection(notify: impl Fn(&Link) -> bool) -> Result<Connection, BleError> {
        LINK.lock(|link| {
            let link = link.borrow();
            match &link.conn {
                Some(conn) if notify(&link) => Ok(conn.clone()),
                _ => Err(BleError::NotConnected),
            }
        })
    }
}

fn advertise_error(e: AdvertiseError) -> BleError {
    match e {
        AdvertiseError::Raw(raw) => BleError::Raw(raw as u32),
        _ => BleError::Busy,
    }
}

fn notify_error(e: NotifyValueError) -> BleError {
    match e {
        NotifyValueError::Disconnected => BleError::NotConnected,
        NotifyValueError::Raw(RawError::Resources) => BleError::Busy,
        NotifyValueError::Raw(raw) => BleError::Raw(raw as u32),
    }
}

impl BleHid for SoftdeviceHid {
    fn send_keyboard(&mut self, report: &KeyboardReport) -> Result<(), BleError> {
        let conn = Self::connection(|l| l.keyboard_notify)?;
        self.server
            .hid
            .keyboard_input_notify(&conn, &report.to_bytes())
            .map_err(notify_error)
    }

    fn send_mouse(&mut self, report: &MouseReport) -> Result<(), BleError> {
        let conn = Self::connection(|l| l.mouse_notify)?;
        self.server
            .hid
            .mouse_input_notify(&conn, &report.to_bytes())
            .map_err(notify_error)
    }

    fn disconnect(&mut self) {
        if let Ok(conn) = Self::connection(|_| true) {
            info!("BLE: dropping link");
            let _ = conn.disconnect();
        }
    }

    /// Connectable means advertising or already serving a central. A
    /// failed or stalled advertiser is kicked and the fault reported, so
    /// the caller backs off and asks again.
    fn reconnect(&mut self) -> Result<(), BleError> {
        match ADVERTISER.lock(|a| a.get()) {
            Advertiser::Advertising | Advertiser::Connected => Ok(()),
            Advertiser::Idle => {
                ADVERTISE.signal(());
                Err(BleError::NotConnected)
            }
            Advertiser::Failed(e) => {
                ADVERTISE.signal(());
                Err(e)
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Bonding (Just Works)
// ═══════════════════════════════════════════════════════════════════════════

struct PeerBond {
    master_id: MasterId,
    key: EncryptionInfo,
    peer_id: IdentityKey,
}

struct Bonder {
    peers: RefCell<Vec<PeerBond, BLE_MAX_BONDS>>,
}

impl Bonder {
    fn new() -> Self {
        Self {
            peers: RefCell::new(Vec::new()),
        }
    }
}

impl SecurityHandler for Bonder {
    fn io_capabilities(&self) -> IoCapabilities {
        IoCapabilities::None
    }

    fn can_bond(&self, _conn: &Connection) -> bool {
        true
    }

    fn on_bonded(
        &self,
        _conn: &Connection,
        master_id: MasterId,
        key: EncryptionInfo,
        peer_id: IdentityKey,
    ) {
        let mut peers = self.peers.borrow_mut();
        if let Some(existing) = peers.iter_mut().find(|p| p.master_id == master_id) {
            existing.key = key;
            existing.peer_id = peer_id;
            return;
        }

        if peers.is_full() {
            peers.remove(0);
        }

        info!("BLE: bonded with new central");
        let _ = peers.push(PeerBond {
            master_id,
            key,
            peer_id,
        });
    }

    fn get_key(&self, _conn: &Connection, master_id: MasterId) -> Option<EncryptionInfo> {
        self.peers
            .borrow()
            .iter()
            .find_map(|p| (p.master_id == master_id).then_some(p.key))
    }

    fn on_security_update(&self, _conn: &Connection, mode: SecurityMode) {
        info!("BLE: security mode updated: {}", mode);
    }
}

fn bonder() -> &'static Bonder {
    static BONDER: StaticCell<Bonder> = StaticCell::new();
    BONDER.init(Bonder::new())
}

// ═══════════════════════════════════════════════════════════════════════════
// Advertising task
// ═══════════════════════════════════════════════════════════════════════════

/// Flags, 16-bit service list (HID, battery) and appearance.
fn advertising_data() -> [u8; 13] {
    let [appearance_lo, appearance_hi] = BLE_APPEARANCE.to_le_bytes();
    #[rustfmt::skip]
    let data = [
        0x02, 0x01, raw::BLE_GAP_ADV_FLAGS_LE_ONLY_GENERAL_DISC_MODE as u8,
        0x05, 0x03, 0x12, 0x18, 0x0F, 0x18,
        0x03, 0x19, appearance_lo, appearance_hi,
    ];
    data
}

/// Complete local name in the scan response, cut to what fits.
fn scan_response(name: &str) -> Vec<u8, 31> {
    let name = &name.as_bytes()[..name.len().min(29)];
    let mut data = Vec::new();
    let _ = data.push(name.len() as u8 + 1);
    let _ = data.push(0x09);
    let _ = data.extend_from_slice(name);
    data
}

fn conn_params(c: &ConnectionSettings) -> raw::ble_gap_conn_params_t {
    raw::ble_gap_conn_params_t {
        min_conn_interval: c.min_interval,
        max_conn_interval: c.max_interval,
        slave_latency: c.slave_latency,
        conn_sup_timeout: c.supervision_timeout,
    }
}

fn on_server_event(event: ServerEvent) {
    match event {
        ServerEvent::Bas(BatteryServiceEvent::BatteryLevelCccdWrite { notifications }) => {
            debug!("BLE: battery notifications {}", notifications);
        }
        ServerEvent::Hid(event) => match event {
            HidServiceEvent::KeyboardInputCccdWrite { notifications } => {
                LINK.lock(|l| l.borrow_mut().keyboard_notify = notifications);
                info!("BLE: keyboard reports {}", notifications);
            }
            HidServiceEvent::MouseInputCccdWrite { notifications } => {
                LINK.lock(|l| l.borrow_mut().mouse_notify = notifications);
                info!("BLE: mouse reports {}", notifications);
            }
            HidServiceEvent::KeyboardOutputWrite(leds) => publish(BleLinkEvent::LedOutput(leds[0])),
            HidServiceEvent::ControlPointWrite(value) => {
                debug!("BLE: HID control point {=u8}", value);
            }
        },
    }
}

/// Advertise, serve one central until it leaves, and advertise again.
/// A failed start waits for the bridge to ask again, or for the
/// fallback retry period.
pub async fn run(sd: &'static Softdevice, server: &'static Server, settings: &UserSettings) -> ! {
    let adv_data = advertising_data();
    let scan_data = scan_response(settings.device_name());
    let bonder = bonder();

    info!("BLE: advertising as \"{}\"", settings.device_name());

    loop {
        let advertisement = ConnectableAdvertisement::ScannableUndirected {
            adv_data: &adv_data,
            scan_data: &scan_data,
        };
        set_advertiser(Advertiser::Advertising);
        let conn = match advertise_pairable(sd, advertisement, &peripheral::Config::default(), bonder)
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                warn!("BLE: advertising failed: {:?}", Debug2Format(&e));
                set_advertiser(Advertiser::Failed(advertise_error(e)));
                select(ADVERTISE.wait(), Timer::after_secs(ADVERTISE_RETRY_SECS)).await;
                continue;
            }
        };

        set_advertiser(Advertiser::Connected);
        info!("BLE: central connected");
        if let Err(e) = conn.set_conn_params(conn_params(&settings.connection)) {
            warn!("BLE: connection parameter request failed: {:?}", Debug2Format(&e));
        }

        LINK.lock(|l| {
            let mut l = l.borrow_mut();
            *l = Link::new();
            l.conn = Some(conn.clone());
        });
        publish(BleLinkEvent::Connected);

        let gatt = gatt_server::run(&conn, server, on_server_event);
        let battery = async {
            loop {
                let pct = BATTERY_LEVEL.wait().await;
                if let Err(e) = server.bas.battery_level_notify(&conn, &pct) {
                    debug!("BLE: battery notify skipped: {:?}", Debug2Format(&e));
                }
            }
        };
        select(gatt, battery).await;

        LINK.lock(|l| *l.borrow_mut() = Link::new());
        set_advertiser(Advertiser::Idle);
        info!("BLE: central disconnected");
        publish(BleLinkEvent::Disconnected);
    }
}
