//! usb2ble firmware entry point (nRF52840 + MAX3421E).
//!
//! Tasks:
//! - `softdevice_task`: runs the S140 event loop.
//! - `ble_task`: advertises and serves the HID-over-GATT peripheral.
//! - `bridge_task`: polls the wired device every [`BRIDGE_TICK_MS`].
//! - `battery_task`: samples the cell and publishes the level.
//! - `led_task`: status LED per the user's LED settings and caps lock.

#![no_std]
#![no_main]

use defmt::{debug, info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_nrf::gpio::{Level, Output, OutputDrive};
use embassy_nrf::interrupt::{self, InterruptExt, Priority};
use embassy_nrf::saadc::{self, ChannelConfig, Saadc};
use embassy_nrf::spim::{self, Spim};
use embassy_nrf::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Delay, Duration, Ticker, Timer};
use nrf_softdevice::{raw, Flash, Softdevice};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use usb2ble::battery::{self, BatteryMonitor, SAMPLES_PER_MEASUREMENT};
use usb2ble::ble::server::{self, Server, SoftdeviceHid, BATTERY_LEVEL, LINK_EVENTS};
use usb2ble::config::{BATTERY_SAMPLE_INTERVAL_SECS, BLE_MAX_BONDS, BRIDGE_TICK_MS};
use usb2ble::recovery::SystemState;
use usb2ble::settings::{LedMode, LedSettings, UserSettings};
use usb2ble::storage::SettingsStore;
use usb2ble::usb::max3421e::Max3421e;
use usb2ble::{Bridge, PollStatus};

bind_interrupts!(struct Irqs {
    SAADC => saadc::InterruptHandler;
    SPIM3 => spim::InterruptHandler<peripherals::SPI3>;
});

type UsbHostChip = Max3421e<Spim<'static, peripherals::SPI3>, Output<'static>, Output<'static>, Delay>;

/// Bridge to LED task: caps lock state and whether the system is in error.
#[derive(Clone, Copy, PartialEq, Eq)]
struct LedStatus {
    caps_lock: bool,
    error: bool,
}

static LED_STATUS: Signal<CriticalSectionRawMutex, LedStatus> = Signal::new();

static SERVER: StaticCell<Server> = StaticCell::new();
static SETTINGS: StaticCell<UserSettings> = StaticCell::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("usb2ble starting");

    // The SoftDevice reserves priorities 0, 1 and 4.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(config);
    interrupt::SAADC.set_priority(Priority::P3);
    interrupt::SPIM3.set_priority(Priority::P3);

    let sd = Softdevice::enable(&softdevice_config());
    let server = SERVER.init(unwrap!(Server::new(sd)));
    unwrap!(spawner.spawn(softdevice_task(sd)));

    let mut flash = Flash::take(sd);
    let mut store = SettingsStore::new();
    store.load_from_flash(&mut flash).await;
    if store.save_to_flash(&mut flash).await.is_err() {
        warn!("Running with unsaved settings");
    }
    let settings: &'static UserSettings = SETTINGS.init(store.settings().clone());

    // MAX3421E on SPIM3, mode 0, 8 MHz.
    let mut spi_config = spim::Config::default();
    spi_config.frequency = spim::Frequency::M8;
    let spi = Spim::new(p.SPI3, Irqs, p.P0_13, p.P0_15, p.P0_14, spi_config);
    let ss = Output::new(p.P0_16, Level::High, OutputDrive::Standard);
    let reset = Output::new(p.P0_17, Level::High, OutputDrive::Standard);
    let host = Max3421e::new(spi, ss, reset, Delay);

    let mut saadc_config = saadc::Config::default();
    saadc_config.resolution = saadc::Resolution::_12BIT;
    let adc = Saadc::new(p.SAADC, Irqs, saadc_config, [ChannelConfig::single_ended(p.P0_02)]);

    let led = Output::new(p.P0_06, Level::Low, OutputDrive::Standard);

    unwrap!(spawner.spawn(ble_task(sd, server, settings)));
    unwrap!(spawner.spawn(bridge_task(host, SoftdeviceHid::new(server), settings)));
    unwrap!(spawner.spawn(battery_task(adc, server)));
    unwrap!(spawner.spawn(led_task(led, settings.led)));
}

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_XTAL as u8,
            rc_ctiv: 0,
            rc_temp_ctiv: 0,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_20_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 128 }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 0,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: b"usb2ble" as *const u8 as _,
            current_len: 7,
            max_len: 7,
            write_perm: unsafe { core::mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    }
}

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn ble_task(sd: &'static Softdevice, server: &'static Server, settings: &'static UserSettings) -> ! {
    info!("BLE: up to {} bonds", BLE_MAX_BONDS);
    server::run(sd, server, settings).await
}

#[embassy_executor::task]
async fn bridge_task(mut host: UsbHostChip, mut ble: SoftdeviceHid, settings: &'static UserSettings) -> ! {
    let mut bridge = Bridge::new(settings.bridge_options());
    bridge.reinitialize(&mut host);

    let mut ticker = Ticker::every(Duration::from_millis(u64::from(BRIDGE_TICK_MS)));
    let mut last_led = None;
    let mut was_blocked = false;

    loop {
        while let Ok(event) = LINK_EVENTS.try_receive() {
            bridge.on_ble_event(event);
        }

        let blocked = bridge.poll(BRIDGE_TICK_MS, &mut host, &mut ble) == PollStatus::Blocked;
        if blocked && !was_blocked {
            debug!("Bridge: keyboard report queued, USB reads paused");
        }
        was_blocked = blocked;

        let status = LedStatus {
            caps_lock: bridge.keyboard_leds().caps_lock(),
            error: bridge.system_state() == SystemState::Error,
        };
        if last_led != Some(status) {
            last_led = Some(status);
            LED_STATUS.signal(status);
        }

        ticker.next().await;
    }
}

#[embassy_executor::task]
async fn battery_task(mut adc: Saadc<'static, 1>, server: &'static Server) -> ! {
    adc.calibrate().await;
    let mut monitor = BatteryMonitor::new();
    let mut samples = [0i16; SAMPLES_PER_MEASUREMENT];

    loop {
        for sample in samples.iter_mut() {
            let mut buf = [0i16; 1];
            adc.sample(&mut buf).await;
            *sample = buf[0];
        }

        if let Some(percent) = monitor.update(battery::average_samples(&samples)) {
            info!("Battery: {}%", percent);
            if server.bas.battery_level_set(&percent).is_err() {
                warn!("Battery: level characteristic not updated");
            }
            BATTERY_LEVEL.signal(percent);
        }

        Timer::after_secs(BATTERY_SAMPLE_INTERVAL_SECS).await;
    }
}

/// Caps lock forces the LED on; an unrecoverable link forces a fast
/// blink; otherwise the configured mode applies.
#[embassy_executor::task]
async fn led_task(mut led: Output<'static>, settings: LedSettings) -> ! {
    let mut status = LedStatus {
        caps_lock: false,
        error: false,
    };
    let interval = Duration::from_millis(u64::from(settings.blink_interval_ms().max(10)));

    loop {
        if let Some(next) = LED_STATUS.try_take() {
            status = next;
        }

        let mode = if status.caps_lock {
            LedMode::On
        } else if status.error {
            LedMode::Blink
        } else {
            settings.mode
        };

        match mode {
            LedMode::Off => {
                led.set_low();
                status = LED_STATUS.wait().await;
            }
            LedMode::On => {
                led.set_high();
                status = LED_STATUS.wait().await;
            }
            LedMode::Blink | LedMode::Breathe => {
                let period = if status.error { Duration::from_millis(100) } else { interval };
                led.toggle();
                Timer::after(period).await;
            }
        }
    }
}
