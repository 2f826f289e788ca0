//! Per-event-class counters for offline diagnosis.
//!
//! Counters only ever grow and stop at `u32::MAX`.

/// Every event class the bridge counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatEvent {
    UsbConnect,
    UsbDisconnect,
    UsbEnumFail,
    UsbCommFail,
    BleConnect,
    BleDisconnect,
    BleAuthFail,
    BleCommFail,
    WatchdogTimeout,
    Reset,
    UsbReconnectRetry,
    BleReconnectRetry,
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorStats {
    pub usb_connect: u32,
    pub usb_disconnect: u32,
    pub usb_enum_fail: u32,
    pub usb_comm_fail: u32,
    pub ble_connect: u32,
    pub ble_disconnect: u32,
    pub ble_auth_fail: u32,
    pub ble_comm_fail: u32,
    pub watchdog_timeout: u32,
    pub reset: u32,
    pub usb_reconnect_retry: u32,
    pub ble_reconnect_retry: u32,
}

impl ErrorStats {
    pub const fn new() -> Self {
        Self {
            usb_connect: 0,
            usb_disconnect: 0,
            usb_enum_fail: 0,
            usb_comm_fail: 0,
            ble_connect: 0,
            ble_disconnect: 0,
            ble_auth_fail: 0,
            ble_comm_fail: 0,
            watchdog_timeout: 0,
            reset: 0,
            usb_reconnect_retry: 0,
            ble_reconnect_retry: 0,
        }
    }

    fn counter_mut(&mut self, event: StatEvent) -> &mut u32 {
        match event {
            StatEvent::UsbConnect => &mut self.usb_connect,
            StatEvent::UsbDisconnect => &mut self.usb_disconnect,
            StatEvent::UsbEnumFail => &mut self.usb_enum_fail,
            StatEvent::UsbCommFail => &mut self.usb_comm_fail,
            StatEvent::BleConnect => &mut self.ble_connect,
            StatEvent::BleDisconnect => &mut self.ble_disconnect,
            StatEvent::BleAuthFail => &mut self.ble_auth_fail,
            StatEvent::BleCommFail => &mut self.ble_comm_fail,
            StatEvent::WatchdogTimeout => &mut self.watchdog_timeout,
            StatEvent::Reset => &mut self.reset,
            StatEvent::UsbReconnectRetry => &mut self.usb_reconnect_retry,
            StatEvent::BleReconnectRetry => &mut self.ble_reconnect_retry,
        }
    }

    pub fn record(&mut self, event: StatEvent) {
        let counter = self.counter_mut(event);
        *counter = counter.saturating_add(1);
    }

    pub fn get(&self, event: StatEvent) -> u32 {
        match event {
            StatEvent::UsbConnect => self.usb_connect,
            StatEvent::UsbDisconnect => self.usb_disconnect,
            StatEvent::UsbEnumFail => self.usb_enum_fail,
            StatEvent::UsbCommFail => self.usb_comm_fail,
            StatEvent::BleConnect => self.ble_connect,
            StatEvent::BleDisconnect => self.ble_disconnect,
            StatEvent::BleAuthFail => self.ble_auth_fail,
            StatEvent::BleCommFail => self.ble_comm_fail,
            StatEvent::WatchdogTimeout => self.watchdog_timeout,
            StatEvent::Reset => self.reset,
            StatEvent::UsbReconnectRetry => self.usb_reconnect_retry,
            StatEvent::BleReconnectRetry => self.ble_reconnect_retry,
        }
    }

    /// Emit all counters at `info` level.
    pub fn log(&self) {
        #[cfg(feature = "defmt")]
        {
            defmt::info!("=== error statistics ===");
            defmt::info!(
                "USB: connect={} disconnect={} enum_fail={} comm_fail={}",
                self.usb_connect,
                self.usb_disconnect,
                self.usb_enum_fail,
                self.usb_comm_fail
            );
            defmt::info!(
                "BLE: connect={} disconnect={} auth_fail={} comm_fail={}",
                self.ble_connect,
                self.ble_disconnect,
                self.ble_auth_fail,
                self.ble_comm_fail
            );
            defmt::info!(
                "system: watchdog={} reset={}",
                self.watchdog_timeout,
                self.reset
            );
            defmt::info!(
                "retry: USB={} BLE={}",
                self.usb_reconnect_retry,
                self.ble_reconnect_retry
            );
        }
    }
}
