//! Persistent storage for user settings.
//!
//! Uses the nRF52840's internal flash via the `sequential-storage` crate.
//! The whole [`UserSettings`] record is one map item; `sequential-storage`
//! appends new versions and handles wear levelling and GC across the
//! reserved pages.
//!
//! A record that is missing, unreadable or fails validation is replaced
//! by the defaults, so the adapter always boots with usable settings.

use crate::config::{STORAGE_FLASH_PAGE_COUNT, STORAGE_FLASH_PAGE_START};
use crate::settings::{UserSettings, SETTINGS_RECORD_SIZE};
use defmt::{debug, error, info, warn};
use embedded_storage_async::nor_flash::NorFlash;

/// Flash page size for nRF52840 (4 KB).
const FLASH_PAGE_SIZE: u32 = 4096;

/// Start address of our storage region.
const STORAGE_START: u32 = STORAGE_FLASH_PAGE_START * FLASH_PAGE_SIZE;

/// End address (exclusive) of our storage region.
const STORAGE_END: u32 = (STORAGE_FLASH_PAGE_START + STORAGE_FLASH_PAGE_COUNT) * FLASH_PAGE_SIZE;

/// Key for the settings record in the map storage.
const KEY_USER_SETTINGS: u8 = 0x01;

/// Scratch buffer for `sequential-storage`: record plus item header.
const WORK_BUFFER_SIZE: usize = 128;

/// In-memory copy of the settings, synced with flash.
pub struct SettingsStore {
    settings: UserSettings,
    /// True if the cached copy differs from flash.
    dirty: bool,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self {
            settings: UserSettings::default(),
            dirty: false,
        }
    }

    pub fn settings(&self) -> &UserSettings {
        &self.settings
    }

    /// Mutate the cached settings; the change is persisted on the next
    /// [`save_to_flash`](Self::save_to_flash).
    pub fn update(&mut self, f: impl FnOnce(&mut UserSettings)) {
        let before = self.settings.encode();
        f(&mut self.settings);
        if self.settings.encode() != before {
            self.dirty = true;
        }
    }

    pub fn restore_defaults(&mut self) {
        self.update(UserSettings::restore_defaults);
    }

    pub async fn load_from_flash(&mut self, flash: &mut impl NorFlash) {
        let mut buf = [0u8; WORK_BUFFER_SIZE];

        match sequential_storage::map::fetch_item::<u8, &[u8], _>(
            flash,
            STORAGE_START..STORAGE_END,
            &mut sequential_storage::cache::NoCache::new(),
            &mut buf,
            &KEY_USER_SETTINGS,
        )
        .await
        {
            Ok(Some(data)) => match UserSettings::decode(data) {
                Ok(settings) => {
                    info!("Settings loaded from flash (\"{}\")", settings.device_name());
                    self.settings = settings;
                    self.dirty = false;
                    return;
                }
                Err(e) => warn!("Stored settings rejected: {}", e),
            },
            Ok(None) => info!("No settings in flash, using defaults"),
            Err(e) => error!("Flash read error: {:?}", defmt::Debug2Format(&e)),
        }

        // Write the defaults back so the next boot finds a valid record.
        self.settings = UserSettings::default();
        self.dirty = true;
    }

    pub async fn save_to_flash(&mut self, flash: &mut impl NorFlash) -> Result<(), crate::Error> {
        if !self.dirty {
            debug!("SettingsStore: no changes to save");
            return Ok(());
        }

        let mut buf = [0u8; WORK_BUFFER_SIZE];
        let record: [u8; SETTINGS_RECORD_SIZE] = self.settings.encode();
        let item: &[u8] = &record;

        match sequential_storage::map::store_item::<u8, &[u8], _>(
            flash,
            STORAGE_START..STORAGE_END,
            &mut sequential_storage::cache::NoCache::new(),
            &mut buf,
            &KEY_USER_SETTINGS,
            &item,
        )
        .await
        {
            Ok(()) => {
                info!("Settings saved to flash");
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                error!("Flash write error: {:?}", defmt::Debug2Format(&e));
                Err(crate::Error::Storage)
            }
        }
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

