#![doc = include_str ! ("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod error;
pub mod layout;
pub mod platform;
pub mod pulse;
mod raw;
mod store;

pub use layout::{Layout, Region, RegionPair, RegionSelection};
pub use pulse::{Channel, PulseCounter, PulseSettings, RetainedLevels};
pub use raw::{CONFIG_MAGIC, CONFIG_SIZE, DEFAULT_LITERS_PER_PULSE, SEQUENCE_MASK, checksum};

use crate::error::Error;
use crate::platform::Platform;

/// The persisted meter state. Exactly one live instance exists at runtime: it is returned by
/// [`ConfigStore::load`] and lent to every operation that mutates or persists it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub magic: u32,
    /// Written as handoff for the next firmware image and not yet consumed by it
    pub ota_pending: bool,
    pub sequence: u32,
    /// Slot the record was last written to or recovered from
    pub log_region_start: u32,
    /// End of the log region the record belongs to
    pub log_region_end: u32,
    pub hot_liters: u32,
    pub cold_liters: u32,
    pub liters_per_pulse: u8,
    pub checksum: u16,
}

impl Config {
    /// Zeroed counters placed at the start of `region`.
    pub fn default_for(region: Region) -> Self {
        let mut config = Self {
            magic: CONFIG_MAGIC,
            ota_pending: false,
            sequence: 0,
            log_region_start: region.start,
            log_region_end: region.end,
            hot_liters: 0,
            cold_liters: 0,
            liters_per_pulse: DEFAULT_LITERS_PER_PULSE,
            checksum: 0,
        };
        config.seal();
        config
    }

    /// Serializes the record in its packed, little endian flash layout.
    pub fn to_bytes(&self) -> [u8; CONFIG_SIZE] {
        raw::serialize(self)
    }

    /// Decodes a record without validating it, see [`Config::is_valid`].
    pub fn from_bytes(raw: &[u8; CONFIG_SIZE]) -> Self {
        raw::deserialize(raw)
    }

    /// Recomputes the checksum after the content was changed.
    pub fn seal(&mut self) {
        self.checksum = checksum(&self.to_bytes());
    }

    pub fn is_valid(&self) -> bool {
        raw::is_valid(&self.to_bytes())
    }
}

/// Wear-leveled storage of a single [`Config`] record.
///
/// Every steady-state save lands in the next slot of a circular log, the newest record is found
/// on boot by following the run of consecutive sequence numbers. A separate anchor slot carries
/// the record across firmware updates and tells a fresh flash from a used one.
pub struct ConfigStore<T: Platform> {
    pub(crate) hal: T,
    pub(crate) layout: Layout,
    pub(crate) faulted: bool,

    // set after calling self.load
    pub(crate) region: Option<(RegionPair, Region)>,
    pub(crate) seeded: bool,
}

impl<T: Platform> ConfigStore<T> {
    /// Checks the layout against the flash geometry. Does not touch the flash, call
    /// [`ConfigStore::load`] to get the current record.
    pub fn new(layout: Layout, hal: T) -> Result<ConfigStore<T>, Error> {
        layout.validate(&hal)?;

        Ok(Self {
            hal,
            layout,
            faulted: false,
            region: None,
            seeded: false,
        })
    }

    /// Restores the newest record, or writes and returns defaults if nothing usable is on the
    /// flash. Corrupted data is never reported as error.
    pub fn load(&mut self) -> Result<Config, Error> {
        match self.load_config() {
            Ok(config) => {
                self.faulted = false;
                Ok(config)
            }
            Err(Error::FlashError) => {
                self.faulted = true;
                Err(Error::FlashError)
            }
            Err(e) => Err(e),
        }
    }

    /// Persists `config`, normally into the next log slot. Updates the sequence number, working
    /// pointer and checksum of `config` in place.
    pub fn save(&mut self, config: &mut Config) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::FlashError);
        }

        match self.write_config(config) {
            Ok(()) => Ok(()),
            Err(Error::FlashError) => {
                self.faulted = true;
                Err(Error::FlashError)
            }
            Err(e) => Err(e),
        }
    }

    /// Hands `config` over to the next firmware image. Only the anchor is written, the image
    /// booting next adopts the record into its own log region.
    pub fn save_after_ota(&mut self, config: &mut Config) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::FlashError);
        }
        if self.region.is_none() {
            return Err(Error::NotLoaded);
        }

        config.ota_pending = true;
        match self.write_anchor(config) {
            Ok(()) => Ok(()),
            Err(Error::FlashError) => {
                self.faulted = true;
                Err(Error::FlashError)
            }
            Err(e) => Err(e),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The log region selected by the last `load`.
    pub fn region(&self) -> Option<(RegionPair, Region)> {
        self.region
    }

    /// Gives back the flash, e.g. to simulate a reboot in tests.
    pub fn into_inner(self) -> T {
        self.hal
    }
}
