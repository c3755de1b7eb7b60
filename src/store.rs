use crate::error::Error;
use crate::layout::{Region, RegionPair, RegionSelection};
use crate::platform::Platform;
use crate::raw::{SEQUENCE_MASK, read_config, write_aligned};
use crate::{Config, ConfigStore};
#[cfg(feature = "defmt")]
use defmt::{debug, trace, warn};

impl<T: Platform> ConfigStore<T> {
    fn select_region(&mut self) -> (RegionPair, Region) {
        let pair = match self.layout.selection {
            RegionSelection::BootBank => RegionPair::from_boot_bank(self.hal.booted_from_bank_a()),
            RegionSelection::Fixed(pair) => pair,
        };
        let region = self.layout.region(pair);

        #[cfg(feature = "defmt")]
        debug!(
            "select_region: {} @{:#08x}..{:#08x}",
            pair, region.start, region.end
        );

        #[cfg(feature = "debug-logs")]
        println!(
            "store: region {pair} 0x{:0>8x}..0x{:0>8x}",
            region.start, region.end
        );

        self.region = Some((pair, region));
        (pair, region)
    }

    pub(crate) fn load_config(&mut self) -> Result<Config, Error> {
        let (_, region) = self.select_region();
        self.seeded = false;

        let Some(anchor) = self.read_slot(self.layout.anchor)? else {
            #[cfg(feature = "defmt")]
            warn!("load: no valid anchor, reinitializing");

            #[cfg(feature = "debug-logs")]
            println!("store: no valid anchor, reinitializing");

            return self.reinitialize(region);
        };

        if anchor.ota_pending {
            #[cfg(feature = "defmt")]
            debug!("load: adopting handoff record, sequence {}", anchor.sequence);

            #[cfg(feature = "debug-logs")]
            println!("store: adopting handoff record {anchor:?}");

            let mut config = anchor;
            config.ota_pending = false;
            config.log_region_start = region.start;
            config.log_region_end = region.end;
            self.seeded = true;
            self.write_config(&mut config)?;
            return Ok(config);
        }

        match self.scan_log(region)? {
            Some(config) => Ok(config),
            None => {
                #[cfg(feature = "defmt")]
                warn!("load: log region empty or corrupt, reinitializing");

                #[cfg(feature = "debug-logs")]
                println!("store: no valid first slot, reinitializing");

                self.reinitialize(region)
            }
        }
    }

    /// Follows the run of consecutive sequence numbers from the start of the region. The run ends
    /// at an invalid slot (erased or torn), at a valid slot of an older write epoch or at the end
    /// of the region. The last slot of the run holds the newest record.
    fn scan_log(&mut self, region: Region) -> Result<Option<Config>, Error> {
        let slot_size = self.layout.slot_size;

        let Some(mut current) = self.read_slot(region.start)? else {
            return Ok(None);
        };
        let mut address = region.start;

        loop {
            let next_address = address + slot_size;
            if next_address >= region.end {
                // the log filled the whole region without wrapping yet
                #[cfg(feature = "defmt")]
                debug!("scan_log: run spans the whole region");
                break;
            }

            match self.read_slot(next_address)? {
                Some(next) if next.sequence == current.sequence.wrapping_add(1) & SEQUENCE_MASK => {
                    current = next;
                    address = next_address;
                }
                _ => break,
            }
        }

        #[cfg(feature = "defmt")]
        debug!(
            "scan_log: newest record @{:#08x}, sequence {}",
            address, current.sequence
        );

        #[cfg(feature = "debug-logs")]
        println!(
            "store: newest record @0x{address:0>8x}, sequence {}",
            current.sequence
        );

        current.log_region_start = address;
        Ok(Some(current))
    }

    fn reinitialize(&mut self, region: Region) -> Result<Config, Error> {
        #[cfg(feature = "defmt")]
        trace!("reinitialize: @{:#08x}..{:#08x}", region.start, region.end);

        self.hal
            .erase(region.start, region.end)
            .map_err(|_| Error::FlashError)?;

        let mut config = Config::default_for(region);
        self.seeded = true;
        self.write_config(&mut config)?;
        Ok(config)
    }

    pub(crate) fn write_config(&mut self, config: &mut Config) -> Result<(), Error> {
        let (_, region) = self.region.ok_or(Error::NotLoaded)?;

        if self.seeded {
            // fresh defaults or a handoff: the anchor gets the same record as the first slot
            self.write_anchor(config)?;
            self.erase_sector(config.log_region_start)?;
            self.write_slot(config.log_region_start, config)?;
            self.seeded = false;
            return Ok(());
        }

        if config.ota_pending {
            // keep the handoff current until the next image takes it over
            return self.write_anchor(config);
        }

        let slot_size = self.layout.slot_size;
        let mut address = config.log_region_start.saturating_add(slot_size);
        if !region.contains(address) || !(address - region.start).is_multiple_of(slot_size) {
            address = region.start;
        }
        // erase ahead: each sector is erased once when the log enters it
        if address.is_multiple_of(T::ERASE_SIZE as u32) {
            self.erase_sector(address)?;
        }

        config.sequence = config.sequence.wrapping_add(1) & SEQUENCE_MASK;
        config.log_region_start = address;
        self.write_slot(address, config)
    }

    pub(crate) fn write_anchor(&mut self, config: &mut Config) -> Result<(), Error> {
        let anchor = self.layout.anchor;
        self.erase_sector(anchor)?;
        self.write_slot(anchor, config)
    }

    fn write_slot(&mut self, address: u32, config: &mut Config) -> Result<(), Error> {
        config.seal();

        #[cfg(feature = "debug-logs")]
        println!(
            "store: write 0x{address:0>8x} sequence {} hot {} cold {}",
            config.sequence, config.hot_liters, config.cold_liters
        );

        write_aligned(&mut self.hal, address, &config.to_bytes()).map_err(|_| Error::FlashError)
    }

    fn read_slot(&mut self, address: u32) -> Result<Option<Config>, Error> {
        read_config(&mut self.hal, address).map_err(|_| Error::FlashError)
    }

    fn erase_sector(&mut self, address: u32) -> Result<(), Error> {
        let sector = T::ERASE_SIZE as u32;
        let from = address - address % sector;

        #[cfg(feature = "defmt")]
        trace!("erase_sector: @{:#08x}", from);

        self.hal
            .erase(from, from + sector)
            .map_err(|_| Error::FlashError)
    }
}
