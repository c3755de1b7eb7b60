use crate::error::Error;
use crate::platform::{AlignedOps, Platform};
use crate::raw::{CONFIG_SIZE, SCRATCH_SIZE};

/// Half-open flash address range `[start, end)` used as circular log.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Region {
    pub start: u32,
    pub end: u32,
}

impl Region {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub const fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn contains(&self, address: u32) -> bool {
        address >= self.start && address < self.end
    }

    const fn overlaps(&self, start: u64, end: u64) -> bool {
        start < self.end as u64 && (self.start as u64) < end
    }
}

/// The two log regions mirror the two firmware banks. The image running from bank A logs into
/// region A, which leaves region B untouched for the image about to be installed and vice versa.
#[derive(strum::Display, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegionPair {
    A,
    B,
}

impl RegionPair {
    pub const fn from_boot_bank(booted_from_bank_a: bool) -> Self {
        if booted_from_bank_a {
            RegionPair::A
        } else {
            RegionPair::B
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegionSelection {
    /// Ask the platform which bank is running on every `load`.
    BootBank,
    /// Always use the given pair. Meant for builds without OTA support.
    Fixed(RegionPair),
}

/// Static flash map of the store.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Layout {
    /// Address of the single anchor record. Occupies a whole sector.
    pub anchor: u32,
    pub region_a: Region,
    pub region_b: Region,
    /// Distance between two log slots
    pub slot_size: u32,
    pub selection: RegionSelection,
}

/// TLSR8258 module with 512k flash: user data below each firmware bank and the anchor right after
/// the second region.
pub const TLSR8258: Layout = Layout {
    anchor: 0x74000,
    region_a: Region::new(0x00000, 0x34000),
    region_b: Region::new(0x40000, 0x74000),
    slot_size: 256,
    selection: RegionSelection::BootBank,
};

impl Default for Layout {
    fn default() -> Self {
        TLSR8258
    }
}

impl Layout {
    pub const fn region(&self, pair: RegionPair) -> Region {
        match pair {
            RegionPair::A => self.region_a,
            RegionPair::B => self.region_b,
        }
    }

    pub(crate) fn validate<T: Platform>(&self, hal: &T) -> Result<(), Error> {
        let sector = T::ERASE_SIZE as u64;
        let capacity = hal.capacity() as u64;
        let slot = self.slot_size as u64;

        if slot < CONFIG_SIZE as u64
            || !sector.is_multiple_of(slot)
            || !slot.is_multiple_of(T::READ_SIZE as u64)
            || !slot.is_multiple_of(T::WRITE_SIZE as u64)
            || T::align_read(CONFIG_SIZE) > SCRATCH_SIZE
            || T::WRITE_SIZE > SCRATCH_SIZE
        {
            return Err(Error::UnsupportedGeometry);
        }

        for region in [self.region_a, self.region_b] {
            if region.is_empty()
                || !(region.start as u64).is_multiple_of(sector)
                || !(region.end as u64).is_multiple_of(sector)
                || region.end as u64 > capacity
            {
                return Err(Error::InvalidRegion);
            }
        }

        let anchor_end = self.anchor as u64 + sector;
        if !(self.anchor as u64).is_multiple_of(sector) || anchor_end > capacity {
            return Err(Error::InvalidAnchor);
        }
        if [self.region_a, self.region_b]
            .iter()
            .any(|region| region.overlaps(self.anchor as u64, anchor_end))
        {
            return Err(Error::InvalidAnchor);
        }

        Ok(())
    }
}
