use crate::Config;
use crate::platform::{AlignedOps, Platform};
use core::mem::size_of;
#[cfg(feature = "defmt")]
use defmt::trace;

/// Sentinel in the first word of every valid record.
pub const CONFIG_MAGIC: u32 = 0x0FED_1410;
/// Sequence numbers wrap to zero after this value.
pub const SEQUENCE_MASK: u32 = u32::MAX;
pub const DEFAULT_LITERS_PER_PULSE: u8 = 10;
/// Size of a serialized record including the trailing checksum.
pub const CONFIG_SIZE: usize = size_of::<RawConfig>();

/// Upper bound for the aligned read of one record and for a single padded write.
pub(crate) const SCRATCH_SIZE: usize = 64;

// Reflected CRC-16 generator used by the deployed firmware. Not the ARC constant 0xA001.
const CRC16_GENERATOR: u16 = 0xA010;
const CHECKSUM_SIZE: usize = size_of::<u16>();

const _: () = assert!(CONFIG_SIZE == 28, "Record layout must match the deployed firmware");
const _: () = assert!(CONFIG_SIZE <= SCRATCH_SIZE);

/// On-flash representation. All multibyte fields are little endian.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub(crate) struct RawConfig {
    pub(crate) magic: u32,
    pub(crate) ota_pending: u8,
    pub(crate) sequence: u32,
    pub(crate) log_region_start: u32,
    pub(crate) log_region_end: u32,
    pub(crate) hot_liters: u32,
    pub(crate) cold_liters: u32,
    pub(crate) liters_per_pulse: u8,
    pub(crate) checksum: u16,
}

pub(crate) union RawConfigBytes {
    pub(crate) config: RawConfig,
    pub(crate) raw: [u8; CONFIG_SIZE],
}

impl From<&Config> for RawConfig {
    fn from(val: &Config) -> Self {
        RawConfig {
            magic: val.magic.to_le(),
            ota_pending: val.ota_pending as u8,
            sequence: val.sequence.to_le(),
            log_region_start: val.log_region_start.to_le(),
            log_region_end: val.log_region_end.to_le(),
            hot_liters: val.hot_liters.to_le(),
            cold_liters: val.cold_liters.to_le(),
            liters_per_pulse: val.liters_per_pulse,
            checksum: val.checksum.to_le(),
        }
    }
}

impl From<RawConfig> for Config {
    fn from(val: RawConfig) -> Self {
        Config {
            magic: u32::from_le(val.magic),
            ota_pending: val.ota_pending != 0,
            sequence: u32::from_le(val.sequence),
            log_region_start: u32::from_le(val.log_region_start),
            log_region_end: u32::from_le(val.log_region_end),
            hot_liters: u32::from_le(val.hot_liters),
            cold_liters: u32::from_le(val.cold_liters),
            liters_per_pulse: val.liters_per_pulse,
            checksum: u16::from_le(val.checksum),
        }
    }
}

pub(crate) fn serialize(config: &Config) -> [u8; CONFIG_SIZE] {
    let raw = RawConfigBytes {
        config: RawConfig::from(config),
    };
    // Safety: every field is a plain integer, any bit pattern is a valid byte array
    unsafe { raw.raw }
}

pub(crate) fn deserialize(raw: &[u8; CONFIG_SIZE]) -> Config {
    let raw = RawConfigBytes { raw: *raw };
    // Safety: every bit pattern is a valid `RawConfig`, validity is decided by `is_valid`
    Config::from(unsafe { raw.config })
}

/// A record is valid if it starts with the magic and its trailing checksum matches the content.
/// Erased flash (all ones) fails the magic check.
pub(crate) fn is_valid(raw: &[u8; CONFIG_SIZE]) -> bool {
    let magic = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let stored = u16::from_le_bytes([raw[CONFIG_SIZE - 2], raw[CONFIG_SIZE - 1]]);
    magic == CONFIG_MAGIC && stored == checksum(raw)
}

/// CRC-16 over a serialized record, excluding its trailing two checksum bytes.
///
/// The input is the whole record; the last two bytes are skipped so the function can be run over
/// the buffer that is about to be written or was just read.
pub fn checksum(record: &[u8]) -> u16 {
    let covered = &record[..record.len().saturating_sub(CHECKSUM_SIZE)];

    let mut crc: u16 = 0xFFFF;
    for &byte in covered {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ CRC16_GENERATOR;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Reads one slot and returns the record if it is valid.
pub(crate) fn read_config<T: Platform>(
    hal: &mut T,
    address: u32,
) -> Result<Option<Config>, T::Error> {
    #[cfg(feature = "defmt")]
    trace!("read_config @{:#08x}", address);

    let mut buf = [0xFFu8; SCRATCH_SIZE];
    hal.read(address, &mut buf[..T::align_read(CONFIG_SIZE)])?;

    let mut raw = [0u8; CONFIG_SIZE];
    raw.copy_from_slice(&buf[..CONFIG_SIZE]);

    if is_valid(&raw) {
        Ok(Some(deserialize(&raw)))
    } else {
        Ok(None)
    }
}

#[inline(always)]
pub(crate) fn write_aligned<T: Platform>(
    hal: &mut T,
    offset: u32,
    bytes: &[u8],
) -> Result<(), T::Error> {
    #[cfg(feature = "defmt")]
    trace!("write_aligned @{:#08x}: [{}]", offset, bytes.len());

    if bytes.len().is_multiple_of(T::WRITE_SIZE) {
        hal.write(offset, bytes)
    } else {
        let pivot = T::align_write_floor(bytes.len());
        let (header, trailer) = bytes.split_at(pivot);
        if !header.is_empty() {
            hal.write(offset, header)?;
        }

        // no need to write the trailer if remaining data is all ones - this the default state of the flash
        if trailer.iter().any(|&e| e != 0xFF) {
            let mut buf = [0xFFu8; SCRATCH_SIZE];
            buf[..trailer.len()].copy_from_slice(trailer);
            hal.write(offset + (pivot as u32), &buf[..T::WRITE_SIZE])?
        }

        Ok(())
    }
}
