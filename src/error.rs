use thiserror::Error;

/// Errors that can occur while persisting counters. Corrupted or missing records are never reported
/// here as they are silently replaced by defaults; a caller only sees failures of the collaborators
/// (flash, GPIO) or a misconfigured [`crate::Layout`].
#[derive(Error, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// A log region has to be non-empty, sector aligned and inside the flash
    #[error("invalid log region")]
    InvalidRegion,

    /// The anchor slot has to be sector aligned, inside the flash and outside both log regions
    #[error("invalid anchor address")]
    InvalidAnchor,

    /// The slot size has to hold a record, divide the sector size and match the read/write
    /// granularity of the flash
    #[error("unsupported flash geometry")]
    UnsupportedGeometry,

    /// The internal error value is returned from the provided `&mut impl NorFlash`
    #[error("internal flash error")]
    FlashError,

    /// `PulseSettings::rollover` has to be non-zero and `PulseSettings::max_ticks` at least one
    #[error("invalid pulse settings")]
    InvalidSettings,

    /// A pulse input could not be sampled
    #[error("gpio error")]
    GpioError,

    /// `save` needs the region selected by a previous `load`
    #[error("configuration not loaded")]
    NotLoaded,

    /// The inputs kept bouncing for longer than `PulseSettings::max_ticks`
    #[error("debounce did not settle")]
    DebounceTimeout,
}
