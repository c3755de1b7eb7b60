//! Debounced pulse counting for the hot and cold water inputs.
//!
//! Each meter closes a reed contact for every `liters_per_pulse` liters, pulling its input low.
//! Contact bounce is filtered by a one-hot shift register per input that moves one position per
//! poll towards the current level. A level change is only accepted once the register has moved
//! from one end to the other, so glitches shorter than 15 polls never reach the counters.

use crate::error::Error;
use crate::platform::Platform;
use crate::{Config, ConfigStore};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::InputPin;
#[cfg(feature = "defmt")]
use defmt::{debug, warn};

/// Counters wrap to zero when reaching this value.
pub const DEFAULT_ROLLOVER: u32 = 100_000_000;
pub const DEFAULT_POLL_INTERVAL_US: u32 = 1_000;

const SATURATED: u16 = 1 << 15;
const RELEASED: u16 = 1;
const PULSE_COUNT_MASK: u8 = 0x3F;

#[derive(strum::Display, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    Hot,
    Cold,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PulseSettings {
    pub rollover: u32,
    /// Delay between two polls of [`PulseCounter::counters_handler`]
    pub poll_interval_us: u32,
    /// Upper bound of polls per [`PulseCounter::counters_handler`] call. `None` waits until the
    /// inputs are stable, however long that takes.
    pub max_ticks: Option<u32>,
}

impl PulseSettings {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.rollover == 0 || self.max_ticks == Some(0) {
            return Err(Error::InvalidSettings);
        }
        Ok(())
    }
}

impl Default for PulseSettings {
    fn default() -> Self {
        Self {
            rollover: DEFAULT_ROLLOVER,
            poll_interval_us: DEFAULT_POLL_INTERVAL_US,
            max_ticks: None,
        }
    }
}

/// Input levels sampled right before deep sleep. Lives in retention memory while the node sleeps
/// and lets [`PulseCounter::wake`] count a pulse that started during sleep.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetainedLevels {
    pub hot_open: bool,
    pub cold_open: bool,
}

/// Debounce state of a single input.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Debouncer {
    shift_register: u16,
    closed: bool,
    pressed: bool,
    pulse_count: u8,
}

impl Debouncer {
    /// Starts settled at the current level. A contact that is already closed is not counted.
    pub const fn new(level_low: bool) -> Self {
        if level_low {
            Self {
                shift_register: SATURATED,
                closed: true,
                pressed: true,
                pulse_count: 0,
            }
        } else {
            Self {
                shift_register: RELEASED,
                closed: false,
                pressed: false,
                pulse_count: 0,
            }
        }
    }

    /// Like [`Debouncer::new`], but a contact that closed while the node was sleeping counts as
    /// one pulse.
    pub const fn wake(level_low: bool, was_open_before_sleep: bool) -> Self {
        let mut debouncer = Self::new(level_low);
        if level_low && was_open_before_sleep {
            debouncer.pulse_count = 1;
        }
        debouncer
    }

    /// Advances the filter by one poll.
    pub fn step(&mut self, level_low: bool) {
        if level_low {
            if self.shift_register == SATURATED {
                self.closed = true;
            } else {
                self.shift_register <<= 1;
            }
        } else if self.shift_register == RELEASED {
            self.closed = false;
        } else {
            self.shift_register >>= 1;
        }

        if self.closed {
            if !self.pressed {
                self.pressed = true;
                self.pulse_count = (self.pulse_count + 1) & PULSE_COUNT_MASK;
            }
        } else {
            self.pressed = false;
        }
    }

    /// `true` once the register rests at the end matching the accepted level.
    pub const fn is_settled(&self) -> bool {
        (self.shift_register == SATURATED && self.closed)
            || (self.shift_register == RELEASED && !self.closed)
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Pulses recognized since the last accumulation.
    pub const fn pulse_count(&self) -> u8 {
        self.pulse_count
    }

    fn take_pulses(&mut self) -> u8 {
        core::mem::take(&mut self.pulse_count)
    }
}

/// Owns both pulse inputs and turns their pulses into liters.
pub struct PulseCounter<H, C> {
    hot_pin: H,
    cold_pin: C,
    hot: Debouncer,
    cold: Debouncer,
    settings: PulseSettings,
}

impl<H: InputPin, C: InputPin> PulseCounter<H, C> {
    /// Samples both inputs once to start from the current levels, used on a cold start.
    pub fn new(mut hot_pin: H, mut cold_pin: C, settings: PulseSettings) -> Result<Self, Error> {
        settings.validate()?;

        let hot = Debouncer::new(read_low(&mut hot_pin)?);
        let cold = Debouncer::new(read_low(&mut cold_pin)?);

        Ok(Self {
            hot_pin,
            cold_pin,
            hot,
            cold,
            settings,
        })
    }

    /// Used after waking up from deep sleep with the levels captured by
    /// [`PulseCounter::retained_levels`] before going to sleep.
    pub fn wake(
        mut hot_pin: H,
        mut cold_pin: C,
        retained: RetainedLevels,
        settings: PulseSettings,
    ) -> Result<Self, Error> {
        settings.validate()?;

        let hot = Debouncer::wake(read_low(&mut hot_pin)?, retained.hot_open);
        let cold = Debouncer::wake(read_low(&mut cold_pin)?, retained.cold_open);

        #[cfg(feature = "defmt")]
        debug!(
            "wake: hot {}, cold {} pending pulses",
            hot.pulse_count(),
            cold.pulse_count()
        );

        Ok(Self {
            hot_pin,
            cold_pin,
            hot,
            cold,
            settings,
        })
    }

    pub fn retained_levels(&mut self) -> Result<RetainedLevels, Error> {
        Ok(RetainedLevels {
            hot_open: !read_low(&mut self.hot_pin)?,
            cold_open: !read_low(&mut self.cold_pin)?,
        })
    }

    /// One poll of both inputs. Returns `true` if both have settled.
    pub fn poll(&mut self) -> Result<bool, Error> {
        let hot_low = read_low(&mut self.hot_pin)?;
        self.hot.step(hot_low);

        let cold_low = read_low(&mut self.cold_pin)?;
        self.cold.step(cold_low);

        Ok(self.is_settled())
    }

    pub fn is_settled(&self) -> bool {
        self.hot.is_settled() && self.cold.is_settled()
    }

    pub fn debouncer(&self, channel: Channel) -> &Debouncer {
        match channel {
            Channel::Hot => &self.hot,
            Channel::Cold => &self.cold,
        }
    }

    pub fn pulse_count(&self, channel: Channel) -> u8 {
        self.debouncer(channel).pulse_count()
    }

    pub fn settings(&self) -> &PulseSettings {
        &self.settings
    }

    /// Moves the recognized pulses into the liter counters of `config`. Returns `true` if any
    /// counter changed and the record has to be saved.
    pub fn accumulate(&mut self, config: &mut Config) -> bool {
        let mut changed = false;

        for channel in [Channel::Hot, Channel::Cold] {
            let (debouncer, liters) = match channel {
                Channel::Hot => (&mut self.hot, &mut config.hot_liters),
                Channel::Cold => (&mut self.cold, &mut config.cold_liters),
            };

            let pulses = debouncer.take_pulses();
            if pulses == 0 {
                continue;
            }

            *liters = add_liters(
                *liters,
                pulses,
                config.liters_per_pulse,
                self.settings.rollover,
            );
            changed = true;

            #[cfg(feature = "defmt")]
            debug!("accumulate: {} counter {} liters", channel, *liters);

            #[cfg(feature = "debug-logs")]
            println!("pulse: {channel} counter {} liters", *liters);
        }

        changed
    }

    /// Polls both inputs until they are stable, books the recognized pulses into `config` and
    /// saves it once if anything changed. Returns whether a save happened.
    ///
    /// Blocks for at least one poll interval. Pulses recognized before a
    /// [`Error::DebounceTimeout`] stay pending for the next call.
    pub fn counters_handler<T: Platform, D: DelayNs>(
        &mut self,
        store: &mut ConfigStore<T>,
        config: &mut Config,
        delay: &mut D,
    ) -> Result<bool, Error> {
        let mut ticks: u32 = 0;
        loop {
            let settled = self.poll()?;
            delay.delay_us(self.settings.poll_interval_us);
            ticks = ticks.saturating_add(1);

            if settled {
                break;
            }
            if self.settings.max_ticks.is_some_and(|max| ticks >= max) {
                #[cfg(feature = "defmt")]
                warn!("counters_handler: inputs still bouncing after {} polls", ticks);

                return Err(Error::DebounceTimeout);
            }
        }

        if !self.accumulate(config) {
            return Ok(false);
        }

        store.save(config)?;
        Ok(true)
    }
}

fn read_low<P: InputPin>(pin: &mut P) -> Result<bool, Error> {
    pin.is_low().map_err(|_| Error::GpioError)
}

/// Adds the liters of `pulses` and wraps at `rollover`, which must be non-zero. The result is
/// always below `rollover`, even for a rollover smaller than one batch of pulses.
fn add_liters(liters: u32, pulses: u8, liters_per_pulse: u8, rollover: u32) -> u32 {
    let total = u64::from(liters) + u64::from(pulses) * u64::from(liters_per_pulse);
    let wrapped = total % u64::from(rollover);
    // below a u32 rollover
    wrapped as u32
}
