use embedded_storage::nor_flash::NorFlash;

/// Everything the store needs from the chip: raw NOR flash access and the answer to which
/// firmware bank is currently running.
pub trait Platform: BootBank + NorFlash {}

impl<T: BootBank + NorFlash> Platform for T {}

pub trait BootBank {
    /// `true` if the running image was booted from bank A
    fn booted_from_bank_a(&self) -> bool;
}

impl<T: BootBank> BootBank for &mut T {
    fn booted_from_bank_a(&self) -> bool {
        T::booted_from_bank_a(self)
    }
}

pub trait AlignedOps: Platform {
    fn align_read(size: usize) -> usize {
        align_ceil(size, Self::READ_SIZE)
    }

    fn align_write_floor(size: usize) -> usize {
        align_floor(size, Self::WRITE_SIZE)
    }
}

#[inline(always)]
const fn align_ceil(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size.saturating_add(alignment - 1) & !(alignment - 1)
    } else {
        size.saturating_add(alignment - 1) / alignment * alignment
    }
}

#[inline(always)]
const fn align_floor(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size & !(alignment - 1)
    } else {
        size / alignment * alignment
    }
}

impl<T: Platform> AlignedOps for T {}
