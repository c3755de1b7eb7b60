#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, ErrorKind, ErrorType as PinErrorType, InputPin};
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;
use watermeter_nvs::layout::{Layout, Region, RegionSelection};
use watermeter_nvs::platform::BootBank;
use watermeter_nvs::{CONFIG_SIZE, Config};

pub const FLASH_SECTOR_SIZE: usize = 4096;
pub const WORD_SIZE: usize = 4;
pub const SLOT_SIZE: u32 = 256;
pub const SLOTS_PER_SECTOR: u32 = FLASH_SECTOR_SIZE as u32 / SLOT_SIZE;

pub const REGION_A: Region = Region::new(0x0000, 0x2000);
pub const REGION_B: Region = Region::new(0x2000, 0x4000);
pub const ANCHOR: u32 = 0x4000;
pub const SECTORS: usize = 5;

/// Two sectors (32 slots) per region followed by the anchor sector.
pub const LAYOUT: Layout = Layout {
    anchor: ANCHOR,
    region_a: REGION_A,
    region_b: REGION_B,
    slot_size: SLOT_SIZE,
    selection: RegionSelection::BootBank,
};

pub struct Flash {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    pub operations: Vec<Operation>,
    pub bank_a: bool,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl Flash {
    pub fn new(sectors: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * sectors],
            fail_after_operation: usize::MAX,
            operations: Vec::new(),
            bank_a: true,
        }
    }

    pub fn new_with_fault(sectors: usize, fail_after_operation: usize) -> Self {
        Self {
            fail_after_operation,
            ..Self::new(sectors)
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
    }

    pub fn erases(&self) -> Vec<(u32, usize)> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                Operation::Erase { offset, len } => Some((*offset, *len)),
                _ => None,
            })
            .collect()
    }

    pub fn writes(&self) -> Vec<u32> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                Operation::Write { offset, .. } => Some(*offset),
                _ => None,
            })
            .collect()
    }

    pub fn clear_operations(&mut self) {
        self.operations.clear();
    }

    /// Places a record directly into the buffer, bypassing the store.
    pub fn put(&mut self, address: u32, config: &Config) {
        let address = address as usize;
        self.buf[address..address + CONFIG_SIZE].copy_from_slice(&config.to_bytes());
    }

    pub fn get(&self, address: u32) -> Config {
        let address = address as usize;
        let raw: [u8; CONFIG_SIZE] = self.buf[address..address + CONFIG_SIZE]
            .try_into()
            .unwrap();
        Config::from_bytes(&raw)
    }

    pub fn is_erased(&self, address: u32) -> bool {
        let address = address as usize;
        self.buf[address..address + CONFIG_SIZE]
            .iter()
            .all(|&b| b == 0xFF)
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));

        println!(
            "    flash: read:  0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );
        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        self.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for Flash {
    const WRITE_SIZE: usize = WORD_SIZE;

    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(from < to);

        println!(
            "    flash: erase: {from:04X} - {to:04X} #{:>2}",
            self.operations.len()
        );

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        self.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE as _));
        assert!(!bytes.is_empty());

        println!(
            "    flash: write: 0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        self.operations.push(Operation::Write {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        for (i, &val) in bytes.iter().enumerate() {
            // NOR flash can only flip bits from 1 to 0
            self.buf[offset + i] &= val;
        }
        Ok(())
    }
}

impl BootBank for Flash {
    fn booted_from_bank_a(&self) -> bool {
        self.bank_a
    }
}

/// Input pin replaying a queue of levels, one per read. Keeps the last level once the queue is
/// empty. Clones share the queue, so a test keeps a handle to drive the pin.
#[derive(Clone)]
pub struct Pin {
    levels: Rc<RefCell<VecDeque<bool>>>,
    last_low: Rc<RefCell<bool>>,
    reads: Rc<RefCell<usize>>,
}

impl Pin {
    pub fn new(low: bool) -> Self {
        Self {
            levels: Rc::new(RefCell::new(VecDeque::new())),
            last_low: Rc::new(RefCell::new(low)),
            reads: Rc::new(RefCell::new(0)),
        }
    }

    /// Queues `count` reads at the given level.
    pub fn hold(&self, low: bool, count: usize) {
        let mut levels = self.levels.borrow_mut();
        for _ in 0..count {
            levels.push_back(low);
        }
    }

    /// Sets the level returned once the queue is empty.
    pub fn set(&self, low: bool) {
        self.levels.borrow_mut().clear();
        *self.last_low.borrow_mut() = low;
    }

    pub fn reads(&self) -> usize {
        *self.reads.borrow()
    }
}

impl PinErrorType for Pin {
    type Error = Infallible;
}

impl InputPin for Pin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.is_low().map(|low| !low)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        *self.reads.borrow_mut() += 1;
        let low = match self.levels.borrow_mut().pop_front() {
            Some(low) => low,
            None => *self.last_low.borrow(),
        };
        *self.last_low.borrow_mut() = low;
        Ok(low)
    }
}

/// A [`Pin`] whose reads fail once it has been read `fail_after_reads` times.
#[derive(Clone)]
pub struct FaultyPin {
    pin: Pin,
    fail_after_reads: usize,
}

impl FaultyPin {
    pub fn new(low: bool, fail_after_reads: usize) -> Self {
        Self {
            pin: Pin::new(low),
            fail_after_reads,
        }
    }

    pub fn reads(&self) -> usize {
        self.pin.reads()
    }
}

#[derive(Debug)]
pub struct PinFault;

impl digital::Error for PinFault {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl PinErrorType for FaultyPin {
    type Error = PinFault;
}

impl InputPin for FaultyPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.is_low().map(|low| !low)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        if self.pin.reads() >= self.fail_after_reads {
            println!("    pin: FAULT");
            return Err(PinFault);
        }
        self.pin.is_low().map_err(|e| match e {})
    }
}

/// Counts requested delays instead of sleeping.
#[derive(Default)]
pub struct Delay {
    pub calls: usize,
    pub total_ns: u64,
}

impl DelayNs for Delay {
    fn delay_ns(&mut self, ns: u32) {
        self.calls += 1;
        self.total_ns += ns as u64;
    }
}
