//! Squarer data port model

use crate::mmio::RegisterBlock;
use periph_chip::regs::squarer;
use std::sync::atomic::{AtomicU32, Ordering};

/// DATA_OUT always holds the square of the sample last written to DATA_IN
#[derive(Debug, Default)]
pub struct SimSquarer {
    data_in: AtomicU32,
}

impl SimSquarer {
    /// Fresh port, DATA_IN = 0
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegisterBlock for SimSquarer {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn read32(&self, offset: usize) -> u32 {
        let raw = self.data_in.load(Ordering::Acquire);
        match offset {
            squarer::DATA_IN => raw,
            squarer::DATA_OUT => {
                let x = i32::from(raw as u16 as i16);
                (x * x) as u32
            }
            _ => panic!("squarer has no register at {offset:#x}"),
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        if offset == squarer::DATA_IN {
            self.data_in.store(value, Ordering::Release);
        }
    }
}
