//! Scalar strategy: squarer data port
//!
//! Each sample is written to DATA_IN (low 16 bits) and its square read back
//! from DATA_OUT. The loop finishes inside `begin`, so no completion signal is
//! involved.

use crate::dma::SampleBuffers;
use crate::error::Result;
use crate::mmio::Registers;
use crate::strategy::{StrategyKind, TransferStrategy};
use periph_chip::regs::squarer;

/// Per-sample register I/O against the squarer
#[derive(Debug)]
pub struct ScalarStrategy {
    regs: Registers,
}

impl ScalarStrategy {
    /// Drive the squarer data port behind `regs`.
    pub fn new(regs: Registers) -> Self {
        Self { regs }
    }
}

impl TransferStrategy for ScalarStrategy {
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    fn begin(&mut self, buffers: &mut SampleBuffers, length: usize) -> Result<()> {
        tracing::debug!("scalar transfer of {length} samples");
        for i in 0..length {
            let sample = buffers.input()[i];
            self.regs
                .write(squarer::fields::DATA_IN, u32::from(sample as u16));
            buffers.output_mut()[i] = self.regs.read(squarer::fields::DATA_OUT) as i32;
        }
        Ok(())
    }

    fn is_synchronous(&self) -> bool {
        true
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Scalar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimSquarer;
    use std::sync::Arc;

    #[test]
    fn test_squares_in_place() {
        let mut strategy = ScalarStrategy::new(Registers::new(Arc::new(SimSquarer::new())));
        let mut buffers = SampleBuffers::new(4).expect("alloc");
        buffers.input_mut()[..3].copy_from_slice(&[3, -5, i16::MIN]);

        strategy.begin(&mut buffers, 3).expect("begin");
        assert_eq!(&buffers.output()[..3], &[9, 25, 1 << 30]);
        assert!(strategy.is_synchronous());
    }
}
