//! Register maps for every block the drivers talk to.
//!
//! Raw offsets are `usize` constants relative to the block base; bit
//! definitions are `u32` masks; the `fields` submodules describe the same bits
//! as [`RegisterField`]s carrying their write semantics.
//!
//! ## SmartTimer (AXI-Lite, 16 bytes)
//!
//! ```text
//! 0x00  CTRL    [0] EN   [1] RST (pulse)
//! 0x04  STATUS  [0] WRAP (W1C, drives irq_out)   [1] UPD_PENDING (RO)
//! 0x08  PERIOD  reset 0xFF, shadowed while EN=1
//! 0x0C  DUTY    reset 0xAA, shadowed while EN=1
//! ```
//!
//! ## FIR Q15 filter (4 taps, up to 32 samples)
//!
//! ```text
//! 0x000 CTRL     [0] EN   [1] START (W1P)   [2] RESET (W1P)
//! 0x004 STATUS   [0] DONE (W1C, drives irq)
//! 0x008 LEN      sample count 1..=32
//! 0x010 COEFF0..3  Q15 taps, stride 4
//! 0x100 DATA_IN[32]   stride 4
//! 0x200 DATA_OUT[32]  stride 4
//! ```
//!
//! ## Squarer data port
//!
//! ```text
//! 0x00 DATA_IN   low 16 bits: signed sample
//! 0x04 DATA_OUT  signed 32-bit square of the last sample
//! ```
//!
//! ## AXI DMA (direct register mode)
//!
//! MM2S moves input from memory into the peripheral stream, S2MM moves the
//! peripheral's output back into memory. Writing a channel's LENGTH register
//! starts that channel. Completion of S2MM raises IOC_IRQ.

use crate::field::RegisterField;

// ── SmartTimer ───────────────────────────────────────────────────────────────

/// SmartTimer PWM/period timer.
pub mod timer {
    use super::RegisterField;

    /// Control register.
    pub const CTRL: usize = 0x00;
    /// Status register.
    pub const STATUS: usize = 0x04;
    /// Period in clock cycles.
    pub const PERIOD: usize = 0x08;
    /// Duty cycle in clock cycles.
    pub const DUTY: usize = 0x0C;

    /// PERIOD value after reset.
    pub const PERIOD_RESET: u32 = 0xFF;
    /// DUTY value after reset.
    pub const DUTY_RESET: u32 = 0xAA;

    /// CTRL bits.
    pub mod ctrl {
        /// Counter enable.
        pub const EN: u32 = 1 << 0;
        /// Counter reset.
        pub const RST: u32 = 1 << 1;
    }

    /// STATUS bits.
    pub mod status {
        /// Counter wrapped (W1C, level interrupt).
        pub const WRAP: u32 = 1 << 0;
        /// PERIOD/DUTY written while enabled, commit pending (read-only).
        pub const UPD_PENDING: u32 = 1 << 1;
    }

    /// Typed fields.
    pub mod fields {
        use super::RegisterField;

        /// CTRL.EN
        pub const EN: RegisterField = RegisterField::plain(super::CTRL, 0, 1);
        /// CTRL.RST
        pub const RST: RegisterField = RegisterField::w1p(super::CTRL, 1);
        /// STATUS.WRAP
        pub const WRAP: RegisterField = RegisterField::w1c(super::STATUS, 0);
        /// STATUS.UPD_PENDING
        pub const UPD_PENDING: RegisterField = RegisterField::plain(super::STATUS, 1, 1);
        /// PERIOD
        pub const PERIOD: RegisterField = RegisterField::word(super::PERIOD);
        /// DUTY
        pub const DUTY: RegisterField = RegisterField::word(super::DUTY);
    }
}

// ── FIR filter ───────────────────────────────────────────────────────────────

/// Four-tap Q15 FIR filter with a DONE interrupt.
pub mod fir {
    use super::RegisterField;

    /// Control register.
    pub const CTRL: usize = 0x000;
    /// Status register.
    pub const STATUS: usize = 0x004;
    /// Sample count.
    pub const LEN: usize = 0x008;
    /// First coefficient register.
    pub const COEFF0: usize = 0x010;
    /// Input sample window base.
    pub const DATA_IN: usize = 0x100;
    /// Output sample window base.
    pub const DATA_OUT: usize = 0x200;
    /// Stride between consecutive coefficient/sample registers.
    pub const STRIDE: usize = 4;

    /// Maximum samples per run.
    pub const MAX_LEN: usize = 32;
    /// Number of filter taps.
    pub const NTAPS: usize = 4;

    /// CTRL bits.
    pub mod ctrl {
        /// Filter enable.
        pub const EN: u32 = 1 << 0;
        /// Start processing (self-clearing).
        pub const START: u32 = 1 << 1;
        /// Reset datapath (self-clearing).
        pub const RESET: u32 = 1 << 2;
    }

    /// STATUS bits.
    pub mod status {
        /// Processing finished (W1C).
        pub const DONE: u32 = 1 << 0;
    }

    /// Typed fields.
    pub mod fields {
        use super::RegisterField;

        /// CTRL.EN
        pub const EN: RegisterField = RegisterField::plain(super::CTRL, 0, 1);
        /// CTRL.START
        pub const START: RegisterField = RegisterField::w1p(super::CTRL, 1);
        /// CTRL.RESET
        pub const RESET: RegisterField = RegisterField::w1p(super::CTRL, 2);
        /// STATUS.DONE
        pub const DONE: RegisterField = RegisterField::w1c(super::STATUS, 0);
        /// LEN
        pub const LEN: RegisterField = RegisterField::plain(super::LEN, 0, 16);
    }

    /// Offset of coefficient register `tap`.
    #[must_use]
    pub const fn coeff(tap: usize) -> usize {
        COEFF0 + tap * STRIDE
    }

    /// Offset of input sample register `index`.
    #[must_use]
    pub const fn data_in(index: usize) -> usize {
        DATA_IN + index * STRIDE
    }

    /// Offset of output sample register `index`.
    #[must_use]
    pub const fn data_out(index: usize) -> usize {
        DATA_OUT + index * STRIDE
    }
}

// ── Squarer ──────────────────────────────────────────────────────────────────

/// Squarer accelerator: per-sample data port.
pub mod squarer {
    use super::RegisterField;

    /// Sample input register.
    pub const DATA_IN: usize = 0x00;
    /// Result output register.
    pub const DATA_OUT: usize = 0x04;

    /// Largest transfer the drivers stage: 512 KiB input, 1 MiB output.
    pub const MAX_SAMPLES: usize = 256 * 1024;

    /// Typed fields.
    pub mod fields {
        use super::RegisterField;

        /// DATA_IN (the low 16 bits carry the sample).
        pub const DATA_IN: RegisterField = RegisterField::word(super::DATA_IN);
        /// DATA_OUT
        pub const DATA_OUT: RegisterField = RegisterField::word(super::DATA_OUT);
    }
}

// ── AXI DMA ──────────────────────────────────────────────────────────────────

/// AXI DMA engine, direct register mode, two channels.
pub mod axi_dma {
    use super::RegisterField;

    /// MM2S control.
    pub const MM2S_DMACR: usize = 0x00;
    /// MM2S status.
    pub const MM2S_DMASR: usize = 0x04;
    /// MM2S source address (low 32 bits).
    pub const MM2S_SA: usize = 0x18;
    /// MM2S source address (high 32 bits).
    pub const MM2S_SA_MSB: usize = 0x1C;
    /// MM2S transfer length in bytes; writing starts the channel.
    pub const MM2S_LENGTH: usize = 0x28;
    /// S2MM control.
    pub const S2MM_DMACR: usize = 0x30;
    /// S2MM status.
    pub const S2MM_DMASR: usize = 0x34;
    /// S2MM destination address (low 32 bits).
    pub const S2MM_DA: usize = 0x48;
    /// S2MM destination address (high 32 bits).
    pub const S2MM_DA_MSB: usize = 0x4C;
    /// S2MM buffer length in bytes; writing starts the channel.
    pub const S2MM_LENGTH: usize = 0x58;

    /// Widest length the LENGTH registers accept (26-bit counter).
    pub const MAX_LENGTH: u32 = (1 << 26) - 1;

    /// DMACR bits (same layout on both channels).
    pub mod dmacr {
        /// Run/stop.
        pub const RS: u32 = 1 << 0;
        /// Soft reset (self-clearing once reset completes).
        pub const RESET: u32 = 1 << 2;
        /// Interrupt on complete enable.
        pub const IOC_IRQ_EN: u32 = 1 << 12;
        /// Error interrupt enable.
        pub const ERR_IRQ_EN: u32 = 1 << 14;
    }

    /// DMASR bits (same layout on both channels).
    pub mod dmasr {
        /// Channel halted.
        pub const HALTED: u32 = 1 << 0;
        /// Channel idle.
        pub const IDLE: u32 = 1 << 1;
        /// Internal error.
        pub const DMA_INT_ERR: u32 = 1 << 4;
        /// Slave error (AXI SLVERR on a transfer).
        pub const DMA_SLV_ERR: u32 = 1 << 5;
        /// Decode error (AXI DECERR on a transfer).
        pub const DMA_DEC_ERR: u32 = 1 << 6;
        /// Interrupt on complete (W1C).
        pub const IOC_IRQ: u32 = 1 << 12;
        /// Error interrupt (W1C).
        pub const ERR_IRQ: u32 = 1 << 14;
        /// Any transfer error bit.
        pub const ANY_ERR: u32 = DMA_INT_ERR | DMA_SLV_ERR | DMA_DEC_ERR;
        /// Bits that are write-one-to-clear.
        pub const W1C_MASK: u32 = IOC_IRQ | ERR_IRQ;
    }

    /// Typed fields.
    pub mod fields {
        use super::RegisterField;

        /// MM2S_DMACR.RS
        pub const MM2S_RS: RegisterField = RegisterField::plain(super::MM2S_DMACR, 0, 1);
        /// MM2S_DMACR.RESET
        pub const MM2S_RESET: RegisterField = RegisterField::w1p(super::MM2S_DMACR, 2);
        /// MM2S_DMASR.HALTED
        pub const MM2S_HALTED: RegisterField = RegisterField::plain(super::MM2S_DMASR, 0, 1);
        /// MM2S_DMASR.IOC_IRQ
        pub const MM2S_IOC: RegisterField = RegisterField::w1c(super::MM2S_DMASR, 12);
        /// MM2S_DMASR.ERR_IRQ
        pub const MM2S_ERR: RegisterField = RegisterField::w1c(super::MM2S_DMASR, 14);
        /// MM2S_SA
        pub const MM2S_SA: RegisterField = RegisterField::word(super::MM2S_SA);
        /// MM2S_SA_MSB
        pub const MM2S_SA_MSB: RegisterField = RegisterField::word(super::MM2S_SA_MSB);
        /// MM2S_LENGTH
        pub const MM2S_LENGTH: RegisterField = RegisterField::plain(super::MM2S_LENGTH, 0, 26);

        /// S2MM_DMACR.RS
        pub const S2MM_RS: RegisterField = RegisterField::plain(super::S2MM_DMACR, 0, 1);
        /// S2MM_DMACR.RESET
        pub const S2MM_RESET: RegisterField = RegisterField::w1p(super::S2MM_DMACR, 2);
        /// S2MM_DMASR.HALTED
        pub const S2MM_HALTED: RegisterField = RegisterField::plain(super::S2MM_DMASR, 0, 1);
        /// S2MM_DMASR.IOC_IRQ
        pub const S2MM_IOC: RegisterField = RegisterField::w1c(super::S2MM_DMASR, 12);
        /// S2MM_DMASR.ERR_IRQ
        pub const S2MM_ERR: RegisterField = RegisterField::w1c(super::S2MM_DMASR, 14);
        /// S2MM_DA
        pub const S2MM_DA: RegisterField = RegisterField::word(super::S2MM_DA);
        /// S2MM_DA_MSB
        pub const S2MM_DA_MSB: RegisterField = RegisterField::word(super::S2MM_DA_MSB);
        /// S2MM_LENGTH
        pub const S2MM_LENGTH: RegisterField = RegisterField::plain(super::S2MM_LENGTH, 0, 26);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldSemantics;

    #[test]
    fn register_offsets_non_overlapping() {
        assert_ne!(timer::CTRL, timer::STATUS);
        assert_ne!(fir::DATA_IN, fir::DATA_OUT);
        assert_ne!(axi_dma::MM2S_DMASR, axi_dma::S2MM_DMASR);
        assert!(fir::data_in(fir::MAX_LEN - 1) < fir::DATA_OUT);
    }

    #[test]
    fn status_bits_are_w1c() {
        assert_eq!(timer::fields::WRAP.semantics(), FieldSemantics::WriteOneToClear);
        assert_eq!(fir::fields::DONE.semantics(), FieldSemantics::WriteOneToClear);
        assert_eq!(axi_dma::fields::S2MM_IOC.mask(), axi_dma::dmasr::IOC_IRQ);
        assert_eq!(axi_dma::fields::S2MM_ERR.mask(), axi_dma::dmasr::ERR_IRQ);
    }

    #[test]
    fn command_bits_are_w1p() {
        assert_eq!(fir::fields::START.semantics(), FieldSemantics::WriteOnePulse);
        assert_eq!(fir::fields::START.mask(), fir::ctrl::START);
        assert_eq!(fir::fields::RESET.mask(), fir::ctrl::RESET);
        assert_eq!(axi_dma::fields::MM2S_RESET.mask(), axi_dma::dmacr::RESET);
    }

    #[test]
    fn fir_windows() {
        assert_eq!(fir::coeff(3), 0x01C);
        assert_eq!(fir::data_out(1), 0x204);
    }
}
