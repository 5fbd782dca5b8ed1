//! Address map of the peripheral blocks.
//!
//! Base addresses are the ones the platform descriptions usually bind the
//! blocks at (device tree / Renode platform files). Drivers never assume
//! them; they are used as defaults by tools and by the simulated devices.
//!
//! ```text
//! Block       Base          Size   IRQ
//! ─────────── ───────────── ────── ─────────────────────────────
//! SmartTimer  0x7000_0000   16 B   level, shared
//! FIR         0x7001_0000   1 KB   level, shared
//! Squarer     0x7002_0000   8 B    none (polled data port)
//! AXI DMA     0x7003_0000   96 B   S2MM IOC / ERR
//! ```

/// Peripheral block identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Block {
    /// SmartTimer.
    SmartTimer,
    /// FIR filter.
    Fir,
    /// Squarer data port.
    Squarer,
    /// AXI DMA engine.
    AxiDma,
}

impl Block {
    /// All blocks, in address order.
    pub const ALL: [Self; 4] = [Self::SmartTimer, Self::Fir, Self::Squarer, Self::AxiDma];

    /// Typical physical base address.
    #[must_use]
    pub const fn typical_base(&self) -> u64 {
        match self {
            Self::SmartTimer => 0x7000_0000,
            Self::Fir => 0x7001_0000,
            Self::Squarer => 0x7002_0000,
            Self::AxiDma => 0x7003_0000,
        }
    }

    /// Size of the register window in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        match self {
            Self::SmartTimer => 0x10,
            Self::Fir => 0x400,
            Self::Squarer => 0x08,
            Self::AxiDma => 0x60,
        }
    }

    /// Whether the block drives an interrupt line.
    #[must_use]
    pub const fn has_irq(&self) -> bool {
        !matches!(self, Self::Squarer)
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SmartTimer => write!(f, "smarttimer"),
            Self::Fir => write!(f, "fir"),
            Self::Squarer => write!(f, "squarer"),
            Self::AxiDma => write!(f, "axi-dma"),
        }
    }
}
