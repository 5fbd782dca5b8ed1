//! Register model for the SmartTimer, FIR, squarer and AXI DMA blocks.
//!
//! This crate has **no dependencies** and **no hardware access**; it is a
//! pure model of the peripherals: register offsets, bit definitions, field
//! write semantics, and the address map the blocks are usually bound at.
//!
//! Offsets and bit positions match the RTL register files and the
//! co-simulation testbenches the drivers were validated against.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`field`] | `RegisterField` and the closed set of write semantics (plain, W1C, W1P) |
//! | [`regs`] | Per-block register offsets, bit definitions and typed fields |
//! | [`map`] | Block sizes and typical base addresses |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod field;
pub mod map;
pub mod regs;

pub use field::{FieldSemantics, RegisterField};
pub use map::Block;
