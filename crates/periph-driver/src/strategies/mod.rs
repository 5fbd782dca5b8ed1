//! Transfer strategy implementations
//!
//! - **Scalar**: squarer data port, one write and one read per sample
//! - **Bulk**: AXI DMA engine in direct register mode, completion by interrupt

pub mod bulk;
pub mod scalar;

pub use bulk::BulkStrategy;
pub use scalar::ScalarStrategy;
