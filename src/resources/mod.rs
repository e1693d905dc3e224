//! Typed resource pools and the allocator that guards their capacity.

pub mod allocator;

pub use crate::config::ExhaustionPolicy;
pub use allocator::{AllocationRequest, PoolEfficiency, PoolSnapshot, ResourceAllocator};
