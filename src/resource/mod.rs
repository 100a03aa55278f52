//! Resources
//!
//! - [`ResourceKey`]: stable hash identity of one physical allocation
//! - [`ResourceManager`]: creates and owns allocations
//! - [`DataAlias`] / [`AliasTable`]: per-stage handles that survive rebuilds

pub mod alias;
pub mod key;
pub mod manager;

pub use alias::{AliasKind, AliasTable, DataAlias};
pub use key::ResourceKey;
pub use manager::{Allocation, Resource, ResourceManager, ResourceSet};
