//! Driven adapters of the storage engine port.

pub mod memory;
