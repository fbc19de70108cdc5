//! Engine-owned caching machinery: memory cache, key-mutex table, single-flight
//! registry, bookkeeper, and the freshness validator.

pub mod bookkeeper;
pub mod flight;
pub mod freshness;
pub mod lock;
pub mod memory;
