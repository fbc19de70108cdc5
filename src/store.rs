//! Read and mutation pipelines over the caching core.

pub mod builder;
pub mod mutation;
pub mod read;
pub mod result;

mod core;
