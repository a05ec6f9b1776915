//! Invoice store backends.

pub mod in_memory;
pub mod postgres;
