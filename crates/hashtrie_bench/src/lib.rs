//! Shared helpers for the hashtrie benchmarks.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod utils;
