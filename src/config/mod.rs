//! # Configuration Module
//!
//! Centralizes the layout constants for the on-block format. Interdependent
//! values are documented together and enforced through compile-time
//! assertions in [`constants`].

pub mod constants;
pub use constants::*;
