//! Ledger mirror network parameters and constants
//!
//! This crate provides network-specific constants: the native token,
//! the HD gap limit, and safe-point cadence defaults.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod network;

pub use network::{
    DefaultToken, Network, NetworkType, DEFAULT_GAP_LIMIT, DEFAULT_SAFE_POINT_INTERVAL,
};

/// Error types for parameter operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid network specified
    #[error("Invalid network: {0}")]
    InvalidNetwork(String),
}

/// Result type for parameter operations
pub type Result<T> = std::result::Result<T, Error>;
