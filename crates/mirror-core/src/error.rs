//! Error types for the ledger mirror core
//!
//! Domain error taxonomy shared by the store and the sync engine.

use std::fmt;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Core errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not enough spendable funds for the requested amount
    #[error("Not enough funds: required {required}, available {available}")]
    NotEnoughFunds {
        /// Requested amount
        required: u128,
        /// Spendable amount
        available: u128,
    },

    /// Address window exhausted for a chain
    #[error("No unused addresses: {0}")]
    NoUnusedAddresses(String),

    /// Invalid address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Wallet handle lacks a capability
    #[error("Wallet {wallet} does not support {capability}")]
    CapabilityMissing {
        /// Wallet id
        wallet: String,
        /// Missing capability name
        capability: &'static str,
    },

    /// Transaction state transition not permitted
    #[error("Invalid transaction state transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: &'static str,
        /// Requested state
        to: &'static str,
    },

    /// Malformed transaction record
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Amount overflow
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),

    /// Address derivation failed
    #[error("Key derivation error: {0}")]
    Derivation(String),

    /// Signing failed
    #[error("Transaction signing error: {0}")]
    Signing(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if error is a user-facing error (vs internal error)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::NotEnoughFunds { .. } | Error::NoUnusedAddresses(_) | Error::InvalidAddress(_)
        )
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Error::NotEnoughFunds { .. } => {
                "You don't have enough funds for this transaction. Please check your balance and try again.".to_string()
            }
            Error::NoUnusedAddresses(_) => {
                "You have too many unused addresses. Use one of them before generating a new one.".to_string()
            }
            Error::InvalidAddress(_) => {
                "The address is invalid. Please check and try again.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NotEnoughFunds { .. } | Error::AmountOverflow(_) => ErrorCategory::Amount,
            Error::NoUnusedAddresses(_) | Error::InvalidAddress(_) | Error::Derivation(_) => {
                ErrorCategory::Address
            }
            Error::InvalidTransition { .. } | Error::InvalidTransaction(_) | Error::Signing(_) => {
                ErrorCategory::Transaction
            }
            Error::CapabilityMissing { .. } => ErrorCategory::Wallet,
            Error::Serialization(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Amount-related errors
    Amount,
    /// Address-related errors
    Address,
    /// Transaction-related errors
    Transaction,
    /// Wallet-related errors
    Wallet,
    /// Internal/system errors
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Amount => write!(f, "Amount"),
            ErrorCategory::Address => write!(f, "Address"),
            ErrorCategory::Transaction => write!(f, "Transaction"),
            ErrorCategory::Wallet => write!(f, "Wallet"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}
