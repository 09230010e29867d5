//! UTXO selection for spending
//!
//! Implements first-fit, smallest-first and largest-first strategies over
//! default-token amounts.

use crate::{Error, Result, Utxo};

/// UTXO selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// Select in the order given
    FirstFit,
    /// Select smallest outputs first (consolidates dust)
    SmallestFirst,
    /// Select largest outputs first (minimize inputs)
    LargestFirst,
}

/// Selection result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionResult {
    /// Selected outputs
    pub utxos: Vec<Utxo>,
    /// Total default-token value of selected outputs
    pub total_value: u64,
    /// Change amount
    pub change: u64,
}

/// UTXO selector
#[derive(Debug, Clone, Copy)]
pub struct UtxoSelector {
    strategy: SelectionStrategy,
}

impl UtxoSelector {
    /// Create selector with strategy
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self { strategy }
    }

    /// Select outputs covering `target_amount` plus `fee`
    pub fn select(
        &self,
        mut available: Vec<Utxo>,
        target_amount: u64,
        fee: u64,
    ) -> Result<SelectionResult> {
        let required = target_amount
            .checked_add(fee)
            .ok_or_else(|| Error::AmountOverflow("target plus fee".to_string()))?;

        tracing::debug!(
            "Selecting UTXOs: target={}, fee={}, required={}",
            target_amount,
            fee,
            required
        );

        self.sort(&mut available);

        let available_total = Self::total_available(&available);
        let mut selected = Vec::new();
        let mut total = 0u64;
        for utxo in available {
            if total >= required {
                break;
            }
            total = total
                .checked_add(utxo.amount)
                .ok_or_else(|| Error::AmountOverflow("selected value".to_string()))?;
            selected.push(utxo);
        }

        if total < required {
            return Err(Error::NotEnoughFunds {
                required: required as u128,
                available: available_total,
            });
        }

        let change = total - required;
        tracing::debug!(
            "Selected {} UTXOs, total={}, change={}",
            selected.len(),
            total,
            change
        );

        Ok(SelectionResult {
            utxos: selected,
            total_value: total,
            change,
        })
    }

    fn sort(&self, utxos: &mut [Utxo]) {
        match self.strategy {
            SelectionStrategy::FirstFit => {}
            SelectionStrategy::SmallestFirst => utxos.sort_by(|a, b| a.amount.cmp(&b.amount)),
            SelectionStrategy::LargestFirst => utxos.sort_by(|a, b| b.amount.cmp(&a.amount)),
        }
    }

    /// Total default-token value available
    pub fn total_available(utxos: &[Utxo]) -> u128 {
        utxos.iter().map(|u| u.amount as u128).sum()
    }
}

impl Default for UtxoSelector {
    fn default() -> Self {
        Self::new(SelectionStrategy::LargestFirst)
    }
}

/// Select with the default (largest-first) strategy and no fee
pub fn select_utxos(available: Vec<Utxo>, target_amount: u64) -> Result<SelectionResult> {
    UtxoSelector::default().select(available, target_amount, 0)
}
