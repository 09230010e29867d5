//! Gap-limit window arithmetic for address cutoffs
//!
//! The cutoff is the highest derivation index already handed out as an
//! unused address. Indices may be handed out up to `gap_limit` past the
//! highest used index.

use crate::{ChainId, Error, Result};

pub use mirror_params::DEFAULT_GAP_LIMIT;

/// Cutoff state for one HD chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutoffWindow {
    /// Chain this window applies to
    pub chain: ChainId,
    /// Maximum number of unused addresses past the highest used one
    pub gap_limit: u32,
    /// Highest index seen on chain
    pub highest_used: Option<u32>,
    /// Highest index handed out
    pub cutoff: Option<u32>,
}

impl CutoffWindow {
    /// Create window state
    pub fn new(
        chain: ChainId,
        gap_limit: u32,
        highest_used: Option<u32>,
        cutoff: Option<u32>,
    ) -> Self {
        Self {
            chain,
            gap_limit,
            highest_used,
            cutoff,
        }
    }

    /// Highest index that may be handed out, or `None` if the window is empty
    pub fn max_allowed_index(&self) -> Option<u32> {
        let first_unused = self.highest_used.map(|h| h as u64 + 1).unwrap_or(0);
        let last = first_unused + self.gap_limit as u64;
        if last == 0 {
            return None;
        }
        u32::try_from(last - 1).ok().or(Some(u32::MAX))
    }

    /// Index the next pop would return.
    ///
    /// Used addresses are never handed out as unused, so the next index is
    /// past both the cutoff and the highest used index.
    pub fn next_index(&self) -> Result<u32> {
        let after_cutoff = self.cutoff.map(|c| c as u64 + 1).unwrap_or(0);
        let after_used = self.highest_used.map(|h| h as u64 + 1).unwrap_or(0);
        let next = after_cutoff.max(after_used);

        match self.max_allowed_index() {
            Some(max) if next <= max as u64 => Ok(next as u32),
            _ => Err(Error::NoUnusedAddresses(format!(
                "{} chain: {} unused addresses already generated past index {}",
                self.chain,
                self.gap_limit,
                self.highest_used
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "none".to_string())
            ))),
        }
    }

    /// Validate an explicit cutoff value against the window
    pub fn check_cutoff(&self, index: u32) -> Result<()> {
        match self.max_allowed_index() {
            Some(max) if index <= max => Ok(()),
            _ => Err(Error::NoUnusedAddresses(format!(
                "{} chain: cutoff {} is beyond the gap limit",
                self.chain, index
            ))),
        }
    }

    /// Advance the window by one pop
    pub fn advance(&mut self) -> Result<u32> {
        let next = self.next_index()?;
        self.cutoff = Some(next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_window_allows_gap_limit_addresses() {
        let mut window = CutoffWindow::new(ChainId::External, 20, None, None);
        for expected in 0..20 {
            assert_eq!(window.advance().unwrap(), expected);
        }
        assert!(matches!(window.advance(), Err(Error::NoUnusedAddresses(_))));
    }

    #[test]
    fn test_usage_extends_window() {
        let mut window = CutoffWindow::new(ChainId::External, 20, Some(4), Some(4));
        assert_eq!(window.max_allowed_index(), Some(24));
        assert_eq!(window.advance().unwrap(), 5);
    }

    #[test]
    fn test_next_skips_used_addresses() {
        let window = CutoffWindow::new(ChainId::Internal, 20, Some(9), Some(2));
        assert_eq!(window.next_index().unwrap(), 10);
    }

    #[test]
    fn test_zero_gap_limit_is_empty() {
        let window = CutoffWindow::new(ChainId::External, 0, None, None);
        assert_eq!(window.max_allowed_index(), None);
        assert!(window.next_index().is_err());
    }

    #[test]
    fn test_check_cutoff() {
        let window = CutoffWindow::new(ChainId::External, 5, Some(1), None);
        assert!(window.check_cutoff(6).is_ok());
        assert!(window.check_cutoff(7).is_err());
    }
}
