//! Subscription Set
//!
//! Tracks which symbols the caller wants streamed.
//!
//! # Design
//!
//! Symbols live in one of two buckets:
//! - **active**: already sent to the provider on the current (or last) connection
//! - **pending**: requested while no connection was open
//!
//! On every (re)connect the whole set is resent and becomes active, so a
//! disconnect never loses a symbol.

use std::collections::BTreeSet;

/// A symbol string (stock ticker or venue-prefixed pair).
pub type Symbol = String;

/// Active/pending split of the streamed symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    active: BTreeSet<Symbol>,
    pending: BTreeSet<Symbol>,
}

impl SubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: BTreeSet::new(),
            pending: BTreeSet::new(),
        }
    }

    /// Add symbols while connected.
    ///
    /// Returns the symbols that were not already active and must be sent.
    pub fn add_active(&mut self, symbols: impl IntoIterator<Item = Symbol>) -> Vec<Symbol> {
        let mut added = Vec::new();
        for symbol in symbols {
            self.pending.remove(&symbol);
            if self.active.insert(symbol.clone()) {
                added.push(symbol);
            }
        }
        added
    }

    /// Queue symbols while disconnected.
    ///
    /// Symbols that are already active stay active; they are resent on connect anyway.
    pub fn add_pending(&mut self, symbols: impl IntoIterator<Item = Symbol>) {
        for symbol in symbols {
            if !self.active.contains(&symbol) {
                self.pending.insert(symbol);
            }
        }
    }

    /// Remove symbols from both buckets.
    ///
    /// Returns the symbols that were active (and so need an unsubscribe on the wire).
    pub fn remove<'a>(&mut self, symbols: impl IntoIterator<Item = &'a Symbol>) -> Vec<Symbol> {
        let mut was_active = Vec::new();
        for symbol in symbols {
            self.pending.remove(symbol);
            if self.active.remove(symbol) {
                was_active.push(symbol.clone());
            }
        }
        was_active
    }

    /// Promote everything to active and return the full set to resend.
    pub fn activate_all(&mut self) -> Vec<Symbol> {
        let pending = std::mem::take(&mut self.pending);
        self.active.extend(pending);
        self.active.iter().cloned().collect()
    }

    /// All symbols, active and pending.
    #[must_use]
    pub fn all(&self) -> BTreeSet<Symbol> {
        self.active.union(&self.pending).cloned().collect()
    }

    /// Symbols already sent on the wire.
    #[must_use]
    pub const fn active(&self) -> &BTreeSet<Symbol> {
        &self.active
    }

    /// Symbols queued for the next connection.
    #[must_use]
    pub const fn pending(&self) -> &BTreeSet<Symbol> {
        &self.pending
    }

    /// Check if the set holds any symbol.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.pending.is_empty()
    }

    /// Total number of distinct symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len() + self.pending.len()
    }

    /// Drop every symbol.
    pub fn clear(&mut self) {
        self.active.clear();
        self.pending.clear();
    }
}
