//! Backfill Ordering
//!
//! Orders tickers for the initial REST backfill: tickers with no quote at
//! all are fetched first, then tickers that already have one. Each group is
//! alphabetical.

use std::collections::VecDeque;

/// Ordered queue of tickers awaiting backfill.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchPriorityQueue {
    tickers: VecDeque<String>,
}

impl FetchPriorityQueue {
    /// Build the queue from requested tickers.
    ///
    /// `has_quote` reports whether the quote store already holds data for a
    /// ticker. Duplicate tickers are collapsed.
    pub fn build<I, F>(tickers: I, has_quote: F) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        F: Fn(&str) -> bool,
    {
        let mut keyed: Vec<(bool, String)> = tickers
            .into_iter()
            .map(Into::into)
            .map(|t: String| (has_quote(&t), t))
            .collect();

        // `false < true`: missing-data tickers sort first.
        keyed.sort();
        keyed.dedup_by(|a, b| a.1 == b.1);

        Self {
            tickers: keyed.into_iter().map(|(_, t)| t).collect(),
        }
    }
}

impl IntoIterator for FetchPriorityQueue {
    type Item = String;
    type IntoIter = std::collections::vec_deque::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.tickers.into_iter()
    }
}
