//! Filter/query language shared by the live and historical read paths.
//! Two surfaces, one semantic model: [`options::FilterOptions`]
//! (bundle of independent conjuncts, used by the live service-log path)
//! and [`query::Query`] (a tokenized string, used by viewer historical and
//! buffer reads) both implement [`Filter`] so [`crate::buffer::RingBuffer`]
//! and [`crate::viewer::Viewer`] can accept either without caring which.

pub mod options;
pub mod query;

pub use options::FilterOptions;
pub use query::Query;

use crate::entry::Entry;

pub trait Filter: Send + Sync {
    fn matches(&self, entry: &Entry) -> bool;
}

/// Applies grep context margins on top of a base (non-grep) filter.
/// If no context is requested, or grep is empty, returns the
/// base-filtered sub-list in order. Otherwise computes the union of
/// `[i-before, i+after]` windows around grep matches within the
/// base-filtered list, clamped, order-preserving, de-duplicated.
pub fn filter_entries(entries: &[Entry], opts: &FilterOptions) -> Vec<Entry> {
    let base: Vec<Entry> = entries.iter().filter(|e| opts.matches_base(e)).cloned().collect();

    let grep = match &opts.grep {
        Some(re) if opts.before > 0 || opts.after > 0 => re,
        _ => return base,
    };

    let n = base.len();
    let match_indices: Vec<usize> = base
        .iter()
        .enumerate()
        .filter(|(_, e)| grep.is_match(&e.message) || grep.is_match(&e.raw))
        .map(|(i, _)| i)
        .collect();

    let mut included = vec![false; n];
    for &i in &match_indices {
        let lo = i.saturating_sub(opts.before);
        let hi = (i + opts.after).min(n.saturating_sub(1));
        for slot in included.iter_mut().take(hi + 1).skip(lo) {
            *slot = true;
        }
    }

    base.into_iter().zip(included).filter(|(_, keep)| *keep).map(|(e, _)| e).collect()
}
