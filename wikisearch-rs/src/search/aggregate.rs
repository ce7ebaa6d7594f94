//! Folding per-field match records into ranked hits.

use crate::search::types::{Hit, MatchRecord, SearchResults};
use std::collections::{BTreeMap, BTreeSet};

/// Merge records sharing a (page, attachment) key and rank the hits.
///
/// Weights are summed and matched terms unioned. Hits are ordered by
/// weight descending, then page name, then attachment.
pub fn aggregate(query: &str, records: impl IntoIterator<Item = MatchRecord>) -> SearchResults {
    let mut merged: BTreeMap<(String, String), Hit> = BTreeMap::new();

    for record in records {
        let hit = merged
            .entry((record.page_name.clone(), record.attachment.clone()))
            .or_insert_with(|| Hit {
                page_name: record.page_name,
                attachment: record.attachment,
                terms: BTreeSet::new(),
                weight: 0.0,
            });
        hit.weight += record.weight;
        if let Some(term) = record.term {
            hit.terms.insert(term);
        }
    }

    let mut hits: Vec<Hit> = merged.into_values().collect();
    hits.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then_with(|| a.page_name.cmp(&b.page_name))
            .then_with(|| a.attachment.cmp(&b.attachment))
    });

    SearchResults {
        query: query.to_string(),
        hits,
    }
}
