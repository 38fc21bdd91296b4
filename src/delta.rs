// src/delta.rs
//! Change detection: which of the freshly fetched listings has the user not seen yet.

use std::collections::HashSet;

use crate::listing::Listing;

/// Returns the listings whose id is not in `seen`, in input order.
///
/// Duplicate ids inside `listings` (the same ad returned by two query URLs)
/// collapse to their first occurrence. Pure; no I/O.
pub fn compute_delta(listings: Vec<Listing>, seen: &HashSet<String>) -> Vec<Listing> {
    let mut emitted: HashSet<String> = HashSet::with_capacity(listings.len());
    let mut out = Vec::new();
    for l in listings {
        if seen.contains(&l.id) {
            continue;
        }
        if !emitted.insert(l.id.clone()) {
            continue;
        }
        out.push(l);
    }
    out
}

/// Drops listings without a price when `require_price` is set.
pub fn filter_priced(mut listings: Vec<Listing>, require_price: bool) -> Vec<Listing> {
    if require_price {
        listings.retain(|l| l.price.as_deref().is_some_and(|p| !p.trim().is_empty()));
    }
    listings
}
