//! Optional explicit instrument subset of a monitor.

use std::collections::BTreeSet;

/// Explicit subset of instruments a monitor restricts itself to.
///
/// An empty watchlist means "every discoverable instrument".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Watchlist {
    items: BTreeSet<String>,
}

impl Watchlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for item in items {
            list.add(item.as_ref());
        }
        list
    }

    fn normalize(item: &str) -> String {
        item.trim().to_uppercase()
    }

    /// Add an item. Returns false if it was empty or already present.
    pub fn add(&mut self, item: &str) -> bool {
        let item = Self::normalize(item);
        if item.is_empty() {
            return false;
        }
        self.items.insert(item)
    }

    /// Remove an item. Returns false if it was not present.
    pub fn remove(&mut self, item: &str) -> bool {
        self.items.remove(&Self::normalize(item))
    }

    pub fn contains(&self, item: &str) -> bool {
        self.items.contains(&Self::normalize(item))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True when no explicit subset is set.
    pub fn is_full_universe(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    /// Whether `item` is in the effective set.
    pub fn allows(&self, item: &str) -> bool {
        self.is_full_universe() || self.contains(item)
    }

    /// The effective instrument set: the watchlist when present, else `universe`.
    pub fn effective(&self, universe: &[String]) -> Vec<String> {
        if self.is_full_universe() {
            universe.to_vec()
        } else {
            self.items.iter().cloned().collect()
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.items.iter().cloned().collect()
    }
}
