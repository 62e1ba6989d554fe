use crate::{Reference, Runtime, objects::class};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CacheEntry {
    selector: Reference,
    class: Reference,
    found_class: Reference,
    method: Reference,
}

/// Direct mapped cache of `(selector, class) -> (defining class, method)`.
///
/// Entries do not hold reference counts. Replacing a method must go through
/// [`Runtime::install_method`] or [`Runtime::flush_cache`] so stale entries
/// never survive.
#[derive(Debug)]
pub struct MethodCache {
    entries: Vec<CacheEntry>,
}

/// Result of a successful lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    pub class: Reference,
    pub method: Reference,
}

impl MethodCache {
    /// `size` should be prime. A size of 0 turns caching off.
    pub fn new(size: usize) -> Self {
        Self {
            entries: vec![CacheEntry::default(); size],
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.entries.is_empty()
    }

    #[inline]
    fn slot(&self, selector: Reference, class: Reference) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let hash = (selector.raw() as u32).wrapping_add(class.raw() as u32);
        Some(hash as usize % self.entries.len())
    }

    pub fn probe(&self, selector: Reference, class: Reference) -> Option<Lookup> {
        let entry = &self.entries[self.slot(selector, class)?];
        if entry.selector == selector && entry.class == class && !selector.is_nil() {
            return Some(Lookup {
                class: entry.found_class,
                method: entry.method,
            });
        }
        None
    }

    pub fn fill(&mut self, selector: Reference, class: Reference, found: Lookup) {
        if let Some(slot) = self.slot(selector, class) {
            self.entries[slot] = CacheEntry {
                selector,
                class,
                found_class: found.class,
                method: found.method,
            };
        }
    }

    /// Clears the one entry `(selector, class)` hashes to, whatever it holds.
    pub fn flush(&mut self, selector: Reference, class: Reference) {
        if let Some(slot) = self.slot(selector, class) {
            self.entries[slot] = CacheEntry::default();
        }
    }

    /// Clears every entry for `selector`, whatever class it was cached for.
    pub fn flush_selector(&mut self, selector: Reference) {
        for entry in &mut self.entries {
            if entry.selector == selector {
                *entry = CacheEntry::default();
            }
        }
    }

    pub fn flush_all(&mut self) {
        self.entries.fill(CacheEntry::default());
    }
}

impl Runtime {
    /// Finds the method `class` runs for `selector`, going through the cache.
    pub fn lookup(&mut self, selector: Reference, class: Reference) -> Option<Lookup> {
        if let Some(found) = self.cache.probe(selector, class) {
            self.stats.cache_hits += 1;
            return Some(found);
        }
        self.stats.cache_misses += 1;
        let found = self.find_method_in_hierarchy(selector, class)?;
        self.cache.fill(selector, class, found);
        Some(found)
    }

    /// Walks the superclass chain starting at `class` without touching the cache.
    pub fn find_method_in_hierarchy(
        &self,
        selector: Reference,
        class: Reference,
    ) -> Option<Lookup> {
        let mut cursor = class;
        let mut depth = 0;
        while !cursor.is_nil() && cursor.is_object() {
            if let Some(method) = self.method_at(cursor, selector) {
                log::trace!(
                    "lookup #{} found in {}",
                    self.memory.string(selector),
                    self.class_name(cursor)
                );
                return Some(Lookup {
                    class: cursor,
                    method,
                });
            }
            cursor = self.memory.slot(cursor, class::SUPERCLASS);
            depth += 1;
            if depth > self.memory.capacity() {
                crate::fatal("lookup", "cyclic superclass chain");
            }
        }
        None
    }

    /// Must be called whenever a method for `selector` changes in `class`.
    pub fn flush_cache(&mut self, selector: Reference, class: Reference) {
        log::debug!("flush cache #{} {}", self.memory.string(selector), class);
        self.cache.flush(selector, class);
    }

    /// Drops every cached lookup of `selector`. Subclasses inherit methods,
    /// so replacing one invalidates entries cached for other classes too.
    pub fn flush_selector(&mut self, selector: Reference) {
        log::debug!("flush cache #{}", self.memory.string(selector));
        self.cache.flush_selector(selector);
    }

    pub fn flush_method_cache(&mut self) {
        self.cache.flush_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(raw: i32) -> Reference {
        Reference::from_raw(raw)
    }

    #[test]
    fn probe_needs_both_keys() {
        let mut cache = MethodCache::new(7);
        let found = Lookup {
            class: r(20),
            method: r(22),
        };
        cache.fill(r(2), r(4), found);
        assert_eq!(cache.probe(r(2), r(4)), Some(found));
        assert_eq!(cache.probe(r(2), r(6)), None);
        assert_eq!(cache.probe(r(4), r(4)), None);
    }

    #[test]
    fn flush_clears_the_slot() {
        let mut cache = MethodCache::new(7);
        let found = Lookup {
            class: r(4),
            method: r(8),
        };
        cache.fill(r(2), r(4), found);
        cache.flush(r(2), r(4));
        assert_eq!(cache.probe(r(2), r(4)), None);
    }

    #[test]
    fn flush_selector_spares_other_selectors() {
        let mut cache = MethodCache::new(211);
        let found = Lookup {
            class: r(4),
            method: r(8),
        };
        cache.fill(r(2), r(4), found);
        cache.fill(r(2), r(6), found);
        cache.fill(r(10), r(4), found);
        cache.flush_selector(r(2));
        assert_eq!(cache.probe(r(2), r(4)), None);
        assert_eq!(cache.probe(r(2), r(6)), None);
        assert_eq!(cache.probe(r(10), r(4)), Some(found));
    }

    #[test]
    fn disabled_cache_never_hits() {
        let mut cache = MethodCache::new(0);
        assert!(!cache.is_enabled());
        cache.fill(
            r(2),
            r(4),
            Lookup {
                class: r(4),
                method: r(8),
            },
        );
        assert_eq!(cache.probe(r(2), r(4)), None);
    }
}
