//! Hash tables stored as plain arrays.
//!
//! A table is an Array of `3 * buckets` slots. Bucket `b` holds a key, a value
//! and the head of an overflow chain of Link objects (key, value, next).
//! The root symbol table is such an array, method dictionaries wrap one.
//! Bucket positions are stored in images, so the hash functions are fixed.

use crate::{ObjectMemory, Reference, objects::link};

pub const ENTRY_WIDTH: usize = 3;

/// Hash of a string key, stops at the terminator.
pub fn string_hash(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .fold(0u32, |hash, &b| hash.wrapping_mul(31).wrapping_add(b as u32)) as usize
}

/// Hash of an identity key.
#[inline]
pub fn identity_hash(key: Reference) -> usize {
    (key.raw() as u32 >> 1) as usize
}

#[derive(Debug, Clone, Copy)]
enum Location {
    Bucket(usize),
    Link(Reference),
}

impl ObjectMemory {
    pub fn table_buckets(&self, table: Reference) -> usize {
        self.slot_count(table) / ENTRY_WIDTH
    }

    fn table_find(
        &self,
        table: Reference,
        hash: usize,
        matches: impl Fn(&ObjectMemory, Reference) -> bool,
    ) -> Option<Location> {
        let buckets = self.table_buckets(table);
        if buckets == 0 {
            return None;
        }
        let base = (hash % buckets) * ENTRY_WIDTH;
        let key = self.slot(table, base);
        if !key.is_nil() && matches(self, key) {
            return Some(Location::Bucket(base));
        }
        let mut cursor = self.slot(table, base + 2);
        while !cursor.is_nil() {
            if matches(self, self.slot(cursor, link::KEY)) {
                return Some(Location::Link(cursor));
            }
            cursor = self.slot(cursor, link::NEXT);
        }
        None
    }

    /// Key and value of the entry `matches` accepts.
    pub fn table_lookup(
        &self,
        table: Reference,
        hash: usize,
        matches: impl Fn(&ObjectMemory, Reference) -> bool,
    ) -> Option<(Reference, Reference)> {
        match self.table_find(table, hash, matches)? {
            Location::Bucket(base) => Some((self.slot(table, base), self.slot(table, base + 1))),
            Location::Link(link) => Some((
                self.slot(link, link::KEY),
                self.slot(link, link::VALUE),
            )),
        }
    }

    /// Stores `value` under `key`, replacing the value of an existing entry.
    /// New entries that collide are chained through a fresh Link of `link_class`.
    pub fn table_insert(
        &mut self,
        table: Reference,
        hash: usize,
        key: Reference,
        value: Reference,
        link_class: Reference,
        matches: impl Fn(&ObjectMemory, Reference) -> bool,
    ) {
        match self.table_find(table, hash, matches) {
            Some(Location::Bucket(base)) => self.set_slot(table, base + 1, value),
            Some(Location::Link(link)) => self.set_slot(link, link::VALUE, value),
            None => {
                let buckets = self.table_buckets(table);
                assert!(buckets > 0, "insert into an empty hash table");
                let base = (hash % buckets) * ENTRY_WIDTH;
                if self.slot(table, base).is_nil() {
                    self.set_slot(table, base, key);
                    self.set_slot(table, base + 1, value);
                } else {
                    let next = self.slot(table, base + 2);
                    let link = self.allocate_with(link_class, &[key, value, next]);
                    self.set_slot(table, base + 2, link);
                }
            }
        }
    }

    /// Every (key, value) pair, bucket order first, then chain order.
    pub fn table_entries(&self, table: Reference) -> Vec<(Reference, Reference)> {
        let mut entries = Vec::new();
        for bucket in 0..self.table_buckets(table) {
            let base = bucket * ENTRY_WIDTH;
            let key = self.slot(table, base);
            if !key.is_nil() {
                entries.push((key, self.slot(table, base + 1)));
            }
            let mut cursor = self.slot(table, base + 2);
            while !cursor.is_nil() {
                entries.push((self.slot(cursor, link::KEY), self.slot(cursor, link::VALUE)));
                cursor = self.slot(cursor, link::NEXT);
            }
        }
        entries
    }

    /// True if byte object `key` spells `name`.
    pub fn spells(&self, key: Reference, name: &[u8]) -> bool {
        if !self.is_bytes(key) {
            return false;
        }
        let bytes = self.bytes(key);
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        &bytes[..end] == name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryCreateInfo;

    #[test]
    fn string_hash_ignores_terminator() {
        assert_eq!(string_hash(b"abc"), string_hash(b"abc\0"));
        assert_ne!(string_hash(b"abc"), string_hash(b"abd"));
    }

    #[test]
    fn colliding_keys_chain() {
        let mut memory = ObjectMemory::new(&MemoryCreateInfo {
            object_table_size: Some(64),
            ..Default::default()
        });
        let table = memory.allocate(ENTRY_WIDTH); // one bucket, everything collides
        memory.incr(table);
        let keys: Vec<_> = (0..3).map(|_| memory.allocate(0)).collect();
        for (i, &key) in keys.iter().enumerate() {
            let value = Reference::from_small_int(i as i32);
            memory.table_insert(table, 0, key, value, Reference::NIL, |_, k| k == key);
        }

        for (i, &key) in keys.iter().enumerate() {
            let found = memory.table_lookup(table, 0, |_, k| k == key);
            assert_eq!(found, Some((key, Reference::from_small_int(i as i32))));
        }
        assert_eq!(memory.table_entries(table).len(), 3);

        // replacing keeps a single entry
        let key = keys[2];
        memory.table_insert(table, 0, key, Reference::NIL, Reference::NIL, |_, k| k == key);
        assert_eq!(memory.table_entries(table).len(), 3);
        assert_eq!(memory.table_lookup(table, 0, |_, k| k == key), Some((key, Reference::NIL)));
    }
}
