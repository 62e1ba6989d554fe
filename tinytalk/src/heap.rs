use std::{borrow::Cow, mem, sync::Arc};

use crate::{
    BlockAllocator, BlockStats, Reference, RuntimeError, Span, fatal, fatal_error,
};

/// Reference count of objects that are never reclaimed (ROM objects).
pub const PERMANENT: u32 = 0x7FFF_FFFF;

pub const SLOT_BYTES: usize = mem::size_of::<Reference>();

/// Slots needed to hold `bytes` bytes.
#[inline]
pub const fn slots_for_bytes(bytes: usize) -> usize {
    bytes.div_ceil(SLOT_BYTES)
}

/// Slots backing an object of the given signed size.
#[inline]
pub const fn slots_for_size(size: i32) -> usize {
    if size < 0 {
        slots_for_bytes(size.unsigned_abs() as usize)
    } else {
        size as usize
    }
}

/// Bytes inside the read-only image buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RomSpan {
    pub offset: usize,
    pub len: usize,
}

/// Backing storage of an object.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Storage {
    Empty,
    /// Carved from the block allocator, owned by the entry.
    Owned(Span),
    /// Points into the mapped image, never freed or written.
    Borrowed(RomSpan),
}

#[derive(Debug, Copy, Clone)]
pub struct ObjectEntry {
    /// Class of a live object, next free entry for a free one.
    pub class: Reference,
    pub ref_count: u32,
    /// Positive: number of reference slots. Negative: number of bytes.
    pub size: i32,
    pub storage: Storage,
}

impl ObjectEntry {
    const FREE: ObjectEntry = ObjectEntry {
        class: Reference::NIL,
        ref_count: 0,
        size: 0,
        storage: Storage::Empty,
    };

    #[inline]
    pub fn is_bytes(&self) -> bool {
        self.size < 0
    }

    #[inline]
    pub fn is_permanent(&self) -> bool {
        self.ref_count == PERMANENT
    }
}

// TODO: a low water mark on free entries so hosts can be warned before exhaustion
#[derive(Debug, Default)]
pub struct MemoryCreateInfo {
    pub object_table_size: Option<usize>,
    // slots per block allocator chunk
    pub chunk_slots: Option<usize>,
    // sizes at or above this are not kept on a free list of their own
    pub free_list_limit: Option<usize>,
    pub max_chunks: Option<usize>,
    // largest object a single allocation may ask for, in slots
    pub max_object_slots: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub object_table_size: usize,
    pub chunk_slots: usize,
    pub free_list_limit: usize,
    pub max_chunks: Option<usize>,
    pub max_object_slots: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            object_table_size: 16384,
            chunk_slots: 2048,
            free_list_limit: 2048,
            max_chunks: None,
            max_object_slots: 1 << 16,
        }
    }
}

impl MemorySettings {
    pub fn from_info(info: &MemoryCreateInfo) -> Self {
        let mut settings = Self::default();
        info.object_table_size
            .inspect(|&size| settings.object_table_size = size);
        info.chunk_slots.inspect(|&size| settings.chunk_slots = size);
        info.free_list_limit
            .inspect(|&limit| settings.free_list_limit = limit.max(1));
        settings.max_chunks = info.max_chunks;
        info.max_object_slots
            .inspect(|&slots| settings.max_object_slots = slots);
        settings
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub table_size: usize,
    pub live_objects: usize,
    pub permanent_objects: usize,
    pub free_entries: usize,
    pub blocks: BlockStats,
}

/// The object table.
///
/// Every object is an entry holding its class, reference count, size and
/// storage. Free entries are chained through their class field into one list
/// per slot count; list 0 holds entries without memory and serves any size.
///
/// Reclamation is pure reference counting: an object whose count drops to zero
/// releases its class and every slot it references, cascading through the graph.
/// There is no cycle collection, objects that reference each other in a cycle
/// are never reclaimed.
///
/// Not synchronized. Hosts with several threads keep the whole runtime behind
/// one lock.
pub struct ObjectMemory {
    pub(crate) entries: Vec<ObjectEntry>,
    free_lists: Vec<Reference>,
    blocks: BlockAllocator,
    rom: Option<Arc<[u8]>>,
    settings: MemorySettings,
    // scratch work list reused by decr
    pending: Vec<Reference>,
}

impl ObjectMemory {
    pub fn new(info: &MemoryCreateInfo) -> Self {
        let settings = MemorySettings::from_info(info);
        assert!(
            settings.object_table_size >= 2,
            "object table needs room for nil and at least one object"
        );
        let mut memory = Self {
            entries: Vec::new(),
            free_lists: Vec::new(),
            blocks: BlockAllocator::new(settings.chunk_slots, settings.max_chunks),
            rom: None,
            settings,
            pending: Vec::new(),
        };
        memory.reset();
        memory
    }

    /// Drops every object. Only nil survives.
    pub fn reset(&mut self) {
        let size = self.settings.object_table_size;
        self.entries = vec![ObjectEntry::FREE; size];
        self.entries[0].ref_count = 1;
        self.free_lists = vec![Reference::NIL; self.settings.free_list_limit];
        self.blocks =
            BlockAllocator::new(self.settings.chunk_slots, self.settings.max_chunks);
        self.rom = None;
        // lowest indices are handed out first
        for index in (1..size).rev() {
            self.push_free_list(index, 0);
        }
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn entry(&self, object: Reference) -> &ObjectEntry {
        let index = object.index();
        match self.entries.get(index) {
            Some(entry) => entry,
            None => fatal_error(RuntimeError::ObjectIndexOutOfRange { index }),
        }
    }

    #[inline]
    fn entry_mut(&mut self, object: Reference) -> &mut ObjectEntry {
        let index = object.index();
        match self.entries.get_mut(index) {
            Some(entry) => entry,
            None => fatal_error(RuntimeError::ObjectIndexOutOfRange { index }),
        }
    }

    /// Allocates an object with `slots` nil slots, nil class and a zero count.
    pub fn allocate(&mut self, slots: usize) -> Reference {
        match self.try_allocate(slots) {
            Ok(object) => object,
            Err(err) => fatal_error(err),
        }
    }

    /// Like [`ObjectMemory::allocate`], but reports exhaustion to the caller.
    pub fn try_allocate(&mut self, slots: usize) -> Result<Reference, RuntimeError> {
        if slots > self.settings.max_object_slots {
            return Err(RuntimeError::ObjectTooLarge { slots });
        }
        let limit = self.free_lists.len();

        // exact size, memory is reused as is
        if slots < limit
            && let Some(index) = self.pop_free_list(slots)
        {
            return Ok(self.claim(index, slots));
        }

        // an empty shell plus fresh memory
        if slots != 0
            && let Some(index) = self.pop_free_list(0)
        {
            match self.blocks.allocate(slots) {
                Ok(span) => {
                    self.entries[index].storage = Storage::Owned(span);
                    return Ok(self.claim(index, slots));
                }
                Err(_) => self.push_free_list(index, 0),
            }
        }

        // a bigger entry, shrunk in place
        for size in (slots + 1)..limit {
            if let Some(index) = self.pop_free_list(size) {
                log::trace!("allocate {slots}: reusing entry of size {size}");
                return Ok(self.claim(index, slots));
            }
        }

        // a smaller entry with new memory
        for size in (1..slots.min(limit)).rev() {
            if let Some(index) = self.pop_free_list(size) {
                log::trace!("allocate {slots}: growing entry of size {size}");
                self.release_storage(index);
                match self.blocks.allocate(slots) {
                    Ok(span) => {
                        self.entries[index].storage = Storage::Owned(span);
                        return Ok(self.claim(index, slots));
                    }
                    Err(err) => {
                        self.push_free_list(index, 0);
                        return Err(err);
                    }
                }
            }
        }

        Err(RuntimeError::OutOfMemory)
    }

    /// Allocates a byte object of `bytes` zero bytes.
    pub fn allocate_bytes(&mut self, bytes: usize) -> Reference {
        match self.try_allocate_bytes(bytes) {
            Ok(object) => object,
            Err(err) => fatal_error(err),
        }
    }

    pub fn try_allocate_bytes(&mut self, bytes: usize) -> Result<Reference, RuntimeError> {
        let object = self.try_allocate(slots_for_bytes(bytes))?;
        self.entry_mut(object).size = -(bytes as i32);
        Ok(object)
    }

    /// Allocates a byte object holding `s` and a trailing zero byte.
    pub fn allocate_string(&mut self, s: &str) -> Reference {
        let object = self.allocate_bytes(s.len() + 1);
        self.set_bytes(object, s.as_bytes());
        object
    }

    /// Allocates a byte object holding exactly `data`.
    pub fn allocate_byte_data(&mut self, data: &[u8]) -> Reference {
        let object = self.allocate_bytes(data.len());
        self.set_bytes(object, data);
        object
    }

    /// Allocates a pointer object holding `values`.
    pub fn allocate_with(&mut self, class: Reference, values: &[Reference]) -> Reference {
        let object = self.allocate(values.len());
        self.set_class(object, class);
        for (i, &value) in values.iter().enumerate() {
            self.set_slot(object, i, value);
        }
        object
    }

    fn claim(&mut self, index: usize, slots: usize) -> Reference {
        let entry = &mut self.entries[index];
        entry.class = Reference::NIL;
        entry.ref_count = 0;
        entry.size = slots as i32;
        Reference::from_index(index)
    }

    fn pop_free_list(&mut self, size: usize) -> Option<usize> {
        let head = self.free_lists[size];
        if head.is_nil() {
            return None;
        }
        let entry = &mut self.entries[head.index()];
        self.free_lists[size] = entry.class;
        entry.class = Reference::NIL;
        Some(head.index())
    }

    fn push_free_list(&mut self, index: usize, size: usize) {
        let entry = &mut self.entries[index];
        entry.class = self.free_lists[size];
        entry.ref_count = 0;
        entry.size = size as i32;
        self.free_lists[size] = Reference::from_index(index);
    }

    fn release_storage(&mut self, index: usize) {
        let storage = mem::replace(&mut self.entries[index].storage, Storage::Empty);
        if let Storage::Owned(span) = storage {
            self.blocks.release(span);
        }
    }

    /// Head of the free list for `size`, nil if it is empty.
    pub fn free_list_head(&self, size: usize) -> Reference {
        self.free_lists[size]
    }

    pub fn is_on_free_list(&self, object: Reference, size: usize) -> bool {
        let mut cursor = self.free_lists[size];
        while !cursor.is_nil() {
            if cursor == object {
                return true;
            }
            cursor = self.entries[cursor.index()].class;
        }
        false
    }

    #[inline]
    pub fn incr(&mut self, object: Reference) {
        if object.is_integer() || object.is_nil() {
            return;
        }
        let entry = self.entry_mut(object);
        if entry.ref_count != PERMANENT {
            entry.ref_count += 1;
        }
    }

    pub fn decr(&mut self, object: Reference) {
        if !self.release(object) {
            return;
        }
        let mut pending = mem::take(&mut self.pending);
        pending.push(object);
        while let Some(object) = pending.pop() {
            self.reclaim(object, &mut pending);
        }
        self.pending = pending;
    }

    // true when the count dropped to zero
    #[inline]
    fn release(&mut self, object: Reference) -> bool {
        if object.is_integer() || object.is_nil() {
            return false;
        }
        let index = object.index();
        let entry = self.entry_mut(object);
        if entry.ref_count == PERMANENT {
            return false;
        }
        if entry.ref_count == 0 {
            fatal_error(RuntimeError::NegativeReferenceCount { index });
        }
        entry.ref_count -= 1;
        entry.ref_count == 0
    }

    fn reclaim(&mut self, object: Reference, pending: &mut Vec<Reference>) {
        let index = object.index();
        let ObjectEntry {
            class,
            size,
            storage,
            ..
        } = self.entries[index];

        if self.release(class) {
            pending.push(class);
        }

        let slots = slots_for_size(size);
        if let Storage::Owned(span) = storage {
            let len = slots.min(span.len());
            for i in 0..len {
                let child = mem::take(&mut self.blocks.slots_mut(span)[i]);
                if size > 0 && self.release(child) {
                    pending.push(child);
                }
            }
        }

        self.return_to_free_list(index, slots);
    }

    // entries keep their memory only on a list of their own size
    fn return_to_free_list(&mut self, index: usize, slots: usize) {
        let owned = matches!(self.entries[index].storage, Storage::Owned(_));
        if owned && slots != 0 && slots < self.free_lists.len() {
            self.push_free_list(index, slots);
        } else {
            self.release_storage(index);
            self.push_free_list(index, 0);
        }
    }

    #[inline]
    pub fn ref_count(&self, object: Reference) -> u32 {
        self.entry(object).ref_count
    }

    #[inline]
    pub fn is_permanent(&self, object: Reference) -> bool {
        object.is_object() && self.entry(object).is_permanent()
    }

    #[inline]
    pub fn class(&self, object: Reference) -> Reference {
        self.entry(object).class
    }

    pub fn set_class(&mut self, object: Reference, class: Reference) {
        self.incr(class);
        let old = mem::replace(&mut self.entry_mut(object).class, class);
        self.decr(old);
    }

    #[inline]
    pub fn size(&self, object: Reference) -> i32 {
        self.entry(object).size
    }

    #[inline]
    pub fn is_bytes(&self, object: Reference) -> bool {
        object.is_object() && self.entry(object).is_bytes()
    }

    /// Number of reference slots of a pointer object, 0 for anything else.
    #[inline]
    pub fn slot_count(&self, object: Reference) -> usize {
        if object.is_integer() {
            return 0;
        }
        self.entry(object).size.max(0) as usize
    }

    /// Number of bytes of a byte object.
    #[inline]
    pub fn byte_len(&self, object: Reference) -> usize {
        let size = self.entry(object).size;
        if size < 0 { size.unsigned_abs() as usize } else { 0 }
    }

    fn pointer_span(&self, object: Reference, index: usize) -> Span {
        let entry = self.entry(object);
        if entry.size < 0 {
            fatal_error(RuntimeError::NotAPointerObject {
                index: object.index(),
            });
        }
        if index >= entry.size as usize {
            fatal_error(RuntimeError::InvalidIndex {
                index,
                size: entry.size as usize,
            });
        }
        match entry.storage {
            Storage::Owned(span) => span,
            Storage::Borrowed(_) => fatal_error(RuntimeError::ImmutableObject {
                index: object.index(),
            }),
            Storage::Empty => fatal_error(RuntimeError::InvalidIndex { index, size: 0 }),
        }
    }

    /// Slot `index` (0-based) of a pointer object.
    #[inline]
    pub fn slot(&self, object: Reference, index: usize) -> Reference {
        let span = self.pointer_span(object, index);
        self.blocks.slots(span)[index]
    }

    /// Stores `value` into slot `index`, adjusting both counts.
    #[inline]
    pub fn set_slot(&mut self, object: Reference, index: usize, value: Reference) {
        let span = self.pointer_span(object, index);
        self.incr(value);
        let old = mem::replace(&mut self.blocks.slots_mut(span)[index], value);
        self.decr(old);
    }

    /// Stores `value` without touching any count. The caller transfers or
    /// drops the references itself.
    #[inline]
    pub(crate) fn set_slot_raw(&mut self, object: Reference, index: usize, value: Reference) {
        let span = self.pointer_span(object, index);
        self.blocks.slots_mut(span)[index] = value;
    }

    /// 1-based slot read, as seen from Smalltalk.
    pub fn basic_at(&self, object: Reference, index: usize) -> Reference {
        if index == 0 {
            fatal_error(RuntimeError::InvalidIndex {
                index,
                size: self.slot_count(object),
            });
        }
        self.slot(object, index - 1)
    }

    /// 1-based slot write, as seen from Smalltalk.
    pub fn basic_at_put(&mut self, object: Reference, index: usize, value: Reference) {
        if index == 0 {
            fatal_error(RuntimeError::InvalidIndex {
                index,
                size: self.slot_count(object),
            });
        }
        self.set_slot(object, index - 1, value);
    }

    fn check_byte_index(&self, object: Reference, index: usize) -> &ObjectEntry {
        let entry = self.entry(object);
        if entry.size >= 0 {
            fatal_error(RuntimeError::NotAByteObject {
                index: object.index(),
            });
        }
        let len = entry.size.unsigned_abs() as usize;
        if index >= len {
            fatal_error(RuntimeError::InvalidIndex { index, size: len });
        }
        entry
    }

    /// Byte `index` (0-based) of a byte object.
    pub fn byte_at(&self, object: Reference, index: usize) -> u8 {
        match self.check_byte_index(object, index).storage {
            Storage::Owned(span) => {
                let word = self.blocks.slots(span)[index / SLOT_BYTES].raw();
                word.to_le_bytes()[index % SLOT_BYTES]
            }
            Storage::Borrowed(rom) => self.rom_bytes(rom)[index],
            Storage::Empty => unreachable!("byte object without storage"),
        }
    }

    pub fn set_byte(&mut self, object: Reference, index: usize, value: u8) {
        let storage = self.check_byte_index(object, index).storage;
        match storage {
            Storage::Owned(span) => {
                let word = &mut self.blocks.slots_mut(span)[index / SLOT_BYTES];
                let mut bytes = word.raw().to_le_bytes();
                bytes[index % SLOT_BYTES] = value;
                *word = Reference::from_raw(i32::from_le_bytes(bytes));
            }
            _ => fatal_error(RuntimeError::ImmutableObject {
                index: object.index(),
            }),
        }
    }

    /// Copies `data` to the start of a byte object.
    pub fn set_bytes(&mut self, object: Reference, data: &[u8]) {
        let len = self.byte_len(object);
        if data.len() > len {
            fatal_error(RuntimeError::InvalidIndex {
                index: data.len(),
                size: len,
            });
        }
        let storage = self.entry(object).storage;
        let Storage::Owned(span) = storage else {
            if data.is_empty() {
                return;
            }
            fatal_error(RuntimeError::ImmutableObject {
                index: object.index(),
            });
        };
        let words = self.blocks.slots_mut(span);
        for (word, chunk) in words.iter_mut().zip(data.chunks(SLOT_BYTES)) {
            let mut bytes = word.raw().to_le_bytes();
            bytes[..chunk.len()].copy_from_slice(chunk);
            *word = Reference::from_raw(i32::from_le_bytes(bytes));
        }
    }

    /// All bytes of a byte object. ROM objects are borrowed directly.
    pub fn bytes(&self, object: Reference) -> Cow<'_, [u8]> {
        let entry = self.entry(object);
        if entry.size >= 0 {
            return Cow::Borrowed(&[]);
        }
        let len = entry.size.unsigned_abs() as usize;
        match entry.storage {
            Storage::Owned(span) => {
                let mut bytes: Vec<u8> = self
                    .blocks
                    .slots(span)
                    .iter()
                    .flat_map(|word| word.raw().to_le_bytes())
                    .collect();
                bytes.truncate(len);
                Cow::Owned(bytes)
            }
            Storage::Borrowed(rom) => Cow::Borrowed(self.rom_bytes(rom)),
            Storage::Empty => Cow::Borrowed(&[]),
        }
    }

    /// Contents of a string or symbol up to its terminator.
    pub fn string(&self, object: Reference) -> String {
        if object.is_integer() {
            return String::new();
        }
        let bytes = self.bytes(object);
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    fn rom_bytes(&self, rom: RomSpan) -> &[u8] {
        match &self.rom {
            Some(buffer) => &buffer[rom.offset..rom.offset + rom.len],
            None => fatal("rom", "object mapped without an image buffer"),
        }
    }

    /// Places an object at a fixed index, used while reading an image.
    pub(crate) fn install(
        &mut self,
        index: usize,
        class: Reference,
        size: i32,
    ) -> Result<Reference, RuntimeError> {
        if index == 0 || index >= self.entries.len() {
            return Err(RuntimeError::ObjectIndexOutOfRange { index });
        }
        self.release_storage(index);
        let slots = slots_for_size(size);
        let storage = if slots == 0 {
            Storage::Empty
        } else {
            Storage::Owned(self.blocks.allocate(slots)?)
        };
        self.entries[index] = ObjectEntry {
            class,
            ref_count: 0,
            size,
            storage,
        };
        Ok(Reference::from_index(index))
    }

    /// Places a byte object whose data stays in the mapped image.
    pub(crate) fn install_rom(
        &mut self,
        index: usize,
        class: Reference,
        bytes: usize,
        offset: usize,
    ) -> Result<Reference, RuntimeError> {
        if index == 0 || index >= self.entries.len() {
            return Err(RuntimeError::ObjectIndexOutOfRange { index });
        }
        self.release_storage(index);
        self.entries[index] = ObjectEntry {
            class,
            ref_count: PERMANENT,
            size: -(bytes as i32),
            storage: Storage::Borrowed(RomSpan { offset, len: bytes }),
        };
        Ok(Reference::from_index(index))
    }

    pub(crate) fn set_rom(&mut self, rom: Arc<[u8]>) {
        self.rom = Some(rom);
    }

    /// Words of an owned pointer object, used while reading an image.
    pub(crate) fn slots_raw_mut(&mut self, object: Reference) -> &mut [Reference] {
        match self.entry(object).storage {
            Storage::Owned(span) => self.blocks.slots_mut(span),
            _ => &mut [],
        }
    }

    /// Rebuilds every free list from the entries' counts. Entries with a zero
    /// count are considered unreachable.
    pub(crate) fn sweep(&mut self) -> usize {
        self.free_lists.fill(Reference::NIL);
        let mut swept = 0;
        for index in (1..self.entries.len()).rev() {
            let entry = self.entries[index];
            if entry.ref_count != 0 {
                continue;
            }
            swept += usize::from(entry.storage != Storage::Empty);
            let slots = slots_for_size(entry.size);
            if let Storage::Owned(span) = entry.storage {
                self.blocks.slots_mut(span).fill(Reference::NIL);
            }
            self.return_to_free_list(index, slots);
        }
        swept
    }

    /// Live object references in index order, nil excluded.
    pub fn live_objects(&self) -> impl Iterator<Item = Reference> + '_ {
        self.entries
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, entry)| entry.ref_count > 0)
            .map(|(index, _)| Reference::from_index(index))
    }

    pub fn stats(&self) -> MemoryStats {
        let live = self.entries.iter().filter(|e| e.ref_count > 0).count();
        let permanent = self.entries.iter().filter(|e| e.is_permanent()).count();
        MemoryStats {
            table_size: self.entries.len(),
            live_objects: live,
            permanent_objects: permanent,
            free_entries: self.entries.len() - live,
            blocks: self.blocks.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_memory(size: usize) -> ObjectMemory {
        ObjectMemory::new(&MemoryCreateInfo {
            object_table_size: Some(size),
            chunk_slots: Some(64),
            free_list_limit: Some(32),
            max_chunks: None,
            max_object_slots: Some(4096),
        })
    }

    fn int(n: i32) -> Reference {
        Reference::from_small_int(n)
    }

    #[test]
    fn nil_is_pinned() {
        let mut memory = small_memory(8);
        memory.incr(Reference::NIL);
        memory.decr(Reference::NIL);
        memory.decr(Reference::NIL);
        assert_eq!(memory.ref_count(Reference::NIL), 1);
    }

    #[test]
    fn allocate_gives_zeroed_objects() {
        let mut memory = small_memory(8);
        let object = memory.allocate(3);
        assert_eq!(memory.ref_count(object), 0);
        assert!(memory.class(object).is_nil());
        assert_eq!(memory.size(object), 3);
        for i in 0..3 {
            assert!(memory.slot(object, i).is_nil());
        }
    }

    #[test]
    fn exact_size_reuse_is_lifo() {
        let mut memory = small_memory(16);
        let a = memory.allocate(4);
        memory.incr(a);
        memory.decr(a);
        assert!(memory.is_on_free_list(a, 4));
        let b = memory.allocate(4);
        assert_eq!(a, b, "reclaimed slot must be reused first");
    }

    #[test]
    fn reclaim_releases_class_once() {
        let mut memory = small_memory(16);
        let class = memory.allocate(0);
        memory.incr(class); // held by the test
        let object = memory.allocate(3);
        memory.set_class(object, class);
        for i in 1..=3 {
            memory.basic_at_put(object, i, int(i as i32 * 10));
        }
        memory.incr(object);
        assert_eq!(memory.ref_count(class), 2);

        memory.decr(object);
        assert_eq!(memory.ref_count(class), 1);
        assert!(memory.is_on_free_list(object, 3));
    }

    #[test]
    fn reclaim_cascades_to_children() {
        let mut memory = small_memory(16);
        let a = memory.allocate(2);
        let b = memory.allocate(1);
        memory.set_slot(a, 0, b);
        memory.incr(a);
        assert_eq!(memory.ref_count(b), 1);

        memory.decr(a);
        assert_eq!(memory.ref_count(b), 0);
        assert!(memory.is_on_free_list(b, 1), "B belongs to the size 1 list");
        assert!(memory.is_on_free_list(a, 2));
    }

    #[test]
    fn shared_child_survives_one_parent() {
        let mut memory = small_memory(16);
        let child = memory.allocate(1);
        let a = memory.allocate(1);
        let b = memory.allocate(1);
        memory.set_slot(a, 0, child);
        memory.set_slot(b, 0, child);
        memory.incr(a);
        memory.incr(b);

        memory.decr(a);
        assert_eq!(memory.ref_count(child), 1);
        memory.decr(b);
        assert_eq!(memory.ref_count(child), 0);
    }

    #[test]
    fn reclaimed_slots_are_cleared() {
        let mut memory = small_memory(16);
        let a = memory.allocate(2);
        let b = memory.allocate(1);
        memory.set_slot(a, 1, b);
        memory.incr(a);
        memory.decr(a);
        let again = memory.allocate(2);
        assert_eq!(again, a);
        assert!(memory.slot(again, 1).is_nil());
    }

    #[test]
    #[should_panic(expected = "negative reference count")]
    fn decr_of_dead_object_is_fatal() {
        let mut memory = small_memory(8);
        let object = memory.allocate(1);
        memory.decr(object);
    }

    #[test]
    fn falls_back_to_shell_then_larger_then_smaller() {
        let mut memory = small_memory(4);
        // entries 1..=3 are free shells
        let a = memory.allocate(5);
        let b = memory.allocate(2);
        memory.incr(a);
        memory.incr(b);
        let c = memory.allocate(1);
        assert_eq!(memory.free_list_head(0), Reference::NIL, "no shells left");
        memory.incr(c);

        // only a size 5 entry is free: it gets shrunk
        memory.decr(a);
        let d = memory.allocate(3);
        assert_eq!(d, a);
        assert_eq!(memory.size(d), 3);
        memory.incr(d);

        // only a size 2 entry is free: it is regrown
        memory.decr(b);
        let e = memory.allocate(4);
        assert_eq!(e, b);
        assert_eq!(memory.size(e), 4);
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut memory = small_memory(2);
        let only = memory.allocate(1);
        memory.incr(only);
        assert_eq!(memory.try_allocate(1), Err(RuntimeError::OutOfMemory));
    }

    #[test]
    fn bytes_and_strings() {
        let mut memory = small_memory(8);
        let s = memory.allocate_string("hello");
        assert_eq!(memory.size(s), -6);
        assert_eq!(memory.byte_len(s), 6);
        assert_eq!(memory.byte_at(s, 4), b'o');
        assert_eq!(memory.byte_at(s, 5), 0);
        assert_eq!(memory.string(s), "hello");

        memory.set_byte(s, 0, b'j');
        assert_eq!(&memory.bytes(s)[..5], b"jello");
    }

    #[test]
    fn byte_objects_do_not_cascade() {
        let mut memory = small_memory(8);
        let target = memory.allocate(1);
        memory.incr(target);
        // a byte pattern that looks like a reference to `target`
        let raw = target.raw().to_le_bytes();
        let bytes = memory.allocate_byte_data(&raw);
        memory.incr(bytes);
        memory.decr(bytes);
        assert_eq!(memory.ref_count(target), 1);
    }

    #[test]
    fn large_objects_return_to_shell_list() {
        let mut memory = small_memory(8);
        let big = memory.allocate(100);
        memory.incr(big);
        memory.decr(big);
        assert!(memory.is_on_free_list(big, 0));
        assert_eq!(memory.entry(big).storage, Storage::Empty);
    }

    #[test]
    fn oversized_requests_are_refused() {
        let mut memory = small_memory(8);
        let before = memory.stats();
        assert_eq!(
            memory.try_allocate(4097),
            Err(RuntimeError::ObjectTooLarge { slots: 4097 })
        );
        assert_eq!(
            memory.try_allocate_bytes(4 * 4096 + 1),
            Err(RuntimeError::ObjectTooLarge { slots: 4097 })
        );
        assert_eq!(memory.stats(), before);
        assert!(memory.try_allocate(4096).is_ok());
    }
}
