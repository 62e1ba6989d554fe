use crate::{Reference, RuntimeError};

/// A run of slots inside one chunk.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Span {
    chunk: u32,
    start: u32,
    len: u32,
}

impl Span {
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

struct Chunk {
    data: Box<[Reference]>,
    // allocations larger than a chunk get one of their own and can be given back
    dedicated: bool,
}

/// Bump allocator over fixed size chunks.
///
/// Memory is carved from the current chunk until the next request no longer
/// fits. The tail of that chunk is then abandoned and a fresh chunk is started.
/// Released spans are not reused, only dedicated chunks are actually freed.
/// Abandoned tails and released spans are lost for the lifetime of the allocator.
pub struct BlockAllocator {
    chunks: Vec<Chunk>,
    current: Option<usize>,
    cursor: usize,
    chunk_slots: usize,
    max_chunks: Option<usize>,
    live_chunks: usize,
    abandoned: usize,
    released: usize,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct BlockStats {
    pub chunks: usize,
    pub carved_slots: usize,
    pub abandoned_slots: usize,
    pub released_slots: usize,
}

impl BlockAllocator {
    pub fn new(chunk_slots: usize, max_chunks: Option<usize>) -> Self {
        assert!(chunk_slots > 0, "chunk size must be positive");
        Self {
            chunks: Vec::new(),
            current: None,
            cursor: 0,
            chunk_slots,
            max_chunks,
            live_chunks: 0,
            abandoned: 0,
            released: 0,
        }
    }

    /// Hands out `slots` zeroed (nil) slots.
    pub fn allocate(&mut self, slots: usize) -> Result<Span, RuntimeError> {
        debug_assert!(slots > 0, "empty objects have no backing memory");

        if slots > self.chunk_slots {
            let chunk = self.new_chunk(slots, true)?;
            return Ok(Span {
                chunk: chunk as u32,
                start: 0,
                len: slots as u32,
            });
        }

        let chunk = match self.current {
            Some(chunk) if self.cursor + slots <= self.chunk_slots => chunk,
            current => {
                if current.is_some() {
                    self.abandoned += self.chunk_slots - self.cursor;
                }
                let chunk = self.new_chunk(self.chunk_slots, false)?;
                log::trace!(
                    "block allocator: new chunk {chunk}, abandoned {} slots so far",
                    self.abandoned
                );
                self.current = Some(chunk);
                self.cursor = 0;
                chunk
            }
        };

        let span = Span {
            chunk: chunk as u32,
            start: self.cursor as u32,
            len: slots as u32,
        };
        self.cursor += slots;
        Ok(span)
    }

    /// Gives `span` back. Only dedicated chunks return memory to the system.
    pub fn release(&mut self, span: Span) {
        let chunk = &mut self.chunks[span.chunk as usize];
        if chunk.dedicated {
            chunk.data = Box::new([]);
            self.live_chunks -= 1;
        } else {
            self.released += span.len();
        }
    }

    #[inline]
    pub fn slots(&self, span: Span) -> &[Reference] {
        let start = span.start as usize;
        &self.chunks[span.chunk as usize].data[start..start + span.len()]
    }

    #[inline]
    pub fn slots_mut(&mut self, span: Span) -> &mut [Reference] {
        let start = span.start as usize;
        &mut self.chunks[span.chunk as usize].data[start..start + span.len()]
    }

    pub fn stats(&self) -> BlockStats {
        let carved = self
            .chunks
            .iter()
            .filter(|chunk| !chunk.dedicated)
            .count()
            .saturating_sub(1)
            * self.chunk_slots
            + self.cursor;
        BlockStats {
            chunks: self.live_chunks,
            carved_slots: carved,
            abandoned_slots: self.abandoned,
            released_slots: self.released,
        }
    }

    fn new_chunk(&mut self, slots: usize, dedicated: bool) -> Result<usize, RuntimeError> {
        if self.max_chunks.is_some_and(|max| self.live_chunks >= max) {
            return Err(RuntimeError::OutOfMemory);
        }
        self.chunks.push(Chunk {
            data: vec![Reference::NIL; slots].into_boxed_slice(),
            dedicated,
        });
        self.live_chunks += 1;
        Ok(self.chunks.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carves_sequentially_within_a_chunk() {
        let mut blocks = BlockAllocator::new(16, None);
        let a = blocks.allocate(4).unwrap();
        let b = blocks.allocate(4).unwrap();
        assert_eq!(a.chunk, b.chunk);
        assert_eq!(b.start, a.start + 4);
        assert!(blocks.slots(a).iter().all(|r| r.is_nil()));
    }

    #[test]
    fn abandons_chunk_tail() {
        let mut blocks = BlockAllocator::new(16, None);
        blocks.allocate(10).unwrap();
        let b = blocks.allocate(10).unwrap();
        assert_eq!(b.chunk, 1, "second allocation must start a new chunk");
        assert_eq!(blocks.stats().abandoned_slots, 6);
        assert_eq!(blocks.stats().chunks, 2);
    }

    #[test]
    fn large_allocations_get_dedicated_chunks() {
        let mut blocks = BlockAllocator::new(16, None);
        let small = blocks.allocate(2).unwrap();
        let big = blocks.allocate(100).unwrap();
        assert_eq!(big.len(), 100);
        // the current chunk keeps being carved
        let next = blocks.allocate(2).unwrap();
        assert_eq!(next.chunk, small.chunk);

        blocks.release(big);
        assert_eq!(blocks.stats().chunks, 1);
        blocks.release(next);
        assert_eq!(blocks.stats().released_slots, 2);
    }

    #[test]
    fn chunk_limit_reports_out_of_memory() {
        let mut blocks = BlockAllocator::new(8, Some(1));
        blocks.allocate(8).unwrap();
        assert_eq!(blocks.allocate(1), Err(RuntimeError::OutOfMemory));
    }
}
