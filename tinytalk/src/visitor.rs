use crate::{ObjectMemory, PERMANENT, Reference};

impl ObjectMemory {
    /// Counts one more reference to `root`. The first time an object is
    /// reached its class and slots are visited as well, later visits only
    /// add to the count, so shared structure ends up with its real multiplicity.
    pub fn visit(&mut self, root: Reference) {
        let mut pending = vec![root];
        while let Some(object) = pending.pop() {
            if object.is_integer() || object.is_nil() {
                continue;
            }
            let index = object.index();
            let Some(entry) = self.entries.get_mut(index) else {
                crate::fatal("visit", format!("object index {index} out of range"));
            };
            if entry.ref_count == PERMANENT {
                continue;
            }
            entry.ref_count += 1;
            if entry.ref_count > 1 {
                continue;
            }

            let entry = *entry;
            pending.push(entry.class);
            if entry.size > 0 {
                let len = entry.size as usize;
                for i in (0..len).rev() {
                    pending.push(self.slot(object, i));
                }
            }
        }
    }

    /// Recomputes every reference count from scratch by visiting `roots`, then
    /// moves everything that was not reached onto the free lists.
    /// Permanent objects keep their count; their classes count as roots.
    pub fn rebuild_reference_counts(&mut self, roots: &[Reference]) -> usize {
        let mut permanent_classes = Vec::new();
        for entry in self.entries.iter_mut().skip(1) {
            if entry.ref_count == PERMANENT {
                permanent_classes.push(entry.class);
            } else {
                entry.ref_count = 0;
            }
        }

        for class in permanent_classes {
            self.visit(class);
        }
        for &root in roots {
            self.visit(root);
        }

        let swept = self.sweep();
        log::debug!(
            "rebuilt reference counts: {} live, {swept} swept",
            self.live_objects().count()
        );
        swept
    }
}

#[cfg(test)]
mod tests {
    use crate::{MemoryCreateInfo, ObjectMemory, Reference};

    fn memory() -> ObjectMemory {
        ObjectMemory::new(&MemoryCreateInfo {
            object_table_size: Some(64),
            ..Default::default()
        })
    }

    fn counts(memory: &ObjectMemory) -> Vec<u32> {
        memory.entries.iter().map(|entry| entry.ref_count).collect()
    }

    #[test]
    fn visit_agrees_with_incremental_counts() {
        let mut memory = memory();
        let class = memory.allocate(0);
        let root = memory.allocate(3);
        let shared = memory.allocate(2);
        let leaf = memory.allocate_string("leaf");
        memory.set_class(root, class);
        memory.set_class(shared, class);
        memory.set_slot(root, 0, shared);
        memory.set_slot(root, 1, shared);
        memory.set_slot(root, 2, Reference::from_small_int(9));
        memory.set_slot(shared, 0, leaf);
        memory.set_slot(shared, 1, root); // a cycle back to the root
        memory.incr(root);

        let before = counts(&memory);
        let swept = memory.rebuild_reference_counts(&[root]);
        assert_eq!(swept, 0);
        assert_eq!(counts(&memory), before);
    }

    #[test]
    fn unreachable_objects_are_swept() {
        let mut memory = memory();
        let root = memory.allocate(1);
        let kept = memory.allocate(1);
        let lost = memory.allocate(2);
        memory.set_slot(root, 0, kept);
        memory.incr(root);
        memory.incr(lost); // stale count, nothing points at it

        memory.rebuild_reference_counts(&[root]);
        assert_eq!(memory.ref_count(kept), 1);
        assert_eq!(memory.ref_count(lost), 0);
        assert!(memory.is_on_free_list(lost, 2));
        assert_eq!(memory.allocate(2), lost);
    }
}
