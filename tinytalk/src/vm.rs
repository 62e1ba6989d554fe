use std::{sync::Arc, time::Instant};

use crate::{
    EventQueue, Host, MemoryCreateInfo, MethodCache, ObjectMemory, Reference, StdHost,
    bytecode::{BINARY_SELECTORS, UNARY_SELECTORS},
    objects::{block, class, method},
};

/// Objects the interpreter and the primitives need to know by identity.
/// All of them are reachable from the symbol table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpecialObjects {
    pub symbols: Reference,
    pub true_object: Reference,
    pub false_object: Reference,
    pub object_class: Reference,
    pub undefined_class: Reference,
    pub class_class: Reference,
    pub integer_class: Reference,
    pub float_class: Reference,
    pub symbol_class: Reference,
    pub string_class: Reference,
    pub byte_array_class: Reference,
    pub array_class: Reference,
    pub block_class: Reference,
    pub context_class: Reference,
    pub method_class: Reference,
    pub process_class: Reference,
    pub dictionary_class: Reference,
    pub link_class: Reference,
    pub unary_selectors: [Reference; UNARY_SELECTORS.len()],
    pub binary_selectors: [Reference; BINARY_SELECTORS.len()],
    pub does_not_understand: Reference,
}

#[derive(Debug, Default)]
pub struct InterpreterCreateInfo {
    // prime, 0 disables the cache
    pub method_cache_size: Option<usize>,
    pub stack_growth: Option<usize>,
    // stacks larger than this force a yield
    pub stack_limit: Option<usize>,
    pub time_slice: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct InterpreterSettings {
    pub method_cache_size: usize,
    pub stack_growth: usize,
    pub stack_limit: usize,
    pub time_slice: usize,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            method_cache_size: 211,
            stack_growth: 100,
            stack_limit: 1800,
            time_slice: 15000,
        }
    }
}

impl InterpreterSettings {
    pub fn from_info(info: &InterpreterCreateInfo) -> Self {
        let mut settings = Self::default();
        info.method_cache_size
            .inspect(|&size| settings.method_cache_size = size);
        info.stack_growth
            .inspect(|&growth| settings.stack_growth = growth.max(1));
        info.stack_limit.inspect(|&limit| settings.stack_limit = limit);
        info.time_slice.inspect(|&slice| settings.time_slice = slice);
        settings
    }
}

#[derive(Default)]
pub struct RuntimeCreateInfo {
    pub memory: MemoryCreateInfo,
    pub interpreter: InterpreterCreateInfo,
    pub event_queue_capacity: Option<usize>,
    // defaults to a StdHost on stdout
    pub host: Option<Box<dyn Host>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeStats {
    pub bytecodes: u64,
    pub sends: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub primitives: u64,
}

/// Everything one Smalltalk world consists of: the object table, the method
/// cache, the well known objects and the hooks to the host.
///
/// The runtime is a single mutator. Hosts that touch it from more than one
/// thread put it behind a lock, see [`crate::Scheduler`].
pub struct Runtime {
    pub memory: ObjectMemory,
    pub special: SpecialObjects,
    pub(crate) cache: MethodCache,
    pub(crate) settings: InterpreterSettings,
    pub(crate) events: Arc<EventQueue>,
    pub(crate) host: Option<Box<dyn Host>>,
    pub(crate) rng: fastrand::Rng,
    pub(crate) started: Instant,
    pub stats: RuntimeStats,
}

impl Runtime {
    /// An empty world: only nil exists. Use [`crate::bootstrap`] or one of the
    /// image loaders to get something that can run.
    pub fn new(info: RuntimeCreateInfo) -> Self {
        let settings = InterpreterSettings::from_info(&info.interpreter);
        let capacity = info.event_queue_capacity.unwrap_or(16);
        Self {
            memory: ObjectMemory::new(&info.memory),
            special: SpecialObjects::default(),
            cache: MethodCache::new(settings.method_cache_size),
            settings,
            events: Arc::new(EventQueue::new(capacity)),
            host: Some(info.host.unwrap_or_else(|| Box::new(StdHost::default()))),
            rng: fastrand::Rng::new(),
            started: Instant::now(),
            stats: RuntimeStats::default(),
        }
    }

    pub fn settings(&self) -> &InterpreterSettings {
        &self.settings
    }

    /// Shared handle hosts use to interrupt the interpreter and queue blocks.
    pub fn events(&self) -> Arc<EventQueue> {
        self.events.clone()
    }

    pub fn set_host(&mut self, host: Box<dyn Host>) {
        self.host = Some(host);
    }

    #[inline]
    pub fn class_of(&self, object: Reference) -> Reference {
        if object.is_integer() {
            self.special.integer_class
        } else {
            self.memory.class(object)
        }
    }

    #[inline]
    pub fn boolean(&self, value: bool) -> Reference {
        if value {
            self.special.true_object
        } else {
            self.special.false_object
        }
    }

    pub fn is_kind_of(&self, object: Reference, class: Reference) -> bool {
        let mut cursor = self.class_of(object);
        let mut depth = 0;
        while !cursor.is_nil() && depth < self.memory.capacity() {
            if cursor == class {
                return true;
            }
            cursor = self.memory.slot(cursor, class::SUPERCLASS);
            depth += 1;
        }
        false
    }

    pub fn new_array(&mut self, len: usize) -> Reference {
        let array = self.memory.allocate(len);
        self.memory.set_class(array, self.special.array_class);
        array
    }

    pub fn array_of(&mut self, values: &[Reference]) -> Reference {
        self.memory.allocate_with(self.special.array_class, values)
    }

    pub fn new_string(&mut self, s: &str) -> Reference {
        let string = self.memory.allocate_string(s);
        self.memory.set_class(string, self.special.string_class);
        string
    }

    pub fn new_byte_array(&mut self, data: &[u8]) -> Reference {
        let bytes = self.memory.allocate_byte_data(data);
        self.memory.set_class(bytes, self.special.byte_array_class);
        bytes
    }

    pub fn new_float(&mut self, value: f64) -> Reference {
        let float = self.memory.allocate_byte_data(&value.to_le_bytes());
        self.memory.set_class(float, self.special.float_class);
        float
    }

    pub fn float_value(&self, object: Reference) -> Option<f64> {
        if object.is_integer() || self.memory.class(object) != self.special.float_class {
            return None;
        }
        let bytes: [u8; 8] = self.memory.bytes(object).as_ref().try_into().ok()?;
        Some(f64::from_le_bytes(bytes))
    }

    pub fn is_string(&self, object: Reference) -> bool {
        object.is_object()
            && self.memory.is_bytes(object)
            && (self.memory.class(object) == self.special.string_class
                || self.memory.class(object) == self.special.symbol_class)
    }

    /// Creates a compiled method. `selector` is interned.
    pub fn new_method(
        &mut self,
        owner: Reference,
        selector: &str,
        bytecodes: &[u8],
        literals: &[Reference],
        stack_size: usize,
        temporary_size: usize,
    ) -> Reference {
        let selector = self.intern(selector);
        let code = self.new_byte_array(bytecodes);
        let literals = self.array_of(literals);
        let compiled = self.memory.allocate(method::SIZE);
        self.memory.set_class(compiled, self.special.method_class);
        self.memory.set_slot(compiled, method::SELECTOR, selector);
        self.memory.set_slot(compiled, method::BYTECODES, code);
        self.memory.set_slot(compiled, method::LITERALS, literals);
        self.memory.set_slot(
            compiled,
            method::STACK_SIZE,
            Reference::from_small_int(stack_size as i32),
        );
        self.memory.set_slot(
            compiled,
            method::TEMPORARY_SIZE,
            Reference::from_small_int(temporary_size as i32),
        );
        self.memory.set_slot(compiled, method::CLASS, owner);
        compiled
    }

    /// Creates a block running at `position` of the method of `context`.
    pub fn new_block(
        &mut self,
        context: Reference,
        argument_count: usize,
        argument_location: usize,
        position: usize,
    ) -> Reference {
        let values = [
            context,
            Reference::from_small_int(argument_count as i32),
            Reference::from_small_int(argument_location as i32),
            Reference::from_small_int(position as i32),
        ];
        debug_assert_eq!(values.len(), block::SIZE);
        self.memory.allocate_with(self.special.block_class, &values)
    }

    /// Milliseconds since this runtime was created.
    pub fn uptime_millis(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}
