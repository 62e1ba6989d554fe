use crate::{
    Reference, Runtime,
    bytecode::disassemble,
    dictionary::{ENTRY_WIDTH, identity_hash, string_hash},
    objects::{class, dictionary, method},
};

/// Buckets of a method dictionary created at runtime.
pub const METHOD_DICTIONARY_BUCKETS: usize = 16;

impl Runtime {
    /// The symbol spelled `name`, created and entered into the symbol table
    /// on first use.
    pub fn intern(&mut self, name: &str) -> Reference {
        if let Some(symbol) = self.find_symbol(name) {
            return symbol;
        }
        let symbol = self.memory.allocate_string(name);
        self.memory.set_class(symbol, self.special.symbol_class);
        let table = self.special.symbols;
        let link_class = self.special.link_class;
        self.memory.table_insert(
            table,
            string_hash(name.as_bytes()),
            symbol,
            Reference::NIL,
            link_class,
            |_, key| key == symbol,
        );
        symbol
    }

    pub fn find_symbol(&self, name: &str) -> Option<Reference> {
        self.symbol_entry(name).map(|(symbol, _)| symbol)
    }

    fn symbol_entry(&self, name: &str) -> Option<(Reference, Reference)> {
        let table = self.special.symbols;
        if table.is_nil() {
            return None;
        }
        self.memory.table_lookup(table, string_hash(name.as_bytes()), |memory, key| {
            memory.spells(key, name.as_bytes())
        })
    }

    /// Value of the global `name`. Symbols without a value answer nil too.
    pub fn global(&self, name: &str) -> Option<Reference> {
        self.symbol_entry(name)
            .map(|(_, value)| value)
            .filter(|value| !value.is_nil())
    }

    pub fn set_global(&mut self, name: &str, value: Reference) {
        let symbol = self.intern(name);
        let table = self.special.symbols;
        let link_class = self.special.link_class;
        self.memory.table_insert(
            table,
            string_hash(name.as_bytes()),
            symbol,
            value,
            link_class,
            |_, key| key == symbol,
        );
    }

    pub fn new_method_dictionary(&mut self, buckets: usize) -> Reference {
        let table = self.new_array(buckets.max(1) * ENTRY_WIDTH);
        let methods = self.memory.allocate(dictionary::SIZE);
        self.memory.set_class(methods, self.special.dictionary_class);
        self.memory.set_slot(methods, dictionary::HASH_TABLE, table);
        methods
    }

    /// Creates a class and binds it to the global `name`.
    pub fn new_class(
        &mut self,
        name: &str,
        superclass: Reference,
        instance_variables: &[&str],
    ) -> Reference {
        let new = self.memory.allocate(class::SIZE);
        self.memory.set_class(new, self.special.class_class);
        self.init_class(new, name, superclass, instance_variables);
        new
    }

    /// Fills in an allocated class object and binds it to the global `name`.
    pub(crate) fn init_class(
        &mut self,
        new: Reference,
        name: &str,
        superclass: Reference,
        instance_variables: &[&str],
    ) {
        let inherited = if superclass.is_nil() {
            0
        } else {
            self.memory
                .slot(superclass, class::INSTANCE_SIZE)
                .small_int()
                .unwrap_or(0) as usize
        };
        let symbol = self.intern(name);
        let methods = self.new_method_dictionary(METHOD_DICTIONARY_BUCKETS);
        let names: Vec<Reference> = instance_variables
            .iter()
            .map(|variable| self.intern(variable))
            .collect();
        let variables = self.array_of(&names);

        self.memory.set_slot(new, class::NAME, symbol);
        self.memory.set_slot(
            new,
            class::INSTANCE_SIZE,
            Reference::from_small_int((inherited + instance_variables.len()) as i32),
        );
        self.memory.set_slot(new, class::METHODS, methods);
        self.memory.set_slot(new, class::SUPERCLASS, superclass);
        self.memory.set_slot(new, class::VARIABLES, variables);
        self.set_global(name, new);
    }

    pub fn class_name(&self, class: Reference) -> String {
        if class.is_integer() || class.is_nil() {
            return "nil".to_owned();
        }
        self.memory.string(self.memory.slot(class, class::NAME))
    }

    /// Enters `compiled` into the method dictionary of `owner` under its
    /// selector, replacing an older version, and drops the cached lookups.
    pub fn install_method(&mut self, owner: Reference, compiled: Reference) {
        let selector = self.memory.slot(compiled, method::SELECTOR);
        let methods = self.memory.slot(owner, class::METHODS);
        let table = self.memory.slot(methods, dictionary::HASH_TABLE);
        let link_class = self.special.link_class;
        self.memory.table_insert(
            table,
            identity_hash(selector),
            selector,
            compiled,
            link_class,
            |_, key| key == selector,
        );
        self.flush_selector(selector);

        if log::log_enabled!(log::Level::Trace) {
            let code = self.memory.slot(compiled, method::BYTECODES);
            log::trace!(
                "installed {}>>{}",
                self.class_name(owner),
                self.memory.string(selector)
            );
            for (offset, instruction) in disassemble(&self.memory.bytes(code)) {
                log::trace!("{offset:>4} {instruction}");
            }
        }
    }

    /// Method defined by `owner` itself for `selector`.
    pub fn method_at(&self, owner: Reference, selector: Reference) -> Option<Reference> {
        let methods = self.memory.slot(owner, class::METHODS);
        if methods.is_nil() {
            return None;
        }
        let table = self.memory.slot(methods, dictionary::HASH_TABLE);
        self.memory
            .table_lookup(table, identity_hash(selector), |_, key| key == selector)
            .map(|(_, compiled)| compiled)
    }
}
