use crate::{
    Reference, Runtime, RuntimeCreateInfo, RuntimeError, SpecialObjects,
    bytecode::{BINARY_SELECTORS, DOES_NOT_UNDERSTAND, UNARY_SELECTORS},
    dictionary::ENTRY_WIDTH,
    objects::class,
};

/// Buckets of the root symbol table.
pub const SYMBOL_TABLE_BUCKETS: usize = 509;

/// Kernel classes in creation order: name, superclass, instance variables.
#[rustfmt::skip]
const KERNEL_CLASSES: &[(&str, Option<&str>, &[&str])] = &[
    ("Object",          None,              &[]),
    ("UndefinedObject", Some("Object"),    &[]),
    ("Boolean",         Some("Object"),    &[]),
    ("True",            Some("Boolean"),   &[]),
    ("False",           Some("Boolean"),   &[]),
    ("Class",           Some("Object"),    &["name", "instanceSize", "methods", "superClass", "variables"]),
    ("Integer",         Some("Object"),    &[]),
    ("Float",           Some("Object"),    &[]),
    ("ByteArray",       Some("Object"),    &[]),
    ("String",          Some("ByteArray"), &[]),
    ("Symbol",          Some("String"),    &[]),
    ("Array",           Some("Object"),    &[]),
    ("Block",           Some("Object"),    &["context", "argumentCount", "argumentLocation", "bytecodePosition"]),
    ("Context",         Some("Object"),    &["linkPointer", "method", "arguments", "temporaries"]),
    ("Method",          Some("Object"),    &["text", "message", "bytecodes", "literals", "stackSize", "temporarySize", "class", "watch"]),
    ("Process",         Some("Object"),    &["stack", "stackTop", "linkPointer"]),
    ("Dictionary",      Some("Object"),    &["hashTable"]),
    ("Link",            Some("Object"),    &["key", "value", "nextLink"]),
];

/// Builds a fresh world holding the kernel classes, the symbol table,
/// `true`, `false` and the special selectors.
pub fn bootstrap(info: RuntimeCreateInfo) -> Runtime {
    let mut rt = Runtime::new(info);

    // 1. class shells, so symbols and dictionaries have classes to point at
    let shells: Vec<Reference> = KERNEL_CLASSES
        .iter()
        .map(|_| rt.memory.allocate(class::SIZE))
        .collect();
    let shell = |name: &str| {
        let position = KERNEL_CLASSES.iter().position(|(n, _, _)| *n == name);
        position.map_or(Reference::NIL, |i| shells[i])
    };
    rt.special = SpecialObjects {
        object_class: shell("Object"),
        undefined_class: shell("UndefinedObject"),
        class_class: shell("Class"),
        integer_class: shell("Integer"),
        float_class: shell("Float"),
        symbol_class: shell("Symbol"),
        string_class: shell("String"),
        byte_array_class: shell("ByteArray"),
        array_class: shell("Array"),
        block_class: shell("Block"),
        context_class: shell("Context"),
        method_class: shell("Method"),
        process_class: shell("Process"),
        dictionary_class: shell("Dictionary"),
        link_class: shell("Link"),
        ..SpecialObjects::default()
    };
    for &new in &shells {
        rt.memory.set_class(new, rt.special.class_class);
    }

    // 2. the symbol table is the root of everything
    let symbols = rt.new_array(SYMBOL_TABLE_BUCKETS * ENTRY_WIDTH);
    rt.memory.incr(symbols);
    rt.special.symbols = symbols;

    // 3. fill in the classes, binding each to its global
    for (&new, &(name, superclass, variables)) in shells.iter().zip(KERNEL_CLASSES) {
        let superclass = superclass.map_or(Reference::NIL, &shell);
        rt.init_class(new, name, superclass, variables);
    }
    rt.memory.set_class(Reference::NIL, rt.special.undefined_class);

    // 4. booleans
    for (name, class_name) in [("true", "True"), ("false", "False")] {
        let object = rt.memory.allocate(0);
        rt.memory.set_class(object, shell(class_name));
        rt.set_global(name, object);
    }
    rt.special.true_object = rt.global("true").unwrap_or_default();
    rt.special.false_object = rt.global("false").unwrap_or_default();

    rt.intern_special_selectors();
    log::debug!(
        "bootstrapped {} kernel classes, {} live objects",
        KERNEL_CLASSES.len(),
        rt.memory.live_objects().count()
    );
    rt
}

impl Runtime {
    fn intern_special_selectors(&mut self) {
        for (i, name) in UNARY_SELECTORS.iter().enumerate() {
            self.special.unary_selectors[i] = self.intern(name);
        }
        for (i, name) in BINARY_SELECTORS.iter().enumerate() {
            self.special.binary_selectors[i] = self.intern(name);
        }
        self.special.does_not_understand = self.intern(DOES_NOT_UNDERSTAND);
    }

    /// Finds the well known objects again after an image was loaded with
    /// `root` as its symbol table. Classes and booleans are looked up by
    /// global name, and nil gets its class back.
    pub fn resolve_special_objects(&mut self, root: Reference) -> Result<(), RuntimeError> {
        self.special = SpecialObjects {
            symbols: root,
            ..SpecialObjects::default()
        };
        let rt: &Runtime = self;
        let global = |name: &str| {
            rt.global(name).ok_or_else(|| RuntimeError::MissingGlobal {
                name: name.to_owned(),
            })
        };
        let special = SpecialObjects {
            symbols: root,
            true_object: global("true")?,
            false_object: global("false")?,
            object_class: global("Object")?,
            undefined_class: global("UndefinedObject")?,
            class_class: global("Class")?,
            integer_class: global("Integer")?,
            float_class: global("Float")?,
            symbol_class: global("Symbol")?,
            string_class: global("String")?,
            byte_array_class: global("ByteArray")?,
            array_class: global("Array")?,
            block_class: global("Block")?,
            context_class: global("Context")?,
            method_class: global("Method")?,
            process_class: global("Process")?,
            dictionary_class: global("Dictionary")?,
            link_class: global("Link")?,
            ..SpecialObjects::default()
        };
        self.special = special;
        // nil has no record of its own
        self.memory.set_class(Reference::NIL, special.undefined_class);
        self.intern_special_selectors();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> Runtime {
        bootstrap(RuntimeCreateInfo::default())
    }

    fn superclass(rt: &Runtime, of: Reference) -> Reference {
        rt.memory.slot(of, class::SUPERCLASS)
    }

    #[test]
    fn kernel_classes_are_globals() {
        let rt = runtime();
        for (name, _, _) in KERNEL_CLASSES {
            let found = rt.global(name).unwrap();
            assert_eq!(rt.class_name(found), *name);
            assert_eq!(rt.class_of(found), rt.special.class_class);
        }
        assert_eq!(rt.global("Symbol"), Some(rt.special.symbol_class));
    }

    #[test]
    fn hierarchy_and_instance_sizes() {
        let rt = runtime();
        let s = rt.special;
        assert_eq!(superclass(&rt, s.symbol_class), s.string_class);
        assert_eq!(superclass(&rt, s.string_class), s.byte_array_class);
        assert_eq!(superclass(&rt, s.byte_array_class), s.object_class);
        assert!(superclass(&rt, s.object_class).is_nil());
        let size = |c| rt.memory.slot(c, class::INSTANCE_SIZE);
        assert_eq!(size(s.class_class), Reference::from_small_int(5));
        assert_eq!(size(s.method_class), Reference::from_small_int(8));
        assert_eq!(size(s.process_class), Reference::from_small_int(3));
    }

    #[test]
    fn nil_and_booleans_have_classes() {
        let rt = runtime();
        assert_eq!(rt.class_of(Reference::NIL), rt.special.undefined_class);
        assert_eq!(rt.class_name(rt.class_of(rt.special.true_object)), "True");
        assert_eq!(rt.class_name(rt.class_of(rt.special.false_object)), "False");
        assert_ne!(rt.special.true_object, rt.special.false_object);
    }

    #[test]
    fn special_selectors_are_interned() {
        let mut rt = runtime();
        let is_nil = rt.intern("isNil");
        let plus = rt.intern("+");
        let dnu = rt.intern(DOES_NOT_UNDERSTAND);
        assert_eq!(rt.special.unary_selectors[0], is_nil);
        assert_eq!(rt.special.binary_selectors[0], plus);
        assert_eq!(rt.special.does_not_understand, dnu);
    }

    #[test]
    fn resolving_finds_the_same_objects() {
        let mut rt = runtime();
        let before = rt.special;
        rt.resolve_special_objects(before.symbols).unwrap();
        assert_eq!(rt.special, before);
    }

    #[test]
    fn resolving_reports_missing_globals() {
        let mut rt = runtime();
        let symbols = rt.special.symbols;
        rt.set_global("Process", Reference::NIL);
        let err = rt.resolve_special_objects(symbols).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::MissingGlobal {
                name: "Process".to_owned()
            }
        );
    }
}
