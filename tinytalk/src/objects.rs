//! Slot layouts of the objects the interpreter looks inside of.
//! All offsets are 0-based slot indices.

#[rustfmt::skip]
pub mod class {
    pub const NAME:          usize = 0;
    pub const INSTANCE_SIZE: usize = 1;
    pub const METHODS:       usize = 2;
    pub const SUPERCLASS:    usize = 3;
    pub const VARIABLES:     usize = 4;
    pub const SIZE:          usize = 5;
}

#[rustfmt::skip]
pub mod method {
    pub const TEXT:           usize = 0;
    pub const SELECTOR:       usize = 1;
    pub const BYTECODES:      usize = 2;
    pub const LITERALS:       usize = 3;
    pub const STACK_SIZE:     usize = 4;
    pub const TEMPORARY_SIZE: usize = 5;
    pub const CLASS:          usize = 6;
    pub const WATCH:          usize = 7;
    pub const SIZE:           usize = 8;
}

#[rustfmt::skip]
pub mod context {
    pub const LINK_POINTER: usize = 0;
    pub const METHOD:       usize = 1;
    pub const ARGUMENTS:    usize = 2;
    pub const TEMPORARIES:  usize = 3;
    pub const SIZE:         usize = 4;
}

#[rustfmt::skip]
pub mod block {
    pub const CONTEXT:           usize = 0;
    pub const ARGUMENT_COUNT:    usize = 1;
    pub const ARGUMENT_LOCATION: usize = 2;
    pub const BYTECODE_POSITION: usize = 3;
    pub const SIZE:              usize = 4;
}

#[rustfmt::skip]
pub mod process {
    pub const STACK:        usize = 0;
    pub const STACK_TOP:    usize = 1;
    pub const LINK_POINTER: usize = 2;
    pub const SIZE:         usize = 3;
}

/// A linkage frame as laid out on a process stack.
#[rustfmt::skip]
pub mod linkage {
    pub const PREVIOUS_LINK: usize = 0;
    pub const CONTEXT:       usize = 1;
    pub const RETURN_POINT:  usize = 2;
    pub const METHOD:        usize = 3;
    pub const BYTE_OFFSET:   usize = 4;
    pub const SIZE:          usize = 5;
}

#[rustfmt::skip]
pub mod dictionary {
    pub const HASH_TABLE: usize = 0;
    pub const SIZE:       usize = 1;
}

#[rustfmt::skip]
pub mod link {
    pub const KEY:   usize = 0;
    pub const VALUE: usize = 1;
    pub const NEXT:  usize = 2;
    pub const SIZE:  usize = 3;
}
