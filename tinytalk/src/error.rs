use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    OutOfMemory,
    ObjectTooLarge { slots: usize },
    ObjectIndexOutOfRange { index: usize },
    InvalidIndex { index: usize, size: usize },
    NegativeReferenceCount { index: usize },
    ImmutableObject { index: usize },
    NotAPointerObject { index: usize },
    NotAByteObject { index: usize },
    BadBytecode { opcode: u8, offset: usize },
    MessageNotUnderstood { selector: String },
    MissingGlobal { name: String },
    DeadStack,
}

impl RuntimeError {
    /// Short component name used as the first half of the fatal diagnostic.
    pub fn context(&self) -> &'static str {
        match self {
            RuntimeError::OutOfMemory => "allocate",
            RuntimeError::ObjectTooLarge { .. } => "allocate",
            RuntimeError::ObjectIndexOutOfRange { .. } => "object table",
            RuntimeError::InvalidIndex { .. } => "index",
            RuntimeError::NegativeReferenceCount { .. } => "decr",
            RuntimeError::ImmutableObject { .. } => "store",
            RuntimeError::NotAPointerObject { .. } => "slot access",
            RuntimeError::NotAByteObject { .. } => "byte access",
            RuntimeError::BadBytecode { .. } => "interpreter",
            RuntimeError::MessageNotUnderstood { .. } => "error recovery",
            RuntimeError::MissingGlobal { .. } => "image",
            RuntimeError::DeadStack => "process",
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::OutOfMemory => write!(f, "out of objects"),
            RuntimeError::ObjectTooLarge { slots } => {
                write!(f, "object of {slots} slots exceeds the size limit")
            }
            RuntimeError::ObjectIndexOutOfRange { index } => {
                write!(f, "object index {index} out of range")
            }
            RuntimeError::InvalidIndex { index, size } => {
                write!(f, "index {index} out of bounds for size {size}")
            }
            RuntimeError::NegativeReferenceCount { index } => {
                write!(f, "negative reference count for object {index}")
            }
            RuntimeError::ImmutableObject { index } => {
                write!(f, "object {index} lives in read-only memory")
            }
            RuntimeError::NotAPointerObject { index } => {
                write!(f, "object {index} does not hold references")
            }
            RuntimeError::NotAByteObject { index } => {
                write!(f, "object {index} does not hold bytes")
            }
            RuntimeError::BadBytecode { opcode, offset } => {
                write!(f, "bad bytecode {opcode:#04x} at offset {offset}")
            }
            RuntimeError::MessageNotUnderstood { selector } => {
                write!(f, "can't find recovery method for #{selector}")
            }
            RuntimeError::MissingGlobal { name } => write!(f, "global {name} is not defined"),
            RuntimeError::DeadStack => write!(f, "process has no stack"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// The one exit for broken invariants: prints `context, detail` and aborts the
/// current call stack. Nothing inside the runtime catches this.
#[cold]
#[track_caller]
pub fn fatal(context: &str, detail: impl fmt::Display) -> ! {
    log::error!("{context}, {detail}");
    eprintln!("{context}, {detail}");
    panic!("{context}, {detail}")
}

/// Reports `err` through [`fatal`].
#[cold]
#[track_caller]
pub fn fatal_error(err: RuntimeError) -> ! {
    fatal(err.context(), err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_have_two_parts() {
        let err = RuntimeError::NegativeReferenceCount { index: 7 };
        assert_eq!(err.context(), "decr");
        assert_eq!(err.to_string(), "negative reference count for object 7");
    }

    #[test]
    #[should_panic(expected = "allocate, out of objects")]
    fn fatal_panics_with_diagnostic() {
        fatal_error(RuntimeError::OutOfMemory);
    }
}
