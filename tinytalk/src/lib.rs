mod allocator;
pub mod bytecode;
pub mod dictionary;
mod error;
mod heap;
mod host;
mod image;
mod interning;
mod interpreter;
mod lookup;
pub mod objects;
mod primitives;
mod scheduler;
mod special;
mod tagged;
mod visitor;
mod vm;

pub use allocator::*;
pub use bytecode::{Instruction, Label, MethodBuilder, Op, disassemble};
pub use error::*;
pub use heap::*;
pub use host::*;
pub use image::*;
pub use interning::*;
pub use lookup::*;
pub use primitives::{
    BLOCK_EXECUTE, FIRST_HOST_PRIMITIVE, FIRST_INTEGER_BINARY, PRIMITIVES, Primitive,
    PrimitiveFunction, get_primitive,
};
pub use scheduler::*;
pub use special::*;
pub use tagged::*;
pub use vm::*;
