use crate::{Reference, Runtime};

mod fixnum;
mod float;
mod general;
mod string;

/// Runs a block, handled by the interpreter itself.
pub const BLOCK_EXECUTE: u8 = 8;
/// Integer `+`; the inlined binary selectors follow in selector order.
pub const FIRST_INTEGER_BINARY: u8 = 60;
/// Primitives at and above this number belong to the host.
pub const FIRST_HOST_PRIMITIVE: u8 = 150;

pub type PrimitiveFunction = fn(&mut Runtime, &[Reference]) -> Reference;

// receiver counts as input
// e.g. `3 + 4` has inputs: 2
#[derive(Debug, Copy, Clone)]
pub struct Primitive {
    pub number: u8,
    pub name: &'static str,
    pub inputs: usize,
    pub ptr: PrimitiveFunction,
}

impl Primitive {
    pub const fn new(
        number: u8,
        name: &'static str,
        inputs: usize,
        ptr: PrimitiveFunction,
    ) -> Self {
        Self {
            number,
            name,
            inputs,
            ptr,
        }
    }
}

#[rustfmt::skip]
pub const PRIMITIVES: &[Primitive] = &[
    Primitive::new(1,   "random",          0, general::random),
    Primitive::new(2,   "milliseconds",    0, general::milliseconds),
    Primitive::new(3,   "flushCache",      0, general::flush_method_cache),
    Primitive::new(9,   "newBlock",        4, general::new_block),
    Primitive::new(10,  "identityHash",    1, general::identity_hash),
    Primitive::new(11,  "class",           1, general::class),
    Primitive::new(12,  "basicSize",       1, general::basic_size),
    Primitive::new(13,  "isSmallInteger",  1, general::is_small_integer),
    Primitive::new(14,  "referenceCount",  1, general::reference_count),
    Primitive::new(15,  "isPermanent",     1, general::is_permanent),
    Primitive::new(21,  "==",              2, general::identical),
    Primitive::new(22,  "new:",            2, general::new_pointer_object),
    Primitive::new(23,  "newBytes:",       2, general::new_byte_object),
    Primitive::new(24,  ",",               2, string::concatenate),
    Primitive::new(25,  "basicAt:",        2, general::basic_at),
    Primitive::new(26,  "byteAt:",         2, general::byte_at),
    Primitive::new(27,  "class:",          2, general::set_class),
    Primitive::new(31,  "basicAt:put:",    3, general::basic_at_put),
    Primitive::new(32,  "byteAt:put:",     3, general::byte_at_put),
    Primitive::new(33,  "copyFrom:to:",    3, general::copy_from_to),
    Primitive::new(34,  "flushCache:for:", 2, general::flush_cache_entry),
    Primitive::new(50,  "asFloat",         1, fixnum::as_float),
    Primitive::new(51,  "negated",         1, fixnum::negated),
    Primitive::new(52,  "printString",     1, fixnum::print_string),
    Primitive::new(53,  "asCharacter",     1, fixnum::as_character),
    Primitive::new(54,  "abs",             1, fixnum::abs),
    Primitive::new(60,  "+",               2, fixnum::add),
    Primitive::new(61,  "-",               2, fixnum::sub),
    Primitive::new(62,  "<",               2, fixnum::lt),
    Primitive::new(63,  ">",               2, fixnum::gt),
    Primitive::new(64,  "<=",              2, fixnum::leq),
    Primitive::new(65,  ">=",              2, fixnum::geq),
    Primitive::new(66,  "=",               2, fixnum::eq),
    Primitive::new(67,  "~=",              2, fixnum::neq),
    Primitive::new(68,  "*",               2, fixnum::mul),
    Primitive::new(69,  "quo:",            2, fixnum::quo),
    Primitive::new(70,  "rem:",            2, fixnum::rem),
    Primitive::new(71,  "bitAnd:",         2, fixnum::bit_and),
    Primitive::new(72,  "bitXor:",         2, fixnum::bit_xor),
    Primitive::new(73,  "bitOr:",          2, fixnum::bit_or),
    Primitive::new(79,  "bitShift:",       2, fixnum::bit_shift),
    Primitive::new(80,  "size",            1, string::size),
    Primitive::new(81,  "hash",            1, string::hash),
    Primitive::new(82,  "asSymbol",        1, string::as_symbol),
    Primitive::new(83,  "print",           1, string::print),
    Primitive::new(84,  "copy",            1, string::copy),
    Primitive::new(85,  "asNumber",        1, string::as_number),
    Primitive::new(100, "printString",     1, float::print_string),
    Primitive::new(101, "truncated",       1, float::truncated),
    Primitive::new(102, "sqrt",            1, float::sqrt),
    Primitive::new(103, "negated",         1, float::negated),
    Primitive::new(110, "+",               2, float::add),
    Primitive::new(111, "-",               2, float::sub),
    Primitive::new(112, "<",               2, float::lt),
    Primitive::new(113, ">",               2, float::gt),
    Primitive::new(114, "<=",              2, float::leq),
    Primitive::new(115, ">=",              2, float::geq),
    Primitive::new(116, "=",               2, float::eq),
    Primitive::new(117, "~=",              2, float::neq),
    Primitive::new(118, "*",               2, float::mul),
    Primitive::new(119, "/",               2, float::div),
];

const fn build_table() -> [Option<Primitive>; 256] {
    let mut table = [None; 256];
    let mut i = 0;
    while i < PRIMITIVES.len() {
        table[PRIMITIVES[i].number as usize] = Some(PRIMITIVES[i]);
        i += 1;
    }
    table
}

static TABLE: [Option<Primitive>; 256] = build_table();

pub fn get_primitive(number: u8) -> Option<&'static Primitive> {
    TABLE[number as usize].as_ref()
}

impl Runtime {
    /// Runs primitive `number` on `args`, the receiver first.
    ///
    /// Answers nil when the primitive declines: unknown number, too few
    /// arguments or arguments outside its domain. The result may be a fresh
    /// object with a zero count.
    pub fn primitive(&mut self, number: u8, args: &[Reference]) -> Reference {
        self.stats.primitives += 1;
        if number >= FIRST_HOST_PRIMITIVE {
            return self.host_primitive(number, args);
        }
        let Some(primitive) = get_primitive(number) else {
            log::warn!("unknown primitive {number}");
            return Reference::NIL;
        };
        if args.len() < primitive.inputs {
            log::debug!(
                "primitive {number} ({}) given {} of {} arguments",
                primitive.name,
                args.len(),
                primitive.inputs
            );
            return Reference::NIL;
        }
        (primitive.ptr)(self, args)
    }

    fn host_primitive(&mut self, number: u8, args: &[Reference]) -> Reference {
        let Some(mut host) = self.host.take() else {
            log::warn!("host primitive {number} without a host");
            return Reference::NIL;
        };
        let result = host.primitive(self, number, args);
        self.host = Some(host);
        result.unwrap_or_else(|| {
            log::warn!("unknown host primitive {number}");
            Reference::NIL
        })
    }
}

/// Sends the text to the host's output, if there is a host.
pub(crate) fn host_print(rt: &mut Runtime, text: &str) {
    match rt.host.as_mut() {
        Some(host) => host.print(text),
        None => log::info!("{text}"),
    }
}
