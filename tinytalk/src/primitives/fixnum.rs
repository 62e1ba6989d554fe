use crate::{Reference, Runtime};

enum IntegerResult {
    Value(i64),
    Bool(bool),
}

type Integer2Op = fn(a: i64, b: i64) -> Option<IntegerResult>;

fn small(value: i64) -> Reference {
    Reference::try_from_small_int(value).unwrap_or(Reference::NIL)
}

fn integer_op(number: u8) -> Option<Integer2Op> {
    use IntegerResult::{Bool, Value};
    let op: Integer2Op = match number {
        60 => |a, b| Some(Value(a + b)),
        61 => |a, b| Some(Value(a - b)),
        62 => |a, b| Some(Bool(a < b)),
        63 => |a, b| Some(Bool(a > b)),
        64 => |a, b| Some(Bool(a <= b)),
        65 => |a, b| Some(Bool(a >= b)),
        66 => |a, b| Some(Bool(a == b)),
        67 => |a, b| Some(Bool(a != b)),
        68 => |a, b| a.checked_mul(b).map(Value),
        69 => |a, b| a.checked_div(b).map(Value),
        70 => |a, b| a.checked_rem(b).map(Value),
        71 => |a, b| Some(Value(a & b)),
        72 => |a, b| Some(Value(a ^ b)),
        73 => |a, b| Some(Value(a | b)),
        79 => |a, b| {
            let shifted = if b >= 0 {
                let shift = u32::try_from(b).ok().filter(|&s| s < 32)?;
                a.checked_shl(shift).filter(|v| v >> shift == a)?
            } else {
                a >> (-b).min(63)
            };
            Some(Value(shifted))
        },
        _ => return None,
    };
    Some(op)
}

impl Runtime {
    /// Binary integer primitive `number` on two small integers. Results
    /// outside the small integer range and division by zero answer nil.
    ///
    /// The interpreter's inlined binary sends go through here as well.
    pub fn integer_binary(&self, number: u8, a: i32, b: i32) -> Reference {
        let Some(op) = integer_op(number) else {
            return Reference::NIL;
        };
        match op(a as i64, b as i64) {
            Some(IntegerResult::Value(value)) => small(value),
            Some(IntegerResult::Bool(value)) => self.boolean(value),
            None => Reference::NIL,
        }
    }
}

fn binary(rt: &mut Runtime, args: &[Reference], number: u8) -> Reference {
    match (args[0].small_int(), args[1].small_int()) {
        (Some(a), Some(b)) => rt.integer_binary(number, a, b),
        _ => Reference::NIL,
    }
}

macro_rules! integer_binary_primitives {
    ($($name:ident = $number:literal),* $(,)?) => {
        $(
            pub fn $name(rt: &mut Runtime, args: &[Reference]) -> Reference {
                binary(rt, args, $number)
            }
        )*
    };
}

integer_binary_primitives! {
    add = 60,
    sub = 61,
    lt = 62,
    gt = 63,
    leq = 64,
    geq = 65,
    eq = 66,
    neq = 67,
    mul = 68,
    quo = 69,
    rem = 70,
    bit_and = 71,
    bit_xor = 72,
    bit_or = 73,
    bit_shift = 79,
}

pub fn as_float(rt: &mut Runtime, args: &[Reference]) -> Reference {
    match args[0].small_int() {
        Some(value) => rt.new_float(value as f64),
        None => Reference::NIL,
    }
}

pub fn negated(_: &mut Runtime, args: &[Reference]) -> Reference {
    match args[0].small_int() {
        Some(value) => small(-(value as i64)),
        None => Reference::NIL,
    }
}

pub fn abs(_: &mut Runtime, args: &[Reference]) -> Reference {
    match args[0].small_int() {
        Some(value) => small((value as i64).abs()),
        None => Reference::NIL,
    }
}

pub fn print_string(rt: &mut Runtime, args: &[Reference]) -> Reference {
    match args[0].small_int() {
        Some(value) => rt.new_string(&value.to_string()),
        None => Reference::NIL,
    }
}

/// A one character string holding the byte `value`.
pub fn as_character(rt: &mut Runtime, args: &[Reference]) -> Reference {
    let Some(byte) = args[0].small_int().and_then(|v| u8::try_from(v).ok()) else {
        return Reference::NIL;
    };
    super::string::new_string_from(rt, &[byte])
}

#[cfg(test)]
mod tests {
    use crate::{Reference, Runtime, RuntimeCreateInfo, SMALL_INT_MAX, SMALL_INT_MIN, bootstrap};

    fn small(value: i32) -> Reference {
        Reference::from_small_int(value)
    }

    fn runtime() -> Runtime {
        bootstrap(RuntimeCreateInfo::default())
    }

    #[test]
    fn sums_in_range_are_exact() {
        let mut rt = runtime();
        for (a, b) in [(1, 2), (-5, 3), (SMALL_INT_MAX - 1, 1), (SMALL_INT_MIN + 1, -1)] {
            let sum = rt.primitive(60, &[small(a), small(b)]);
            assert_eq!(sum.as_small_int() as i64, a as i64 + b as i64);
        }
    }

    #[test]
    fn overflow_answers_nil() {
        let mut rt = runtime();
        assert_eq!(rt.primitive(60, &[small(SMALL_INT_MAX), small(1)]), Reference::NIL);
        assert_eq!(rt.primitive(61, &[small(SMALL_INT_MIN), small(1)]), Reference::NIL);
        assert_eq!(rt.primitive(68, &[small(1 << 20), small(1 << 20)]), Reference::NIL);
        assert_eq!(rt.primitive(51, &[small(SMALL_INT_MIN)]), Reference::NIL);
        assert_eq!(rt.primitive(79, &[small(1), small(30)]), Reference::NIL);
    }

    #[test]
    fn division_truncates_and_rejects_zero() {
        let mut rt = runtime();
        assert_eq!(rt.primitive(69, &[small(-7), small(2)]), small(-3));
        assert_eq!(rt.primitive(70, &[small(-7), small(2)]), small(-1));
        assert_eq!(rt.primitive(69, &[small(7), small(0)]), Reference::NIL);
        assert_eq!(rt.primitive(70, &[small(7), small(0)]), Reference::NIL);
    }

    #[test]
    fn comparisons_answer_booleans() {
        let mut rt = runtime();
        let (t, f) = (rt.special.true_object, rt.special.false_object);
        assert_eq!(rt.primitive(62, &[small(1), small(2)]), t);
        assert_eq!(rt.primitive(63, &[small(1), small(2)]), f);
        assert_eq!(rt.primitive(66, &[small(3), small(3)]), t);
        assert_eq!(rt.primitive(67, &[small(3), small(3)]), f);
    }

    #[test]
    fn bit_operations() {
        let mut rt = runtime();
        assert_eq!(rt.primitive(71, &[small(0b1100), small(0b1010)]), small(0b1000));
        assert_eq!(rt.primitive(72, &[small(0b1100), small(0b1010)]), small(0b0110));
        assert_eq!(rt.primitive(73, &[small(0b1100), small(0b1010)]), small(0b1110));
        assert_eq!(rt.primitive(79, &[small(3), small(4)]), small(48));
        assert_eq!(rt.primitive(79, &[small(-48), small(-4)]), small(-3));
    }

    #[test]
    fn non_integers_are_declined() {
        let mut rt = runtime();
        let string = rt.new_string("1");
        rt.memory.incr(string);
        assert_eq!(rt.primitive(60, &[string, small(1)]), Reference::NIL);
        assert_eq!(rt.primitive(54, &[string]), Reference::NIL);
    }

    #[test]
    fn conversions() {
        let mut rt = runtime();
        let text = rt.primitive(52, &[small(-42)]);
        assert_eq!(rt.memory.string(text), "-42");
        let float = rt.primitive(50, &[small(3)]);
        assert_eq!(rt.float_value(float), Some(3.0));
        let character = rt.primitive(53, &[small(65)]);
        assert_eq!(rt.memory.string(character), "A");
        assert_eq!(rt.primitive(54, &[small(-9)]), small(9));
    }
}
