use crate::{Reference, Runtime};

type Float2Op = fn(rt: &mut Runtime, a: f64, b: f64) -> Reference;

// integers are widened so mixed arithmetic works
fn operand(rt: &Runtime, value: Reference) -> Option<f64> {
    match value.small_int() {
        Some(int) => Some(int as f64),
        None => rt.float_value(value),
    }
}

fn float_binop(rt: &mut Runtime, args: &[Reference], op: Float2Op) -> Reference {
    if rt.float_value(args[0]).is_none() {
        return Reference::NIL;
    }
    match (operand(rt, args[0]), operand(rt, args[1])) {
        (Some(a), Some(b)) => op(rt, a, b),
        _ => Reference::NIL,
    }
}

type Float1Op = fn(rt: &mut Runtime, a: f64) -> Reference;

fn float_op(rt: &mut Runtime, args: &[Reference], op: Float1Op) -> Reference {
    match rt.float_value(args[0]) {
        Some(value) => op(rt, value),
        None => Reference::NIL,
    }
}

pub fn print_string(rt: &mut Runtime, args: &[Reference]) -> Reference {
    float_op(rt, args, |rt, value| rt.new_string(&value.to_string()))
}

pub fn truncated(rt: &mut Runtime, args: &[Reference]) -> Reference {
    float_op(rt, args, |_, value| {
        if !value.is_finite() {
            return Reference::NIL;
        }
        Reference::try_from_small_int(value.trunc() as i64).unwrap_or(Reference::NIL)
    })
}

pub fn sqrt(rt: &mut Runtime, args: &[Reference]) -> Reference {
    float_op(rt, args, |rt, value| {
        if value < 0.0 {
            return Reference::NIL;
        }
        rt.new_float(value.sqrt())
    })
}

pub fn negated(rt: &mut Runtime, args: &[Reference]) -> Reference {
    float_op(rt, args, |rt, value| rt.new_float(-value))
}

pub fn add(rt: &mut Runtime, args: &[Reference]) -> Reference {
    float_binop(rt, args, |rt, a, b| rt.new_float(a + b))
}

pub fn sub(rt: &mut Runtime, args: &[Reference]) -> Reference {
    float_binop(rt, args, |rt, a, b| rt.new_float(a - b))
}

pub fn mul(rt: &mut Runtime, args: &[Reference]) -> Reference {
    float_binop(rt, args, |rt, a, b| rt.new_float(a * b))
}

pub fn div(rt: &mut Runtime, args: &[Reference]) -> Reference {
    float_binop(rt, args, |rt, a, b| {
        if b == 0.0 {
            return Reference::NIL;
        }
        rt.new_float(a / b)
    })
}

pub fn lt(rt: &mut Runtime, args: &[Reference]) -> Reference {
    float_binop(rt, args, |rt, a, b| rt.boolean(a < b))
}

pub fn gt(rt: &mut Runtime, args: &[Reference]) -> Reference {
    float_binop(rt, args, |rt, a, b| rt.boolean(a > b))
}

pub fn leq(rt: &mut Runtime, args: &[Reference]) -> Reference {
    float_binop(rt, args, |rt, a, b| rt.boolean(a <= b))
}

pub fn geq(rt: &mut Runtime, args: &[Reference]) -> Reference {
    float_binop(rt, args, |rt, a, b| rt.boolean(a >= b))
}

pub fn eq(rt: &mut Runtime, args: &[Reference]) -> Reference {
    float_binop(rt, args, |rt, a, b| rt.boolean(a == b))
}

pub fn neq(rt: &mut Runtime, args: &[Reference]) -> Reference {
    float_binop(rt, args, |rt, a, b| rt.boolean(a != b))
}

#[cfg(test)]
mod tests {
    use crate::{Reference, Runtime, RuntimeCreateInfo, bootstrap};

    fn runtime() -> Runtime {
        bootstrap(RuntimeCreateInfo::default())
    }

    fn float(rt: &mut Runtime, value: f64) -> Reference {
        let float = rt.new_float(value);
        rt.memory.incr(float);
        float
    }

    #[test]
    fn arithmetic() {
        let mut rt = runtime();
        let a = float(&mut rt, 1.5);
        let b = float(&mut rt, 0.25);
        let sum = rt.primitive(110, &[a, b]);
        assert_eq!(rt.float_value(sum), Some(1.75));
        let quotient = rt.primitive(119, &[a, b]);
        assert_eq!(rt.float_value(quotient), Some(6.0));
        let mixed = rt.primitive(118, &[a, Reference::from_small_int(2)]);
        assert_eq!(rt.float_value(mixed), Some(3.0));
    }

    #[test]
    fn declined_operations() {
        let mut rt = runtime();
        let a = float(&mut rt, -4.0);
        let zero = float(&mut rt, 0.0);
        assert_eq!(rt.primitive(119, &[a, zero]), Reference::NIL);
        assert_eq!(rt.primitive(102, &[a]), Reference::NIL);
        assert_eq!(rt.primitive(110, &[Reference::from_small_int(1), a]), Reference::NIL);
    }

    #[test]
    fn conversions_and_comparisons() {
        let mut rt = runtime();
        let a = float(&mut rt, 7.9);
        let b = float(&mut rt, -7.9);
        assert_eq!(rt.primitive(101, &[a]), Reference::from_small_int(7));
        assert_eq!(rt.primitive(101, &[b]), Reference::from_small_int(-7));
        assert_eq!(rt.primitive(112, &[b, a]), rt.special.true_object);
        assert_eq!(rt.primitive(116, &[a, a]), rt.special.true_object);
        let text = rt.primitive(100, &[a]);
        assert_eq!(rt.memory.string(text), "7.9");
        let root = float(&mut rt, 16.0);
        let root = rt.primitive(102, &[root]);
        assert_eq!(rt.float_value(root), Some(4.0));
    }
}
