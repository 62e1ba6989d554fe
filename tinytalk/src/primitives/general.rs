use crate::{
    Reference, Runtime, SMALL_INT_MAX, Storage,
    dictionary::identity_hash as table_hash,
};

#[inline]
fn int(value: usize) -> Reference {
    Reference::try_from_small_int(value as i64).unwrap_or(Reference::NIL)
}

// a non-negative small integer argument
#[inline]
fn count(value: Reference) -> Option<usize> {
    value.small_int().and_then(|n| usize::try_from(n).ok())
}

fn is_mutable(rt: &Runtime, object: Reference) -> bool {
    object.is_object()
        && !object.is_nil()
        && matches!(rt.memory.entry(object).storage, Storage::Owned(_))
}

pub fn random(rt: &mut Runtime, _: &[Reference]) -> Reference {
    Reference::from_small_int(rt.rng.i32(0..=SMALL_INT_MAX))
}

pub fn milliseconds(rt: &mut Runtime, _: &[Reference]) -> Reference {
    Reference::from_small_int((rt.uptime_millis() & SMALL_INT_MAX as u64) as i32)
}

pub fn flush_method_cache(rt: &mut Runtime, _: &[Reference]) -> Reference {
    rt.flush_method_cache();
    Reference::NIL
}

/// ( context argumentCount argumentLocation position -- block )
pub fn new_block(rt: &mut Runtime, args: &[Reference]) -> Reference {
    let [context, argument_count, location, position, ..] = *args else {
        return Reference::NIL;
    };
    if rt.class_of(context) != rt.special.context_class {
        return Reference::NIL;
    }
    match (count(argument_count), count(location), count(position)) {
        (Some(argument_count), Some(location), Some(position)) => {
            rt.new_block(context, argument_count, location, position)
        }
        _ => Reference::NIL,
    }
}

pub fn identity_hash(_: &mut Runtime, args: &[Reference]) -> Reference {
    let object = args[0];
    if object.is_integer() {
        return object;
    }
    int(table_hash(object))
}

pub fn class(rt: &mut Runtime, args: &[Reference]) -> Reference {
    rt.class_of(args[0])
}

pub fn basic_size(rt: &mut Runtime, args: &[Reference]) -> Reference {
    let object = args[0];
    if object.is_integer() || object.is_nil() {
        return int(0);
    }
    if rt.memory.is_bytes(object) {
        int(rt.memory.byte_len(object))
    } else {
        int(rt.memory.slot_count(object))
    }
}

pub fn is_small_integer(rt: &mut Runtime, args: &[Reference]) -> Reference {
    rt.boolean(args[0].is_integer())
}

pub fn reference_count(rt: &mut Runtime, args: &[Reference]) -> Reference {
    let object = args[0];
    if object.is_integer() {
        return Reference::NIL;
    }
    int(rt.memory.ref_count(object) as usize)
}

pub fn is_permanent(rt: &mut Runtime, args: &[Reference]) -> Reference {
    rt.boolean(rt.memory.is_permanent(args[0]))
}

pub fn identical(rt: &mut Runtime, args: &[Reference]) -> Reference {
    rt.boolean(args[0] == args[1])
}

/// ( class size -- instance )
pub fn new_pointer_object(rt: &mut Runtime, args: &[Reference]) -> Reference {
    let (class, Some(size)) = (args[0], count(args[1])) else {
        return Reference::NIL;
    };
    if class.is_integer() || class.is_nil() {
        return Reference::NIL;
    }
    match rt.memory.try_allocate(size) {
        Ok(object) => {
            rt.memory.set_class(object, class);
            object
        }
        Err(err) => {
            log::warn!("new: {err}");
            Reference::NIL
        }
    }
}

/// ( class size -- instance )
pub fn new_byte_object(rt: &mut Runtime, args: &[Reference]) -> Reference {
    let (class, Some(size)) = (args[0], count(args[1])) else {
        return Reference::NIL;
    };
    if class.is_integer() || class.is_nil() {
        return Reference::NIL;
    }
    match rt.memory.try_allocate_bytes(size) {
        Ok(object) => {
            rt.memory.set_class(object, class);
            object
        }
        Err(err) => {
            log::warn!("new bytes: {err}");
            Reference::NIL
        }
    }
}

fn pointer_index(rt: &Runtime, object: Reference, index: Reference) -> Option<usize> {
    if object.is_integer() || object.is_nil() || rt.memory.is_bytes(object) {
        return None;
    }
    let index = count(index)?;
    (1..=rt.memory.slot_count(object))
        .contains(&index)
        .then_some(index)
}

fn byte_index(rt: &Runtime, object: Reference, index: Reference) -> Option<usize> {
    if !rt.memory.is_bytes(object) {
        return None;
    }
    let index = count(index)?;
    (1..=rt.memory.byte_len(object))
        .contains(&index)
        .then_some(index - 1)
}

pub fn basic_at(rt: &mut Runtime, args: &[Reference]) -> Reference {
    match pointer_index(rt, args[0], args[1]) {
        Some(index) => rt.memory.basic_at(args[0], index),
        None => Reference::NIL,
    }
}

pub fn byte_at(rt: &mut Runtime, args: &[Reference]) -> Reference {
    match byte_index(rt, args[0], args[1]) {
        Some(index) => Reference::from_small_int(rt.memory.byte_at(args[0], index) as i32),
        None => Reference::NIL,
    }
}

/// ( object class -- object )
pub fn set_class(rt: &mut Runtime, args: &[Reference]) -> Reference {
    let [object, class, ..] = *args else {
        return Reference::NIL;
    };
    if object.is_integer() || object.is_nil() || class.is_integer() || class.is_nil() {
        return Reference::NIL;
    }
    rt.memory.set_class(object, class);
    object
}

/// ( object index value -- value )
pub fn basic_at_put(rt: &mut Runtime, args: &[Reference]) -> Reference {
    let [object, index, value, ..] = *args else {
        return Reference::NIL;
    };
    match pointer_index(rt, object, index) {
        Some(index) => {
            rt.memory.basic_at_put(object, index, value);
            value
        }
        None => Reference::NIL,
    }
}

/// ( object index byte -- byte )
pub fn byte_at_put(rt: &mut Runtime, args: &[Reference]) -> Reference {
    let [object, index, value, ..] = *args else {
        return Reference::NIL;
    };
    let Some(byte) = value.small_int().and_then(|b| u8::try_from(b).ok()) else {
        return Reference::NIL;
    };
    if !is_mutable(rt, object) {
        return Reference::NIL;
    }
    match byte_index(rt, object, index) {
        Some(index) => {
            rt.memory.set_byte(object, index, byte);
            value
        }
        None => Reference::NIL,
    }
}

/// ( object from to -- copy ), 1-based and inclusive. Strings stay strings.
pub fn copy_from_to(rt: &mut Runtime, args: &[Reference]) -> Reference {
    let [object, from, to, ..] = *args else {
        return Reference::NIL;
    };
    let (Some(from), Some(to)) = (count(from), count(to)) else {
        return Reference::NIL;
    };
    if object.is_integer() || object.is_nil() || from == 0 {
        return Reference::NIL;
    }

    if rt.is_string(object) {
        let bytes = super::string::contents(rt, object);
        if to > bytes.len() || from > to + 1 {
            return Reference::NIL;
        }
        return super::string::new_string_from(rt, &bytes[from - 1..to]);
    }

    let class = rt.memory.class(object);
    if rt.memory.is_bytes(object) {
        let bytes = rt.memory.bytes(object).into_owned();
        if to > bytes.len() || from > to + 1 {
            return Reference::NIL;
        }
        let copy = rt.memory.allocate_byte_data(&bytes[from - 1..to]);
        rt.memory.set_class(copy, class);
        return copy;
    }

    if to > rt.memory.slot_count(object) || from > to + 1 {
        return Reference::NIL;
    }
    let values: Vec<Reference> = (from - 1..to).map(|i| rt.memory.slot(object, i)).collect();
    rt.memory.allocate_with(class, &values)
}

/// ( selector class -- nil )
pub fn flush_cache_entry(rt: &mut Runtime, args: &[Reference]) -> Reference {
    rt.flush_cache(args[0], args[1]);
    Reference::NIL
}
