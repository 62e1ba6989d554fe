use crate::{Reference, Runtime, SMALL_INT_MAX, dictionary::string_hash};

/// Bytes of a string or symbol up to its terminator.
pub(crate) fn contents(rt: &Runtime, string: Reference) -> Vec<u8> {
    let bytes = rt.memory.bytes(string);
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    bytes[..end].to_vec()
}

/// A String holding `bytes` plus the terminator.
pub(crate) fn new_string_from(rt: &mut Runtime, bytes: &[u8]) -> Reference {
    let string = rt.memory.allocate_bytes(bytes.len() + 1);
    rt.memory.set_bytes(string, bytes);
    rt.memory.set_class(string, rt.special.string_class);
    string
}

fn string_arg(rt: &Runtime, args: &[Reference]) -> Option<Vec<u8>> {
    rt.is_string(args[0]).then(|| contents(rt, args[0]))
}

pub fn size(rt: &mut Runtime, args: &[Reference]) -> Reference {
    match string_arg(rt, args) {
        Some(bytes) => Reference::from_small_int(bytes.len() as i32),
        None => Reference::NIL,
    }
}

pub fn hash(rt: &mut Runtime, args: &[Reference]) -> Reference {
    match string_arg(rt, args) {
        Some(bytes) => {
            let hash = string_hash(&bytes) & SMALL_INT_MAX as usize;
            Reference::from_small_int(hash as i32)
        }
        None => Reference::NIL,
    }
}

pub fn as_symbol(rt: &mut Runtime, args: &[Reference]) -> Reference {
    match string_arg(rt, args) {
        Some(bytes) => rt.intern(&String::from_utf8_lossy(&bytes)),
        None => Reference::NIL,
    }
}

pub fn print(rt: &mut Runtime, args: &[Reference]) -> Reference {
    match string_arg(rt, args) {
        Some(bytes) => {
            super::host_print(rt, &String::from_utf8_lossy(&bytes));
            args[0]
        }
        None => Reference::NIL,
    }
}

pub fn copy(rt: &mut Runtime, args: &[Reference]) -> Reference {
    match string_arg(rt, args) {
        Some(bytes) => new_string_from(rt, &bytes),
        None => Reference::NIL,
    }
}

pub fn as_number(rt: &mut Runtime, args: &[Reference]) -> Reference {
    let Some(bytes) = string_arg(rt, args) else {
        return Reference::NIL;
    };
    std::str::from_utf8(&bytes)
        .ok()
        .and_then(|text| text.trim().parse::<i64>().ok())
        .and_then(Reference::try_from_small_int)
        .unwrap_or(Reference::NIL)
}

/// ( string string -- string )
pub fn concatenate(rt: &mut Runtime, args: &[Reference]) -> Reference {
    if !rt.is_string(args[0]) || !rt.is_string(args[1]) {
        return Reference::NIL;
    }
    let mut bytes = contents(rt, args[0]);
    bytes.extend(contents(rt, args[1]));
    new_string_from(rt, &bytes)
}

#[cfg(test)]
mod tests {
    use crate::{Reference, Runtime, RuntimeCreateInfo, bootstrap};

    fn runtime() -> Runtime {
        bootstrap(RuntimeCreateInfo::default())
    }

    fn string(rt: &mut Runtime, s: &str) -> Reference {
        let string = rt.new_string(s);
        rt.memory.incr(string);
        string
    }

    #[test]
    fn size_excludes_the_terminator() {
        let mut rt = runtime();
        let hello = string(&mut rt, "hello");
        assert_eq!(rt.primitive(80, &[hello]), Reference::from_small_int(5));
        assert_eq!(rt.primitive(12, &[hello]), Reference::from_small_int(6));
    }

    #[test]
    fn as_symbol_interns() {
        let mut rt = runtime();
        let name = string(&mut rt, "printString");
        let symbol = rt.primitive(82, &[name]);
        assert_eq!(Some(symbol), rt.find_symbol("printString"));
        assert_eq!(rt.class_of(symbol), rt.special.symbol_class);
    }

    #[test]
    fn concatenation_and_copy_make_strings() {
        let mut rt = runtime();
        let a = string(&mut rt, "tiny");
        let b = rt.intern("talk");
        let joined = rt.primitive(24, &[a, b]);
        assert_eq!(rt.memory.string(joined), "tinytalk");
        assert_eq!(rt.class_of(joined), rt.special.string_class);

        let copied = rt.primitive(84, &[b]);
        assert_ne!(copied, b);
        assert_eq!(rt.memory.string(copied), "talk");
        assert_eq!(rt.class_of(copied), rt.special.string_class);
        assert_eq!(rt.primitive(24, &[a, Reference::from_small_int(1)]), Reference::NIL);
    }

    #[test]
    fn as_number_parses_small_integers() {
        let mut rt = runtime();
        let number = string(&mut rt, " -17 ");
        assert_eq!(rt.primitive(85, &[number]), Reference::from_small_int(-17));
        let word = string(&mut rt, "seventeen");
        assert_eq!(rt.primitive(85, &[word]), Reference::NIL);
    }

    #[test]
    fn equal_strings_hash_alike() {
        let mut rt = runtime();
        let a = string(&mut rt, "same");
        let b = string(&mut rt, "same");
        assert_eq!(rt.primitive(81, &[a]), rt.primitive(81, &[b]));
    }
}
