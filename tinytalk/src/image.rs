use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
    sync::Arc,
};

use crate::{Reference, Runtime, RuntimeCreateInfo, RuntimeError};

/// Record flag: byte data that may stay in a mapped image.
pub const FLAG_ROM: i16 = 1;

/// Reads an image from `reader` into a fresh runtime.
pub fn read_image(info: RuntimeCreateInfo, mut reader: impl Read) -> io::Result<Runtime> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let mut rt = Runtime::new(info);
    load_records(&mut rt, &bytes, None)?;
    Ok(rt)
}

/// Loads an image held in memory that outlives the runtime, typically flash.
/// Byte objects flagged ROM-eligible are not copied; they become permanent
/// and read their data from `image`.
pub fn map_image(info: RuntimeCreateInfo, image: Arc<[u8]>) -> io::Result<Runtime> {
    let mut rt = Runtime::new(info);
    load_records(&mut rt, &image, Some(&image))?;
    Ok(rt)
}

pub fn load_image(info: RuntimeCreateInfo, path: &Path) -> io::Result<Runtime> {
    read_image(info, BufReader::new(File::open(path)?))
}

/// Writes every live object, rooted at the symbol table.
pub fn write_image(rt: &Runtime, mut writer: impl Write) -> io::Result<()> {
    let memory = &rt.memory;
    let root = rt.special.symbols;
    if !root.is_object() {
        return Err(invalid_data("runtime has no symbol table"));
    }
    write_i32(&mut writer, root.raw())?;

    let mut records = 0;
    for object in memory.live_objects() {
        let entry = memory.entry(object);
        let index = i16::try_from(object.index())
            .map_err(|_| invalid_data("object index does not fit an image record"))?;
        let size = i16::try_from(entry.size)
            .map_err(|_| invalid_data("object too large for an image record"))?;
        write_i16(&mut writer, index)?;
        write_i32(&mut writer, entry.class.raw())?;
        write_i16(&mut writer, size)?;
        write_i16(&mut writer, if rom_eligible(rt, object) { FLAG_ROM } else { 0 })?;
        if entry.is_bytes() {
            writer.write_all(&memory.bytes(object))?;
        } else {
            for i in 0..memory.slot_count(object) {
                write_i32(&mut writer, memory.slot(object, i).raw())?;
            }
        }
        records += 1;
    }
    writer.flush()?;
    log::info!("wrote image with {records} objects");
    Ok(())
}

pub fn save_image(rt: &Runtime, path: &Path) -> io::Result<()> {
    write_image(rt, BufWriter::new(File::create(path)?))
}

fn rom_eligible(rt: &Runtime, object: Reference) -> bool {
    let class = rt.memory.class(object);
    rt.memory.is_bytes(object)
        && [
            rt.special.byte_array_class,
            rt.special.string_class,
            rt.special.symbol_class,
        ]
        .contains(&class)
}

fn load_records(rt: &mut Runtime, bytes: &[u8], rom: Option<&Arc<[u8]>>) -> io::Result<()> {
    let mut cursor = Cursor { bytes, position: 0 };
    let capacity = rt.memory.capacity();
    let in_table = |reference: Reference| !reference.is_object() || reference.index() < capacity;

    rt.memory.reset();
    if let Some(rom) = rom {
        rt.memory.set_rom(rom.clone());
    }

    let root = Reference::from_raw(cursor.i32()?);
    if !root.is_object() || !in_table(root) {
        return Err(invalid_data("image root is not an object"));
    }

    let mut records = 0;
    let mut mapped = 0;
    while !cursor.at_end() {
        let index = usize::try_from(cursor.i16()?)
            .map_err(|_| invalid_data("negative object index"))?;
        let class = Reference::from_raw(cursor.i32()?);
        let size = cursor.i16()?;
        let flags = cursor.i16()?;
        if !in_table(class) {
            return Err(invalid_data("class outside the object table"));
        }
        log::trace!("record {index}: class {class:?}, size {size}, flags {flags}");

        if size < 0 {
            let len = size.unsigned_abs() as usize;
            let offset = cursor.position;
            let data = cursor.take(len)?;
            if rom.is_some() && flags & FLAG_ROM != 0 {
                rt.memory
                    .install_rom(index, class, len, offset)
                    .map_err(runtime_error)?;
                mapped += 1;
            } else {
                let object = rt.memory.install(index, class, size as i32).map_err(runtime_error)?;
                rt.memory.set_bytes(object, data);
            }
        } else {
            let object = rt.memory.install(index, class, size as i32).map_err(runtime_error)?;
            for i in 0..size as usize {
                let word = Reference::from_raw(cursor.i32()?);
                if !in_table(word) {
                    return Err(invalid_data("slot outside the object table"));
                }
                rt.memory.slots_raw_mut(object)[i] = word;
            }
        }
        records += 1;
    }

    let swept = rt.memory.rebuild_reference_counts(&[root]);
    rt.resolve_special_objects(root).map_err(runtime_error)?;
    rt.flush_method_cache();
    log::info!("loaded image: {records} objects, {mapped} mapped, {swept} unreachable");
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn at_end(&self) -> bool {
        self.position >= self.bytes.len()
    }

    fn take(&mut self, len: usize) -> io::Result<&'a [u8]> {
        let bytes = self.bytes;
        let end = self.position + len;
        let Some(taken) = bytes.get(self.position..end) else {
            return Err(invalid_data("truncated image"));
        };
        self.position = end;
        Ok(taken)
    }

    fn i16(&mut self) -> io::Result<i16> {
        let bytes = self.take(2)?;
        Ok(i16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn i32(&mut self) -> io::Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

fn write_i16(w: &mut dyn Write, v: i16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_i32(w: &mut dyn Write, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn runtime_error(err: RuntimeError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err.to_string())
}
