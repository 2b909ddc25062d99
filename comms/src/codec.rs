use std::io;

/// Types that can be written into a frame.
///
/// Implementors push their leading bytes into `buf` and may hand back a borrowed tail that
/// the sender writes right after it, so large numeric payloads are never copied.
pub trait Serialize<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}

/// Types that can be rebuilt from a received frame, possibly borrowing from it.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}

/// Element types usable as receive buffers.
///
/// Frames open with an 8 byte kind header, a buffer of 8 byte aligned elements therefore
/// leaves the payload after it aligned for a zero-copy cast into `&[f64]`.
pub trait Align8: bytemuck::Pod {}

impl Align8 for u64 {}
impl Align8 for i64 {}
impl Align8 for f64 {}
