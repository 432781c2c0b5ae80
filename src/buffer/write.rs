use bytes::{BufMut, Bytes, BytesMut};

use super::BufferError;
use crate::ext::UsizeExt;

const GROW_STEP: usize = 4096;

/// Precomputed single-frame messages, payload-free by definition.
const SYNC_MESSAGE: &[u8] = &[b'S', 0, 0, 0, 4];
const FLUSH_MESSAGE: &[u8] = &[b'H', 0, 0, 0, 4];

/// A grow-on-demand scratch buffer writing big-endian primitives.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    buf: BytesMut,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self { buf: BytesMut::with_capacity(GROW_STEP) }
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Discard all written bytes, capacity is retained.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Take the written bytes, leaving the buffer empty.
    pub fn unwrap(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    fn ensure(&mut self, size: usize) {
        let free = self.buf.capacity() - self.buf.len();
        if free < size {
            self.buf.reserve(size.max(GROW_STEP));
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.ensure(1);
        self.buf.put_u8(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.ensure(2);
        self.buf.put_i16(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.ensure(2);
        self.buf.put_u16(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.ensure(4);
        self.buf.put_i32(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.ensure(4);
        self.buf.put_u32(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.ensure(8);
        self.buf.put_i64(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.ensure(8);
        self.buf.put_u64(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.ensure(4);
        self.buf.put_f32(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.ensure(8);
        self.buf.put_f64(value);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.ensure(bytes.len());
        self.buf.put_slice(bytes);
    }

    /// Write an `i32` length prefix followed by UTF-8 bytes.
    pub fn write_string(&mut self, string: &str) {
        self.write_len_prefixed_bytes(string.as_bytes());
    }

    /// Write an `i32` length prefix followed by raw bytes.
    pub fn write_len_prefixed_bytes(&mut self, bytes: &[u8]) {
        self.ensure(4 + bytes.len());
        self.buf.put_i32(bytes.len().to_i32());
        self.buf.put_slice(bytes);
    }

    /// Reserve an `i32` length prefix, returning its position for
    /// [`end_len_prefix`][Self::end_len_prefix].
    pub fn begin_len_prefix(&mut self) -> usize {
        let at = self.position();
        self.write_i32(0);
        at
    }

    /// Back-patch a reserved length prefix with the byte count written
    /// since [`begin_len_prefix`][Self::begin_len_prefix].
    pub fn end_len_prefix(&mut self, at: usize) {
        let length = self.position() - at - 4;
        self.patch_i32(at, length.to_i32());
    }

    /// Overwrite four bytes at `at` with a big-endian `i32`.
    ///
    /// `at + 4` must be within the written region.
    fn patch_i32(&mut self, at: usize, value: i32) {
        self.buf[at..at + 4].copy_from_slice(&value.to_be_bytes());
    }
}

/// A [`WriteBuffer`] with frame bookkeeping.
///
/// A frame is `u8 tag | i32 length | payload`, the length counts itself
/// but not the tag. The length field is back-patched on
/// [`end_message`][WriteMessageBuffer::end_message].
#[derive(Debug, Default)]
pub struct WriteMessageBuffer {
    buf: WriteBuffer,
    frame_start: Option<usize>,
}

macro_rules! forward_write {
    ($($name:ident($ty:ty);)*) => {$(
        pub fn $name(&mut self, value: $ty) -> Result<(), BufferError> {
            self.check_open()?;
            self.buf.$name(value);
            Ok(())
        }
    )*};
}

impl WriteMessageBuffer {
    pub fn new() -> Self {
        Self { buf: WriteBuffer::new(), frame_start: None }
    }

    fn check_open(&self) -> Result<(), BufferError> {
        match self.frame_start {
            Some(_) => Ok(()),
            None => Err(BufferError::NoMessage),
        }
    }

    fn check_closed(&self) -> Result<(), BufferError> {
        match self.frame_start {
            Some(_) => Err(BufferError::MessageStarted),
            None => Ok(()),
        }
    }

    /// Open a frame: tag byte plus a length placeholder.
    pub fn begin_message(&mut self, tag: u8) -> Result<(), BufferError> {
        self.check_closed()?;
        self.frame_start = Some(self.buf.position());
        self.buf.write_u8(tag);
        self.buf.write_i32(0);
        Ok(())
    }

    /// Close the current frame, back-patching its length field.
    pub fn end_message(&mut self) -> Result<(), BufferError> {
        let Some(start) = self.frame_start.take() else {
            return Err(BufferError::NoMessage);
        };
        let length = self.buf.position() - start - 1;
        self.buf.patch_i32(start + 1, length.to_i32());
        Ok(())
    }

    forward_write! {
        write_u8(u8);
        write_i16(i16);
        write_u16(u16);
        write_i32(i32);
        write_u32(u32);
        write_i64(i64);
        write_u64(u64);
    }

    pub fn write_string(&mut self, string: &str) -> Result<(), BufferError> {
        self.check_open()?;
        self.buf.write_string(string);
        Ok(())
    }

    pub fn write_len_prefixed_bytes(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.check_open()?;
        self.buf.write_len_prefixed_bytes(bytes);
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.check_open()?;
        self.buf.write_bytes(bytes);
        Ok(())
    }

    /// Append a complete Sync frame. Only valid between messages.
    pub fn write_sync(&mut self) -> Result<(), BufferError> {
        self.check_closed()?;
        self.buf.write_bytes(SYNC_MESSAGE);
        Ok(())
    }

    /// Append a complete Flush frame. Only valid between messages.
    pub fn write_flush(&mut self) -> Result<(), BufferError> {
        self.check_closed()?;
        self.buf.write_bytes(FLUSH_MESSAGE);
        Ok(())
    }

    /// Bytes accumulated so far.
    pub fn position(&self) -> usize {
        self.buf.position()
    }

    /// Take the accumulated frames, leaving the buffer empty.
    pub fn unwrap(&mut self) -> Result<Bytes, BufferError> {
        self.check_closed()?;
        Ok(self.buf.unwrap())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_length_counts_itself_not_the_tag() {
        let mut buf = WriteMessageBuffer::new();
        buf.begin_message(b'P').unwrap();
        buf.write_u16(0).unwrap();
        buf.write_string("select 1").unwrap();
        buf.end_message().unwrap();

        let bytes = buf.unwrap().unwrap();
        assert_eq!(bytes[0], b'P');
        let len = i32::from_be_bytes(bytes[1..5].try_into().unwrap());
        assert_eq!(len as usize, bytes.len() - 1);
    }

    #[test]
    fn sync_and_flush_frames() {
        let mut buf = WriteMessageBuffer::new();
        buf.write_sync().unwrap();
        buf.write_flush().unwrap();
        let bytes = buf.unwrap().unwrap();
        assert_eq!(&bytes[..], &[b'S', 0, 0, 0, 4, b'H', 0, 0, 0, 4]);
    }

    #[test]
    fn misuse_is_rejected() {
        let mut buf = WriteMessageBuffer::new();
        assert_eq!(buf.write_u8(0), Err(BufferError::NoMessage));
        assert_eq!(buf.end_message(), Err(BufferError::NoMessage));

        buf.begin_message(b'E').unwrap();
        assert_eq!(buf.begin_message(b'E'), Err(BufferError::MessageStarted));
        assert_eq!(buf.write_sync(), Err(BufferError::MessageStarted));
        assert_eq!(buf.unwrap(), Err(BufferError::MessageStarted));
        buf.end_message().unwrap();

        buf.unwrap().unwrap();
    }

    #[test]
    fn scratch_buffer_grows_and_resets() {
        let mut buf = WriteBuffer::new();
        buf.write_bytes(&[7u8; 10_000]);
        assert_eq!(buf.position(), 10_000);
        buf.reset();
        assert_eq!(buf.position(), 0);
        buf.write_i32(-1);
        assert_eq!(&buf.unwrap()[..], &[0xff, 0xff, 0xff, 0xff]);
    }
}
