use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use uuid::Uuid;

use super::BufferError;

/// Maximum number of queued inbound chunks before the transport
/// must be paused.
pub const RING_CAPACITY: usize = 1024;

/// Accumulates arbitrary transport chunks into logical protocol frames.
///
/// The unconsumed byte stream is the unread tail of the active chunk
/// followed by all queued chunks in order. A persistent cursor tracks the
/// current frame across partial feeds: the type tag, then the length,
/// then the payload can each arrive in separate chunks.
///
/// Payloads contained in a single chunk are handed out without copying.
#[derive(Debug, Default)]
pub struct ReadMessageBuffer {
    chunk: Bytes,
    chunks: VecDeque<Bytes>,
    len: usize,

    msg_type: u8,
    msg_len: u32,
    msg_unread: u32,
    msg_ready: bool,
}

impl ReadMessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total unread bytes across all chunks.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Queue an inbound chunk.
    ///
    /// Returns `true` when the ring is full and the transport should
    /// pause until frames are consumed.
    pub fn feed(&mut self, chunk: Bytes) -> bool {
        if !chunk.is_empty() {
            self.len += chunk.len();
            if self.chunk.is_empty() {
                self.chunk = chunk;
            } else {
                self.chunks.push_back(chunk);
            }
        }
        self.chunks.len() >= RING_CAPACITY
    }

    fn roll(&mut self) {
        while self.chunk.is_empty() {
            match self.chunks.pop_front() {
                Some(next) => self.chunk = next,
                None => unreachable!("stream read past fed length"),
            }
        }
    }

    /// Caller checked `self.len >= N`.
    fn stream_fixed<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        self.roll();
        if self.chunk.len() >= N {
            out.copy_from_slice(&self.chunk[..N]);
            self.chunk.advance(N);
        } else {
            let mut filled = 0;
            while filled < N {
                self.roll();
                let take = (N - filled).min(self.chunk.len());
                out[filled..filled + take].copy_from_slice(&self.chunk[..take]);
                self.chunk.advance(take);
                filled += take;
            }
        }
        self.len -= N;
        out
    }

    /// Caller checked `self.len >= n`. Zero-copy within a single chunk.
    fn stream_bytes(&mut self, n: usize) -> Bytes {
        if n == 0 {
            return Bytes::new();
        }
        self.roll();
        if self.chunk.len() >= n {
            self.len -= n;
            return self.chunk.split_to(n);
        }
        let mut out = BytesMut::with_capacity(n);
        let mut remaining = n;
        while remaining > 0 {
            self.roll();
            let take = remaining.min(self.chunk.len());
            out.extend_from_slice(&self.chunk[..take]);
            self.chunk.advance(take);
            remaining -= take;
        }
        self.len -= n;
        out.freeze()
    }

    /// Try to advance the frame cursor.
    ///
    /// Returns `true` only when a complete frame is buffered. Tag and
    /// length already consumed persist across calls, so the method can
    /// be re-entered after every [`feed`][Self::feed].
    pub fn take_message(&mut self) -> Result<bool, BufferError> {
        if self.msg_ready {
            return Ok(true);
        }
        if self.msg_type == 0 {
            if self.len < 1 {
                return Ok(false);
            }
            self.msg_type = self.stream_fixed::<1>()[0];
        }
        if self.msg_len == 0 {
            if self.len < 4 {
                return Ok(false);
            }
            let len = u32::from_be_bytes(self.stream_fixed::<4>());
            if len < 4 {
                return Err(BufferError::InvalidFrame);
            }
            self.msg_len = len;
            self.msg_unread = len - 4;
        }
        if self.msg_unread as usize > self.len {
            return Ok(false);
        }
        self.msg_ready = true;
        Ok(true)
    }

    /// Like [`take_message`][Self::take_message], but only reports `true`
    /// when the buffered frame carries `tag`. A complete frame of a
    /// different type stays pending.
    pub fn take_message_type(&mut self, tag: u8) -> Result<bool, BufferError> {
        Ok(self.take_message()? && self.msg_type == tag)
    }

    /// Tag of the current frame, `0` when none has been read yet.
    pub fn get_message_type(&self) -> u8 {
        self.msg_type
    }

    /// Payload bytes of the current frame not yet read.
    pub fn message_unread(&self) -> usize {
        self.msg_unread as usize
    }

    fn check_pending(&self) -> Result<(), BufferError> {
        match self.msg_ready {
            true => Ok(()),
            false => Err(BufferError::NoPendingMessage),
        }
    }

    fn reset_cursor(&mut self) {
        self.msg_type = 0;
        self.msg_len = 0;
        self.msg_unread = 0;
        self.msg_ready = false;
    }

    /// Return a peeked frame to the buffer without consuming it.
    ///
    /// The next [`take_message`][Self::take_message] will report it again.
    pub fn put_message(&mut self) -> Result<(), BufferError> {
        self.check_pending()?;
        self.msg_ready = false;
        Ok(())
    }

    /// Close out a fully read frame.
    pub fn finish_message(&mut self) -> Result<(), BufferError> {
        self.check_pending()?;
        if self.msg_unread != 0 {
            return Err(BufferError::MessageUnfinished);
        }
        self.reset_cursor();
        Ok(())
    }

    /// Skip the remainder of the current frame.
    pub fn discard_message(&mut self) -> Result<(), BufferError> {
        self.check_pending()?;
        let unread = self.msg_unread as usize;
        let _ = self.stream_bytes(unread);
        self.reset_cursor();
        Ok(())
    }

    /// Take the full payload of the current frame.
    ///
    /// Zero-copy when the payload lies within one transport chunk.
    pub fn consume_message(&mut self) -> Result<Bytes, BufferError> {
        self.check_pending()?;
        let unread = self.msg_unread as usize;
        let body = self.stream_bytes(unread);
        self.reset_cursor();
        Ok(body)
    }

    /// Hand the current frame's payload off to a flat reader.
    pub fn consume_message_into(&mut self) -> Result<ReadBuffer, BufferError> {
        Ok(ReadBuffer::new(self.consume_message()?))
    }

    fn check_read(&self, size: usize) -> Result<(), BufferError> {
        if (self.msg_unread as usize) < size || self.len < size {
            return Err(BufferError::Overread);
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        self.check_read(1)?;
        self.msg_unread -= 1;
        Ok(self.stream_fixed::<1>()[0])
    }

    pub fn read_i16(&mut self) -> Result<i16, BufferError> {
        self.check_read(2)?;
        self.msg_unread -= 2;
        Ok(i16::from_be_bytes(self.stream_fixed::<2>()))
    }

    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        self.check_read(2)?;
        self.msg_unread -= 2;
        Ok(u16::from_be_bytes(self.stream_fixed::<2>()))
    }

    pub fn read_i32(&mut self) -> Result<i32, BufferError> {
        self.check_read(4)?;
        self.msg_unread -= 4;
        Ok(i32::from_be_bytes(self.stream_fixed::<4>()))
    }

    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        self.check_read(4)?;
        self.msg_unread -= 4;
        Ok(u32::from_be_bytes(self.stream_fixed::<4>()))
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, BufferError> {
        self.check_read(16)?;
        self.msg_unread -= 16;
        Ok(Uuid::from_bytes(self.stream_fixed::<16>()))
    }

    /// Read an `i32` length prefix followed by raw bytes.
    pub fn read_len_prefixed_bytes(&mut self) -> Result<Bytes, BufferError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(BufferError::InvalidFrame);
        }
        let len = len as usize;
        self.check_read(len)?;
        self.msg_unread -= len as u32;
        Ok(self.stream_bytes(len))
    }

    /// Read an `i32` length prefix followed by UTF-8 bytes.
    pub fn read_string(&mut self) -> Result<String, BufferError> {
        let bytes = self.read_len_prefixed_bytes()?;
        match String::from_utf8(bytes.into()) {
            Ok(s) => Ok(s),
            Err(_) => Err(BufferError::InvalidFrame),
        }
    }
}

/// A flat single-slice reader used by codecs on per-value byte ranges.
///
/// Shares the underlying bytes with its parent, narrowing is `O(1)`.
#[derive(Debug, Clone)]
pub struct ReadBuffer {
    bytes: Bytes,
}

macro_rules! flat_read {
    ($($name:ident -> $ty:ty;)*) => {$(
        pub fn $name(&mut self) -> Result<$ty, BufferError> {
            const SIZE: usize = size_of::<$ty>();
            if self.bytes.len() < SIZE {
                return Err(BufferError::Overread);
            }
            let mut be = [0u8; SIZE];
            be.copy_from_slice(&self.bytes[..SIZE]);
            self.bytes.advance(SIZE);
            Ok(<$ty>::from_be_bytes(be))
        }
    )*};
}

impl ReadBuffer {
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    flat_read! {
        read_i16 -> i16;
        read_u16 -> u16;
        read_i32 -> i32;
        read_u32 -> u32;
        read_i64 -> i64;
        read_u64 -> u64;
    }

    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        if self.bytes.is_empty() {
            return Err(BufferError::Overread);
        }
        let b = self.bytes[0];
        self.bytes.advance(1);
        Ok(b)
    }

    pub fn read_f32(&mut self) -> Result<f32, BufferError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, BufferError> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, BufferError> {
        let mut be = [0u8; 16];
        if self.bytes.len() < 16 {
            return Err(BufferError::Overread);
        }
        be.copy_from_slice(&self.bytes[..16]);
        self.bytes.advance(16);
        Ok(Uuid::from_bytes(be))
    }

    /// Take `n` raw bytes, sharing the underlying storage.
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes, BufferError> {
        if self.bytes.len() < n {
            return Err(BufferError::Overread);
        }
        Ok(self.bytes.split_to(n))
    }

    /// Narrow the next `n` bytes into a child reader.
    pub fn slice(&mut self, n: usize) -> Result<ReadBuffer, BufferError> {
        Ok(ReadBuffer { bytes: self.read_bytes(n)? })
    }

    /// Read an `i32` length prefix followed by raw bytes.
    pub fn read_len_prefixed_bytes(&mut self) -> Result<Bytes, BufferError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(BufferError::InvalidFrame);
        }
        self.read_bytes(len as usize)
    }

    /// Read an `i32` length prefix followed by UTF-8 bytes.
    pub fn read_string(&mut self) -> Result<String, BufferError> {
        let bytes = self.read_len_prefixed_bytes()?;
        match String::from_utf8(bytes.into()) {
            Ok(s) => Ok(s),
            Err(_) => Err(BufferError::InvalidFrame),
        }
    }

    pub fn discard(&mut self, n: usize) -> Result<(), BufferError> {
        if self.bytes.len() < n {
            return Err(BufferError::Overread);
        }
        self.bytes.advance(n);
        Ok(())
    }

    /// Consume the remaining bytes as a UTF-8 string.
    pub fn consume_as_string(self) -> Result<String, BufferError> {
        match String::from_utf8(self.bytes.into()) {
            Ok(s) => Ok(s),
            Err(_) => Err(BufferError::InvalidFrame),
        }
    }

    /// Consume the remaining bytes.
    pub fn consume(self) -> Bytes {
        self.bytes
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&(payload.len() as u32 + 4).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn frame_assembled_across_arbitrary_chunk_splits() {
        let payload: Vec<u8> = (0..10).collect();
        let stream = frame(0x50, &payload);

        let mut buf = ReadMessageBuffer::new();
        let mut offset = 0;
        let mut results = vec![];
        for size in [1usize, 2, 7, 5] {
            buf.feed(Bytes::copy_from_slice(&stream[offset..offset + size]));
            offset += size;
            results.push(buf.take_message().unwrap());
        }
        assert_eq!(results, [false, false, false, true]);
        assert_eq!(buf.get_message_type(), 0x50);
        assert_eq!(&buf.consume_message().unwrap()[..], &payload[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn split_streams_yield_identical_frames() {
        let mut stream = frame(b'S', b"\x00\x00\x00\x03key\x00\x00\x00\x05value");
        stream.extend(frame(b'Z', &[0, 0, b'I']));

        for split in 1..stream.len() {
            let mut buf = ReadMessageBuffer::new();
            buf.feed(Bytes::copy_from_slice(&stream[..split]));
            buf.feed(Bytes::copy_from_slice(&stream[split..]));

            assert!(buf.take_message().unwrap());
            assert_eq!(buf.get_message_type(), b'S');
            assert_eq!(buf.read_string().unwrap(), "key");
            assert_eq!(buf.read_string().unwrap(), "value");
            buf.finish_message().unwrap();

            assert!(buf.take_message().unwrap());
            assert_eq!(buf.get_message_type(), b'Z');
            let mut body = buf.consume_message_into().unwrap();
            assert_eq!(body.read_u16().unwrap(), 0);
            assert_eq!(body.read_u8().unwrap(), b'I');
            assert!(body.is_empty());

            assert!(!buf.take_message().unwrap());
        }
    }

    #[test]
    fn overread_does_not_advance() {
        let mut buf = ReadMessageBuffer::new();
        buf.feed(Bytes::copy_from_slice(&frame(b'K', &[1, 2])));
        assert!(buf.take_message().unwrap());

        assert_eq!(buf.read_i32(), Err(BufferError::Overread));
        assert_eq!(buf.message_unread(), 2);
        assert_eq!(buf.read_u16().unwrap(), 0x0102);
        buf.finish_message().unwrap();
    }

    #[test]
    fn peek_and_put_back() {
        let mut buf = ReadMessageBuffer::new();
        buf.feed(Bytes::copy_from_slice(&frame(b'Z', &[0, 0, b'T'])));

        assert!(!buf.take_message_type(b'E').unwrap());
        assert!(buf.take_message_type(b'Z').unwrap());
        buf.put_message().unwrap();

        assert!(buf.take_message().unwrap());
        buf.discard_message().unwrap();
        assert_eq!(buf.get_message_type(), 0);
    }

    #[test]
    fn unfinished_message_is_an_error() {
        let mut buf = ReadMessageBuffer::new();
        buf.feed(Bytes::copy_from_slice(&frame(b'D', &[0, 1])));
        assert!(buf.take_message().unwrap());
        assert_eq!(buf.finish_message(), Err(BufferError::MessageUnfinished));
        buf.discard_message().unwrap();
    }

    #[test]
    fn ring_reports_full_until_drained() {
        let payload_len = RING_CAPACITY - 3;
        let mut stream = vec![b'K'];
        stream.extend_from_slice(&(4 + payload_len as u32).to_be_bytes());
        stream.extend_from_slice(&vec![7u8; payload_len]);

        // one-byte chunks overflow the ring before the frame completes
        let mut buf = ReadMessageBuffer::new();
        let mut full = false;
        for &b in &stream {
            full = buf.feed(Bytes::copy_from_slice(&[b]));
        }
        assert!(full);

        assert!(buf.take_message().unwrap());
        assert_eq!(buf.consume_message().unwrap().len(), payload_len);

        // drained, feeding may resume
        assert!(!buf.feed(Bytes::from_static(&[b'Z'])));
    }

    #[test]
    fn flat_reader_narrows_and_errors_on_shortfall() {
        let mut buf = ReadBuffer::new(Bytes::from_static(
            b"\x00\x00\x00\x04\xff\xfe\x1d\xc0rest",
        ));
        let mut value = buf.slice(8).unwrap();
        assert_eq!(value.read_i32().unwrap(), 4);
        assert_eq!(value.read_i32().unwrap(), -123456);
        assert!(value.is_empty());
        assert_eq!(buf.clone().consume_as_string().unwrap(), "rest");
        buf.discard(4).unwrap();
        assert_eq!(buf.read_u8(), Err(BufferError::Overread));
    }
}
