//! Turns raw bytes arriving on a transport into whole SOME/IP messages.
//!
//! Two independent strategies share one [`Reassembler`] type: [`Mode::Datagram`]
//! for UDP, where a single call is expected to carry exactly one message, and
//! [`Mode::Stream`] for TCP, where bytes arrive in arbitrary chunks and state
//! must be kept between calls.

use crate::error::{Result, SomeIpError};
use crate::header::{SomeIpHeader, HEADER_SIZE};
use crate::message::SomeIpMessage;

/// Selects how a [`Reassembler`] interprets the bytes it is fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Each call to [`Reassembler::feed`] must contain exactly one message.
    Datagram,
    /// Bytes accumulate across calls; partial and over-long chunks are handled.
    Stream,
}

/// Stateful message reassembler for one connection or datagram source.
#[derive(Debug)]
pub struct Reassembler {
    mode: Mode,
    buffer: Vec<u8>,
}

impl Reassembler {
    /// Create a reassembler for the given mode.
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            buffer: Vec::new(),
        }
    }

    /// Convenience constructor for UDP endpoints.
    pub fn datagram() -> Self {
        Self::new(Mode::Datagram)
    }

    /// Convenience constructor for TCP endpoints.
    pub fn stream() -> Self {
        Self::new(Mode::Stream)
    }

    /// Feed a newly received chunk and return every whole message it yields.
    ///
    /// In [`Mode::Datagram`], `data` must be exactly one message; any mismatch
    /// is an error and no state is retained (per-datagram atomicity: a bad
    /// datagram never corrupts reassembly of the next one).
    ///
    /// In [`Mode::Stream`], `data` is appended to any carried-over bytes and
    /// every complete message currently available is drained and returned, in
    /// order, with any tail retained for the next call.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<SomeIpMessage>> {
        match self.mode {
            Mode::Datagram => Ok(vec![Self::parse_datagram(data)?]),
            Mode::Stream => {
                self.buffer.extend_from_slice(data);
                self.drain_stream()
            }
        }
    }

    fn parse_datagram(data: &[u8]) -> Result<SomeIpMessage> {
        if data.len() < HEADER_SIZE {
            return Err(SomeIpError::MessageTooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }
        let header = SomeIpHeader::from_bytes(data)?;
        let expected = HEADER_SIZE + header.payload_length() as usize;
        if data.len() != expected {
            return Err(SomeIpError::DatagramFraming {
                expected,
                actual: data.len(),
            });
        }
        SomeIpMessage::from_bytes(data)
    }

    fn drain_stream(&mut self) -> Result<Vec<SomeIpMessage>> {
        let mut messages = Vec::new();
        loop {
            if self.buffer.len() < HEADER_SIZE {
                break;
            }
            let header = SomeIpHeader::from_bytes(&self.buffer[..HEADER_SIZE])?;
            let expected = HEADER_SIZE + header.payload_length() as usize;
            if self.buffer.len() < expected {
                break;
            }
            let message = SomeIpMessage::from_bytes(&self.buffer[..expected])?;
            self.buffer.drain(..expected);
            messages.push(message);
        }
        Ok(messages)
    }

    /// Bytes currently buffered but not yet forming a whole message. Always 0
    /// in [`Mode::Datagram`].
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any buffered state. Used when a connection's framing is
    /// determined to be unrecoverable (e.g. a bad header mid-stream).
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{MethodId, ServiceId};

    fn msg(payload: &[u8]) -> SomeIpMessage {
        SomeIpMessage::request(ServiceId(0x1234), MethodId(0x0001))
            .payload(payload.to_vec())
            .build()
    }

    #[test]
    fn datagram_exact_size_emits_one_message() {
        let original = msg(b"hello");
        let bytes = original.to_bytes();

        let mut r = Reassembler::datagram();
        let out = r.feed(&bytes).unwrap();
        assert_eq!(out, vec![original]);
    }

    #[test]
    fn datagram_size_mismatch_is_dropped_without_state() {
        let original = msg(b"hello");
        let mut bytes = original.to_bytes();
        bytes.push(0xFF); // trailing garbage byte

        let mut r = Reassembler::datagram();
        assert!(r.feed(&bytes).is_err());
        assert_eq!(r.pending_bytes(), 0);

        // A subsequent well-formed datagram is unaffected.
        let next = msg(b"world");
        let out = r.feed(&next.to_bytes()).unwrap();
        assert_eq!(out, vec![next]);
    }

    #[test]
    fn stream_accumulates_partial_header() {
        let original = msg(b"hello");
        let bytes = original.to_bytes();

        let mut r = Reassembler::stream();
        assert!(r.feed(&bytes[..10]).unwrap().is_empty());
        let out = r.feed(&bytes[10..]).unwrap();
        assert_eq!(out, vec![original]);
    }

    #[test]
    fn stream_emits_multiple_messages_from_one_chunk() {
        let m1 = msg(b"first");
        let m2 = msg(b"second");
        let mut data = m1.to_bytes();
        data.extend_from_slice(&m2.to_bytes());

        let mut r = Reassembler::stream();
        let out = r.feed(&data).unwrap();
        assert_eq!(out, vec![m1, m2]);
        assert_eq!(r.pending_bytes(), 0);
    }

    #[test]
    fn stream_handles_split_across_message_boundary() {
        let m1 = msg(b"first");
        let m2 = msg(b"second");
        let mut data = m1.to_bytes();
        data.extend_from_slice(&m2.to_bytes());

        // Split right in the middle of m2's header.
        let split = m1.to_bytes().len() + 3;

        let mut r = Reassembler::stream();
        let out1 = r.feed(&data[..split]).unwrap();
        assert_eq!(out1, vec![m1]);

        let out2 = r.feed(&data[split..]).unwrap();
        assert_eq!(out2, vec![m2]);
    }
}
