//! Write reassembly for the WiFi configuration characteristic
//!
//! Clients deliver the newline-terminated JSON request in one of four ways:
//! a single Write Request, a train of Write Commands, or Prepare Write
//! fragments committed by Execute Write. All of them end up here and come
//! out as one message with the terminator stripped.

use bleprov_proto::ble::TERMINATOR;

/// Bytes a client may stage before the message is discarded
pub const WRITE_BUFFER_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("write needs {needed} bytes, buffer holds {capacity}")]
pub struct CapacityExceeded {
    pub needed: usize,
    pub capacity: usize,
}

/// Write `bytes` at `offset` into a copy of `buffer`, growing it as needed.
/// Returns the new contents and whether they now contain a terminator.
pub fn place(
    buffer: &[u8],
    offset: usize,
    bytes: &[u8],
    capacity: usize,
) -> Result<(Vec<u8>, bool), CapacityExceeded> {
    let end = offset + bytes.len();
    if end > capacity {
        return Err(CapacityExceeded { needed: end, capacity });
    }
    let mut out = buffer.to_vec();
    if out.len() < end {
        out.resize(end, 0);
    }
    out[offset..end].copy_from_slice(bytes);
    let complete = out.contains(&TERMINATOR);
    Ok((out, complete))
}

/// Everything before the first terminator (or all of it)
pub fn up_to_terminator(data: &[u8]) -> &[u8] {
    match data.iter().position(|b| *b == TERMINATOR) {
        Some(end) => &data[..end],
        None => data,
    }
}

/// Capped accumulator shared by Write Command and Prepare Write
#[derive(Debug)]
pub struct WriteBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl WriteBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { data: Vec::new(), capacity }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Store `bytes` at `offset`. On overflow the buffer is emptied.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<bool, CapacityExceeded> {
        match place(&self.data, offset, bytes, self.capacity) {
            Ok((data, complete)) => {
                self.data = data;
                Ok(complete)
            }
            Err(e) => {
                self.data.clear();
                Err(e)
            }
        }
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<bool, CapacityExceeded> {
        self.write_at(self.data.len(), bytes)
    }

    /// Take the message before the first terminator and clear the buffer.
    /// Anything after the terminator is dropped.
    pub fn take_message(&mut self) -> Vec<u8> {
        let message = up_to_terminator(&self.data).to_vec();
        self.data.clear();
        message
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// How a write reached the characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Request,
    Command,
    Prepare,
    Execute,
}

/// What to do after a write has been folded in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A complete request, ready for the provisioning workflow
    Message(Vec<u8>),
    /// Fragment stored, more to come
    Pending,
    /// Nothing to process; answer with an empty address
    Empty,
    /// Nothing to process and nothing to answer
    Ignored,
    /// Buffer overflowed and was reset
    Overflow,
}

#[derive(Debug)]
pub struct Reassembler {
    buffer: WriteBuffer,
    in_progress: bool,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(WRITE_BUFFER_CAPACITY)
    }
}

impl Reassembler {
    pub fn new(capacity: usize) -> Self {
        Self { buffer: WriteBuffer::new(capacity), in_progress: false }
    }

    /// True between the first Prepare Write and its Execute Write
    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn write(&mut self, kind: WriteKind, offset: u16, value: &[u8]) -> Outcome {
        match kind {
            WriteKind::Request => {
                if offset > 0 || value.is_empty() {
                    return Outcome::Empty;
                }
                Outcome::Message(up_to_terminator(value).to_vec())
            }
            WriteKind::Command => {
                if offset > 0 || value.is_empty() {
                    return Outcome::Ignored;
                }
                match self.buffer.append(value) {
                    Err(_) => Outcome::Overflow,
                    Ok(false) => Outcome::Pending,
                    Ok(true) => Outcome::Message(self.buffer.take_message()),
                }
            }
            WriteKind::Prepare => {
                self.in_progress = true;
                if value.is_empty() {
                    return Outcome::Pending;
                }
                match self.buffer.write_at(offset as usize, value) {
                    Ok(_) => Outcome::Pending,
                    Err(_) => {
                        self.in_progress = false;
                        Outcome::Overflow
                    }
                }
            }
            WriteKind::Execute => {
                if !self.in_progress || self.buffer.is_empty() {
                    self.in_progress = false;
                    return Outcome::Empty;
                }
                self.in_progress = false;
                Outcome::Message(self.buffer.take_message())
            }
        }
    }

    /// Execute Write with the cancel flag
    pub fn cancel(&mut self) {
        self.buffer.clear();
        self.in_progress = false;
    }
}
