//! Attribute Protocol PDUs - opcodes, error codes, request decoding and
//! response encoding (Bluetooth Core Vol 3, Part F)

use std::fmt;

use crate::uuid::Uuid;

// Opcodes
pub const OP_ERROR_RSP: u8 = 0x01;
pub const OP_MTU_REQ: u8 = 0x02;
pub const OP_MTU_RSP: u8 = 0x03;
pub const OP_FIND_INFO_REQ: u8 = 0x04;
pub const OP_FIND_INFO_RSP: u8 = 0x05;
pub const OP_FIND_BY_TYPE_REQ: u8 = 0x06;
pub const OP_FIND_BY_TYPE_RSP: u8 = 0x07;
pub const OP_READ_BY_TYPE_REQ: u8 = 0x08;
pub const OP_READ_BY_TYPE_RSP: u8 = 0x09;
pub const OP_READ_REQ: u8 = 0x0A;
pub const OP_READ_RSP: u8 = 0x0B;
pub const OP_READ_BLOB_REQ: u8 = 0x0C;
pub const OP_READ_BLOB_RSP: u8 = 0x0D;
pub const OP_READ_BY_GROUP_REQ: u8 = 0x10;
pub const OP_READ_BY_GROUP_RSP: u8 = 0x11;
pub const OP_WRITE_REQ: u8 = 0x12;
pub const OP_WRITE_RSP: u8 = 0x13;
pub const OP_PREP_WRITE_REQ: u8 = 0x16;
pub const OP_PREP_WRITE_RSP: u8 = 0x17;
pub const OP_EXEC_WRITE_REQ: u8 = 0x18;
pub const OP_EXEC_WRITE_RSP: u8 = 0x19;
pub const OP_HANDLE_VALUE_NTF: u8 = 0x1B;
pub const OP_HANDLE_VALUE_CONF: u8 = 0x1E;
pub const OP_WRITE_CMD: u8 = 0x52;

/// Opcodes with bit 6 set are commands: they never get a response, not even
/// an error.
pub const COMMAND_FLAG: u8 = 0x40;

// Find Information response formats
const FORMAT_UUID16: u8 = 0x01;
const FORMAT_UUID128: u8 = 0x02;

/// ATT error codes sent in Error Response PDUs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    InvalidHandle = 0x01,
    ReadNotPermitted = 0x02,
    WriteNotPermitted = 0x03,
    InvalidPdu = 0x04,
    RequestNotSupported = 0x06,
    InvalidOffset = 0x07,
    AttributeNotFound = 0x0A,
    InvalidAttributeValueLength = 0x0D,
    UnsupportedGroupType = 0x10,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidHandle => "invalid handle",
            Self::ReadNotPermitted => "read not permitted",
            Self::WriteNotPermitted => "write not permitted",
            Self::InvalidPdu => "invalid PDU",
            Self::RequestNotSupported => "request not supported",
            Self::InvalidOffset => "invalid offset",
            Self::AttributeNotFound => "attribute not found",
            Self::InvalidAttributeValueLength => "invalid attribute value length",
            Self::UnsupportedGroupType => "unsupported group type",
        };
        write!(f, "{s} (0x{:02x})", *self as u8)
    }
}

/// A request PDU that could not be decoded. The opcode is kept so the error
/// response can reference it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedPdu {
    pub opcode: u8,
}

impl fmt::Display for MalformedPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed ATT PDU (opcode 0x{:02x})", self.opcode)
    }
}

impl std::error::Error for MalformedPdu {}

/// Decoded client-to-server PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    ExchangeMtu { client_mtu: u16 },
    FindInformation { start: u16, end: u16 },
    FindByTypeValue { start: u16, end: u16, attr_type: u16, value: &'a [u8] },
    ReadByType { start: u16, end: u16, attr_type: Uuid },
    Read { handle: u16 },
    ReadBlob { handle: u16, offset: u16 },
    ReadByGroupType { start: u16, end: u16, group_type: Uuid },
    Write { handle: u16, value: &'a [u8] },
    WriteCommand { handle: u16, value: &'a [u8] },
    PrepareWrite { handle: u16, offset: u16, value: &'a [u8] },
    ExecuteWrite { commit: bool },
    Confirmation,
    Unsupported { opcode: u8 },
}

fn u16_at(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

impl<'a> Request<'a> {
    /// Decode a PDU as received from the L2CAP fixed channel
    pub fn parse(pdu: &'a [u8]) -> Result<Self, MalformedPdu> {
        let (&opcode, rest) = pdu.split_first().ok_or(MalformedPdu { opcode: 0 })?;
        let bad = MalformedPdu { opcode };

        let need = |n: usize| if rest.len() < n { Err(bad) } else { Ok(()) };
        let exact = |n: usize| if rest.len() != n { Err(bad) } else { Ok(()) };

        let req = match opcode {
            OP_MTU_REQ => {
                exact(2)?;
                Request::ExchangeMtu { client_mtu: u16_at(rest, 0) }
            }
            OP_FIND_INFO_REQ => {
                exact(4)?;
                Request::FindInformation { start: u16_at(rest, 0), end: u16_at(rest, 2) }
            }
            OP_FIND_BY_TYPE_REQ => {
                need(6)?;
                Request::FindByTypeValue {
                    start: u16_at(rest, 0),
                    end: u16_at(rest, 2),
                    attr_type: u16_at(rest, 4),
                    value: &rest[6..],
                }
            }
            OP_READ_BY_TYPE_REQ | OP_READ_BY_GROUP_REQ => {
                if rest.len() != 6 && rest.len() != 20 {
                    return Err(bad);
                }
                let uuid = Uuid::from_le_bytes(&rest[4..]).ok_or(bad)?;
                let (start, end) = (u16_at(rest, 0), u16_at(rest, 2));
                if opcode == OP_READ_BY_TYPE_REQ {
                    Request::ReadByType { start, end, attr_type: uuid }
                } else {
                    Request::ReadByGroupType { start, end, group_type: uuid }
                }
            }
            OP_READ_REQ => {
                exact(2)?;
                Request::Read { handle: u16_at(rest, 0) }
            }
            OP_READ_BLOB_REQ => {
                exact(4)?;
                Request::ReadBlob { handle: u16_at(rest, 0), offset: u16_at(rest, 2) }
            }
            OP_WRITE_REQ | OP_WRITE_CMD => {
                need(2)?;
                let (handle, value) = (u16_at(rest, 0), &rest[2..]);
                if opcode == OP_WRITE_REQ {
                    Request::Write { handle, value }
                } else {
                    Request::WriteCommand { handle, value }
                }
            }
            OP_PREP_WRITE_REQ => {
                need(4)?;
                Request::PrepareWrite {
                    handle: u16_at(rest, 0),
                    offset: u16_at(rest, 2),
                    value: &rest[4..],
                }
            }
            OP_EXEC_WRITE_REQ => {
                exact(1)?;
                match rest[0] {
                    0x00 => Request::ExecuteWrite { commit: false },
                    0x01 => Request::ExecuteWrite { commit: true },
                    _ => return Err(bad),
                }
            }
            OP_HANDLE_VALUE_CONF => Request::Confirmation,
            other => Request::Unsupported { opcode: other },
        };
        Ok(req)
    }
}

/// Server-to-client response PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Error { request: u8, handle: u16, code: ErrorCode },
    ExchangeMtu { server_mtu: u16 },
    /// Handle/type pairs; every UUID must have the same wire length
    FindInformation { entries: Vec<(u16, Uuid)> },
    /// Found handle / group end handle pairs
    FindByTypeValue { ranges: Vec<(u16, u16)> },
    /// Handle/value pairs; every value must have the same length
    ReadByType { entries: Vec<(u16, Vec<u8>)> },
    Read(Vec<u8>),
    ReadBlob(Vec<u8>),
    /// Start handle / end handle / value triples; every value the same length
    ReadByGroupType { entries: Vec<(u16, u16, Vec<u8>)> },
    Write,
    PrepareWrite { handle: u16, offset: u16, value: Vec<u8> },
    ExecuteWrite,
}

impl Response {
    pub fn error(request: u8, handle: u16, code: ErrorCode) -> Self {
        Response::Error { request, handle, code }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(23);
        match self {
            Response::Error { request, handle, code } => {
                buf.push(OP_ERROR_RSP);
                buf.push(*request);
                buf.extend_from_slice(&handle.to_le_bytes());
                buf.push(*code as u8);
            }
            Response::ExchangeMtu { server_mtu } => {
                buf.push(OP_MTU_RSP);
                buf.extend_from_slice(&server_mtu.to_le_bytes());
            }
            Response::FindInformation { entries } => {
                buf.push(OP_FIND_INFO_RSP);
                let long = entries.first().map(|(_, u)| u.wire_len() == 16).unwrap_or(false);
                buf.push(if long { FORMAT_UUID128 } else { FORMAT_UUID16 });
                for (handle, uuid) in entries {
                    buf.extend_from_slice(&handle.to_le_bytes());
                    buf.extend_from_slice(&uuid.to_le_bytes());
                }
            }
            Response::FindByTypeValue { ranges } => {
                buf.push(OP_FIND_BY_TYPE_RSP);
                for (found, group_end) in ranges {
                    buf.extend_from_slice(&found.to_le_bytes());
                    buf.extend_from_slice(&group_end.to_le_bytes());
                }
            }
            Response::ReadByType { entries } => {
                buf.push(OP_READ_BY_TYPE_RSP);
                let len = entries.first().map(|(_, v)| v.len() + 2).unwrap_or(2);
                buf.push(len as u8);
                for (handle, value) in entries {
                    buf.extend_from_slice(&handle.to_le_bytes());
                    buf.extend_from_slice(value);
                }
            }
            Response::Read(value) => {
                buf.push(OP_READ_RSP);
                buf.extend_from_slice(value);
            }
            Response::ReadBlob(value) => {
                buf.push(OP_READ_BLOB_RSP);
                buf.extend_from_slice(value);
            }
            Response::ReadByGroupType { entries } => {
                buf.push(OP_READ_BY_GROUP_RSP);
                let len = entries.first().map(|(_, _, v)| v.len() + 4).unwrap_or(4);
                buf.push(len as u8);
                for (start, end, value) in entries {
                    buf.extend_from_slice(&start.to_le_bytes());
                    buf.extend_from_slice(&end.to_le_bytes());
                    buf.extend_from_slice(value);
                }
            }
            Response::Write => buf.push(OP_WRITE_RSP),
            Response::PrepareWrite { handle, offset, value } => {
                buf.push(OP_PREP_WRITE_RSP);
                buf.extend_from_slice(&handle.to_le_bytes());
                buf.extend_from_slice(&offset.to_le_bytes());
                buf.extend_from_slice(value);
            }
            Response::ExecuteWrite => buf.push(OP_EXEC_WRITE_RSP),
        }
        buf
    }
}

/// Handle Value Notification PDU
pub fn notification(handle: u16, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(3 + value.len());
    buf.push(OP_HANDLE_VALUE_NTF);
    buf.extend_from_slice(&handle.to_le_bytes());
    buf.extend_from_slice(value);
    buf
}

/// True for opcodes the server must never answer
pub fn is_command(opcode: u8) -> bool {
    opcode & COMMAND_FLAG != 0
}
