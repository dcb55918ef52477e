//! Bluetooth attribute UUIDs (16-bit short form and full 128-bit form)

use std::fmt;

/// Bluetooth Base UUID: 00000000-0000-1000-8000-00805f9b34fb
const BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// GATT declaration and descriptor types
pub const PRIMARY_SERVICE: u16 = 0x2800;
pub const CHARACTERISTIC: u16 = 0x2803;
pub const CLIENT_CHARACTERISTIC_CONFIG: u16 = 0x2902;

/// Services and characteristics defined by the Bluetooth SIG
pub const GENERIC_ACCESS: u16 = 0x1800;
pub const GENERIC_ATTRIBUTE: u16 = 0x1801;
pub const DEVICE_NAME: u16 = 0x2A00;
pub const APPEARANCE: u16 = 0x2A01;
pub const SERVICE_CHANGED: u16 = 0x2A05;

/// An attribute type. Short UUIDs are aliases into the Bluetooth base UUID, so
/// equality compares the expanded 128-bit value.
#[derive(Debug, Clone, Copy)]
pub enum Uuid {
    Uuid16(u16),
    Uuid128(u128),
}

impl Uuid {
    /// Expand to the full 128-bit value
    pub fn as_u128(&self) -> u128 {
        match *self {
            Uuid::Uuid16(v) => BASE_UUID | ((v as u128) << 96),
            Uuid::Uuid128(v) => v,
        }
    }

    /// Shortest wire size this UUID can be sent in (2 or 16)
    pub fn wire_len(&self) -> usize {
        match self.as_short() {
            Some(_) => 2,
            None => 16,
        }
    }

    /// The 16-bit alias, if this UUID lives in the base range
    pub fn as_short(&self) -> Option<u16> {
        let v = self.as_u128();
        let mask: u128 = !(0xffff_u128 << 96);
        if v & mask == BASE_UUID && (v >> 112) == 0 {
            Some((v >> 96) as u16)
        } else {
            None
        }
    }

    /// Little-endian wire encoding, using the short form when possible
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self.as_short() {
            Some(short) => short.to_le_bytes().to_vec(),
            None => self.as_u128().to_le_bytes().to_vec(),
        }
    }

    /// Decode a 2 or 16 byte little-endian UUID
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            2 => Some(Uuid::Uuid16(u16::from_le_bytes([bytes[0], bytes[1]]))),
            16 => {
                let arr: [u8; 16] = bytes.try_into().ok()?;
                Some(Uuid::Uuid128(u128::from_le_bytes(arr)))
            }
            _ => None,
        }
    }
}

impl PartialEq for Uuid {
    fn eq(&self, other: &Self) -> bool {
        self.as_u128() == other.as_u128()
    }
}

impl Eq for Uuid {}

impl From<u16> for Uuid {
    fn from(v: u16) -> Self {
        Uuid::Uuid16(v)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(short) = self.as_short() {
            return write!(f, "0x{short:04x}");
        }
        let v = self.as_u128();
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xffff_ffff_ffff
        )
    }
}
