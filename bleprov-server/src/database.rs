//! Attribute database exposed to the provisioning client
//!
//! Three primary services, allocated in order from handle 0x0001:
//! Generic Access (device name, appearance), Generic Attribute (service
//! changed + CCCD) and the WiFi configuration service (one write/notify
//! characteristic + CCCD).

use bleprov_proto::Uuid;
use bleprov_proto::ble::{SERVICE_UUID_128, WIFI_CONFIG_UUID_128};
use bleprov_proto::uuid::{
    APPEARANCE, CHARACTERISTIC, CLIENT_CHARACTERISTIC_CONFIG, DEVICE_NAME, GENERIC_ACCESS,
    GENERIC_ATTRIBUTE, PRIMARY_SERVICE, SERVICE_CHANGED,
};

use crate::error::DatabaseError;

/// Characteristic property bits
pub mod props {
    pub const READ: u8 = 0x02;
    pub const WRITE_WITHOUT_RESPONSE: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;
}

/// Longest attribute value ATT allows
const MAX_VALUE_LEN: usize = 512;

/// Attributes whose values live outside the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrId {
    ServiceChanged,
    ServiceChangedCccd,
    WifiConfig,
    WifiConfigCccd,
}

#[derive(Debug, Clone)]
pub enum Value {
    /// Fixed for the life of the database
    Static(Vec<u8>),
    /// Served through the session's read/write callbacks
    Dynamic(AttrId),
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub handle: u16,
    pub attr_type: Uuid,
    pub value: Value,
    pub readable: bool,
    pub writable: bool,
    /// Last handle of the group, for service declarations
    pub group_end: Option<u16>,
}

impl Attribute {
    pub fn id(&self) -> Option<AttrId> {
        match self.value {
            Value::Dynamic(id) => Some(id),
            Value::Static(_) => None,
        }
    }

    pub fn is_primary_service(&self) -> bool {
        self.attr_type == Uuid::Uuid16(PRIMARY_SERVICE)
    }
}

#[derive(Debug)]
pub struct Database {
    attrs: Vec<Attribute>,
}

struct Builder {
    attrs: Vec<Attribute>,
    next: u16,
    service_start: Option<usize>,
}

impl Builder {
    fn allocate(&mut self) -> Result<u16, DatabaseError> {
        let handle = self.next;
        self.next = self.next.checked_add(1).ok_or(DatabaseError::HandlesExhausted)?;
        Ok(handle)
    }

    fn push(
        &mut self,
        attr_type: Uuid,
        value: Value,
        readable: bool,
        writable: bool,
    ) -> Result<u16, DatabaseError> {
        let handle = self.allocate()?;
        self.attrs.push(Attribute { handle, attr_type, value, readable, writable, group_end: None });
        Ok(handle)
    }

    fn close_service(&mut self) {
        if let Some(idx) = self.service_start.take() {
            let end = self.attrs.last().map(|a| a.handle);
            self.attrs[idx].group_end = end;
        }
    }

    fn service(&mut self, uuid: Uuid) -> Result<(), DatabaseError> {
        self.close_service();
        self.service_start = Some(self.attrs.len());
        self.push(Uuid::Uuid16(PRIMARY_SERVICE), Value::Static(uuid.to_le_bytes()), true, false)?;
        Ok(())
    }

    /// Declaration + value attribute; returns the value handle
    fn characteristic(
        &mut self,
        uuid: Uuid,
        properties: u8,
        value: Value,
    ) -> Result<u16, DatabaseError> {
        let decl_handle = self.allocate()?;
        let value_handle = self.next;

        let mut decl = vec![properties];
        decl.extend_from_slice(&value_handle.to_le_bytes());
        decl.extend_from_slice(&uuid.to_le_bytes());
        self.attrs.push(Attribute {
            handle: decl_handle,
            attr_type: Uuid::Uuid16(CHARACTERISTIC),
            value: Value::Static(decl),
            readable: true,
            writable: false,
            group_end: None,
        });

        let readable = properties & props::READ != 0;
        let writable = properties & (props::WRITE | props::WRITE_WITHOUT_RESPONSE) != 0;
        self.push(uuid, value, readable, writable)
    }

    fn cccd(&mut self, id: AttrId) -> Result<u16, DatabaseError> {
        self.push(Uuid::Uuid16(CLIENT_CHARACTERISTIC_CONFIG), Value::Dynamic(id), true, true)
    }

    fn finish(mut self) -> Vec<Attribute> {
        self.close_service();
        self.attrs
    }
}

impl Database {
    pub fn build(device_name: &str) -> Result<Self, DatabaseError> {
        if device_name.len() > MAX_VALUE_LEN {
            return Err(DatabaseError::ValueTooLong("device name"));
        }
        let mut b = Builder { attrs: Vec::new(), next: 0x0001, service_start: None };

        b.service(Uuid::Uuid16(GENERIC_ACCESS))?;
        b.characteristic(
            Uuid::Uuid16(DEVICE_NAME),
            props::READ,
            Value::Static(device_name.as_bytes().to_vec()),
        )?;
        // generic unknown appearance
        b.characteristic(Uuid::Uuid16(APPEARANCE), props::READ, Value::Static(vec![0x00, 0x00]))?;

        b.service(Uuid::Uuid16(GENERIC_ATTRIBUTE))?;
        b.characteristic(
            Uuid::Uuid16(SERVICE_CHANGED),
            props::INDICATE,
            Value::Dynamic(AttrId::ServiceChanged),
        )?;
        b.cccd(AttrId::ServiceChangedCccd)?;

        b.service(Uuid::Uuid128(SERVICE_UUID_128))?;
        b.characteristic(
            Uuid::Uuid128(WIFI_CONFIG_UUID_128),
            props::WRITE | props::WRITE_WITHOUT_RESPONSE | props::NOTIFY,
            Value::Dynamic(AttrId::WifiConfig),
        )?;
        b.cccd(AttrId::WifiConfigCccd)?;

        let attrs = b.finish();
        log::debug!("attribute database: {} attributes", attrs.len());
        Ok(Self { attrs })
    }

    pub fn get(&self, handle: u16) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.handle == handle)
    }

    /// Attributes with handles in `start..=end`
    pub fn range(&self, start: u16, end: u16) -> impl Iterator<Item = &Attribute> {
        self.attrs.iter().filter(move |a| a.handle >= start && a.handle <= end)
    }

    pub fn handle_of(&self, id: AttrId) -> Option<u16> {
        self.attrs.iter().find(|a| a.id() == Some(id)).map(|a| a.handle)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_layout() {
        let db = Database::build("3RHUB-96B9FEEC").unwrap();
        assert_eq!(db.len(), 13);
        assert_eq!(db.get(0x0003).map(|a| a.attr_type), Some(Uuid::Uuid16(DEVICE_NAME)));
        assert_eq!(db.get(0x0005).map(|a| a.attr_type), Some(Uuid::Uuid16(APPEARANCE)));
        assert_eq!(db.handle_of(AttrId::ServiceChanged), Some(0x0008));
        assert_eq!(db.handle_of(AttrId::ServiceChangedCccd), Some(0x0009));
        assert_eq!(db.handle_of(AttrId::WifiConfig), Some(0x000C));
        assert_eq!(db.handle_of(AttrId::WifiConfigCccd), Some(0x000D));
    }

    #[test]
    fn service_groups() {
        let db = Database::build("x").unwrap();
        let groups: Vec<_> = db
            .range(1, 0xffff)
            .filter(|a| a.is_primary_service())
            .map(|a| (a.handle, a.group_end))
            .collect();
        assert_eq!(groups, vec![(0x0001, Some(0x0005)), (0x0006, Some(0x0009)), (0x000A, Some(0x000D))]);
    }

    #[test]
    fn wifi_characteristic_declaration() {
        let db = Database::build("x").unwrap();
        let decl = db.get(0x000B).unwrap();
        let Value::Static(value) = &decl.value else { panic!("declaration must be static") };
        assert_eq!(value[0], props::WRITE | props::WRITE_WITHOUT_RESPONSE | props::NOTIFY);
        assert_eq!(&value[1..3], &[0x0C, 0x00]);
        assert_eq!(Uuid::from_le_bytes(&value[3..]), Some(Uuid::Uuid128(WIFI_CONFIG_UUID_128)));

        let value_attr = db.get(0x000C).unwrap();
        assert!(value_attr.writable && !value_attr.readable);
    }

    #[test]
    fn oversized_name_is_rejected() {
        let name = "x".repeat(600);
        assert!(matches!(Database::build(&name), Err(DatabaseError::ValueTooLong(_))));
    }
}
