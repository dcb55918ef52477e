//! ATT server side: request dispatch over the attribute database

use bleprov_proto::att::{self, ErrorCode, Request, Response};
use bleprov_proto::ble::DEFAULT_MTU;
use bleprov_proto::uuid::PRIMARY_SERVICE;
use bleprov_proto::Uuid;

use crate::database::{AttrId, Attribute, Database, Value};
use crate::reassembly::WriteKind;

/// Read/write callbacks for attributes with dynamic values
pub trait GattHandler {
    fn read(&mut self, attr: AttrId) -> Result<Vec<u8>, ErrorCode>;

    fn write(
        &mut self,
        attr: AttrId,
        kind: WriteKind,
        offset: u16,
        value: &[u8],
    ) -> Result<(), ErrorCode>;

    /// Execute Write with the cancel flag
    fn cancel_prepared(&mut self);
}

pub struct AttServer {
    db: Database,
    server_mtu: u16,
    mtu: u16,
    prepared: Option<AttrId>,
}

type AttResult = Result<Option<Response>, (u16, ErrorCode)>;

impl AttServer {
    pub fn new(db: Database, server_mtu: u16) -> Self {
        Self { db, server_mtu: server_mtu.max(DEFAULT_MTU), mtu: DEFAULT_MTU, prepared: None }
    }

    /// Effective MTU of the bearer
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Handle one PDU from the client; returns the PDU to send back, if any
    pub fn handle<H: GattHandler>(&mut self, pdu: &[u8], handler: &mut H) -> Option<Vec<u8>> {
        let request = match Request::parse(pdu) {
            Ok(r) => r,
            Err(e) => {
                log::debug!("{e}");
                if att::is_command(e.opcode) {
                    return None;
                }
                return Some(Response::error(e.opcode, 0, ErrorCode::InvalidPdu).to_bytes());
            }
        };
        let opcode = pdu[0];

        match self.dispatch(request, handler) {
            Ok(rsp) => rsp.map(|r| r.to_bytes()),
            Err((handle, code)) => {
                log::debug!("ATT 0x{opcode:02x} on 0x{handle:04x}: {code}");
                Some(Response::error(opcode, handle, code).to_bytes())
            }
        }
    }

    fn dispatch<H: GattHandler>(&mut self, request: Request<'_>, handler: &mut H) -> AttResult {
        match request {
            Request::ExchangeMtu { client_mtu } => {
                self.mtu = client_mtu.min(self.server_mtu).max(DEFAULT_MTU);
                log::info!("MTU exchange: client {client_mtu}, using {}", self.mtu);
                Ok(Some(Response::ExchangeMtu { server_mtu: self.server_mtu }))
            }
            Request::FindInformation { start, end } => self.find_information(start, end),
            Request::FindByTypeValue { start, end, attr_type, value } => {
                self.find_by_type_value(start, end, attr_type, value)
            }
            Request::ReadByType { start, end, attr_type } => {
                self.read_by_type(start, end, attr_type, handler)
            }
            Request::Read { handle } => {
                let value = self.read_value(handle, handler)?;
                let max = self.mtu as usize - 1;
                Ok(Some(Response::Read(value[..value.len().min(max)].to_vec())))
            }
            Request::ReadBlob { handle, offset } => {
                let value = self.read_value(handle, handler)?;
                let offset = offset as usize;
                if offset > value.len() {
                    return Err((handle, ErrorCode::InvalidOffset));
                }
                let end = value.len().min(offset + self.mtu as usize - 1);
                Ok(Some(Response::ReadBlob(value[offset..end].to_vec())))
            }
            Request::ReadByGroupType { start, end, group_type } => {
                self.read_by_group_type(start, end, group_type)
            }
            Request::Write { handle, value } => {
                let id = self.writable(handle)?;
                handler.write(id, WriteKind::Request, 0, value).map_err(|c| (handle, c))?;
                Ok(Some(Response::Write))
            }
            Request::WriteCommand { handle, value } => {
                // commands never get an error back
                if let Ok(id) = self.writable(handle) {
                    if let Err(code) = handler.write(id, WriteKind::Command, 0, value) {
                        log::debug!("write command on 0x{handle:04x} dropped: {code}");
                    }
                }
                Ok(None)
            }
            Request::PrepareWrite { handle, offset, value } => {
                let id = self.writable(handle)?;
                handler.write(id, WriteKind::Prepare, offset, value).map_err(|c| (handle, c))?;
                self.prepared = Some(id);
                Ok(Some(Response::PrepareWrite { handle, offset, value: value.to_vec() }))
            }
            Request::ExecuteWrite { commit } => {
                // The WiFi characteristic is the only one taking long writes
                let id = self.prepared.take().unwrap_or(AttrId::WifiConfig);
                if commit {
                    let handle = self.db.handle_of(id).unwrap_or(0);
                    handler.write(id, WriteKind::Execute, 0, &[]).map_err(|c| (handle, c))?;
                } else {
                    handler.cancel_prepared();
                }
                Ok(Some(Response::ExecuteWrite))
            }
            Request::Confirmation => Ok(None),
            Request::Unsupported { opcode } => {
                if att::is_command(opcode) {
                    Ok(None)
                } else {
                    Err((0, ErrorCode::RequestNotSupported))
                }
            }
        }
    }

    fn check_range(start: u16, end: u16) -> Result<(), (u16, ErrorCode)> {
        if start == 0 || start > end {
            return Err((start, ErrorCode::InvalidHandle));
        }
        Ok(())
    }

    fn value_of<H: GattHandler>(attr: &Attribute, handler: &mut H) -> Result<Vec<u8>, (u16, ErrorCode)> {
        match &attr.value {
            Value::Static(v) => Ok(v.clone()),
            Value::Dynamic(id) => handler.read(*id).map_err(|c| (attr.handle, c)),
        }
    }

    fn read_value<H: GattHandler>(
        &self,
        handle: u16,
        handler: &mut H,
    ) -> Result<Vec<u8>, (u16, ErrorCode)> {
        let attr = self.db.get(handle).ok_or((handle, ErrorCode::InvalidHandle))?;
        if !attr.readable {
            return Err((handle, ErrorCode::ReadNotPermitted));
        }
        Self::value_of(attr, handler)
    }

    fn writable(&self, handle: u16) -> Result<AttrId, (u16, ErrorCode)> {
        let attr = self.db.get(handle).ok_or((handle, ErrorCode::InvalidHandle))?;
        match attr.id() {
            Some(id) if attr.writable => Ok(id),
            _ => Err((handle, ErrorCode::WriteNotPermitted)),
        }
    }

    fn find_information(&self, start: u16, end: u16) -> AttResult {
        Self::check_range(start, end)?;
        let mut entries: Vec<(u16, Uuid)> = Vec::new();
        let mut used = 2;
        for attr in self.db.range(start, end) {
            let len = attr.attr_type.wire_len();
            if let Some((_, first)) = entries.first() {
                if first.wire_len() != len {
                    break;
                }
            }
            if used + 2 + len > self.mtu as usize {
                break;
            }
            used += 2 + len;
            entries.push((attr.handle, attr.attr_type));
        }
        if entries.is_empty() {
            return Err((start, ErrorCode::AttributeNotFound));
        }
        Ok(Some(Response::FindInformation { entries }))
    }

    fn find_by_type_value(&self, start: u16, end: u16, attr_type: u16, value: &[u8]) -> AttResult {
        Self::check_range(start, end)?;
        let mut ranges = Vec::new();
        if attr_type == PRIMARY_SERVICE {
            let max = (self.mtu as usize - 1) / 4;
            let wanted = Uuid::from_le_bytes(value);
            for attr in self.db.range(start, end).filter(|a| a.is_primary_service()) {
                let Value::Static(uuid) = &attr.value else { continue };
                if wanted.is_some() && Uuid::from_le_bytes(uuid) == wanted {
                    ranges.push((attr.handle, attr.group_end.unwrap_or(attr.handle)));
                    if ranges.len() == max {
                        break;
                    }
                }
            }
        }
        if ranges.is_empty() {
            return Err((start, ErrorCode::AttributeNotFound));
        }
        Ok(Some(Response::FindByTypeValue { ranges }))
    }

    fn read_by_type<H: GattHandler>(
        &self,
        start: u16,
        end: u16,
        attr_type: Uuid,
        handler: &mut H,
    ) -> AttResult {
        Self::check_range(start, end)?;
        let max_value = (self.mtu as usize - 4).min(253);
        let mut entries: Vec<(u16, Vec<u8>)> = Vec::new();
        let mut used = 2;
        for attr in self.db.range(start, end).filter(|a| a.attr_type == attr_type) {
            if !attr.readable {
                if entries.is_empty() {
                    return Err((attr.handle, ErrorCode::ReadNotPermitted));
                }
                break;
            }
            let mut value = Self::value_of(attr, handler)?;
            value.truncate(max_value);
            if let Some((_, first)) = entries.first() {
                if first.len() != value.len() {
                    break;
                }
            }
            if used + 2 + value.len() > self.mtu as usize {
                break;
            }
            used += 2 + value.len();
            entries.push((attr.handle, value));
        }
        if entries.is_empty() {
            return Err((start, ErrorCode::AttributeNotFound));
        }
        Ok(Some(Response::ReadByType { entries }))
    }

    fn read_by_group_type(&self, start: u16, end: u16, group_type: Uuid) -> AttResult {
        Self::check_range(start, end)?;
        if group_type != Uuid::Uuid16(PRIMARY_SERVICE) {
            return Err((start, ErrorCode::UnsupportedGroupType));
        }
        let mut entries: Vec<(u16, u16, Vec<u8>)> = Vec::new();
        let mut used = 2;
        for attr in self.db.range(start, end).filter(|a| a.is_primary_service()) {
            let Value::Static(uuid) = &attr.value else { continue };
            if let Some((_, _, first)) = entries.first() {
                if first.len() != uuid.len() {
                    break;
                }
            }
            if used + 4 + uuid.len() > self.mtu as usize {
                break;
            }
            used += 4 + uuid.len();
            entries.push((attr.handle, attr.group_end.unwrap_or(attr.handle), uuid.clone()));
        }
        if entries.is_empty() {
            return Err((start, ErrorCode::AttributeNotFound));
        }
        Ok(Some(Response::ReadByGroupType { entries }))
    }
}
