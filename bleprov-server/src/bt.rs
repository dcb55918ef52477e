//! Raw BlueZ socket plumbing that socket2 does not cover: Bluetooth address
//! families, `sockaddr_hci`/`sockaddr_l2`, HCI filters and L2CAP security.

use std::os::fd::{AsRawFd, FromRawFd};

use socket2::{Domain, Protocol, Socket, Type};

pub const AF_BLUETOOTH: i32 = 31;
pub const BTPROTO_L2CAP: i32 = 0;
pub const BTPROTO_HCI: i32 = 1;

pub const SOL_HCI: i32 = 0;
pub const HCI_FILTER: i32 = 2;
pub const HCI_CHANNEL_RAW: u16 = 0;

pub const SOL_BLUETOOTH: i32 = 274;
pub const BT_SECURITY: i32 = 4;
pub const BT_SECURITY_LOW: u8 = 1;

/// Fixed L2CAP channel carrying ATT on LE links
pub const ATT_CID: u16 = 4;
pub const BDADDR_LE_PUBLIC: u8 = 1;

pub const HCI_COMMAND_PKT: u8 = 0x01;
pub const HCI_EVENT_PKT: u8 = 0x04;
pub const EVT_CMD_COMPLETE: u8 = 0x0E;
pub const EVT_CMD_STATUS: u8 = 0x0F;

#[repr(C)]
struct SockaddrHci {
    hci_family: libc::sa_family_t,
    hci_dev: u16,
    hci_channel: u16,
}

#[repr(C)]
pub struct HciFilter {
    pub type_mask: u32,
    pub event_mask: [u32; 2],
    pub opcode: u16,
}

#[repr(C)]
#[derive(Default)]
struct SockaddrL2 {
    l2_family: libc::sa_family_t,
    l2_psm: u16,
    l2_bdaddr: [u8; 6],
    l2_cid: u16,
    l2_bdaddr_type: u8,
}

#[repr(C)]
struct BtSecurity {
    level: u8,
    key_size: u8,
}

fn check(ret: libc::c_int) -> std::io::Result<libc::c_int> {
    if ret < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn setsockopt<T>(socket: &Socket, level: i32, name: i32, value: &T) -> std::io::Result<()> {
    // SAFETY: value points to a live, properly sized option struct
    check(unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            value as *const T as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    })?;
    Ok(())
}

pub fn hci_socket() -> std::io::Result<Socket> {
    Socket::new(Domain::from(AF_BLUETOOTH), Type::RAW, Some(Protocol::from(BTPROTO_HCI)))
}

pub fn bind_hci(socket: &Socket, dev_id: u16, channel: u16) -> std::io::Result<()> {
    let addr = SockaddrHci { hci_family: AF_BLUETOOTH as libc::sa_family_t, hci_dev: dev_id, hci_channel: channel };
    // SAFETY: bind() with a valid fd and a properly sized sockaddr
    check(unsafe {
        libc::bind(
            socket.as_raw_fd(),
            &addr as *const SockaddrHci as *const libc::sockaddr,
            std::mem::size_of::<SockaddrHci>() as libc::socklen_t,
        )
    })?;
    Ok(())
}

pub fn set_hci_filter(socket: &Socket, filter: &HciFilter) -> std::io::Result<()> {
    setsockopt(socket, SOL_HCI, HCI_FILTER, filter)
}

pub fn l2cap_socket() -> std::io::Result<Socket> {
    Socket::new(Domain::from(AF_BLUETOOTH), Type::SEQPACKET, Some(Protocol::from(BTPROTO_L2CAP)))
}

/// Bind to the ATT fixed channel on any local LE public address
pub fn bind_att(socket: &Socket) -> std::io::Result<()> {
    let addr = SockaddrL2 {
        l2_family: AF_BLUETOOTH as libc::sa_family_t,
        l2_cid: ATT_CID.to_le(),
        l2_bdaddr_type: BDADDR_LE_PUBLIC,
        ..Default::default()
    };
    // SAFETY: bind() with a valid fd and a properly sized sockaddr
    check(unsafe {
        libc::bind(
            socket.as_raw_fd(),
            &addr as *const SockaddrL2 as *const libc::sockaddr,
            std::mem::size_of::<SockaddrL2>() as libc::socklen_t,
        )
    })?;
    Ok(())
}

pub fn set_security_low(socket: &Socket) -> std::io::Result<()> {
    let sec = BtSecurity { level: BT_SECURITY_LOW, key_size: 0 };
    setsockopt(socket, SOL_BLUETOOTH, BT_SECURITY, &sec)
}

/// accept(2) on an L2CAP listener; returns the client socket and its
/// address in the usual `AA:BB:CC:DD:EE:FF` form
pub fn accept_l2(listener: &Socket) -> std::io::Result<(Socket, String)> {
    let mut addr = SockaddrL2::default();
    let mut len = std::mem::size_of::<SockaddrL2>() as libc::socklen_t;
    // SAFETY: addr/len describe a writable sockaddr_l2
    let fd = check(unsafe {
        libc::accept4(
            listener.as_raw_fd(),
            &mut addr as *mut SockaddrL2 as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
        )
    })?;
    // SAFETY: fd was just returned by accept and is owned by nobody else
    let socket = unsafe { Socket::from_raw_fd(fd) };
    Ok((socket, format_bdaddr(&addr.l2_bdaddr)))
}

/// bdaddr_t is little-endian
pub fn format_bdaddr(b: &[u8; 6]) -> String {
    format!("{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", b[5], b[4], b[3], b[2], b[1], b[0])
}

/// HCI command packet: type, opcode (LE), parameter length, parameters
pub fn command_packet(opcode: u16, params: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + params.len());
    buf.push(HCI_COMMAND_PKT);
    buf.extend_from_slice(&opcode.to_le_bytes());
    buf.push(params.len() as u8);
    buf.extend_from_slice(params);
    buf
}

/// Status of a Command Complete / Command Status event for `opcode`
pub fn command_result(event: &[u8], opcode: u16) -> Option<u8> {
    match event {
        [HCI_EVENT_PKT, EVT_CMD_COMPLETE, _, _, lo, hi, status, ..]
            if u16::from_le_bytes([*lo, *hi]) == opcode =>
        {
            Some(*status)
        }
        [HCI_EVENT_PKT, EVT_CMD_STATUS, _, status, _, lo, hi, ..]
            if u16::from_le_bytes([*lo, *hi]) == opcode =>
        {
            Some(*status)
        }
        _ => None,
    }
}
