// NFLOG capture over a NETLINK_NETFILTER socket.
//
// The kernel copies every packet matched by an `-j NFLOG --nflog-group N` rule
// to the sockets bound to group N. Binding requires CAP_NET_ADMIN.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::PacketSource;

// ---------------------------------------------------------------------------
// Netlink / nfnetlink_log constants
// ---------------------------------------------------------------------------

const NLMSG_HDRLEN: usize = 16;
const NLA_HDRLEN: usize = 4;
const NFGENMSG_LEN: usize = 4;

const NLMSG_NOOP: u16 = 1;
const NLMSG_ERROR: u16 = 2;
const NLMSG_DONE: u16 = 3;

const NLM_F_REQUEST: u16 = 0x01;
const NLM_F_ACK: u16 = 0x04;

const NLA_TYPE_MASK: u16 = !(0x8000 | 0x4000);

const NFNETLINK_V0: u8 = 0;
const NFNL_SUBSYS_ULOG: u16 = 4;
const NFULNL_MSG_PACKET: u16 = 0;
const NFULNL_MSG_CONFIG: u16 = 1;

const NFULA_PAYLOAD: u16 = 9;

const NFULA_CFG_CMD: u16 = 1;
const NFULA_CFG_MODE: u16 = 2;

const NFULNL_CFG_CMD_BIND: u8 = 1;
const NFULNL_CFG_CMD_PF_BIND: u8 = 3;
const NFULNL_CFG_CMD_PF_UNBIND: u8 = 4;

const NFULNL_COPY_PACKET: u8 = 2;
const COPY_RANGE: u32 = 0xffff;

const RECV_BUFFER_LEN: usize = 256 * 1024;
const SOCKET_RCVBUF: i32 = 1024 * 1024;
const READ_TIMEOUT_USEC: libc::suseconds_t = 100_000;

fn nlmsg_align(len: usize) -> usize {
    (len + 3) & !3
}

fn ulog_msg_type(msg: u16) -> u16 {
    (NFNL_SUBSYS_ULOG << 8) | msg
}

// ---------------------------------------------------------------------------
// Message encoding
// ---------------------------------------------------------------------------

/// Build an NFULNL_MSG_CONFIG request carrying a single attribute.
pub fn config_message(seq: u32, family: u8, group: u16, attr_type: u16, attr: &[u8]) -> Vec<u8> {
    let attr_len = NLA_HDRLEN + attr.len();
    let total = NLMSG_HDRLEN + NFGENMSG_LEN + nlmsg_align(attr_len);

    let mut msg = Vec::with_capacity(total);
    msg.extend_from_slice(&(total as u32).to_ne_bytes());
    msg.extend_from_slice(&ulog_msg_type(NFULNL_MSG_CONFIG).to_ne_bytes());
    msg.extend_from_slice(&(NLM_F_REQUEST | NLM_F_ACK).to_ne_bytes());
    msg.extend_from_slice(&seq.to_ne_bytes());
    msg.extend_from_slice(&0u32.to_ne_bytes());

    // nfgenmsg: res_id carries the group in network byte order
    msg.push(family);
    msg.push(NFNETLINK_V0);
    msg.extend_from_slice(&group.to_be_bytes());

    msg.extend_from_slice(&(attr_len as u16).to_ne_bytes());
    msg.extend_from_slice(&attr_type.to_ne_bytes());
    msg.extend_from_slice(attr);
    msg.resize(total, 0);
    msg
}

/// Payload of NFULA_CFG_MODE: big-endian copy range, copy mode, padding.
fn copy_mode_attr(mode: u8, range: u32) -> [u8; 6] {
    let r = range.to_be_bytes();
    [r[0], r[1], r[2], r[3], mode, 0]
}

// ---------------------------------------------------------------------------
// Message decoding
// ---------------------------------------------------------------------------

/// One netlink message found in a receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum NetlinkMessage<'a> {
    /// A logged packet; `None` when it carried no payload attribute.
    Packet(Option<&'a [u8]>),
    /// NLMSG_ERROR; `errno == 0` is an acknowledgement.
    Ack { seq: u32, errno: i32 },
    Other(u16),
}

/// Split a receive buffer into netlink messages. Stops at the first
/// truncated header.
pub fn parse_messages(buf: &[u8]) -> Vec<NetlinkMessage<'_>> {
    let mut messages = Vec::new();
    let mut offset = 0usize;

    while offset + NLMSG_HDRLEN <= buf.len() {
        let len = read_u32(buf, offset) as usize;
        if len < NLMSG_HDRLEN || offset + len > buf.len() {
            break;
        }
        let msg_type = read_u16(buf, offset + 4);
        let seq = read_u32(buf, offset + 8);
        let body = &buf[offset + NLMSG_HDRLEN..offset + len];

        let message = match msg_type {
            t if t == ulog_msg_type(NFULNL_MSG_PACKET) => NetlinkMessage::Packet(packet_payload(body)),
            NLMSG_ERROR if body.len() >= 4 => NetlinkMessage::Ack {
                seq,
                errno: -i32::from_ne_bytes([body[0], body[1], body[2], body[3]]),
            },
            other => NetlinkMessage::Other(other),
        };
        messages.push(message);

        offset += nlmsg_align(len);
    }

    messages
}

fn packet_payload(body: &[u8]) -> Option<&[u8]> {
    let mut offset = NFGENMSG_LEN;
    while offset + NLA_HDRLEN <= body.len() {
        let len = read_u16(body, offset) as usize;
        if len < NLA_HDRLEN || offset + len > body.len() {
            return None;
        }
        let attr_type = read_u16(body, offset + 2) & NLA_TYPE_MASK;
        if attr_type == NFULA_PAYLOAD {
            return Some(&body[offset + NLA_HDRLEN..offset + len]);
        }
        offset += nlmsg_align(len);
    }
    None
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_ne_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

// ---------------------------------------------------------------------------
// NflogCapture
// ---------------------------------------------------------------------------

/// Subscription to one NFLOG group.
pub struct NflogCapture {
    fd: OwnedFd,
    group: u16,
    seq: u32,
    buffer: Vec<u8>,
}

impl NflogCapture {
    /// Open a netfilter netlink socket and bind it to `group` in packet-copy
    /// mode.
    pub fn open(group: u16) -> Result<Self> {
        let open_err = |detail: String| Error::NflogOpen { group, detail };

        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::NETLINK_NETFILTER,
            )
        };
        if fd < 0 {
            return Err(open_err(format!(
                "socket(AF_NETLINK) failed: {}",
                io::Error::last_os_error()
            )));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(open_err(format!(
                "bind(AF_NETLINK) failed: {}",
                io::Error::last_os_error()
            )));
        }

        set_socket_option(&fd, libc::SO_RCVBUF, &SOCKET_RCVBUF);
        let timeout = libc::timeval {
            tv_sec: 0,
            tv_usec: READ_TIMEOUT_USEC,
        };
        set_socket_option(&fd, libc::SO_RCVTIMEO, &timeout);

        let mut capture = Self {
            fd,
            group,
            seq: 0,
            buffer: vec![0u8; RECV_BUFFER_LEN],
        };

        // Only needed on kernels before 3.17; later ones accept and ignore it.
        for family in [libc::AF_INET as u8, libc::AF_INET6 as u8] {
            for cmd in [NFULNL_CFG_CMD_PF_UNBIND, NFULNL_CFG_CMD_PF_BIND] {
                if let Err(e) = capture.configure(family, 0, NFULA_CFG_CMD, &[cmd]) {
                    debug!("nflog pf command {} for family {} rejected: {}", cmd, family, e);
                }
            }
        }

        capture
            .configure(libc::AF_UNSPEC as u8, group, NFULA_CFG_CMD, &[NFULNL_CFG_CMD_BIND])
            .map_err(|e| open_err(format!("bind to group failed: {}", e)))?;
        capture
            .configure(
                libc::AF_UNSPEC as u8,
                group,
                NFULA_CFG_MODE,
                &copy_mode_attr(NFULNL_COPY_PACKET, COPY_RANGE),
            )
            .map_err(|e| open_err(format!("setting copy mode failed: {}", e)))?;

        Ok(capture)
    }

    pub fn group(&self) -> u16 {
        self.group
    }

    /// Send one config request and wait for its acknowledgement.
    fn configure(&mut self, family: u8, group: u16, attr_type: u16, attr: &[u8]) -> io::Result<()> {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;
        let msg = config_message(seq, family, group, attr_type, attr);

        let sent = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                msg.as_ptr() as *const libc::c_void,
                msg.len(),
                0,
            )
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }

        // Packets may already be flowing; skip them until our ack shows up.
        for _ in 0..64 {
            let n = self.recv(0)?;
            if n == 0 {
                break;
            }
            for message in parse_messages(&self.buffer[..n]) {
                if let NetlinkMessage::Ack { seq: ack_seq, errno } = message {
                    if ack_seq == seq {
                        return if errno == 0 {
                            Ok(())
                        } else {
                            Err(io::Error::from_raw_os_error(errno))
                        };
                    }
                }
            }
        }
        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "no acknowledgement from nfnetlink_log",
        ))
    }

    /// Receive into the internal buffer. Read timeouts yield `Ok(0)`.
    fn recv(&mut self, flags: libc::c_int) -> io::Result<usize> {
        let n = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                self.buffer.as_mut_ptr() as *mut libc::c_void,
                self.buffer.len(),
                flags,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EAGAIN)
                || err.raw_os_error() == Some(libc::EWOULDBLOCK)
                || err.raw_os_error() == Some(libc::EINTR)
            {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(n as usize)
    }

    fn collect_payloads(&self, n: usize, out: &mut Vec<Vec<u8>>) {
        for message in parse_messages(&self.buffer[..n]) {
            match message {
                NetlinkMessage::Packet(Some(payload)) => out.push(payload.to_vec()),
                NetlinkMessage::Packet(None) => debug!("nflog packet without payload"),
                NetlinkMessage::Ack { errno, .. } if errno != 0 => {
                    warn!("nflog error message: {}", io::Error::from_raw_os_error(errno))
                }
                NetlinkMessage::Other(NLMSG_NOOP | NLMSG_DONE) | NetlinkMessage::Ack { .. } => {}
                NetlinkMessage::Other(t) => debug!("ignoring netlink message type {:#06x}", t),
            }
        }
    }
}

impl PacketSource for NflogCapture {
    /// Blocks up to the socket read timeout for the first message, then
    /// drains whatever else is already queued.
    fn read_payloads(&mut self, out: &mut Vec<Vec<u8>>) -> Result<()> {
        let mut flags = 0;
        loop {
            match self.recv(flags) {
                Ok(0) => break,
                Ok(n) => self.collect_payloads(n, out),
                Err(e) if e.raw_os_error() == Some(libc::ENOBUFS) => {
                    warn!("nflog receive buffer overrun, events lost");
                }
                Err(e) => return Err(Error::NflogRead(e)),
            }
            flags = libc::MSG_DONTWAIT;
        }
        Ok(())
    }
}

fn set_socket_option<T>(fd: &OwnedFd, option: libc::c_int, value: &T) {
    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            option,
            value as *const T as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        warn!(
            "setsockopt({}) on nflog socket failed: {}",
            option,
            io::Error::last_os_error()
        );
    }
}
