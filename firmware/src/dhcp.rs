//! Minimal DHCP server for the access point, hands out addresses from a small pool.
//!
//! Only the single subnet case is handled: no relays, no static bindings, and the server is always the router and
//! the dns server.
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

/// Hotspot address, also the gateway.
pub const AP_ADDRESS: [u8; 4] = [192, 168, 4, 1];
pub const AP_PREFIX_LEN: u8 = 24;
/// Host part of the first address handed out.
pub const FIRST_HOST: u8 = 2;
pub const LEASE_SECONDS: u32 = 2 * 60 * 60;

const MAGIC: [u8; 4] = [99, 130, 83, 99];
const OP_REQUEST: u8 = 1;
const OP_REPLY: u8 = 2;
/// Replies are padded to the minimum BOOTP size.
const MIN_REPLY: usize = 300;

mod option {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DNS: u8 = 6;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const END: u8 = 255;
}

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum DhcpError {
    #[error("packet too short")]
    TooShort,
    #[error("not a boot request")]
    NotRequest,
    #[error("bad magic cookie")]
    BadMagic,
    #[error("malformed options")]
    MalformedOption,
    #[error("no message type")]
    MissingMessageType,
    #[error("address pool exhausted")]
    PoolExhausted,
    #[error("reply buffer too small")]
    BufferTooSmall,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum MessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => MessageType::Discover,
            2 => MessageType::Offer,
            3 => MessageType::Request,
            4 => MessageType::Decline,
            5 => MessageType::Ack,
            6 => MessageType::Nak,
            7 => MessageType::Release,
            8 => MessageType::Inform,
            _ => return None,
        })
    }
    pub fn to_u8(self) -> u8 {
        match self {
            MessageType::Discover => 1,
            MessageType::Offer => 2,
            MessageType::Request => 3,
            MessageType::Decline => 4,
            MessageType::Ack => 5,
            MessageType::Nak => 6,
            MessageType::Release => 7,
            MessageType::Inform => 8,
        }
    }
}

/// Fixed part of a BOOTP / DHCP message, followed by the magic cookie.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Debug, Copy, Clone)]
#[repr(C)]
pub struct Header {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: [u8; 4],
    pub secs: [u8; 2],
    pub flags: [u8; 2],
    pub ciaddr: [u8; 4],
    pub yiaddr: [u8; 4],
    pub siaddr: [u8; 4],
    pub giaddr: [u8; 4],
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    pub magic: [u8; 4],
}
crate::static_assert_size!(Header, 240);

impl Header {
    pub fn mac(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.chaddr[0..6]);
        mac
    }
}

/// The options we care about from a request.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub message_type: Option<u8>,
    pub requested_ip: Option<[u8; 4]>,
    pub server_id: Option<[u8; 4]>,
}

fn ip_option(data: &[u8]) -> Result<[u8; 4], DhcpError> {
    data.try_into().map_err(|_| DhcpError::MalformedOption)
}

/// Walk the option list, stops at the end option.
pub fn parse_options(mut data: &[u8]) -> Result<RequestOptions, DhcpError> {
    let mut r = RequestOptions::default();
    while let Some((&code, rest)) = data.split_first() {
        match code {
            option::PAD => {
                data = rest;
                continue;
            }
            option::END => break,
            _ => {}
        }
        let (&len, rest) = rest.split_first().ok_or(DhcpError::MalformedOption)?;
        if rest.len() < len as usize {
            return Err(DhcpError::MalformedOption);
        }
        let (value, rest) = rest.split_at(len as usize);
        match code {
            option::MESSAGE_TYPE => r.message_type = value.first().copied(),
            option::REQUESTED_IP => r.requested_ip = Some(ip_option(value)?),
            option::SERVER_ID => r.server_id = Some(ip_option(value)?),
            _ => {}
        }
        data = rest;
    }
    Ok(r)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub struct Lease {
    pub mac: [u8; 6],
    pub ip: [u8; 4],
    /// Seconds since boot at which the lease runs out.
    pub expires: u64,
}

/// Appends options to the reply.
struct OptionWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl OptionWriter<'_> {
    fn put(&mut self, code: u8, value: &[u8]) -> Result<(), DhcpError> {
        let end = self.len + 2 + value.len();
        if end > self.buf.len() {
            return Err(DhcpError::BufferTooSmall);
        }
        self.buf[self.len] = code;
        self.buf[self.len + 1] = value.len() as u8;
        self.buf[self.len + 2..end].copy_from_slice(value);
        self.len = end;
        Ok(())
    }
    fn end(&mut self) -> Result<usize, DhcpError> {
        let b = self.buf.get_mut(self.len).ok_or(DhcpError::BufferTooSmall)?;
        *b = option::END;
        Ok(self.len + 1)
    }
}

/// Address server with a pool of `N` addresses, starting at `.2` of the server subnet.
#[derive(Debug)]
pub struct DhcpServer<const N: usize> {
    address: [u8; 4],
    mask: [u8; 4],
    lease_seconds: u32,
    leases: heapless::Vec<Lease, N>,
}

impl<const N: usize> Default for DhcpServer<N> {
    fn default() -> Self {
        Self::new(AP_ADDRESS, AP_PREFIX_LEN)
    }
}

impl<const N: usize> DhcpServer<N> {
    pub fn new(address: [u8; 4], prefix_len: u8) -> Self {
        let mask = (u32::MAX.checked_shl(32 - prefix_len as u32).unwrap_or(0)).to_be_bytes();
        Self {
            address,
            mask,
            lease_seconds: LEASE_SECONDS,
            leases: heapless::Vec::new(),
        }
    }

    pub fn leases(&self) -> &[Lease] {
        &self.leases
    }

    fn pool_address(&self, index: usize) -> [u8; 4] {
        let mut ip = self.address;
        ip[3] = FIRST_HOST.wrapping_add(index as u8);
        ip
    }

    fn lease_of(&self, mac: &[u8; 6]) -> Option<&Lease> {
        self.leases.iter().find(|l| &l.mac == mac)
    }

    /// Address for this client, an existing lease is kept, otherwise the first free or expired address.
    fn allocate(&mut self, mac: [u8; 6], now: u64) -> Result<[u8; 4], DhcpError> {
        if let Some(l) = self.lease_of(&mac) {
            return Ok(l.ip);
        }
        let expires = now + self.lease_seconds as u64;
        for index in 0..N {
            let ip = self.pool_address(index);
            match self.leases.iter().position(|l| l.ip == ip) {
                None => {
                    let _ = self.leases.push(Lease { mac, ip, expires });
                    return Ok(ip);
                }
                Some(p) if self.leases[p].expires <= now => {
                    self.leases[p] = Lease { mac, ip, expires };
                    return Ok(ip);
                }
                _ => {}
            }
        }
        Err(DhcpError::PoolExhausted)
    }

    fn renew(&mut self, mac: &[u8; 6], now: u64) {
        let lease_seconds = self.lease_seconds as u64;
        if let Some(l) = self.leases.iter_mut().find(|l| &l.mac == mac) {
            l.expires = now + lease_seconds;
        }
    }

    fn release(&mut self, mac: &[u8; 6]) {
        self.leases.retain(|l| &l.mac != mac);
    }

    /// Handle one request, `now` is in seconds. Returns the length of the reply written to `reply`, if any.
    pub fn handle(&mut self, request: &[u8], now: u64, reply: &mut [u8]) -> Result<Option<usize>, DhcpError> {
        let (header, options) = Header::ref_from_prefix(request).map_err(|_| DhcpError::TooShort)?;
        if header.op != OP_REQUEST {
            return Err(DhcpError::NotRequest);
        }
        if header.magic != MAGIC {
            return Err(DhcpError::BadMagic);
        }
        let options = parse_options(options)?;
        let message_type = options
            .message_type
            .and_then(MessageType::from_u8)
            .ok_or(DhcpError::MissingMessageType)?;
        let mac = header.mac();

        let (kind, ip) = match message_type {
            MessageType::Discover => (MessageType::Offer, self.allocate(mac, now)?),
            MessageType::Request => {
                if options.server_id.is_some_and(|s| s != self.address) {
                    // The client went with another server.
                    return Ok(None);
                }
                let wanted = options.requested_ip.unwrap_or(header.ciaddr);
                match self.lease_of(&mac) {
                    Some(l) if l.ip == wanted => {
                        self.renew(&mac, now);
                        (MessageType::Ack, wanted)
                    }
                    _ => (MessageType::Nak, [0; 4]),
                }
            }
            MessageType::Release | MessageType::Decline => {
                self.release(&mac);
                return Ok(None);
            }
            _ => return Ok(None),
        };
        self.write_reply(header, kind, ip, reply).map(Some)
    }

    fn write_reply(
        &self,
        request: &Header,
        kind: MessageType,
        ip: [u8; 4],
        reply: &mut [u8],
    ) -> Result<usize, DhcpError> {
        if reply.len() < MIN_REPLY {
            return Err(DhcpError::BufferTooSmall);
        }
        reply.fill(0);
        let mut header = Header::new_zeroed();
        header.op = OP_REPLY;
        header.htype = request.htype;
        header.hlen = request.hlen;
        header.xid = request.xid;
        header.flags = request.flags;
        header.giaddr = request.giaddr;
        header.chaddr = request.chaddr;
        header.yiaddr = ip;
        if kind != MessageType::Nak {
            header.siaddr = self.address;
        }
        header.magic = MAGIC;
        let header_len = core::mem::size_of::<Header>();
        reply[..header_len].copy_from_slice(header.as_bytes());

        let mut w = OptionWriter {
            buf: &mut reply[header_len..],
            len: 0,
        };
        w.put(option::MESSAGE_TYPE, &[kind.to_u8()])?;
        w.put(option::SERVER_ID, &self.address)?;
        if kind != MessageType::Nak {
            w.put(option::LEASE_TIME, &self.lease_seconds.to_be_bytes())?;
            w.put(option::SUBNET_MASK, &self.mask)?;
            w.put(option::ROUTER, &self.address)?;
            w.put(option::DNS, &self.address)?;
        }
        let len = header_len + w.end()?;
        Ok(len.max(MIN_REPLY))
    }
}
