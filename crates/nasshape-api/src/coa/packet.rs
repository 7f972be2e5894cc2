// RADIUS dynamic-authorization packet codec (RFC 5176).
//
// Only what CoA and Disconnect need: request encoding with the MD5 request
// authenticator, reply decoding with response-authenticator verification,
// and the handful of attributes the engine sends.

use md5::{Digest, Md5};

use crate::error::Error;

const HEADER_LEN: usize = 20;
const MAX_PACKET_LEN: usize = 4096;

pub const ATTR_USER_NAME: u8 = 1;
pub const ATTR_VENDOR_SPECIFIC: u8 = 26;
pub const ATTR_ACCT_SESSION_ID: u8 = 44;
pub const ATTR_ERROR_CAUSE: u8 = 101;

/// MikroTik vendor id and its `Mikrotik-Rate-Limit` sub-attribute.
pub const VENDOR_MIKROTIK: u32 = 14988;
pub const MIKROTIK_RATE_LIMIT: u8 = 8;

/// Dynamic-authorization packet codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Code {
    DisconnectRequest = 40,
    DisconnectAck = 41,
    DisconnectNak = 42,
    CoaRequest = 43,
    CoaAck = 44,
    CoaNak = 45,
}

impl Code {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            40 => Some(Self::DisconnectRequest),
            41 => Some(Self::DisconnectAck),
            42 => Some(Self::DisconnectNak),
            43 => Some(Self::CoaRequest),
            44 => Some(Self::CoaAck),
            45 => Some(Self::CoaNak),
            _ => None,
        }
    }

    pub fn is_ack(self) -> bool {
        matches!(self, Self::DisconnectAck | Self::CoaAck)
    }

    pub fn is_nak(self) -> bool {
        matches!(self, Self::DisconnectNak | Self::CoaNak)
    }
}

/// A single type-length-value attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub kind: u8,
    pub value: Vec<u8>,
}

impl Attribute {
    pub fn string(kind: u8, value: &str) -> Self {
        Self {
            kind,
            value: value.as_bytes().to_vec(),
        }
    }

    /// Vendor-Specific attribute wrapping one vendor sub-attribute.
    pub fn vendor_string(vendor_id: u32, vendor_type: u8, value: &str) -> Result<Self, Error> {
        let data = value.as_bytes();
        let sub_len = u8::try_from(data.len() + 2)
            .map_err(|_| Error::InvalidRequest(format!("vendor attribute too long: {value}")))?;
        let mut payload = Vec::with_capacity(6 + data.len());
        payload.extend_from_slice(&vendor_id.to_be_bytes());
        payload.push(vendor_type);
        payload.push(sub_len);
        payload.extend_from_slice(data);
        Ok(Self {
            kind: ATTR_VENDOR_SPECIFIC,
            value: payload,
        })
    }

    fn as_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }
}

/// A decoded, authenticated reply.
#[derive(Debug, Clone)]
pub struct Reply {
    pub code: Code,
    pub identifier: u8,
    pub attributes: Vec<Attribute>,
}

impl Reply {
    /// Human-readable Error-Cause (RFC 5176 §3.5), if present.
    pub fn error_cause(&self) -> Option<String> {
        let cause = self
            .attributes
            .iter()
            .find(|a| a.kind == ATTR_ERROR_CAUSE)?
            .as_u32()?;
        let label = match cause {
            401 => "Unsupported-Attribute",
            402 => "Missing-Attribute",
            403 => "NAS-Identification-Mismatch",
            404 => "Invalid-Request",
            405 => "Unsupported-Service",
            406 => "Unsupported-Extension",
            501 => "Administratively-Prohibited",
            503 => "Session-Context-Not-Found",
            504 => "Session-Context-Not-Removable",
            506 => "Resources-Unavailable",
            _ => return Some(format!("Error-Cause {cause}")),
        };
        Some(label.to_owned())
    }
}

fn encode_attributes(attrs: &[Attribute]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    for attr in attrs {
        let len = u8::try_from(attr.value.len() + 2).map_err(|_| {
            Error::InvalidRequest(format!("attribute {} exceeds 253 octets", attr.kind))
        })?;
        out.push(attr.kind);
        out.push(len);
        out.extend_from_slice(&attr.value);
    }
    Ok(out)
}

fn digest(parts: &[&[u8]]) -> [u8; 16] {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&result);
    out
}

/// Encode a request. Returns the wire bytes; the request authenticator is
/// bytes `4..20`.
pub fn encode_request(
    code: Code,
    identifier: u8,
    attrs: &[Attribute],
    secret: &[u8],
) -> Result<Vec<u8>, Error> {
    let body = encode_attributes(attrs)?;
    let total = HEADER_LEN + body.len();
    if total > MAX_PACKET_LEN {
        return Err(Error::InvalidRequest(format!(
            "packet of {total} octets exceeds {MAX_PACKET_LEN}"
        )));
    }
    let len = u16::try_from(total)
        .map_err(|_| Error::InvalidRequest("packet length overflow".into()))?
        .to_be_bytes();

    let header = [code as u8, identifier, len[0], len[1]];
    let authenticator = digest(&[&header[..], &[0u8; 16][..], &body[..], secret]);

    let mut packet = Vec::with_capacity(total);
    packet.extend_from_slice(&header);
    packet.extend_from_slice(&authenticator);
    packet.extend_from_slice(&body);
    Ok(packet)
}

/// Decode a reply and verify its response authenticator against the
/// request authenticator it answers.
pub fn decode_reply(buf: &[u8], request_auth: &[u8], secret: &[u8]) -> Result<Reply, Error> {
    if buf.len() < HEADER_LEN {
        return Err(Error::RadiusMalformed(format!(
            "reply of {} octets is shorter than the header",
            buf.len()
        )));
    }
    let declared = usize::from(u16::from_be_bytes([buf[2], buf[3]]));
    if declared < HEADER_LEN || declared > buf.len() {
        return Err(Error::RadiusMalformed(format!(
            "declared length {declared} does not fit received {} octets",
            buf.len()
        )));
    }

    let code = Code::from_u8(buf[0])
        .ok_or_else(|| Error::RadiusMalformed(format!("unexpected code {}", buf[0])))?;
    let body = &buf[HEADER_LEN..declared];

    let expected = digest(&[&buf[..4], request_auth, body, secret]);
    if expected[..] != buf[4..HEADER_LEN] {
        return Err(Error::RadiusMalformed(
            "response authenticator mismatch (wrong shared secret?)".into(),
        ));
    }

    let mut attributes = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(Error::RadiusMalformed("truncated attribute header".into()));
        }
        let len = usize::from(rest[1]);
        if len < 2 || len > rest.len() {
            return Err(Error::RadiusMalformed(format!("bad attribute length {len}")));
        }
        attributes.push(Attribute {
            kind: rest[0],
            value: rest[2..len].to_vec(),
        });
        rest = &rest[len..];
    }

    Ok(Reply {
        code,
        identifier: buf[1],
        attributes,
    })
}

/// Build a signed reply. Used by tests standing in for a NAS.
#[cfg(test)]
pub(crate) fn encode_reply(
    code: Code,
    identifier: u8,
    request_auth: &[u8],
    attrs: &[Attribute],
    secret: &[u8],
) -> Vec<u8> {
    let body = encode_attributes(attrs).unwrap_or_default();
    let total = u16::try_from(HEADER_LEN + body.len()).unwrap_or(u16::MAX);
    let len = total.to_be_bytes();
    let header = [code as u8, identifier, len[0], len[1]];
    let auth = digest(&[&header[..], request_auth, &body[..], secret]);
    let mut packet = Vec::new();
    packet.extend_from_slice(&header);
    packet.extend_from_slice(&auth);
    packet.extend_from_slice(&body);
    packet
}
