// RADIUS CoA / Disconnect sender
//
// One UDP exchange per request: send, wait for the reply carrying the
// same identifier, retransmit on timeout up to the configured count.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use super::packet::{
    ATTR_ACCT_SESSION_ID, ATTR_USER_NAME, Attribute, Code, MIKROTIK_RATE_LIMIT, Reply,
    VENDOR_MIKROTIK, decode_reply, encode_request,
};
use crate::error::Error;

const RECV_BUFFER: usize = 4096;

/// Dynamic-authorization client bound to one NAS.
pub struct CoaSender {
    target: SocketAddr,
    secret: SecretString,
    timeout: Duration,
    retries: u32,
}

impl CoaSender {
    /// `target` is the NAS CoA endpoint (usually port 3799).
    pub fn new(target: SocketAddr, secret: SecretString, timeout: Duration, retries: u32) -> Self {
        Self {
            target,
            secret,
            timeout,
            retries,
        }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Send a CoA-Request carrying a new `Mikrotik-Rate-Limit`.
    pub async fn update_rate_limit(
        &self,
        username: &str,
        session_id: Option<&str>,
        rate: &str,
    ) -> Result<(), Error> {
        let mut attrs = session_attributes(username, session_id);
        attrs.push(Attribute::vendor_string(
            VENDOR_MIKROTIK,
            MIKROTIK_RATE_LIMIT,
            rate,
        )?);
        self.expect_ack(Code::CoaRequest, &attrs).await?;
        debug!(username, rate, nas = %self.target, "CoA rate update acknowledged");
        Ok(())
    }

    /// Send a Disconnect-Request for the session.
    pub async fn disconnect_user(&self, username: &str, session_id: Option<&str>) -> Result<(), Error> {
        let attrs = session_attributes(username, session_id);
        self.expect_ack(Code::DisconnectRequest, &attrs).await?;
        debug!(username, nas = %self.target, "disconnect acknowledged");
        Ok(())
    }

    async fn expect_ack(&self, code: Code, attrs: &[Attribute]) -> Result<(), Error> {
        let reply = self.exchange(code, attrs).await?;
        if reply.code.is_ack() {
            return Ok(());
        }
        Err(Error::RadiusNak {
            reason: reply
                .error_cause()
                .unwrap_or_else(|| format!("{:?}", reply.code)),
        })
    }

    async fn exchange(&self, code: Code, attrs: &[Attribute]) -> Result<Reply, Error> {
        let secret = self.secret.expose_secret().as_bytes();
        let identifier: u8 = rand::random();
        let packet = encode_request(code, identifier, attrs, secret)?;
        let request_auth = &packet[4..20];

        let bind: SocketAddr = if self.target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(self.target).await?;

        let mut buf = vec![0u8; RECV_BUFFER];
        for attempt in 0..=self.retries {
            socket.send(&packet).await?;
            let deadline = tokio::time::Instant::now() + self.timeout;

            loop {
                let recv = tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await;
                let Ok(received) = recv else {
                    warn!(nas = %self.target, attempt, "no reply from NAS");
                    break;
                };
                let len = received?;
                let Some(reply_buf) = buf.get(..len) else {
                    continue;
                };
                if reply_buf.get(1) != Some(&identifier) {
                    debug!(nas = %self.target, "ignoring reply for another request");
                    continue;
                }
                return decode_reply(reply_buf, request_auth, secret);
            }
        }

        Err(Error::Timeout {
            timeout_secs: self.timeout.as_secs() * u64::from(self.retries + 1),
        })
    }
}

fn session_attributes(username: &str, session_id: Option<&str>) -> Vec<Attribute> {
    let mut attrs = vec![Attribute::string(ATTR_USER_NAME, username)];
    if let Some(id) = session_id {
        attrs.push(Attribute::string(ATTR_ACCT_SESSION_ID, id));
    }
    attrs
}
