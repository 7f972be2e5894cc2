// Subscriber session endpoints
//
// Session lookup, live rate override and forced disconnect. PPPoE
// sessions surface as `/ppp/active` entries plus a dynamic interface and
// simple queue both named `<pppoe-{username}>`.

use tracing::{debug, info};

use super::client::{RouterClient, fields};
use super::models::{ActiveSession, InterfaceStats, PppActive, SimpleQueue};
use crate::error::Error;

const PPP_ACTIVE: &str = "ppp/active";
const INTERFACE: &str = "interface";
const SIMPLE_QUEUE: &str = "queue/simple";

fn session_interface(username: &str) -> String {
    format!("<pppoe-{username}>")
}

/// Format a RouterOS `max-limit` value: `upload/download` from the
/// subscriber's point of view.
pub fn max_limit(download_kbps: u32, upload_kbps: u32) -> String {
    format!("{upload_kbps}k/{download_kbps}k")
}

impl RouterClient {
    /// Look up the subscriber's active session and its live byte counters.
    ///
    /// Returns `Ok(None)` when the subscriber has no session on this router.
    pub async fn get_active_session(&self, username: &str) -> Result<Option<ActiveSession>, Error> {
        let sessions: Vec<PppActive> = self.list(PPP_ACTIVE, &[("name", username)]).await?;
        let Some(session) = sessions.into_iter().next() else {
            debug!(username, "no active session");
            return Ok(None);
        };

        let iface_name = session_interface(username);
        let ifaces: Vec<InterfaceStats> = self.list(INTERFACE, &[("name", &iface_name)]).await?;
        let (bytes_in, bytes_out) = ifaces
            .first()
            .map_or((0, 0), |i| (i.rx_bytes(), i.tx_bytes()));

        Ok(Some(ActiveSession {
            id: session.id,
            session_id: session.session_id,
            address: session.address,
            bytes_in,
            bytes_out,
        }))
    }

    /// Rewrite the `max-limit` of the subscriber's dynamic simple queue.
    ///
    /// Matches by queue name first, then by target address.
    pub async fn restore_rate(
        &self,
        username: &str,
        address: Option<&str>,
        download_kbps: u32,
        upload_kbps: u32,
    ) -> Result<(), Error> {
        let name = session_interface(username);
        let mut queues: Vec<SimpleQueue> = self.list(SIMPLE_QUEUE, &[("name", &name)]).await?;

        if queues.is_empty() {
            if let Some(addr) = address {
                let target = format!("{addr}/32");
                queues = self.list(SIMPLE_QUEUE, &[("target", &target)]).await?;
            }
        }

        let Some(queue) = queues.first() else {
            return Err(Error::RouterApi {
                message: format!("no simple queue for session of '{username}'"),
                status: 404,
            });
        };

        let limit = max_limit(download_kbps, upload_kbps);
        self.update(SIMPLE_QUEUE, &queue.id, &fields(&[("max-limit", limit.clone())]))
            .await?;
        info!(username, max_limit = %limit, "rate override applied");
        Ok(())
    }

    /// Drop every active session of the subscriber. No session is not an error.
    pub async fn disconnect_user(&self, username: &str) -> Result<(), Error> {
        let removed = self
            .remove_matching(PPP_ACTIVE, &[("name", username)])
            .await?;
        info!(username, sessions = removed, "disconnected subscriber");
        Ok(())
    }
}
