// Router REST API HTTP client
//
// Wraps `reqwest::Client` with RouterOS-specific URL construction, basic
// auth and error-body decoding. The shaping and session endpoints are
// implemented as inherent methods in sibling modules to keep this one
// focused on transport mechanics.

use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::router::models::{IdOnly, RouterErrorBody};
use crate::transport::TransportConfig;

/// Raw HTTP client for one NAS router's REST management API.
///
/// Every shaping primitive built on top of it is idempotent: it reads the
/// current entries, then adds, patches or removes only what differs.
pub struct RouterClient {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: SecretString,
    timeout_secs: u64,
}

impl RouterClient {
    /// Create a new router client from a `TransportConfig`.
    ///
    /// `base_url` is the router root (e.g. `https://10.0.0.1`); the
    /// `/rest/` prefix is appended per request.
    pub fn new(
        base_url: Url,
        username: impl Into<String>,
        password: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            username: username.into(),
            password,
            timeout_secs: transport.timeout_secs(),
        })
    }

    /// Create a router client with a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            http,
            base_url,
            username: username.into(),
            password,
            timeout_secs: 0,
        }
    }

    /// The router base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build `{base}/rest/{path}`.
    pub(crate) fn rest_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let full = format!("{base}/rest/{}", path.trim_start_matches('/'));
        Ok(Url::parse(&full)?)
    }

    fn item_url(&self, path: &str, id: &str) -> Result<Url, Error> {
        self.rest_url(&format!("{}/{id}", path.trim_end_matches('/')))
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// GET a listing, optionally filtered by exact-match query parameters.
    pub(crate) async fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        filter: &[(&str, &str)],
    ) -> Result<Vec<T>, Error> {
        let mut url = self.rest_url(path)?;
        if !filter.is_empty() {
            url.query_pairs_mut().extend_pairs(filter.iter().copied());
        }
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let body = self.check(resp).await?.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| {
            let preview = &body[..body.len().min(200)];
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.clone(),
            }
        })
    }

    /// PUT a new entry.
    pub(crate) async fn create(&self, path: &str, body: &Map<String, Value>) -> Result<(), Error> {
        let url = self.rest_url(path)?;
        debug!("PUT {}", url);

        let resp = self
            .http
            .put(url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        self.check(resp).await?;
        Ok(())
    }

    /// PATCH an existing entry by `.id`.
    pub(crate) async fn update(
        &self,
        path: &str,
        id: &str,
        body: &Map<String, Value>,
    ) -> Result<(), Error> {
        let url = self.item_url(path, id)?;
        debug!("PATCH {}", url);

        let resp = self
            .http
            .patch(url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        self.check(resp).await?;
        Ok(())
    }

    /// DELETE an entry by `.id`. A 404 counts as success.
    pub(crate) async fn remove(&self, path: &str, id: &str) -> Result<(), Error> {
        let url = self.item_url(path, id)?;
        debug!("DELETE {}", url);

        let resp = self
            .http
            .delete(url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        match self.check(resp).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    // ── Idempotent building blocks ───────────────────────────────────

    /// Make exactly one entry matching `filter` exist with `desired` fields.
    ///
    /// Creates it when missing, patches it when any desired field differs,
    /// and removes duplicates left behind by earlier partial pushes.
    pub(crate) async fn ensure_one(
        &self,
        path: &str,
        filter: &[(&str, &str)],
        desired: &Map<String, Value>,
    ) -> Result<(), Error> {
        let existing: Vec<Map<String, Value>> = self.list(path, filter).await?;
        let mut rows = existing.into_iter();

        match rows.next() {
            None => self.create(path, desired).await?,
            Some(first) => {
                let id = row_id(&first)?;
                let patch = diff_fields(&first, desired);
                if patch.is_empty() {
                    trace!(path, id = %id, "entry already up to date");
                } else {
                    self.update(path, &id, &patch).await?;
                }
            }
        }

        for dup in rows {
            let id = row_id(&dup)?;
            self.remove(path, &id).await?;
        }
        Ok(())
    }

    /// Remove every entry matching `filter`.
    pub(crate) async fn remove_matching(
        &self,
        path: &str,
        filter: &[(&str, &str)],
    ) -> Result<usize, Error> {
        let rows: Vec<IdOnly> = self.list(path, filter).await?;
        for row in &rows {
            self.remove(path, &row.id).await?;
        }
        Ok(rows.len())
    }

    // ── Response handling ────────────────────────────────────────────

    async fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "router rejected management credentials".into(),
            });
        }

        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<RouterErrorBody>(&body)
            .ok()
            .and_then(|b| match (b.message, b.detail) {
                (Some(m), Some(d)) => Some(format!("{m}: {d}")),
                (m, d) => m.or(d),
            })
            .unwrap_or_else(|| body[..body.len().min(200)].to_owned());

        Err(Error::RouterApi {
            message,
            status: status.as_u16(),
        })
    }

    fn map_transport(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() && self.timeout_secs > 0 {
            Error::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            Error::Transport(err)
        }
    }
}

/// Build a JSON object from string pairs. RouterOS wants every value as a string.
pub(crate) fn fields(pairs: &[(&str, String)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), Value::String(v.clone())))
        .collect()
}

fn row_id(row: &Map<String, Value>) -> Result<String, Error> {
    row.get(".id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Error::Deserialization {
            message: "router entry without .id".into(),
            body: Value::Object(row.clone()).to_string(),
        })
}

/// Fields of `desired` whose value differs from `current`.
fn diff_fields(current: &Map<String, Value>, desired: &Map<String, Value>) -> Map<String, Value> {
    desired
        .iter()
        .filter(|(k, v)| current.get(k.as_str()) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_fields_reports_only_changes() {
        let current = fields(&[("name", "q".into()), ("max-limit", "10M".into())]);
        let desired = fields(&[("name", "q".into()), ("max-limit", "20M".into())]);
        let patch = diff_fields(&current, &desired);
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get("max-limit"), Some(&Value::String("20M".into())));
    }
}
