//! HTTP client for the secret store API, reached through a tunnel to one of the cluster nodes.

use super::{
    error, InitKeys, Result, Secret, SecretInit, SecretKv, SecretPolicy, SecretUnseal,
    VaultStatus,
};
use async_trait::async_trait;
use log::trace;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use snafu::{OptionExt, ResultExt};
use url::Url;

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Returned by a standby node that can't forward the request
const NOT_ACTIVE: &str = "local node not active";

#[derive(Debug, Clone)]
pub(crate) struct VaultClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl VaultClient {
    pub(crate) fn new(base: Url, verify_ssl: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .context(error::HttpSnafu {
                url: base.as_str(),
            })?;
        Ok(Self {
            http,
            base,
            token: None,
        })
    }

    /// Client for `http://localhost:<port>/`, the local end of a tunnel
    pub(crate) fn local(port: u16, verify_ssl: bool) -> Result<Self> {
        let address = format!("http://localhost:{}/", port);
        let base = Url::parse(&address).context(error::UrlSnafu { url: &address })?;
        Self::new(base, verify_ssl)
    }

    pub(crate) fn with_token<S: Into<String>>(mut self, token: S) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> Result<Url> {
        let path = format!("v1/{}", path.trim_start_matches('/'));
        self.base
            .join(&path)
            .context(error::UrlSnafu { url: path.as_str() })
    }

    /// Sends one request.  Returns the JSON body, or `None` for an empty body or a 404.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<Option<serde_json::Value>> {
        let url = self.url(path)?;
        trace!("{} {}", method, url);
        let mut request = self.http.request(method, url.clone()).query(query);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .context(error::HttpSnafu { url: url.as_str() })?;
        let code = response.status();
        let text = response
            .text()
            .await
            .context(error::HttpSnafu { url: url.as_str() })?;

        if code == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !code.is_success() {
            if text.contains(NOT_ACTIVE) {
                return error::NotActiveSnafu { url: url.as_str() }.fail();
            }
            return error::StatusSnafu {
                url: url.as_str(),
                code,
                body: text,
            }
            .fail();
        }
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .context(error::InvalidResponseSnafu { url: url.as_str() })
    }

    /// Sends a request whose response must carry a body
    async fn fetch(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.send(method, path, query, body)
            .await?
            .context(error::MissingFieldSnafu {
                url: path,
                field: "body",
            })
    }

    /// Mount points listed by `sys/audit`, `sys/auth` and `sys/mounts`
    async fn mounts(&self, path: &str) -> Result<Vec<String>> {
        let body = self.send(Method::GET, path, &[], None).await?;
        Ok(mount_names(body))
    }
}

/// Older servers list mounts at the top level, newer ones also under `data`.
fn mount_names(body: Option<serde_json::Value>) -> Vec<String> {
    let body = match body {
        Some(serde_json::Value::Object(body)) => body,
        _ => return Vec::new(),
    };
    let mounts = match body.get("data") {
        Some(serde_json::Value::Object(data)) => data,
        _ => &body,
    };
    mounts
        .keys()
        .filter(|name| name.ends_with('/'))
        .cloned()
        .collect()
}

fn field<'a>(body: &'a serde_json::Value, pointer: &str, path: &str) -> Result<&'a serde_json::Value> {
    body.pointer(pointer).context(error::MissingFieldSnafu {
        url: path,
        field: pointer,
    })
}

fn strings(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct InitResponse {
    root_token: String,
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    recovery_keys: Vec<String>,
}

#[async_trait]
impl SecretInit for VaultClient {
    async fn status(&self) -> Result<Option<VaultStatus>> {
        // Map every state onto 200 so the body can always be read
        let query = [
            ("standbycode", "200"),
            ("sealedcode", "200"),
            ("uninitcode", "200"),
        ];
        let body = match self.send(Method::GET, "sys/health", &query, None).await {
            Ok(body) => body,
            Err(e) if e.is_not_ready() => return Ok(None),
            Err(e) => return Err(e),
        };
        match body {
            Some(body) => serde_json::from_value(body)
                .map(Some)
                .context(error::InvalidResponseSnafu { url: "sys/health" }),
            None => Ok(None),
        }
    }

    async fn init(&self, recovery_shares: u32, recovery_threshold: u32) -> Result<InitKeys> {
        let body = json!({
            "secret_shares": 1,
            "secret_threshold": 1,
            "stored_shares": 1,
            "recovery_shares": recovery_shares,
            "recovery_threshold": recovery_threshold,
        });
        let response = self.fetch(Method::PUT, "sys/init", &[], Some(body)).await?;
        let response: InitResponse = serde_json::from_value(response)
            .context(error::InvalidResponseSnafu { url: "sys/init" })?;
        let recovery_keys = if response.recovery_keys.is_empty() {
            response.keys
        } else {
            response.recovery_keys
        };
        Ok(InitKeys {
            root_token: response.root_token,
            recovery_keys,
        })
    }
}

#[async_trait]
impl SecretUnseal for VaultClient {
    async fn unseal(&self, key: &str) -> Result<bool> {
        let body = self
            .fetch(Method::PUT, "sys/unseal", &[], Some(json!({ "key": key })))
            .await?;
        Ok(field(&body, "/sealed", "sys/unseal")?
            .as_bool()
            .unwrap_or(true))
    }

    async fn seal(&self) -> Result<()> {
        self.send(Method::PUT, "sys/seal", &[], None).await?;
        Ok(())
    }
}

#[async_trait]
impl SecretKv for VaultClient {
    async fn read(&self, path: &str) -> Result<Option<Secret>> {
        let body = self.send(Method::GET, path, &[], None).await?;
        Ok(body.and_then(|body| match body.get("data") {
            Some(serde_json::Value::Object(data)) => Some(data.clone()),
            _ => None,
        }))
    }

    async fn write(&self, path: &str, data: &Secret) -> Result<()> {
        self.send(
            Method::PUT,
            path,
            &[],
            Some(serde_json::Value::Object(data.clone())),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.send(Method::DELETE, path, &[], None).await?;
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let body = self
            .send(Method::GET, path, &[("list", "true")], None)
            .await?;
        Ok(body
            .as_ref()
            .and_then(|body| body.pointer("/data/keys"))
            .map(strings)
            .unwrap_or_default())
    }
}

#[async_trait]
impl SecretPolicy for VaultClient {
    async fn write_policy(&self, name: &str, rules: &str) -> Result<()> {
        self.send(
            Method::PUT,
            &format!("sys/policy/{}", name),
            &[],
            Some(json!({ "policy": rules })),
        )
        .await?;
        Ok(())
    }

    async fn audit_devices(&self) -> Result<Vec<String>> {
        self.mounts("sys/audit").await
    }

    async fn enable_audit(&self, path: &str, kind: &str, options: &Secret) -> Result<()> {
        self.send(
            Method::PUT,
            &format!("sys/audit/{}", path),
            &[],
            Some(json!({ "type": kind, "options": options })),
        )
        .await?;
        Ok(())
    }

    async fn auth_backends(&self) -> Result<Vec<String>> {
        self.mounts("sys/auth").await
    }

    async fn enable_auth(&self, path: &str, kind: &str) -> Result<()> {
        self.send(
            Method::POST,
            &format!("sys/auth/{}", path),
            &[],
            Some(json!({ "type": kind })),
        )
        .await?;
        Ok(())
    }

    async fn secrets_engines(&self) -> Result<Vec<String>> {
        self.mounts("sys/mounts").await
    }

    async fn enable_secrets(&self, path: &str, kind: &str) -> Result<()> {
        self.send(
            Method::POST,
            &format!("sys/mounts/{}", path),
            &[],
            Some(json!({ "type": kind })),
        )
        .await?;
        Ok(())
    }

    async fn provision(&self, policy: &str) -> Result<String> {
        let body = self
            .fetch(
                Method::POST,
                "auth/token/create",
                &[],
                Some(json!({ "policies": [policy] })),
            )
            .await?;
        let token = field(&body, "/auth/client_token", "auth/token/create")?;
        Ok(token.as_str().unwrap_or_default().to_string())
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        self.send(
            Method::POST,
            "auth/token/revoke",
            &[],
            Some(json!({ "token": token })),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{mount_names, VaultClient};
    use serde_json::json;

    #[test]
    fn api_paths() {
        let client = VaultClient::local(8200, true).unwrap();
        assert_eq!(
            client.url("secret/endpoint/auth").unwrap().as_str(),
            "http://localhost:8200/v1/secret/endpoint/auth"
        );
        assert_eq!(
            client.url("/sys/health").unwrap().as_str(),
            "http://localhost:8200/v1/sys/health"
        );
    }

    #[test]
    fn mounts_from_either_layout() {
        let flat = json!({ "file/": { "type": "file" }, "request_id": "x" });
        assert_eq!(mount_names(Some(flat)), vec!["file/"]);

        let nested = json!({
            "aws/": { "type": "aws" },
            "data": { "aws/": { "type": "aws" }, "token/": { "type": "token" } }
        });
        assert_eq!(mount_names(Some(nested)), vec!["aws/", "token/"]);
        assert!(mount_names(None).is_empty());
    }
}
