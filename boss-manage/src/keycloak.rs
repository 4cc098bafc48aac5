//! Admin client for the identity provider.  It logs into the master realm with a password grant
//! and edits realm clients; every non-success response becomes an error carrying the body.

use crate::poll::poll;
use log::{debug, info};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use snafu::{OptionExt, ResultExt};
use std::time::Duration;
use url::Url;

const ADMIN_REALM: &str = "master";
const ADMIN_CLIENT: &str = "admin-cli";
const INSTALLATION_PROVIDER: &str = "keycloak-oidc-keycloak-json";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Session {
    access_token: String,
    refresh_token: Option<String>,
}

#[derive(Debug)]
pub(crate) struct Keycloak {
    http: reqwest::Client,
    base: Url,
    session: Option<Session>,
}

impl Keycloak {
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
            session: None,
        })
    }

    /// Client for `http://localhost:<port>/`, the local end of a tunnel
    pub(crate) fn local(port: u16, verify_ssl: bool) -> Result<Self> {
        let address = format!("http://localhost:{}/", port);
        let base = Url::parse(&address).context(error::UrlSnafu { url: &address })?;
        Self::new(base, verify_ssl)
    }

    fn url(&self, path: &str) -> Result<Url> {
        let path = format!("auth/{}", path.trim_start_matches('/'));
        self.base
            .join(&path)
            .context(error::UrlSnafu { url: path.as_str() })
    }

    fn token_path(realm: &str) -> String {
        format!("realms/{}/protocol/openid-connect/token", realm)
    }

    /// Sends a request and returns the body; non-success codes become `Status` errors.
    async fn send(&self, request: reqwest::RequestBuilder, url: &Url) -> Result<Option<Value>> {
        let response = request
            .send()
            .await
            .context(error::HttpSnafu { url: url.as_str() })?;
        let code = response.status();
        let text = response
            .text()
            .await
            .context(error::HttpSnafu { url: url.as_str() })?;
        if !code.is_success() {
            return error::StatusSnafu {
                url: url.as_str(),
                code,
                body: text,
            }
            .fail();
        }
        if text.trim().is_empty() || code == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .context(error::InvalidResponseSnafu { url: url.as_str() })
    }

    /// An authenticated admin API call
    async fn admin(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<Value>> {
        let session = self.session.as_ref().context(error::NotLoggedInSnafu)?;
        let url = self.url(&format!("admin/realms/{}", path))?;
        debug!("{} {}", method, url);
        let mut request = self
            .http
            .request(method, url.clone())
            .bearer_auth(&session.access_token);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request, &url).await
    }

    /// Waits until the provider serves its master realm.
    pub(crate) async fn wait_ready(&self, interval: Duration, timeout: Duration) -> Result<()> {
        let url = self.url(&format!("realms/{}", ADMIN_REALM))?;
        let keycloak = self;
        poll("identity provider", interval, Some(timeout), move || {
            let request = keycloak.http.get(url.clone());
            let url = url.clone();
            async move {
                match keycloak.send(request, &url).await {
                    Ok(_) => Ok(Some(())),
                    Err(Error::Http { .. }) => Ok(None),
                    Err(Error::Status { code, .. }) if code.is_server_error() => Ok(None),
                    Err(e) => Err(e),
                }
            }
        })
        .await?
        .context(error::TimeoutSnafu {
            what: "identity provider",
        })
    }

    async fn password_grant(
        &self,
        realm: &str,
        client_id: &str,
        username: &str,
        password: &str,
    ) -> Result<Session> {
        let url = self.url(&Self::token_path(realm))?;
        let form = [
            ("grant_type", "password"),
            ("client_id", client_id),
            ("username", username),
            ("password", password),
        ];
        let request = self.http.post(url.clone()).form(&form);
        let body = self
            .send(request, &url)
            .await
            .map_err(|e| e.into_login(username))?
            .context(error::MissingFieldSnafu {
                url: url.as_str(),
                field: "body",
            })?;
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .context(error::MissingFieldSnafu {
                url: url.as_str(),
                field: "access_token",
            })?
            .to_string();
        let refresh_token = body
            .get("refresh_token")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Session {
            access_token,
            refresh_token,
        })
    }

    /// Logs into the master realm as an administrator.
    pub(crate) async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        info!("Logging into the identity provider as '{}'", username);
        let session = self
            .password_grant(ADMIN_REALM, ADMIN_CLIENT, username, password)
            .await?;
        self.session = Some(session);
        Ok(())
    }

    /// Ends the admin session.  Without a session this does nothing.
    pub(crate) async fn logout(&mut self) -> Result<()> {
        let session = match self.session.take() {
            Some(session) => session,
            None => return Ok(()),
        };
        let refresh_token = match session.refresh_token {
            Some(token) => token,
            None => return Ok(()),
        };
        let url = self.url(&format!(
            "realms/{}/protocol/openid-connect/logout",
            ADMIN_REALM
        ))?;
        let form = [("client_id", ADMIN_CLIENT), ("refresh_token", refresh_token.as_str())];
        let request = self
            .http
            .post(url.clone())
            .bearer_auth(&session.access_token)
            .form(&form);
        self.send(request, &url).await?;
        debug!("Logged out of the identity provider");
        Ok(())
    }

    /// Bearer token for a user of `realm`, as an application client would get it
    pub(crate) async fn user_token(
        &self,
        realm: &str,
        client_id: &str,
        username: &str,
        password: &str,
    ) -> Result<String> {
        let session = self
            .password_grant(realm, client_id, username, password)
            .await?;
        Ok(session.access_token)
    }

    pub(crate) async fn realm(&self, realm: &str) -> Result<Value> {
        self.admin(Method::GET, realm, None)
            .await?
            .context(error::MissingRealmSnafu { realm })
    }

    /// The client registration whose `clientId` is `client_id`
    pub(crate) async fn client(&self, realm: &str, client_id: &str) -> Result<Value> {
        let clients = self
            .admin(
                Method::GET,
                &format!("{}/clients?clientId={}", realm, client_id),
                None,
            )
            .await?;
        clients
            .as_ref()
            .and_then(Value::as_array)
            .and_then(|clients| clients.first())
            .cloned()
            .context(error::MissingClientSnafu { realm, client_id })
    }

    fn internal_id<'a>(client: &'a Value, realm: &str, client_id: &str) -> Result<&'a str> {
        client
            .get("id")
            .and_then(Value::as_str)
            .context(error::MissingClientSnafu { realm, client_id })
    }

    /// Adds `uri` to the client's redirect URIs.  Returns false when it was already there.
    pub(crate) async fn append_redirect_uri(
        &self,
        realm: &str,
        client_id: &str,
        uri: &str,
    ) -> Result<bool> {
        let mut client = self.client(realm, client_id).await?;
        if !add_redirect_uri(&mut client, uri) {
            debug!("{} already redirects to {}", client_id, uri);
            return Ok(false);
        }
        let id = Self::internal_id(&client, realm, client_id)?.to_string();
        info!("Adding redirect URI {} to {}", uri, client_id);
        self.admin(
            Method::PUT,
            &format!("{}/clients/{}", realm, id),
            Some(&client),
        )
        .await?;
        Ok(true)
    }

    /// Creates the client scopes in `names` that the realm doesn't have yet, returning the ones
    /// created.
    pub(crate) async fn ensure_client_scopes(
        &self,
        realm: &str,
        names: &[&str],
    ) -> Result<Vec<String>> {
        let existing = self
            .admin(Method::GET, &format!("{}/client-scopes", realm), None)
            .await?
            .unwrap_or(Value::Null);
        let missing = missing_scopes(&existing, names);
        for name in &missing {
            info!("Creating client scope '{}' in {}", name, realm);
            let scope = serde_json::json!({
                "name": name,
                "protocol": "openid-connect",
                "attributes": { "include.in.token.scope": "true" },
            });
            self.admin(
                Method::POST,
                &format!("{}/client-scopes", realm),
                Some(&scope),
            )
            .await?;
        }
        Ok(missing)
    }

    /// URL of the client's adapter configuration
    pub(crate) async fn installation_url(&self, realm: &str, client_id: &str) -> Result<Url> {
        let client = self.client(realm, client_id).await?;
        let id = Self::internal_id(&client, realm, client_id)?;
        self.url(&format!(
            "admin/realms/{}/clients/{}/installation/providers/{}",
            realm, id, INSTALLATION_PROVIDER
        ))
    }
}

/// Adds `uri` to `redirectUris`, returning false when it is already present.
fn add_redirect_uri(client: &mut Value, uri: &str) -> bool {
    let uris = client
        .as_object_mut()
        .map(|client| client.entry("redirectUris").or_insert_with(|| Value::Array(Vec::new())));
    match uris.and_then(Value::as_array_mut) {
        Some(uris) if uris.iter().any(|existing| existing == uri) => false,
        Some(uris) => {
            uris.push(Value::from(uri));
            true
        }
        None => false,
    }
}

fn missing_scopes(existing: &Value, wanted: &[&str]) -> Vec<String> {
    let names: Vec<&str> = existing
        .as_array()
        .map(|scopes| {
            scopes
                .iter()
                .filter_map(|scope| scope.get("name").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    wanted
        .iter()
        .filter(|name| !names.contains(name))
        .map(|name| name.to_string())
        .collect()
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Request to {} failed: {}", url, source))]
        Http { url: String, source: reqwest::Error },

        #[snafu(display("Invalid response from {}: {}", url, source))]
        InvalidResponse {
            url: String,
            source: serde_json::Error,
        },

        #[snafu(display("Failed to log in as '{}': {} {}", username, code, body))]
        Login {
            username: String,
            code: reqwest::StatusCode,
            body: String,
        },

        #[snafu(display("No client '{}' in realm '{}'", client_id, realm))]
        MissingClient { realm: String, client_id: String },

        #[snafu(display("Response from {} is missing '{}'", url, field))]
        MissingField { url: String, field: String },

        #[snafu(display("No realm '{}'", realm))]
        MissingRealm { realm: String },

        #[snafu(display("Not logged into the identity provider"))]
        NotLoggedIn,

        #[snafu(display("Identity provider returned {} for {}: {}", code, url, body))]
        Status {
            url: String,
            code: reqwest::StatusCode,
            body: String,
        },

        #[snafu(display("Timed out waiting for {}", what))]
        Timeout { what: String },

        #[snafu(display("Invalid identity provider URL {}: {}", url, source))]
        Url {
            url: String,
            source: url::ParseError,
        },
    }
}
pub(crate) use error::Error;
pub(crate) type Result<T> = std::result::Result<T, error::Error>;

impl Error {
    /// Rejected credentials are reported as a login failure
    fn into_login(self, username: &str) -> Self {
        match self {
            Error::Status { code, body, .. } if code.is_client_error() => Error::Login {
                username: username.to_string(),
                code,
                body,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{add_redirect_uri, missing_scopes, Error, Keycloak};
    use serde_json::json;

    #[test]
    fn appends_redirect_once() {
        let mut client = json!({ "id": "1234", "clientId": "endpoint", "redirectUris": ["https://api.theboss.io/*"] });
        assert!(add_redirect_uri(&mut client, "https://api-a.theboss.io/*"));
        assert!(!add_redirect_uri(&mut client, "https://api-a.theboss.io/*"));
        assert_eq!(
            client["redirectUris"],
            json!(["https://api.theboss.io/*", "https://api-a.theboss.io/*"])
        );

        let mut bare = json!({ "id": "5678" });
        assert!(add_redirect_uri(&mut bare, "https://x/*"));
        assert_eq!(bare["redirectUris"], json!(["https://x/*"]));
    }

    #[test]
    fn only_missing_scopes_are_created() {
        let existing = json!([{ "name": "profile" }, { "name": "email" }]);
        assert_eq!(
            missing_scopes(&existing, &["profile", "groups", "email", "roles"]),
            vec!["groups", "roles"]
        );
        assert_eq!(missing_scopes(&json!(null), &["groups"]), vec!["groups"]);
    }

    #[test]
    fn rejected_credentials_are_login_errors() {
        let err = Error::Status {
            url: "http://localhost/auth".to_string(),
            code: reqwest::StatusCode::UNAUTHORIZED,
            body: "{\"error\":\"invalid_grant\"}".to_string(),
        }
        .into_login("admin");
        assert!(matches!(err, Error::Login { .. }));
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn admin_calls_need_a_session() {
        let keycloak = Keycloak::local(8080, true).unwrap();
        assert!(matches!(
            keycloak.realm("BOSS").await,
            Err(Error::NotLoggedIn)
        ));
        assert_eq!(
            keycloak.url("realms/master").unwrap().as_str(),
            "http://localhost:8080/auth/realms/master"
        );
    }
}
