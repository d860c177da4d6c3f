//! Grant flows that turn user consent into an access token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::{AuthError, Credential, Scope};

/// Scope string requested for blog content access.
pub const CONTENT_OAUTH_SCOPE: &str = "https://www.googleapis.com/auth/blogger";

/// Scope string requested for file storage access.
pub const ASSET_OAUTH_SCOPE: &str =
    "https://www.googleapis.com/auth/drive.file https://www.googleapis.com/auth/drive.readonly";

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Interactive acquisition of a token for one scope.
#[async_trait]
pub trait GrantFlow: Send + Sync {
    /// Run the flow to completion and return the granted token.
    async fn grant(&self, scope: Scope) -> Result<String, AuthError>;

    /// Whether [`GrantFlow::revoke`] does anything remotely.
    fn revokes(&self) -> bool {
        false
    }

    async fn revoke(&self, _credential: &Credential) -> Result<(), AuthError> {
        Ok(())
    }
}

/// A token issued out of band, e.g. through an environment variable.
pub struct StaticGrant {
    token: Option<String>,
}

impl StaticGrant {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// A grant that always denies; used when no flow is configured.
    pub fn none() -> Self {
        Self { token: None }
    }

    pub fn from_option(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }
}

#[async_trait]
impl GrantFlow for StaticGrant {
    async fn grant(&self, scope: Scope) -> Result<String, AuthError> {
        self.token.clone().ok_or_else(|| AuthError::Denied {
            scope,
            reason: "no token configured and no OAuth client id set".to_string(),
        })
    }
}

/// Authorization server endpoints.
#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub device_url: String,
    pub token_url: String,
    pub revoke_url: String,
}

impl Default for OAuthEndpoints {
    fn default() -> Self {
        Self {
            device_url: "https://oauth2.googleapis.com/device/code".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            revoke_url: "https://oauth2.googleapis.com/revoke".to_string(),
        }
    }
}

impl OAuthEndpoints {
    /// Endpoints under a single base URL (`/device/code`, `/token`, `/revoke`).
    pub fn at(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            device_url: format!("{}/device/code", base),
            token_url: format!("{}/token", base),
            revoke_url: format!("{}/revoke", base),
        }
    }
}

/// What the user has to do to approve a device grant.
#[derive(Debug, Clone)]
pub struct DevicePrompt {
    pub scope: Scope,
    pub verification_url: String,
    pub user_code: String,
}

type PromptFn = Arc<dyn Fn(&DevicePrompt) + Send + Sync>;

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    #[serde(alias = "verification_uri")]
    verification_url: String,
    expires_in: u64,
    #[serde(default = "default_poll_interval")]
    interval: u64,
}

fn default_poll_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// OAuth 2.0 device authorization grant.
///
/// Shows a verification URL and code, then polls the token endpoint until
/// the user approves, denies, or the code expires.
pub struct DeviceCodeGrant {
    http: Client,
    endpoints: OAuthEndpoints,
    client_id: String,
    client_secret: Option<String>,
    oauth_scope: String,
    prompt: PromptFn,
}

impl DeviceCodeGrant {
    pub fn new(http: Client, client_id: impl Into<String>, oauth_scope: impl Into<String>) -> Self {
        Self {
            http,
            endpoints: OAuthEndpoints::default(),
            client_id: client_id.into(),
            client_secret: None,
            oauth_scope: oauth_scope.into(),
            prompt: Arc::new(print_prompt),
        }
    }

    /// Grant for the blog content API.
    pub fn for_content(http: Client, client_id: impl Into<String>) -> Self {
        Self::new(http, client_id, CONTENT_OAUTH_SCOPE)
    }

    /// Grant for the file storage API.
    pub fn for_assets(http: Client, client_id: impl Into<String>) -> Self {
        Self::new(http, client_id, ASSET_OAUTH_SCOPE)
    }

    pub fn with_client_secret(mut self, secret: Option<String>) -> Self {
        self.client_secret = secret;
        self
    }

    pub fn with_endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Fn(&DevicePrompt) + Send + Sync + 'static) -> Self {
        self.prompt = Arc::new(prompt);
        self
    }

    async fn request_code(&self, scope: Scope) -> Result<DeviceCodeResponse, AuthError> {
        let transport = |reason: String| AuthError::Transport { scope, reason };

        let response = self
            .http
            .post(&self.endpoints.device_url)
            .form(&[("client_id", self.client_id.as_str()), ("scope", self.oauth_scope.as_str())])
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(transport(format!("device endpoint returned {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| transport(format!("invalid device code response: {}", e)))
    }

    async fn poll_token(&self, scope: Scope, device_code: &str) -> Result<TokenResponse, AuthError> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("device_code", device_code),
            ("grant_type", DEVICE_GRANT_TYPE),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Transport {
                scope,
                reason: e.to_string(),
            })?;

        // Pending and denied states come back as 4xx with a JSON error body.
        response.json().await.map_err(|e| AuthError::Transport {
            scope,
            reason: format!("invalid token response: {}", e),
        })
    }
}

fn print_prompt(prompt: &DevicePrompt) {
    eprintln!(
        "To authorize {} access, visit {} and enter code {}",
        prompt.scope, prompt.verification_url, prompt.user_code
    );
}

#[async_trait]
impl GrantFlow for DeviceCodeGrant {
    async fn grant(&self, scope: Scope) -> Result<String, AuthError> {
        let code = self.request_code(scope).await?;
        let deadline = Instant::now() + Duration::from_secs(code.expires_in);
        let mut interval = Duration::from_secs(code.interval);

        (self.prompt)(&DevicePrompt {
            scope,
            verification_url: code.verification_url.clone(),
            user_code: code.user_code.clone(),
        });
        info!(scope = %scope, url = %code.verification_url, "Waiting for device authorization");

        loop {
            tokio::time::sleep(interval).await;
            if Instant::now() >= deadline {
                return Err(AuthError::Denied {
                    scope,
                    reason: "device code expired before approval".to_string(),
                });
            }

            let token = self.poll_token(scope, &code.device_code).await?;
            if let Some(access_token) = token.access_token {
                return Ok(access_token);
            }

            match token.error.as_deref() {
                Some("authorization_pending") => {
                    debug!(scope = %scope, "Authorization pending");
                }
                Some("slow_down") => {
                    interval += Duration::from_secs(5);
                    debug!(scope = %scope, interval_secs = interval.as_secs(), "Slowing down token polling");
                }
                Some(error) => {
                    return Err(AuthError::Denied {
                        scope,
                        reason: token
                            .error_description
                            .unwrap_or_else(|| error.to_string()),
                    });
                }
                None => {
                    return Err(AuthError::Transport {
                        scope,
                        reason: "token response carried neither token nor error".to_string(),
                    });
                }
            }
        }
    }

    fn revokes(&self) -> bool {
        true
    }

    async fn revoke(&self, credential: &Credential) -> Result<(), AuthError> {
        let scope = credential.scope;
        let response = self
            .http
            .post(&self.endpoints.revoke_url)
            .form(&[("token", credential.token())])
            .send()
            .await
            .map_err(|e| AuthError::Transport {
                scope,
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(AuthError::Transport {
                scope,
                reason: format!("revocation returned {}", response.status()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn device_response() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "device_code": "dev-123",
            "user_code": "ABCD-EFGH",
            "verification_url": "https://example.test/device",
            "expires_in": 60,
            "interval": 0
        }))
    }

    fn grant(server: &MockServer) -> DeviceCodeGrant {
        DeviceCodeGrant::for_content(Client::new(), "client-1")
            .with_endpoints(OAuthEndpoints::at(&server.uri()))
            .with_prompt(|_| {})
    }

    #[tokio::test]
    async fn test_device_flow_polls_until_granted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/device/code"))
            .and(body_string_contains("client_id=client-1"))
            .respond_with(device_response())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(428)
                    .set_body_json(serde_json::json!({"error": "authorization_pending"})),
            )
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("device_code=dev-123"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "granted", "expires_in": 3600})),
            )
            .mount(&server)
            .await;

        let shown = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&shown);
        let flow = grant(&server).with_prompt(move |p| {
            *seen.lock().unwrap() = Some(p.user_code.clone());
        });

        assert_eq!(flow.grant(Scope::Content).await.unwrap(), "granted");
        assert_eq!(shown.lock().unwrap().as_deref(), Some("ABCD-EFGH"));
    }

    #[tokio::test]
    async fn test_access_denied_maps_to_denied() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/device/code"))
            .respond_with(device_response())
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(serde_json::json!({"error": "access_denied"})),
            )
            .mount(&server)
            .await;

        let err = grant(&server).grant(Scope::Content).await.unwrap_err();
        assert_eq!(
            err,
            AuthError::Denied {
                scope: Scope::Content,
                reason: "access_denied".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_device_endpoint_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/device/code"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = grant(&server).grant(Scope::Content).await.unwrap_err();
        assert!(matches!(err, AuthError::Transport { scope: Scope::Content, .. }));
    }

    #[tokio::test]
    async fn test_revoke_posts_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .and(body_string_contains("token=old-token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let flow = grant(&server);
        assert!(flow.revokes());
        flow.revoke(&Credential::new(Scope::Asset, "old-token")).await.unwrap();
    }

    #[tokio::test]
    async fn test_static_grant() {
        assert_eq!(StaticGrant::new("t").grant(Scope::Asset).await.unwrap(), "t");
        assert!(matches!(
            StaticGrant::from_option(Some(String::new())).grant(Scope::Asset).await,
            Err(AuthError::Denied { .. })
        ));
        assert!(!StaticGrant::none().revokes());
    }
}
