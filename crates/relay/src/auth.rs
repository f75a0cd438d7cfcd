//! Authentication state machine (§4.6): `unauthenticated -> auth ->
//! authenticated(deviceType)`. Pylon auth checks an IP allow-list; app
//! auth optionally verifies a Google OAuth id token against an injected
//! verifier plus an email allow-list; viewer auth only requires a
//! non-empty `shareId`.

use async_trait::async_trait;

use pylon_domain::entities::DeviceType;
use pylon_domain::error::Error;

/// Verifies a Google-issued OAuth id token and returns the verified
/// email. Injected so tests can supply a canned verifier instead of
/// calling out to Google.
#[async_trait]
pub trait GoogleIdTokenVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<String, String>;
}

/// Calls Google's tokeninfo endpoint, the simplest verification path that
/// needs no service-account key.
pub struct GoogleTokenInfoVerifier {
    client: reqwest::Client,
}

impl GoogleTokenInfoVerifier {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for GoogleTokenInfoVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GoogleIdTokenVerifier for GoogleTokenInfoVerifier {
    async fn verify(&self, id_token: &str) -> Result<String, String> {
        let url = format!("https://oauth2.googleapis.com/tokeninfo?id_token={id_token}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("tokeninfo request failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("tokeninfo returned {}", response.status()));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("tokeninfo body parse failed: {e}"))?;
        body.get("email")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| "tokeninfo response missing email".to_string())
    }
}

pub struct AuthRequest<'a> {
    pub device_type: DeviceType,
    pub device_index: Option<u8>,
    pub id_token: Option<&'a str>,
    pub share_id: Option<&'a str>,
    pub ip: &'a str,
}

pub struct AuthOutcome {
    pub device_index: u8,
    pub email: Option<String>,
}

/// Pylon auth: `deviceIndex` required, validated against the
/// per-index IP allow-list. An empty allow-list for that index means no
/// restriction is configured and any IP is accepted.
pub fn authenticate_pylon(
    device_index: Option<u8>,
    ip: &str,
    allowlist: &std::collections::HashMap<u8, Vec<String>>,
) -> Result<AuthOutcome, Error> {
    let device_index = device_index.ok_or_else(|| Error::AuthFailed { reason: "deviceIndex required for pylon".into() })?;
    if let Some(allowed_ips) = allowlist.get(&device_index) {
        if !allowed_ips.is_empty() && !allowed_ips.iter().any(|allowed| allowed == ip) {
            return Err(Error::AuthFailed { reason: format!("ip {ip} not allow-listed for pylon {device_index}") });
        }
    }
    Ok(AuthOutcome { device_index, email: None })
}

/// App auth: device index is auto-allocated by the caller (the registry
/// owns the allocator); this function only handles the optional OAuth
/// verification step.
pub async fn authenticate_app(
    id_token: Option<&str>,
    allowlist: &[String],
    verifier: &dyn GoogleIdTokenVerifier,
) -> Result<Option<String>, Error> {
    let Some(token) = id_token else {
        return Ok(None);
    };
    let email = verifier
        .verify(token)
        .await
        .map_err(|reason| Error::AuthFailed { reason })?;
    if !allowlist.is_empty() && !allowlist.iter().any(|allowed| allowed == &email) {
        return Err(Error::AuthFailed { reason: format!("email {email} not allow-listed") });
    }
    Ok(Some(email))
}

/// Viewer auth: a non-empty `shareId` is sufficient; cross-process
/// validation happens later, when the viewer issues `share_history` and a
/// Pylon checks the id against its own linked-document state.
pub fn authenticate_viewer(share_id: Option<&str>) -> Result<&str, Error> {
    match share_id {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(Error::AuthFailed { reason: "shareId required for viewer".into() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pylon_auth_requires_device_index() {
        let result = authenticate_pylon(None, "127.0.0.1", &Default::default());
        assert!(result.is_err());
    }

    #[test]
    fn pylon_auth_rejects_unlisted_ip() {
        let mut allowlist = std::collections::HashMap::new();
        allowlist.insert(1u8, vec!["10.0.0.1".to_string()]);
        let result = authenticate_pylon(Some(1), "10.0.0.2", &allowlist);
        assert!(matches!(result, Err(Error::AuthFailed { .. })));
    }

    #[test]
    fn pylon_auth_admits_unrestricted_index() {
        let result = authenticate_pylon(Some(2), "1.2.3.4", &Default::default());
        assert!(result.is_ok());
    }

    #[test]
    fn viewer_auth_rejects_empty_share_id() {
        assert!(authenticate_viewer(Some("")).is_err());
        assert!(authenticate_viewer(None).is_err());
    }

    #[test]
    fn viewer_auth_accepts_non_empty_share_id() {
        assert_eq!(authenticate_viewer(Some("s1")).unwrap(), "s1");
    }

    struct StubVerifier(Result<String, String>);

    #[async_trait]
    impl GoogleIdTokenVerifier for StubVerifier {
        async fn verify(&self, _id_token: &str) -> Result<String, String> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn app_auth_without_token_is_admitted() {
        let verifier = StubVerifier(Ok("ignored@example.com".into()));
        let result = authenticate_app(None, &[], &verifier).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn app_auth_rejects_email_outside_allowlist() {
        let verifier = StubVerifier(Ok("outsider@example.com".into()));
        let result = authenticate_app(Some("tok"), &["insider@example.com".to_string()], &verifier).await;
        assert!(matches!(result, Err(Error::AuthFailed { .. })));
    }

    #[tokio::test]
    async fn app_auth_accepts_allow_listed_email() {
        let verifier = StubVerifier(Ok("insider@example.com".into()));
        let result = authenticate_app(Some("tok"), &["insider@example.com".to_string()], &verifier)
            .await
            .unwrap();
        assert_eq!(result.as_deref(), Some("insider@example.com"));
    }
}
