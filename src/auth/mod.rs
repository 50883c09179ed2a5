//! Shared-secret access control
//!
//! A single numeric PIN guards every endpoint. Browsers present it once as
//! the `t` query parameter on `/`, receive a cookie in exchange and are
//! redirected to the bare root so the PIN does not linger in history.


use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Name of the credential cookie
pub const COOKIE_NAME: &str = "pin";

/// Query parameter carrying the token
pub const QUERY_PARAM: &str = "t";

/// Lifetime of the credential cookie (24 hours)
pub const COOKIE_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// Authorization failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing or invalid PIN for {path}")]
    Unauthorized { path: String },
}

/// The parts of a request the gate looks at
#[derive(Debug, Clone, Copy)]
pub struct AuthRequest<'a> {
    pub path: &'a str,
    /// Raw query string without the leading `?`
    pub query: Option<&'a str>,
    /// Raw `Cookie` header value
    pub cookie_header: Option<&'a str>,
}

/// Outcome of a successful authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthGrant {
    /// Serve the request normally
    Pass,
    /// First visit: answer with a redirect that sets the cookie
    Handshake { set_cookie: String, location: String },
}

/// Validates the shared secret
#[derive(Clone, Default)]
pub struct AuthGate {
    secret: Option<SecretString>,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl AuthGate {
    /// Gate with an optional secret. `None` lets every request through.
    pub fn new(secret: Option<SecretString>) -> Self {
        Self { secret }
    }

    /// Gate that lets every request through
    pub fn open() -> Self {
        Self { secret: None }
    }

    /// Gate guarded by the given PIN
    pub fn with_pin(pin: impl Into<String>) -> Self {
        Self {
            secret: Some(SecretString::new(pin.into())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Constant-time comparison against the configured secret
    pub fn validate_token(&self, candidate: &str) -> bool {
        match &self.secret {
            None => true,
            Some(secret) => {
                let secret = secret.expose_secret().as_bytes();
                let candidate = candidate.as_bytes();
                secret.len() == candidate.len()
                    && secret
                        .iter()
                        .zip(candidate)
                        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                        == 0
            }
        }
    }

    /// Decide whether a request may proceed
    pub fn authorize(&self, request: &AuthRequest<'_>) -> Result<AuthGrant, AuthError> {
        let Some(secret) = &self.secret else {
            return Ok(AuthGrant::Pass);
        };

        let cookie_ok = request
            .cookie_header
            .and_then(|header| cookie_value(header, COOKIE_NAME))
            .is_some_and(|value| self.validate_token(value));
        if cookie_ok {
            return Ok(AuthGrant::Pass);
        }

        let query_ok = request
            .query
            .and_then(|query| query_value(query, QUERY_PARAM))
            .is_some_and(|value| self.validate_token(&value));
        if query_ok {
            if request.path == "/" {
                tracing::debug!("PIN accepted from query, issuing cookie");
                return Ok(AuthGrant::Handshake {
                    set_cookie: format!(
                        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
                        COOKIE_NAME,
                        secret.expose_secret(),
                        COOKIE_MAX_AGE_SECS
                    ),
                    location: "/".to_string(),
                });
            }
            return Ok(AuthGrant::Pass);
        }

        Err(AuthError::Unauthorized {
            path: request.path.to_string(),
        })
    }
}

/// Find a cookie by name in a `Cookie` header value
pub(crate) fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key.trim() == name).then(|| value.trim().trim_matches('"'))
    })
}

/// Find a query parameter by name, percent-decoded
pub(crate) fn query_value(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
