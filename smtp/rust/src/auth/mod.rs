//! SMTP authentication with a username and password.
//!
//! Supports PLAIN (RFC 4616) and, for servers that only offer it, LOGIN.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{SmtpError, SmtpResult};

/// SASL mechanisms the session can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMechanism {
    /// PLAIN authentication (RFC 4616).
    Plain,
    /// LOGIN authentication.
    Login,
}

impl AuthMechanism {
    /// Returns the SMTP AUTH mechanism name.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            AuthMechanism::Plain => "PLAIN",
            AuthMechanism::Login => "LOGIN",
        }
    }

    /// Parses a mechanism advertised in the EHLO `AUTH` line.
    pub fn from_capability(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(AuthMechanism::Plain),
            "LOGIN" => Some(AuthMechanism::Login),
            _ => None,
        }
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mechanism_name())
    }
}

/// Username and password for the relay.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: SecretString,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }

    /// Creates credentials from an already protected password.
    pub fn from_secret(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    /// Returns the username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Base64 `\0user\0password` for `AUTH PLAIN`.
    pub fn plain_initial_response(&self) -> String {
        let response = format!("\0{}\0{}", self.username, self.password.expose_secret());
        BASE64.encode(response)
    }

    /// Base64 username for the first LOGIN challenge.
    pub fn login_username(&self) -> String {
        BASE64.encode(&self.username)
    }

    /// Base64 password for the second LOGIN challenge.
    pub fn login_password(&self) -> String {
        BASE64.encode(self.password.expose_secret())
    }

    /// Answer to a LOGIN challenge, chosen by its decoded prompt.
    ///
    /// Servers that send an unreadable prompt get the username first and the
    /// password second, in `step` order.
    pub fn login_answer(&self, challenge: &str, step: usize) -> SmtpResult<String> {
        let prompt = BASE64
            .decode(challenge.trim())
            .ok()
            .and_then(|b| String::from_utf8(b).ok())
            .map(|s| s.to_ascii_lowercase());

        match (prompt.as_deref(), step) {
            (Some(p), _) if p.starts_with("username") => Ok(self.login_username()),
            (Some(p), _) if p.starts_with("password") => Ok(self.login_password()),
            (_, 0) => Ok(self.login_username()),
            (_, 1) => Ok(self.login_password()),
            _ => Err(SmtpError::authentication(
                "Unexpected extra LOGIN challenge",
            )),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mechanism_from_capability() {
        assert_eq!(AuthMechanism::from_capability("PLAIN"), Some(AuthMechanism::Plain));
        assert_eq!(AuthMechanism::from_capability("login"), Some(AuthMechanism::Login));
        assert_eq!(AuthMechanism::from_capability("CRAM-MD5"), None);
    }

    #[test]
    fn test_plain_initial_response() {
        let creds = Credentials::new("user", "password");
        let decoded = BASE64.decode(creds.plain_initial_response()).unwrap();
        assert_eq!(decoded, b"\0user\0password");
    }

    #[test]
    fn test_login_answers_follow_prompt() {
        let creds = Credentials::new("user", "pw");
        let password_prompt = BASE64.encode("Password:");
        let username_prompt = BASE64.encode("Username:");

        assert_eq!(creds.login_answer(&password_prompt, 0).unwrap(), BASE64.encode("pw"));
        assert_eq!(creds.login_answer(&username_prompt, 1).unwrap(), BASE64.encode("user"));
        assert_eq!(creds.login_answer("???", 1).unwrap(), BASE64.encode("pw"));
        assert!(creds.login_answer("???", 2).is_err());
    }

    #[test]
    fn test_credentials_debug() {
        let creds = Credentials::new("user", "secret_password");
        let debug_str = format!("{:?}", creds);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("secret_password"));
    }
}
