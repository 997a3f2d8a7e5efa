use base64::{engine::general_purpose, Engine as _};
use std::collections::HashMap;
use std::fmt;

pub const DEFAULT_CLIENT: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    MissingHeader,
    NotBasic,
    BadEncoding,
    UnknownCredentials,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHeader => write!(f, "missing authorization header"),
            Self::NotBasic => write!(f, "authorization scheme is not basic"),
            Self::BadEncoding => write!(f, "malformed basic credentials"),
            Self::UnknownCredentials => write!(f, "unknown client or wrong key"),
        }
    }
}

impl std::error::Error for AuthError {}

#[derive(Debug, Clone, Default)]
pub struct BasicAuth {
    enabled: bool,
    clients: HashMap<String, String>,
}

impl BasicAuth {
    pub fn new(enabled: bool, clients: HashMap<String, String>) -> Self {
        Self { enabled, clients }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn resolve(&self, authorization: Option<&str>) -> Result<String, AuthError> {
        if !self.enabled {
            return Ok(DEFAULT_CLIENT.to_string());
        }
        let header = authorization.ok_or(AuthError::MissingHeader)?;
        let encoded = header
            .trim()
            .strip_prefix("Basic ")
            .ok_or(AuthError::NotBasic)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| AuthError::BadEncoding)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::BadEncoding)?;
        let (user, key) = decoded.split_once(':').ok_or(AuthError::BadEncoding)?;

        match self.clients.get(user) {
            Some(expected) if expected == key => Ok(user.to_string()),
            _ => Err(AuthError::UnknownCredentials),
        }
    }
}
