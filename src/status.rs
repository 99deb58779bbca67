use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol status carried on every response envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolStatus {
    #[serde(rename = "0.DOIP/Status.001")]
    Ok,
    #[serde(rename = "0.DOIP/Status.101")]
    BadRequest,
    #[serde(rename = "0.DOIP/Status.102")]
    Unauthenticated,
    #[serde(rename = "0.DOIP/Status.103")]
    Forbidden,
    #[serde(rename = "0.DOIP/Status.104")]
    NotFound,
    #[serde(rename = "0.DOIP/Status.105")]
    Conflict,
    #[serde(rename = "0.DOIP/Status.200")]
    Declined,
    #[serde(rename = "0.DOIP/Status.500")]
    Error,
}

impl ProtocolStatus {
    pub const fn code(self) -> &'static str {
        match self {
            ProtocolStatus::Ok => "0.DOIP/Status.001",
            ProtocolStatus::BadRequest => "0.DOIP/Status.101",
            ProtocolStatus::Unauthenticated => "0.DOIP/Status.102",
            ProtocolStatus::Forbidden => "0.DOIP/Status.103",
            ProtocolStatus::NotFound => "0.DOIP/Status.104",
            ProtocolStatus::Conflict => "0.DOIP/Status.105",
            ProtocolStatus::Declined => "0.DOIP/Status.200",
            ProtocolStatus::Error => "0.DOIP/Status.500",
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, ProtocolStatus::Ok)
    }

    /// Translate a backend HTTP status into the protocol status class.
    pub fn from_http(status: u16) -> Self {
        match status {
            200..=299 => ProtocolStatus::Ok,
            400 => ProtocolStatus::BadRequest,
            401 => ProtocolStatus::Unauthenticated,
            403 => ProtocolStatus::Forbidden,
            404 => ProtocolStatus::NotFound,
            409 => ProtocolStatus::Conflict,
            _ => ProtocolStatus::Error,
        }
    }
}

impl fmt::Display for ProtocolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
