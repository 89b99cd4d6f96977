//! Protocol verbs, delivery modes, and response codes.
//!
//! These carry the stable numeric codes used for wire compatibility. Beyond
//! equality comparison and code lookup they are opaque to this core; the wire
//! codec that encodes them lives in the transport collaborator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Request verb.
///
/// The numeric codes match the CoAP method registry and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Retrieve a representation.
    Get,
    /// Create or process.
    Post,
    /// Replace.
    Put,
    /// Remove.
    Delete,
    /// Selective retrieve.
    Fetch,
    /// Partial update.
    Patch,
    /// Idempotent partial update.
    Ipatch,
}

impl Method {
    /// All seven verbs, in registry order.
    pub const ALL: [Self; 7] = [
        Self::Get,
        Self::Post,
        Self::Put,
        Self::Delete,
        Self::Fetch,
        Self::Patch,
        Self::Ipatch,
    ];

    /// Stable numeric code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Get => 1,
            Self::Post => 2,
            Self::Put => 3,
            Self::Delete => 4,
            Self::Fetch => 5,
            Self::Patch => 6,
            Self::Ipatch => 7,
        }
    }

    /// Looks up a verb by its numeric code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Get),
            2 => Some(Self::Post),
            3 => Some(Self::Put),
            4 => Some(Self::Delete),
            5 => Some(Self::Fetch),
            6 => Some(Self::Patch),
            7 => Some(Self::Ipatch),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Fetch => "FETCH",
            Self::Patch => "PATCH",
            Self::Ipatch => "IPATCH",
        };
        f.write_str(s)
    }
}

/// Message delivery mode of the transport.
///
/// Only the two data-plane modes may be used as an observe-type override;
/// acknowledgements and resets are control-plane modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Delivery requiring acknowledgement (CON).
    Confirmable,
    /// Fire-and-forget delivery (NON).
    NonConfirmable,
    /// Acknowledgement (ACK), control plane.
    Acknowledgement,
    /// Reset (RST), control plane.
    Reset,
}

impl DeliveryMode {
    /// Returns true for the control-plane modes that are rejected as
    /// observe-type overrides.
    #[must_use]
    pub const fn is_control_plane(self) -> bool {
        matches!(self, Self::Acknowledgement | Self::Reset)
    }
}

/// Response code in CoAP `class.detail` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    /// 2.01
    Created,
    /// 2.02
    Deleted,
    /// 2.03
    Valid,
    /// 2.04
    Changed,
    /// 2.05
    Content,
    /// 4.00
    BadRequest,
    /// 4.01
    Unauthorized,
    /// 4.04
    NotFound,
    /// 4.05
    MethodNotAllowed,
    /// 5.00
    InternalServerError,
}

impl ResponseCode {
    /// Raw wire code: `class << 5 | detail`.
    #[must_use]
    pub const fn raw(self) -> u8 {
        match self {
            Self::Created => 0x41,
            Self::Deleted => 0x42,
            Self::Valid => 0x43,
            Self::Changed => 0x44,
            Self::Content => 0x45,
            Self::BadRequest => 0x80,
            Self::Unauthorized => 0x81,
            Self::NotFound => 0x84,
            Self::MethodNotAllowed => 0x85,
            Self::InternalServerError => 0xA0,
        }
    }

    /// Code class (2 = success, 4 = client error, 5 = server error).
    #[must_use]
    pub const fn class(self) -> u8 {
        self.raw() >> 5
    }

    /// Code detail within the class.
    #[must_use]
    pub const fn detail(self) -> u8 {
        self.raw() & 0x1F
    }

    /// Returns true for 2.xx codes.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.class() == 2
    }

    /// Returns true for 4.xx codes.
    #[must_use]
    pub const fn is_client_error(self) -> bool {
        self.class() == 4
    }

    /// Returns true for 5.xx codes.
    #[must_use]
    pub const fn is_server_error(self) -> bool {
        self.class() == 5
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}
