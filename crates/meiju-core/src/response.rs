//! Response envelope classification and typed records.
//!
//! Every cloud endpoint answers with the same envelope shape:
//! `{"code": <int>, "data": <object?>, "msg": <string?>}` where `code == 0`
//! means success. This module turns that loosely-typed envelope into a
//! tagged [`ApiOutcome`] before any field access, and provides the typed
//! records built from list responses.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

/// Envelope code for a successful response.
pub const CODE_OK: i64 = 0;

/// The access token is invalid.
pub const CODE_TOKEN_INVALID: i64 = 40001;

/// The access token does not exist on the server.
pub const CODE_TOKEN_NOT_EXIST: i64 = 40002;

/// The access token has expired.
pub const CODE_TOKEN_EXPIRED: i64 = 40004;

/// Synthetic code for transport failures (connect, timeout, TLS).
///
/// Negative so it can never collide with a vendor code.
pub const CODE_TRANSPORT: i64 = -1;

/// Synthetic code for responses that could not be parsed as the envelope.
pub const CODE_UNPARSEABLE: i64 = -2;

/// Synthetic code for a failed credential refresh during retry.
pub const CODE_REFRESH_FAILED: i64 = -3;

/// The fixed set of vendor codes that indicate a token problem.
pub const TOKEN_ERROR_CODES: [i64; 3] =
    [CODE_TOKEN_INVALID, CODE_TOKEN_NOT_EXIST, CODE_TOKEN_EXPIRED];

/// Returns `true` exactly for the vendor token-error codes.
pub fn is_token_error_code(code: i64) -> bool {
    TOKEN_ERROR_CODES.contains(&code)
}

/// Outcome of one cloud API call.
///
/// Success and failure are always observable from the value; no operation
/// reports failure only through a panic or a thrown error. The payload type
/// defaults to raw JSON for the generic request path and is narrowed by the
/// typed list operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiOutcome<T = Value> {
    /// Envelope code 0; carries the `data` field (or an `ok` marker when
    /// the endpoint returns no data).
    Success(T),
    /// Any non-zero envelope code, or a synthetic negative code for
    /// transport/parse failures.
    Failure {
        /// Vendor code, or one of the reserved negative synthetic codes.
        code: i64,
        /// Human-readable message from the envelope or the transport error.
        message: String,
    },
}

impl<T> ApiOutcome<T> {
    /// Builds a failure outcome.
    pub fn failure(code: i64, message: impl Into<String>) -> Self {
        ApiOutcome::Failure {
            code,
            message: message.into(),
        }
    }

    /// Returns `true` for [`ApiOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, ApiOutcome::Success(_))
    }

    /// Returns `true` when this failure was caused by an invalid, expired,
    /// or missing access token.
    pub fn is_token_error(&self) -> bool {
        match self {
            ApiOutcome::Success(_) => false,
            ApiOutcome::Failure { code, .. } => is_token_error_code(*code),
        }
    }

    /// Failure code, if this is a failure.
    pub fn code(&self) -> Option<i64> {
        match self {
            ApiOutcome::Success(_) => None,
            ApiOutcome::Failure { code, .. } => Some(*code),
        }
    }

    /// Maps the success payload, passing failures through unchanged.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiOutcome<U> {
        match self {
            ApiOutcome::Success(value) => ApiOutcome::Success(f(value)),
            ApiOutcome::Failure { code, message } => ApiOutcome::Failure { code, message },
        }
    }

    /// Consumes the outcome, returning the success payload if any.
    pub fn ok(self) -> Option<T> {
        match self {
            ApiOutcome::Success(value) => Some(value),
            ApiOutcome::Failure { .. } => None,
        }
    }
}

/// Raw response envelope as sent by every endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl Envelope {
    /// Classifies the envelope into a tagged outcome.
    ///
    /// A missing or unreadable code counts as a failure, never a panic.
    /// Endpoints that succeed without a data field get a trivial marker
    /// payload so success always carries a value.
    pub fn classify(self) -> ApiOutcome {
        let code = self.code.as_ref().and_then(value_as_i64).unwrap_or(-1);
        if code == CODE_OK {
            let data = self
                .data
                .unwrap_or_else(|| serde_json::json!({ "message": "ok" }));
            ApiOutcome::Success(data)
        } else {
            ApiOutcome::Failure {
                code,
                message: self.msg.unwrap_or_else(|| "unknown error".to_string()),
            }
        }
    }
}

/// Reads an integer that the vendor may send as a number or decimal string.
pub(crate) fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Normalized representation of one vendor-reported appliance.
///
/// Built fresh on every appliance listing; never cached across calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplianceRecord {
    /// User-visible appliance name.
    pub name: String,
    /// Numeric device type parsed from the vendor's hex type code.
    pub appliance_type: u32,
    /// The type code exactly as the vendor sent it (hex text).
    pub type_hex: String,
    /// Decrypted serial number; empty when the serial field was absent or
    /// failed to decrypt.
    pub serial: String,
    /// Short serial fallback (`sn8`).
    pub short_serial: String,
    /// Product model; falls back to the short serial when absent.
    pub model: String,
    /// Whether the vendor reports the appliance online.
    pub online: bool,
    /// Name of the room the appliance is assigned to.
    pub room: String,
}

/// Home id → display name mapping returned by the home list endpoint.
pub type HomeMap = BTreeMap<i64, String>;

/// Appliance code → record mapping returned by the appliance list endpoint.
pub type ApplianceMap = BTreeMap<i64, ApplianceRecord>;

/// `data` payload of the home list endpoint.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct HomegroupListData {
    #[serde(default, rename = "homeList")]
    pub home_list: Option<Vec<HomegroupEntry>>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct HomegroupEntry {
    #[serde(default, rename = "homegroupId")]
    pub homegroup_id: Value,
    #[serde(default)]
    pub name: String,
}

/// `data` payload of the appliance list endpoint: home → room → appliance.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApplianceListData {
    #[serde(default, rename = "homeList")]
    pub home_list: Option<Vec<ApplianceHomeEntry>>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApplianceHomeEntry {
    #[serde(default, rename = "roomList")]
    pub room_list: Option<Vec<RoomEntry>>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RoomEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "applianceList")]
    pub appliance_list: Option<Vec<ApplianceEntry>>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApplianceEntry {
    #[serde(default, rename = "applianceCode")]
    pub appliance_code: Value,
    #[serde(default)]
    pub name: String,
    /// Device type as hex text, e.g. `"0xAC"` or `"AC"`.
    #[serde(default, rename = "type")]
    pub type_hex: String,
    /// Encrypted serial number (hex ciphertext under the session key).
    #[serde(default)]
    pub sn: String,
    #[serde(default)]
    pub sn8: String,
    #[serde(default, rename = "productModel")]
    pub product_model: String,
    /// `"1"` (or `1`) when online.
    #[serde(default, rename = "onlineStatus")]
    pub online_status: Value,
}

impl ApplianceEntry {
    /// Parses the hex type code into its numeric form; 0 when unreadable.
    pub fn numeric_type(&self) -> u32 {
        let trimmed = self
            .type_hex
            .trim_start_matches("0x")
            .trim_start_matches("0X");
        u32::from_str_radix(trimmed, 16).unwrap_or_default()
    }

    pub fn is_online(&self) -> bool {
        match &self.online_status {
            Value::String(s) => s == "1",
            Value::Number(n) => n.as_i64() == Some(1),
            _ => false,
        }
    }
}
