//! ## Structural Validation
//!
//! Cheap checks on the shape and size of legacy requests, run before anything is decoded into
//! typed records. They bound the work a remote peer can cause; they do not validate content.
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;

use super::{DISCONNECT_EVENT, HANDSHAKE_EVENT};
use crate::{codecs::MAX_BLOCKS_PER_BATCH, config::Limits, method::Method};

pub const MAX_COMMON_BLOCK_IDS: usize = 10;
pub const MAX_TRANSACTION_PROPERTIES: usize = 50;
pub const MAX_ASSET_PROPERTIES: usize = 100;
pub const MAX_MULTI_PAYMENTS: usize = 128;

static BLOCK_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[0-9]{1,20}|(?i:[0-9a-f]{16})|(?i:[0-9a-f]{64}))$")
        .expect("block id pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    NotAnObject(&'static str),
    UnknownEvent(String),
    UnexpectedKey { at: &'static str, key: String },
    MissingField(&'static str),
    InvalidField { field: &'static str, reason: String },
    TooLarge {
        what: &'static str,
        limit: usize,
        actual: usize,
    },
}

impl ValidationError {
    /// Whether this is a size or count violation rather than a shape violation.
    pub fn is_limit(&self) -> bool {
        matches!(self, ValidationError::TooLarge { .. })
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ValidationError::*;
        match self {
            NotAnObject(what) => write!(f, "`{what}` must be an object"),
            UnknownEvent(event) => write!(f, "unknown event `{event}`"),
            UnexpectedKey { at, key } => write!(f, "unexpected key `{key}` in `{at}`"),
            MissingField(field) => write!(f, "missing `{field}`"),
            InvalidField { field, reason } => write!(f, "invalid `{field}`: {reason}"),
            TooLarge {
                what,
                limit,
                actual,
            } => write!(f, "{what}: {actual} exceeds the limit of {limit}"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Checks the raw size of a legacy request.
pub fn check_request_size(text: &str, limits: &Limits) -> Result<(), ValidationError> {
    check_size("request bytes", text.len(), limits.max_request_bytes)
}

/// Checks the raw size of a legacy response.
pub fn check_response_size(text: &str, limits: &Limits) -> Result<(), ValidationError> {
    check_size("response bytes", text.len(), limits.max_response_bytes)
}

/// Validates a parsed `{event, data, cid}` envelope.
pub fn validate_request(message: &Value, limits: &Limits) -> Result<(), ValidationError> {
    let envelope = message
        .as_object()
        .ok_or(ValidationError::NotAnObject("message"))?;
    only_keys(envelope, &["event", "data", "cid"], "message")?;

    let event = envelope
        .get("event")
        .ok_or(ValidationError::MissingField("event"))?
        .as_str()
        .ok_or_else(|| ValidationError::invalid("event", "not a string"))?;
    if let Some(cid) = envelope.get("cid") {
        if cid.as_u64().and_then(|c| u32::try_from(c).ok()).is_none() {
            return Err(ValidationError::invalid("cid", "not a 32-bit unsigned integer"));
        }
    }
    let data = envelope
        .get("data")
        .ok_or(ValidationError::MissingField("data"))?
        .as_object()
        .ok_or(ValidationError::NotAnObject("data"))?;

    match event {
        HANDSHAKE_EVENT => {
            only_keys(data, &["authToken"], "data")?;
            if data.get("authToken").is_some_and(is_truthy) {
                return Err(ValidationError::invalid("authToken", "must be empty"));
            }
            Ok(())
        }
        DISCONNECT_EVENT => {
            only_keys(data, &["code"], "data")?;
            match data.get("code") {
                Some(code) if code.is_i64() || code.is_u64() => Ok(()),
                Some(_) => Err(ValidationError::invalid("code", "not an integer")),
                None => Err(ValidationError::MissingField("code")),
            }
        }
        _ => {
            let method = Method::from_legacy_event(event)
                .ok_or_else(|| ValidationError::UnknownEvent(event.to_string()))?;
            only_keys(data, &["data", "headers"], "data")?;
            if let Some(headers) = data.get("headers") {
                validate_headers(headers)?;
            }
            validate_body(method, data.get("data"), limits)
        }
    }
}

fn validate_headers(headers: &Value) -> Result<(), ValidationError> {
    let headers = headers
        .as_object()
        .ok_or(ValidationError::NotAnObject("headers"))?;
    for (key, value) in headers {
        let ok = match key.as_str() {
            "version" | "Content-Type" => value.is_string(),
            "port" | "height" => value.is_number(),
            _ => {
                return Err(ValidationError::UnexpectedKey {
                    at: "headers",
                    key: key.clone(),
                })
            }
        };
        if !ok {
            return Err(ValidationError::invalid("headers", format!("bad type for `{key}`")));
        }
    }
    Ok(())
}

fn validate_body(
    method: Method,
    body: Option<&Value>,
    limits: &Limits,
) -> Result<(), ValidationError> {
    let body = match body {
        None | Some(Value::Null) => {
            return match method {
                Method::GetPeers | Method::GetStatus => Ok(()),
                _ => Err(ValidationError::MissingField("data.data")),
            }
        }
        Some(body) => body
            .as_object()
            .ok_or(ValidationError::NotAnObject("data.data"))?,
    };

    match method {
        Method::GetBlocks => {
            only_keys(
                body,
                &["lastBlockHeight", "blockLimit", "headersOnly", "serialized"],
                "data.data",
            )?;
            match body.get("lastBlockHeight").map(Value::as_u64) {
                Some(Some(h)) if h >= 1 && h <= u32::MAX as u64 => {}
                Some(_) => return Err(ValidationError::invalid("lastBlockHeight", "must be >= 1")),
                None => return Err(ValidationError::MissingField("lastBlockHeight")),
            }
            if let Some(limit) = body.get("blockLimit") {
                let limit = limit
                    .as_u64()
                    .filter(|l| *l >= 1)
                    .ok_or_else(|| ValidationError::invalid("blockLimit", "must be >= 1"))?;
                check_size("blockLimit", limit as usize, MAX_BLOCKS_PER_BATCH)?;
            }
            for flag in ["headersOnly", "serialized"] {
                if body.get(flag).is_some_and(|v| !v.is_boolean()) {
                    return Err(ValidationError::invalid(flag, "not a boolean"));
                }
            }
            Ok(())
        }
        Method::GetCommonBlocks => {
            exact_keys(body, &["ids"], "data.data")?;
            let ids = body
                .get("ids")
                .and_then(Value::as_array)
                .ok_or_else(|| ValidationError::invalid("ids", "not an array"))?;
            if ids.is_empty() {
                return Err(ValidationError::invalid("ids", "empty"));
            }
            check_size("ids", ids.len(), MAX_COMMON_BLOCK_IDS)?;
            if ids
                .iter()
                .any(|id| !id.as_str().is_some_and(|id| BLOCK_ID.is_match(id)))
            {
                return Err(ValidationError::invalid("ids", "not a block id"));
            }
            Ok(())
        }
        Method::PostBlock => {
            exact_keys(body, &["block"], "data.data")?;
            let block = body
                .get("block")
                .and_then(Value::as_object)
                .ok_or(ValidationError::NotAnObject("block"))?;
            exact_keys(block, &["base64", "data"], "block")?;
            if block.get("base64") != Some(&Value::Bool(true)) {
                return Err(ValidationError::invalid("block.base64", "must be true"));
            }
            if !block.get("data").is_some_and(Value::is_string) {
                return Err(ValidationError::invalid("block.data", "not a string"));
            }
            Ok(())
        }
        Method::PostTransactions => {
            exact_keys(body, &["transactions"], "data.data")?;
            let transactions = body
                .get("transactions")
                .and_then(Value::as_array)
                .ok_or_else(|| ValidationError::invalid("transactions", "not an array"))?;
            check_size(
                "transactions",
                transactions.len(),
                limits.max_transactions_per_request,
            )?;
            if limits.validate_transaction_shape {
                transactions
                    .iter()
                    .try_for_each(validate_transaction_light)?;
            }
            Ok(())
        }
        Method::GetPeers | Method::GetStatus => match body.keys().next() {
            Some(key) => Err(ValidationError::UnexpectedKey {
                at: "data.data",
                key: key.clone(),
            }),
            None => Ok(()),
        },
    }
}

/// Bounds the size of a transaction object without looking at its meaning.
pub fn validate_transaction_light(transaction: &Value) -> Result<(), ValidationError> {
    let fields = transaction
        .as_object()
        .ok_or(ValidationError::NotAnObject("transaction"))?;
    check_size(
        "transaction properties",
        fields.len(),
        MAX_TRANSACTION_PROPERTIES,
    )?;

    if let Some(asset) = fields.get("asset").and_then(Value::as_object) {
        if let Some(payments) = asset.get("payments").and_then(Value::as_array) {
            check_size("payments", payments.len(), MAX_MULTI_PAYMENTS)?;
            for payment in payments {
                let valid = payment.as_object().is_some_and(|p| {
                    p.len() == 2
                        && p.get("recipientId").is_some_and(Value::is_string)
                        && p.get("amount").is_some_and(Value::is_string)
                });
                if !valid {
                    return Err(ValidationError::invalid(
                        "asset.payments",
                        "expected {recipientId, amount} strings",
                    ));
                }
            }
            exact_keys(asset, &["payments"], "asset")?;
        } else if let Some(count) = count_exceeding(&Value::Object(asset.clone()), MAX_ASSET_PROPERTIES)
        {
            return Err(ValidationError::TooLarge {
                what: "asset properties",
                limit: MAX_ASSET_PROPERTIES,
                actual: count,
            });
        }
    }

    let mut budget = MAX_TRANSACTION_PROPERTIES;
    let within = take(&mut budget)
        && fields
            .iter()
            .filter(|(key, _)| key.as_str() != "asset")
            .all(|(_, value)| consume(value, &mut budget));
    if !within {
        return Err(ValidationError::TooLarge {
            what: "transaction nested properties",
            limit: MAX_TRANSACTION_PROPERTIES,
            actual: MAX_TRANSACTION_PROPERTIES + 1,
        });
    }
    Ok(())
}

/// Returns `Some(max + 1)` when `value` holds more than `max` nodes, counting itself.
fn count_exceeding(value: &Value, max: usize) -> Option<usize> {
    let mut budget = max;
    (!consume(value, &mut budget)).then_some(max + 1)
}

fn take(budget: &mut usize) -> bool {
    if *budget == 0 {
        return false;
    }
    *budget -= 1;
    true
}

fn consume(value: &Value, budget: &mut usize) -> bool {
    if !take(budget) {
        return false;
    }
    match value {
        Value::Object(map) => map.values().all(|v| consume(v, budget)),
        Value::Array(items) => items.iter().all(|v| consume(v, budget)),
        _ => true,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn check_size(what: &'static str, actual: usize, limit: usize) -> Result<(), ValidationError> {
    if actual > limit {
        return Err(ValidationError::TooLarge {
            what,
            limit,
            actual,
        });
    }
    Ok(())
}

fn only_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    at: &'static str,
) -> Result<(), ValidationError> {
    match map.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(ValidationError::UnexpectedKey {
            at,
            key: key.clone(),
        }),
        None => Ok(()),
    }
}

fn exact_keys(
    map: &Map<String, Value>,
    expected: &[&'static str],
    at: &'static str,
) -> Result<(), ValidationError> {
    only_keys(map, expected, at)?;
    match expected.iter().find(|key| !map.contains_key(**key)) {
        Some(key) => Err(ValidationError::MissingField(key)),
        None => Ok(()),
    }
}
