//! Conversion of legacy transaction objects into the bytes carried by binary payloads.
use serde_json::Value;
use std::fmt::Debug;

/// Turns a transaction JSON object into its serialized form.
///
/// The serialization itself is ledger specific and lives outside the bridge.
pub trait TransactionFactory: Debug + Send + Sync {
    fn serialize(&self, transaction: &Value) -> Result<Vec<u8>, String>;
}

/// Reads the hex encoded `serialized` field that peers attach to every transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerializedFieldFactory;

impl TransactionFactory for SerializedFieldFactory {
    fn serialize(&self, transaction: &Value) -> Result<Vec<u8>, String> {
        let serialized = transaction
            .get("serialized")
            .and_then(Value::as_str)
            .ok_or_else(|| "transaction has no `serialized` field".to_string())?;
        hex::decode(serialized).map_err(|e| format!("transaction `serialized` is not hex: {e}"))
    }
}
