//! Debezium change-event parsing.
//!
//! A raw Kafka payload either becomes a [`ParsedEvent`] or a non-fatal
//! parse error; the consumer logs failures and moves on.

use serde_json::Value;
use thiserror::Error;

use crate::domain::EntityKind;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("unknown source table {0:?}")]
    UnknownTable(String),
    #[error("unknown operation code {0:?}")]
    UnknownOperation(String),
}

/// Row-level operation carried by the change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Read,
}

impl Operation {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(Self::Create),
            "u" => Some(Self::Update),
            "d" => Some(Self::Delete),
            "r" => Some(Self::Read),
            _ => None,
        }
    }
}

/// One decoded change event. Transient: built per message, dropped after
/// handling.
#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub entity: EntityKind,
    pub operation: Operation,
    /// Row image: the after-image for create/update/read, the
    /// before-image for delete (deletes carry no after-image).
    pub payload: Value,
}

pub fn parse_debezium_message(data: &[u8]) -> Result<ParsedEvent, ParseError> {
    let message: Value = serde_json::from_slice(data)?;
    let payload = message
        .get("payload")
        .ok_or(SchemaError::MissingField("payload"))?;

    let table = payload
        .pointer("/source/table")
        .and_then(Value::as_str)
        .ok_or(SchemaError::MissingField("payload.source.table"))?;
    let entity = EntityKind::from_table(table)
        .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))?;

    let code = payload
        .get("op")
        .and_then(Value::as_str)
        .ok_or(SchemaError::MissingField("payload.op"))?;
    let operation =
        Operation::from_code(code).ok_or_else(|| SchemaError::UnknownOperation(code.to_string()))?;

    let image_key = if operation == Operation::Delete {
        "before"
    } else {
        "after"
    };
    let image = payload
        .get(image_key)
        .filter(|value| !value.is_null())
        .cloned()
        .ok_or(SchemaError::MissingField(image_key))?;

    Ok(ParsedEvent {
        entity,
        operation,
        payload: image,
    })
}
