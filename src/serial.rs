//! Binary serialization of compiled rule sets.
//!
//! The binary form is a cache for build drivers that recompile many rule
//! sets: a 32-byte fixed header followed by a bincode-encoded payload.
//!
//! ## Wire Format
//!
//! ```text
//! Offset  Size  Field
//! 0       4     Magic bytes: b"EBDD"
//! 4       2     Format version (u16, little-endian)
//! 6       2     Compiler version (u16, little-endian)
//! 8       4     Flags (u32, reserved)
//! 12      4     Payload length in bytes (u32, little-endian)
//! 16      16    BLAKE3 hash of the payload (truncated to 16 bytes)
//! 32..    var   Bincode-encoded payload
//! ```
//!
//! ## Versioning
//!
//! The format version in the header must match exactly. If it does not,
//! decoding fails with [`DeserializeError::IncompatibleVersion`]. The
//! compiler version is informational only.
//!
//! The payload mirrors [`CompiledRuleSet`] with explicitly tagged types,
//! since bincode cannot decode the untagged JSON shapes the public types
//! use. Decoded tables are checked before they are returned.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bdd::{BddNode, BranchRef};
use crate::types::{Builtin, PathPart, Template, TemplatePart};
use crate::{
    CompiledRuleSet, Condition, Endpoint, Expr, Parameter, ParameterType, RuleResult, Value,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAGIC: &[u8; 4] = b"EBDD";
const FORMAT_VERSION: u16 = 1;
const COMPILER_VERSION: u16 = 1;
const HEADER_SIZE: usize = 32;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when encoding a [`CompiledRuleSet`] to bytes.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to encode compiled rule set: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("I/O error during serialization: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when decoding a [`CompiledRuleSet`] from bytes.
#[derive(Debug, Error)]
pub enum DeserializeError {
    #[error("not a compiled rule set: invalid magic bytes")]
    BadMagic,

    #[error("incompatible format version: blob is v{blob}, compiler supports v{supported}")]
    IncompatibleVersion { blob: u16, supported: u16 },

    #[error("integrity check failed: BLAKE3 checksum mismatch")]
    ChecksumMismatch,

    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u32, actual: usize },

    #[error("failed to decode payload: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("I/O error during deserialization: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Serialized type hierarchy
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct SerializedRuleSet {
    metadata: Metadata,
    version: Option<String>,
    parameters: Vec<SerializedParameter>,
    conditions: Vec<SerializedCondition>,
    results: Vec<SerializedResult>,
    nodes: Vec<SerializedNode>,
    root: SerializedRef,
}

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    parameter_count: usize,
    condition_count: usize,
    result_count: usize,
    node_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedParameter {
    name: String,
    kind: u8,
    required: bool,
    built_in: Option<String>,
    default: Option<SerializedValue>,
    documentation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Array(Vec<SerializedValue>),
    Record(Vec<(String, SerializedValue)>),
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedCondition {
    expr: SerializedExpr,
    assign: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedExpr {
    Str(Vec<SerializedTemplatePart>),
    Int(i64),
    Bool(bool),
    Array(Vec<SerializedExpr>),
    Record(Vec<(String, SerializedExpr)>),
    Ref(String),
    Call {
        function: String,
        args: Vec<SerializedExpr>,
    },
    GetAttr {
        target: Box<SerializedExpr>,
        path: Vec<SerializedPathPart>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedTemplatePart {
    Literal(String),
    Dynamic(SerializedExpr),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum SerializedPathPart {
    Key(u32),
    Index(i64),
}

#[derive(Debug, Serialize, Deserialize)]
enum SerializedResult {
    NoMatch,
    Endpoint {
        url: SerializedExpr,
        headers: Vec<(String, Vec<SerializedExpr>)>,
        properties: Vec<(String, SerializedExpr)>,
    },
    Error(SerializedExpr),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct SerializedNode {
    condition_index: u32,
    high: SerializedRef,
    low: SerializedRef,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum SerializedRef {
    Node(u32),
    Result(u32),
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Path keys are stored in a side table so repeated keys are written once.
#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyTable {
    keys: Vec<String>,
}

fn serialize_kind(kind: ParameterType) -> u8 {
    match kind {
        ParameterType::String => 0,
        ParameterType::Boolean => 1,
        ParameterType::StringArray => 2,
    }
}

fn deserialize_kind(kind: u8) -> Result<ParameterType, DeserializeError> {
    match kind {
        0 => Ok(ParameterType::String),
        1 => Ok(ParameterType::Boolean),
        2 => Ok(ParameterType::StringArray),
        other => Err(DeserializeError::Validation(format!(
            "unknown parameter type tag {other}"
        ))),
    }
}

fn serialize_value(value: &Value) -> SerializedValue {
    match value {
        Value::Bool(b) => SerializedValue::Bool(*b),
        Value::Int(i) => SerializedValue::Int(*i),
        Value::String(s) => SerializedValue::Str(s.clone()),
        Value::Array(items) => SerializedValue::Array(items.iter().map(serialize_value).collect()),
        Value::Record(fields) => SerializedValue::Record(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), serialize_value(v)))
                .collect(),
        ),
    }
}

fn deserialize_value(value: SerializedValue) -> Value {
    match value {
        SerializedValue::Bool(b) => Value::Bool(b),
        SerializedValue::Int(i) => Value::Int(i),
        SerializedValue::Str(s) => Value::String(s),
        SerializedValue::Array(items) => {
            Value::Array(items.into_iter().map(deserialize_value).collect())
        }
        SerializedValue::Record(fields) => Value::Record(
            fields
                .into_iter()
                .map(|(k, v)| (k, deserialize_value(v)))
                .collect(),
        ),
    }
}

struct Encoder {
    keys: Vec<String>,
    key_ids: BTreeMap<String, u32>,
}

impl Encoder {
    fn key(&mut self, key: &str) -> u32 {
        if let Some(&id) = self.key_ids.get(key) {
            return id;
        }
        let id = crate::cfg::index_u32(self.keys.len());
        self.keys.push(key.to_owned());
        self.key_ids.insert(key.to_owned(), id);
        id
    }

    fn expr(&mut self, expr: &Expr) -> SerializedExpr {
        match expr {
            Expr::Str(t) => SerializedExpr::Str(
                t.parts()
                    .iter()
                    .map(|p| match p {
                        TemplatePart::Literal(s) => SerializedTemplatePart::Literal(s.clone()),
                        TemplatePart::Dynamic(e) => SerializedTemplatePart::Dynamic(self.expr(e)),
                    })
                    .collect(),
            ),
            Expr::Int(i) => SerializedExpr::Int(*i),
            Expr::Bool(b) => SerializedExpr::Bool(*b),
            Expr::Array(items) => {
                SerializedExpr::Array(items.iter().map(|e| self.expr(e)).collect())
            }
            Expr::Record(fields) => SerializedExpr::Record(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.expr(v)))
                    .collect(),
            ),
            Expr::Ref(name) => SerializedExpr::Ref(name.clone()),
            Expr::Call { function, args } => SerializedExpr::Call {
                function: function.name().to_owned(),
                args: args.iter().map(|a| self.expr(a)).collect(),
            },
            Expr::GetAttr { target, path } => SerializedExpr::GetAttr {
                target: Box::new(self.expr(target)),
                path: path
                    .iter()
                    .map(|p| match p {
                        PathPart::Key(k) => SerializedPathPart::Key(self.key(k)),
                        PathPart::Index(i) => SerializedPathPart::Index(*i),
                    })
                    .collect(),
            },
        }
    }

    fn result(&mut self, result: &RuleResult) -> SerializedResult {
        match result {
            RuleResult::NoMatch => SerializedResult::NoMatch,
            RuleResult::Endpoint(e) => SerializedResult::Endpoint {
                url: self.expr(&e.url),
                headers: e
                    .headers
                    .iter()
                    .map(|(k, vs)| (k.clone(), vs.iter().map(|v| self.expr(v)).collect()))
                    .collect(),
                properties: e
                    .properties
                    .iter()
                    .map(|(k, v)| (k.clone(), self.expr(v)))
                    .collect(),
            },
            RuleResult::Error(message) => SerializedResult::Error(self.expr(message)),
        }
    }
}

fn serialize_ref(r: BranchRef) -> SerializedRef {
    match r {
        BranchRef::Node(i) => SerializedRef::Node(i),
        BranchRef::Result(i) => SerializedRef::Result(i),
    }
}

fn deserialize_ref(r: SerializedRef) -> BranchRef {
    match r {
        SerializedRef::Node(i) => BranchRef::Node(i),
        SerializedRef::Result(i) => BranchRef::Result(i),
    }
}

fn to_serialized(compiled: &CompiledRuleSet) -> (SerializedRuleSet, KeyTable) {
    let mut encoder = Encoder {
        keys: Vec::new(),
        key_ids: BTreeMap::new(),
    };
    let conditions = compiled
        .conditions
        .iter()
        .map(|c| SerializedCondition {
            expr: encoder.expr(&c.expr),
            assign: c.assign.clone(),
        })
        .collect();
    let results = compiled.results.iter().map(|r| encoder.result(r)).collect();
    let serialized = SerializedRuleSet {
        metadata: Metadata {
            parameter_count: compiled.parameters.len(),
            condition_count: compiled.conditions.len(),
            result_count: compiled.results.len(),
            node_count: compiled.nodes.len(),
        },
        version: compiled.version.clone(),
        parameters: compiled
            .parameters
            .iter()
            .map(|p| SerializedParameter {
                name: p.name.clone(),
                kind: serialize_kind(p.kind),
                required: p.required,
                built_in: p.built_in.clone(),
                default: p.default.as_ref().map(serialize_value),
                documentation: p.documentation.clone(),
            })
            .collect(),
        conditions,
        results,
        nodes: compiled
            .nodes
            .iter()
            .map(|n| SerializedNode {
                condition_index: n.condition_index,
                high: serialize_ref(n.high_ref),
                low: serialize_ref(n.low_ref),
            })
            .collect(),
        root: serialize_ref(compiled.root),
    };
    (serialized, KeyTable { keys: encoder.keys })
}

struct Decoder<'a> {
    keys: &'a [String],
}

impl Decoder<'_> {
    fn expr(&self, expr: SerializedExpr) -> Result<Expr, DeserializeError> {
        Ok(match expr {
            SerializedExpr::Str(parts) => Expr::Str(Template::from_parts(
                parts
                    .into_iter()
                    .map(|p| match p {
                        SerializedTemplatePart::Literal(s) => Ok(TemplatePart::Literal(s)),
                        SerializedTemplatePart::Dynamic(e) => {
                            self.expr(e).map(TemplatePart::Dynamic)
                        }
                    })
                    .collect::<Result<_, _>>()?,
            )),
            SerializedExpr::Int(i) => Expr::Int(i),
            SerializedExpr::Bool(b) => Expr::Bool(b),
            SerializedExpr::Array(items) => Expr::Array(
                items
                    .into_iter()
                    .map(|e| self.expr(e))
                    .collect::<Result<_, _>>()?,
            ),
            SerializedExpr::Record(fields) => Expr::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| self.expr(v).map(|v| (k, v)))
                    .collect::<Result<_, _>>()?,
            ),
            SerializedExpr::Ref(name) => Expr::Ref(name),
            SerializedExpr::Call { function, args } => {
                let builtin = Builtin::from_name(&function).ok_or_else(|| {
                    DeserializeError::Validation(format!("unknown function '{function}'"))
                })?;
                if !builtin.accepts_arity(args.len()) {
                    return Err(DeserializeError::Validation(format!(
                        "'{function}' called with {} arguments",
                        args.len()
                    )));
                }
                Expr::Call {
                    function: builtin,
                    args: args
                        .into_iter()
                        .map(|a| self.expr(a))
                        .collect::<Result<_, _>>()?,
                }
            }
            SerializedExpr::GetAttr { target, path } => Expr::GetAttr {
                target: Box::new(self.expr(*target)?),
                path: path
                    .into_iter()
                    .map(|p| match p {
                        SerializedPathPart::Key(id) => self
                            .keys
                            .get(id as usize)
                            .map(|k| PathPart::Key(k.clone()))
                            .ok_or_else(|| {
                                DeserializeError::Validation(format!("path key {id} out of range"))
                            }),
                        SerializedPathPart::Index(i) => Ok(PathPart::Index(i)),
                    })
                    .collect::<Result<_, _>>()?,
            },
        })
    }

    fn result(&self, result: SerializedResult) -> Result<RuleResult, DeserializeError> {
        Ok(match result {
            SerializedResult::NoMatch => RuleResult::NoMatch,
            SerializedResult::Endpoint {
                url,
                headers,
                properties,
            } => RuleResult::Endpoint(Endpoint {
                url: self.expr(url)?,
                headers: headers
                    .into_iter()
                    .map(|(k, vs)| {
                        vs.into_iter()
                            .map(|v| self.expr(v))
                            .collect::<Result<Vec<_>, _>>()
                            .map(|vs| (k, vs))
                    })
                    .collect::<Result<_, _>>()?,
                properties: properties
                    .into_iter()
                    .map(|(k, v)| self.expr(v).map(|v| (k, v)))
                    .collect::<Result<_, _>>()?,
            }),
            SerializedResult::Error(message) => RuleResult::Error(self.expr(message)?),
        })
    }
}

fn from_serialized(
    ser: SerializedRuleSet,
    keys: &KeyTable,
) -> Result<CompiledRuleSet, DeserializeError> {
    validate_metadata(&ser)?;
    let decoder = Decoder { keys: &keys.keys };

    let parameters = ser
        .parameters
        .into_iter()
        .map(|p| -> Result<Parameter, DeserializeError> {
            Ok(Parameter {
                name: p.name,
                kind: deserialize_kind(p.kind)?,
                required: p.required,
                built_in: p.built_in,
                default: p.default.map(deserialize_value),
                documentation: p.documentation,
            })
        })
        .collect::<Result<_, DeserializeError>>()?;
    let conditions = ser
        .conditions
        .into_iter()
        .map(|c| -> Result<Condition, DeserializeError> {
            Ok(Condition {
                expr: decoder.expr(c.expr)?,
                assign: c.assign,
            })
        })
        .collect::<Result<_, DeserializeError>>()?;
    let results = ser
        .results
        .into_iter()
        .map(|r| decoder.result(r))
        .collect::<Result<_, _>>()?;

    let compiled = CompiledRuleSet {
        version: ser.version,
        parameters,
        conditions,
        results,
        nodes: ser
            .nodes
            .into_iter()
            .map(|n| BddNode {
                condition_index: n.condition_index,
                high_ref: deserialize_ref(n.high),
                low_ref: deserialize_ref(n.low),
            })
            .collect(),
        root: deserialize_ref(ser.root),
    };
    compiled
        .check_invariants()
        .map_err(|e| DeserializeError::Validation(e.to_string()))?;
    Ok(compiled)
}

fn validate_metadata(ser: &SerializedRuleSet) -> Result<(), DeserializeError> {
    let checks = [
        ("parameter", ser.metadata.parameter_count, ser.parameters.len()),
        ("condition", ser.metadata.condition_count, ser.conditions.len()),
        ("result", ser.metadata.result_count, ser.results.len()),
        ("node", ser.metadata.node_count, ser.nodes.len()),
    ];
    for (what, declared, actual) in checks {
        if declared != actual {
            return Err(DeserializeError::Validation(format!(
                "{what}_count {declared} does not match {actual} {what}s"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Header I/O
// ---------------------------------------------------------------------------

fn write_header(buf: &mut Vec<u8>, payload: &[u8]) {
    let hash = blake3::hash(payload);
    let hash_bytes = hash.as_bytes();

    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&COMPILER_VERSION.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // flags (reserved)
    #[allow(clippy::cast_possible_truncation)] // payload will never exceed 4 GiB
    let payload_len = payload.len() as u32;
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&hash_bytes[..16]);
}

#[allow(clippy::cast_possible_truncation)] // HEADER_SIZE is 32, always fits in u32
fn read_header(bytes: &[u8]) -> Result<(u16, u32, [u8; 16]), DeserializeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DeserializeError::LengthMismatch {
            expected: HEADER_SIZE as u32,
            actual: bytes.len(),
        });
    }

    if &bytes[0..4] != MAGIC {
        return Err(DeserializeError::BadMagic);
    }

    let format_version = u16::from_le_bytes([bytes[4], bytes[5]]);
    // bytes[6..8] is the compiler version, bytes[8..12] the reserved flags
    let payload_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);

    let mut hash = [0u8; 16];
    hash.copy_from_slice(&bytes[16..32]);

    Ok((format_version, payload_len, hash))
}

// ---------------------------------------------------------------------------
// Public encode/decode
// ---------------------------------------------------------------------------

pub(crate) fn encode(compiled: &CompiledRuleSet) -> Result<Vec<u8>, SerializeError> {
    let payload =
        bincode::serde::encode_to_vec(to_serialized(compiled), bincode::config::standard())?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    write_header(&mut buf, &payload);
    buf.extend_from_slice(&payload);
    log::debug!("encoded {compiled} into {} bytes", buf.len());
    Ok(buf)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<CompiledRuleSet, DeserializeError> {
    let (format_version, payload_len, stored_hash) = read_header(bytes)?;

    if format_version != FORMAT_VERSION {
        return Err(DeserializeError::IncompatibleVersion {
            blob: format_version,
            supported: FORMAT_VERSION,
        });
    }

    let payload_end = HEADER_SIZE + payload_len as usize;
    if bytes.len() < payload_end {
        return Err(DeserializeError::LengthMismatch {
            expected: payload_len,
            actual: bytes.len() - HEADER_SIZE,
        });
    }
    let payload = &bytes[HEADER_SIZE..payload_end];

    let computed_hash = blake3::hash(payload);
    if computed_hash.as_bytes()[..16] != stored_hash {
        return Err(DeserializeError::ChecksumMismatch);
    }

    let ((serialized, keys), _): ((SerializedRuleSet, KeyTable), usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())?;

    from_serialized(serialized, &keys)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
