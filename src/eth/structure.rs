//! EIP-712 structured-data coder.
//!
//! Parses a `{types, primaryType, domain, message}` document into a type
//! graph, validates every message value against its declared type up front,
//! and produces the canonical type encoding, struct hashes, the domain
//! separator and a recoverable signature over the final digest.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use alloy_primitives::{I256, U256};
use secp256k1::SecretKey;
use serde_json::Value;

use super::signer::{keccak256, sign_digest, Signature};
use crate::error::StructureError;

pub const DOMAIN_TYPE: &str = "EIP712Domain";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Address,
    Bool,
    Bytes,
    String,
    FixedBytes(usize),
    Uint(usize),
    Int(usize),
    Array(Box<FieldType>, Option<usize>),
    Struct(String),
}

impl FieldType {
    pub fn parse(s: &str) -> Result<FieldType, StructureError> {
        let invalid = || StructureError::InvalidTypeName(s.to_string());

        if let Some(open) = s.rfind('[') {
            if !s.ends_with(']') {
                return Err(invalid());
            }
            let dimension = &s[open + 1..s.len() - 1];
            let element = FieldType::parse(&s[..open])?;
            let size = if dimension.is_empty() {
                None
            } else {
                Some(dimension.parse::<usize>().map_err(|_| invalid())?)
            };
            return Ok(FieldType::Array(Box::new(element), size));
        }

        match s {
            "address" => return Ok(FieldType::Address),
            "bool" => return Ok(FieldType::Bool),
            "bytes" => return Ok(FieldType::Bytes),
            "string" => return Ok(FieldType::String),
            _ => {}
        }
        if let Some(n) = s.strip_prefix("bytes") {
            let n: usize = n.parse().map_err(|_| invalid())?;
            if (1..=32).contains(&n) {
                return Ok(FieldType::FixedBytes(n));
            }
            return Err(invalid());
        }
        if let Some(n) = s.strip_prefix("uint") {
            let n: usize = n.parse().map_err(|_| invalid())?;
            if n % 8 == 0 && (8..=256).contains(&n) {
                return Ok(FieldType::Uint(n));
            }
            return Err(invalid());
        }
        if let Some(n) = s.strip_prefix("int") {
            let n: usize = n.parse().map_err(|_| invalid())?;
            if n % 8 == 0 && (8..=256).contains(&n) {
                return Ok(FieldType::Int(n));
            }
            return Err(invalid());
        }

        let mut chars = s.chars();
        let leading_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if leading_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            Ok(FieldType::Struct(s.to_string()))
        } else {
            Err(invalid())
        }
    }

    /// Canonical rendering used inside the encoded type string.
    pub fn canonical(&self) -> String {
        match self {
            FieldType::Address => "address".into(),
            FieldType::Bool => "bool".into(),
            FieldType::Bytes => "bytes".into(),
            FieldType::String => "string".into(),
            FieldType::FixedBytes(n) => format!("bytes{n}"),
            FieldType::Uint(n) => format!("uint{n}"),
            FieldType::Int(n) => format!("int{n}"),
            FieldType::Array(element, Some(k)) => format!("{}[{k}]", element.canonical()),
            FieldType::Array(element, None) => format!("{}[]", element.canonical()),
            FieldType::Struct(name) => name.clone(),
        }
    }

    fn struct_reference(&self) -> Option<&str> {
        match self {
            FieldType::Struct(name) => Some(name),
            FieldType::Array(element, _) => element.struct_reference(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub kind: FieldType,
}

pub struct SignResult {
    /// `0x19 || 0x01 || domainHash || dataHash`
    pub message: Vec<u8>,
    pub digest: [u8; 32],
    pub signature: Signature,
}

pub struct StructureCoder {
    types: BTreeMap<String, Vec<Field>>,
    primary_type: String,
    domain: Value,
    message: Value,
    type_hashes: Mutex<HashMap<String, [u8; 32]>>,
}

impl StructureCoder {
    /// Parse and validate a typed-data document. Unknown top-level members
    /// are ignored; unknown struct references, a missing primary type and
    /// type-incompatible message values are rejected.
    pub fn create_from_typed_data(typed_data: &Value) -> Result<StructureCoder, StructureError> {
        let root = typed_data.as_object().ok_or(StructureError::MalformedTypedData)?;

        let types_value = root
            .get("types")
            .and_then(Value::as_object)
            .ok_or(StructureError::MissingMember("types"))?;

        let mut types = BTreeMap::new();
        for (name, fields_value) in types_value {
            if !matches!(FieldType::parse(name)?, FieldType::Struct(_)) {
                return Err(StructureError::InvalidTypeName(name.clone()));
            }
            let fields_value =
                fields_value.as_array().ok_or(StructureError::MalformedTypedData)?;
            let mut fields = Vec::with_capacity(fields_value.len());
            for field in fields_value {
                let field = field.as_object().ok_or(StructureError::MalformedTypedData)?;
                let field_name = field
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or(StructureError::MalformedTypedData)?;
                let field_type = field
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or(StructureError::MalformedTypedData)?;
                fields.push(Field {
                    name: field_name.to_string(),
                    kind: FieldType::parse(field_type)?,
                });
            }
            types.insert(name.clone(), fields);
        }

        if !types.contains_key(DOMAIN_TYPE) {
            return Err(StructureError::MissingMember("types.EIP712Domain"));
        }

        // every struct reference must resolve
        for fields in types.values() {
            for field in fields {
                if let Some(reference) = field.kind.struct_reference() {
                    if !types.contains_key(reference) {
                        return Err(StructureError::UnknownType(reference.to_string()));
                    }
                }
            }
        }

        let primary_type = root
            .get("primaryType")
            .and_then(Value::as_str)
            .ok_or(StructureError::MissingMember("primaryType"))?
            .to_string();
        if !types.contains_key(&primary_type) {
            return Err(StructureError::MissingPrimaryType(primary_type));
        }

        let domain =
            root.get("domain").cloned().ok_or(StructureError::MissingMember("domain"))?;
        let message =
            root.get("message").cloned().ok_or(StructureError::MissingMember("message"))?;

        let coder = StructureCoder {
            types,
            primary_type,
            domain,
            message,
            type_hashes: Mutex::new(HashMap::new()),
        };
        coder.validate_struct(DOMAIN_TYPE, &coder.domain, "domain")?;
        coder.validate_struct(&coder.primary_type.clone(), &coder.message, "message")?;
        Ok(coder)
    }

    pub fn primary_type(&self) -> &str {
        &self.primary_type
    }

    /// `TypeName(t1 f1,...)Dep1(...)...` with dependencies sorted by name.
    pub fn encode_type(&self, type_name: &str) -> Result<String, StructureError> {
        let fields = self
            .types
            .get(type_name)
            .ok_or_else(|| StructureError::UnknownType(type_name.to_string()))?;

        let mut dependencies = BTreeSet::new();
        self.collect_dependencies(type_name, &mut dependencies);
        dependencies.remove(type_name);

        let render = |name: &str, fields: &[Field]| {
            let members: Vec<String> =
                fields.iter().map(|f| format!("{} {}", f.kind.canonical(), f.name)).collect();
            format!("{name}({})", members.join(","))
        };

        let mut encoded = render(type_name, fields);
        for dependency in dependencies {
            encoded.push_str(&render(&dependency, &self.types[&dependency]));
        }
        Ok(encoded)
    }

    /// Keccak-256 of the encoded type, memoized per type name.
    pub fn hash_type(&self, type_name: &str) -> Result<[u8; 32], StructureError> {
        if let Some(hash) = self.type_hashes.lock().unwrap().get(type_name) {
            return Ok(*hash);
        }
        let hash = keccak256(self.encode_type(type_name)?.as_bytes());
        self.type_hashes.lock().unwrap().insert(type_name.to_string(), hash);
        Ok(hash)
    }

    /// Type hash of the primary type followed by the 32-byte encodings of
    /// each message field.
    pub fn encode_data(&self) -> Result<Vec<u8>, StructureError> {
        self.encode_struct(&self.primary_type, &self.message, "message")
    }

    pub fn hash_data(&self) -> Result<[u8; 32], StructureError> {
        Ok(keccak256(&self.encode_data()?))
    }

    pub fn hash_domain(&self) -> Result<[u8; 32], StructureError> {
        Ok(keccak256(&self.encode_struct(DOMAIN_TYPE, &self.domain, "domain")?))
    }

    /// `keccak256(0x19 || 0x01 || hashDomain || hashData)`, signed.
    pub fn sign_data(&self, secret: &SecretKey) -> Result<SignResult, StructureError> {
        let mut message = Vec::with_capacity(2 + 64);
        message.extend_from_slice(&[0x19, 0x01]);
        message.extend_from_slice(&self.hash_domain()?);
        message.extend_from_slice(&self.hash_data()?);
        let digest = keccak256(&message);
        let signature = sign_digest(&digest, secret);
        Ok(SignResult { message, digest, signature })
    }

    fn collect_dependencies(&self, type_name: &str, seen: &mut BTreeSet<String>) {
        if !seen.insert(type_name.to_string()) {
            return;
        }
        let Some(fields) = self.types.get(type_name) else { return };
        for field in fields {
            if let Some(reference) = field.kind.struct_reference() {
                self.collect_dependencies(reference, seen);
            }
        }
    }

    fn encode_struct(
        &self,
        type_name: &str,
        value: &Value,
        path: &str,
    ) -> Result<Vec<u8>, StructureError> {
        let fields = self
            .types
            .get(type_name)
            .ok_or_else(|| StructureError::UnknownType(type_name.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| StructureError::InvalidMessageValue(path.to_string()))?;

        let mut encoded = Vec::with_capacity(32 * (fields.len() + 1));
        encoded.extend_from_slice(&self.hash_type(type_name)?);
        for field in fields {
            let field_path = format!("{path}.{}", field.name);
            let field_value = object
                .get(&field.name)
                .ok_or_else(|| StructureError::InvalidMessageValue(field_path.clone()))?;
            encoded.extend_from_slice(&self.encode_value(&field.kind, field_value, &field_path)?);
        }
        Ok(encoded)
    }

    fn encode_value(
        &self,
        kind: &FieldType,
        value: &Value,
        path: &str,
    ) -> Result<[u8; 32], StructureError> {
        let invalid = || StructureError::InvalidMessageValue(path.to_string());

        Ok(match kind {
            FieldType::Address => {
                let address = parse_address(value).ok_or_else(invalid)?;
                let mut word = [0u8; 32];
                word[12..].copy_from_slice(&address);
                word
            }
            FieldType::Bool => {
                let mut word = [0u8; 32];
                word[31] = value.as_bool().ok_or_else(invalid)? as u8;
                word
            }
            FieldType::Uint(bits) => parse_uint(value, *bits).ok_or_else(invalid)?.to_be_bytes(),
            FieldType::Int(bits) => {
                parse_int(value, *bits).ok_or_else(invalid)?.into_raw().to_be_bytes()
            }
            FieldType::FixedBytes(len) => {
                let bytes = parse_hex_bytes(value, Some(*len)).ok_or_else(invalid)?;
                let mut word = [0u8; 32];
                word[..bytes.len()].copy_from_slice(&bytes);
                word
            }
            FieldType::Bytes => {
                keccak256(&parse_hex_bytes(value, None).ok_or_else(invalid)?)
            }
            FieldType::String => keccak256(value.as_str().ok_or_else(invalid)?.as_bytes()),
            FieldType::Struct(name) => keccak256(&self.encode_struct(name, value, path)?),
            FieldType::Array(element, size) => {
                let items = value.as_array().ok_or_else(invalid)?;
                if size.is_some_and(|k| k != items.len()) {
                    return Err(invalid());
                }
                let mut encoded = Vec::with_capacity(items.len() * 32);
                for (index, item) in items.iter().enumerate() {
                    let item_path = format!("{path}[{index}]");
                    encoded
                        .extend_from_slice(&self.encode_value(element, item, &item_path)?);
                }
                keccak256(&encoded)
            }
        })
    }

    fn validate_struct(
        &self,
        type_name: &str,
        value: &Value,
        path: &str,
    ) -> Result<(), StructureError> {
        let fields = self
            .types
            .get(type_name)
            .ok_or_else(|| StructureError::UnknownType(type_name.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| StructureError::InvalidMessageValue(path.to_string()))?;

        // exactly the declared fields
        if object.len() != fields.len() {
            return Err(StructureError::InvalidMessageValue(path.to_string()));
        }
        for field in fields {
            let field_path = format!("{path}.{}", field.name);
            let field_value = object
                .get(&field.name)
                .ok_or_else(|| StructureError::InvalidMessageValue(field_path.clone()))?;
            self.validate_value(&field.kind, field_value, &field_path)?;
        }
        Ok(())
    }

    fn validate_value(
        &self,
        kind: &FieldType,
        value: &Value,
        path: &str,
    ) -> Result<(), StructureError> {
        let invalid = || StructureError::InvalidMessageValue(path.to_string());

        match kind {
            FieldType::Address => parse_address(value).map(|_| ()).ok_or_else(invalid),
            FieldType::Bool => value.as_bool().map(|_| ()).ok_or_else(invalid),
            FieldType::Uint(bits) => parse_uint(value, *bits).map(|_| ()).ok_or_else(invalid),
            FieldType::Int(bits) => parse_int(value, *bits).map(|_| ()).ok_or_else(invalid),
            FieldType::FixedBytes(len) => {
                parse_hex_bytes(value, Some(*len)).map(|_| ()).ok_or_else(invalid)
            }
            FieldType::Bytes => parse_hex_bytes(value, None).map(|_| ()).ok_or_else(invalid),
            FieldType::String => value.as_str().map(|_| ()).ok_or_else(invalid),
            FieldType::Struct(name) => self.validate_struct(name, value, path),
            FieldType::Array(element, size) => {
                let items = value.as_array().ok_or_else(invalid)?;
                if size.is_some_and(|k| k != items.len()) {
                    return Err(invalid());
                }
                for (index, item) in items.iter().enumerate() {
                    self.validate_value(element, item, &format!("{path}[{index}]"))?;
                }
                Ok(())
            }
        }
    }
}

fn parse_address(value: &Value) -> Option<[u8; 20]> {
    let s = value.as_str()?;
    let hex_part = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    if hex_part.len() != 40 {
        return None;
    }
    hex::decode(hex_part).ok()?.try_into().ok()
}

fn parse_hex_bytes(value: &Value, expected_len: Option<usize>) -> Option<Vec<u8>> {
    let s = value.as_str()?;
    let hex_part = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    let bytes = hex::decode(hex_part).ok()?;
    if expected_len.is_some_and(|len| len != bytes.len()) {
        return None;
    }
    Some(bytes)
}

/// `uintN`: non-negative integer literal, decimal string or `0x` hex string,
/// strictly below `2^N`.
fn parse_uint(value: &Value, bits: usize) -> Option<U256> {
    let parsed = match value {
        Value::Number(n) => U256::from(n.as_u64()?),
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex_part) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                U256::from_str_radix(hex_part, 16).ok()?
            } else {
                if s.starts_with('-') {
                    return None;
                }
                U256::from_str_radix(s, 10).ok()?
            }
        }
        _ => return None,
    };
    if bits < 256 && parsed >= (U256::from(1u8) << bits) {
        return None;
    }
    Some(parsed)
}

/// `intN`: signed integer literal or decimal string in
/// `[-2^(N-1), 2^(N-1) - 1]`; hex strings are positive magnitudes.
fn parse_int(value: &Value, bits: usize) -> Option<I256> {
    let parsed = match value {
        Value::Number(n) => I256::try_from(n.as_i64()?).ok()?,
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex_part) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                I256::try_from(U256::from_str_radix(hex_part, 16).ok()?).ok()?
            } else {
                s.parse::<I256>().ok()?
            }
        }
        _ => return None,
    };
    let half = U256::from(1u8) << (bits - 1);
    if parsed.is_negative() {
        if parsed.unsigned_abs() > half {
            return None;
        }
    } else if parsed.unsigned_abs() >= half {
        return None;
    }
    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coder_for(message_type: &str, message_value: Value) -> Result<StructureCoder, StructureError> {
        let typed_data = json!({
            "types": {
                "EIP712Domain": [{ "name": "name", "type": "string" }],
                "Payload": [{ "name": "value", "type": message_type }],
            },
            "primaryType": "Payload",
            "domain": { "name": "test" },
            "message": { "value": message_value },
        });
        StructureCoder::create_from_typed_data(&typed_data)
    }

    #[test]
    fn int8_bounds() {
        assert!(coder_for("int8", json!(-128)).is_ok());
        assert!(coder_for("int8", json!(127)).is_ok());
        assert!(matches!(
            coder_for("int8", json!(-129)),
            Err(StructureError::InvalidMessageValue(_))
        ));
        assert!(coder_for("int8", json!(128)).is_err());
    }

    #[test]
    fn uint64_bounds_and_hex() {
        assert!(coder_for("uint64", json!("0xffffffffffffffff")).is_ok());
        assert!(coder_for("uint64", json!("18446744073709551616")).is_err());
        assert!(coder_for("uint64", json!("0x10000000000000000")).is_err());
        assert!(coder_for("uint64", json!("-5")).is_err());
        assert!(coder_for("uint64", json!(-5)).is_err());
    }

    #[test]
    fn fixed_bytes_length_is_exact() {
        assert!(coder_for("bytes4", json!("0xdeadbeef")).is_ok());
        assert!(coder_for("bytes4", json!("0xdeadbe")).is_err());
        assert!(coder_for("bytes4", json!("0xdeadbeef00")).is_err());
        assert!(coder_for("bytes4", json!("zzzz")).is_err());
    }

    #[test]
    fn struct_requires_exact_fields() {
        let typed_data = json!({
            "types": {
                "EIP712Domain": [{ "name": "name", "type": "string" }],
                "Payload": [{ "name": "a", "type": "string" }],
            },
            "primaryType": "Payload",
            "domain": { "name": "test" },
            "message": { "a": "x", "extra": "y" },
        });
        assert!(StructureCoder::create_from_typed_data(&typed_data).is_err());
    }

    #[test]
    fn unknown_struct_reference_is_rejected() {
        let typed_data = json!({
            "types": {
                "EIP712Domain": [{ "name": "name", "type": "string" }],
                "Payload": [{ "name": "a", "type": "Missing" }],
            },
            "primaryType": "Payload",
            "domain": { "name": "test" },
            "message": { "a": {} },
        });
        assert!(matches!(
            StructureCoder::create_from_typed_data(&typed_data),
            Err(StructureError::UnknownType(_))
        ));
    }

    #[test]
    fn fixed_size_array_checks_length() {
        assert!(coder_for("uint8[2]", json!([1, 2])).is_ok());
        assert!(coder_for("uint8[2]", json!([1])).is_err());
        assert!(coder_for("uint8[]", json!([1, 2, 3])).is_ok());
    }

    #[test]
    fn type_hash_is_memoized() {
        let coder = coder_for("string", json!("hello")).unwrap();
        let first = coder.hash_type("Payload").unwrap();
        let second = coder.hash_type("Payload").unwrap();
        assert_eq!(first, second);
        assert_eq!(coder.type_hashes.lock().unwrap().len(), 1);
    }

    #[test]
    fn extra_top_level_members_are_ignored() {
        let typed_data = json!({
            "types": {
                "EIP712Domain": [{ "name": "name", "type": "string" }],
                "Payload": [{ "name": "a", "type": "string" }],
            },
            "primaryType": "Payload",
            "domain": { "name": "test" },
            "message": { "a": "x" },
            "surplus": 42,
        });
        assert!(StructureCoder::create_from_typed_data(&typed_data).is_ok());
    }
}
