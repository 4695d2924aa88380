//! Minimal EVM argument codec.
//!
//! Handles the static ABI types (`address`, `bool`, `uintN`, `intN`,
//! `bytesN`), which cover selectors plus word-sized arguments and return
//! values. Dynamic types are reported as unsupported rather than guessed.

use serde_json::Value;

use super::{DriverError, DriverResult};
use crate::types::{AbiParam, Address};

/// One 32-byte ABI word
pub type Word = [u8; 32];

fn is_static(kind: &str) -> bool {
    if kind.contains('[') {
        return false;
    }
    kind == "address"
        || kind == "bool"
        || kind.starts_with("uint")
        || kind.starts_with("int")
        || (kind.starts_with("bytes") && kind.len() > 5)
}

/// True when every input is word-sized, so the whole list can be encoded here
pub fn has_static_layout(inputs: &[AbiParam]) -> bool {
    inputs.iter().all(|input| is_static(&input.kind))
}

/// Encode arguments for the given inputs as concatenated words
pub fn encode_arguments(inputs: &[AbiParam], params: &[Value]) -> DriverResult<Vec<u8>> {
    if inputs.len() != params.len() {
        return Err(DriverError::Encoding(format!(
            "expected {} arguments, got {}",
            inputs.len(),
            params.len()
        )));
    }
    let mut out = Vec::with_capacity(inputs.len() * 32);
    for (input, value) in inputs.iter().zip(params) {
        out.extend_from_slice(&encode_word(&input.kind, value)?);
    }
    Ok(out)
}

/// Encode a single static value
pub fn encode_word(kind: &str, value: &Value) -> DriverResult<Word> {
    if !is_static(kind) {
        return Err(DriverError::Encoding(format!(
            "dynamic ABI type `{kind}` is not supported"
        )));
    }

    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => {
            return Err(DriverError::Encoding(format!(
                "cannot encode {other} as {kind}"
            )))
        }
    };

    if kind == "address" {
        let addr = Address::from_hex(&text)
            .map_err(|e| DriverError::Encoding(format!("{text}: {e}")))?;
        return Ok(addr.to_word());
    }

    if kind == "bool" {
        let flag = match text.as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => return Err(DriverError::Encoding(format!("not a bool: {text}"))),
        };
        let mut word = [0u8; 32];
        word[31] = u8::from(flag);
        return Ok(word);
    }

    if let Some(size) = kind.strip_prefix("bytes") {
        let size: usize = size
            .parse()
            .map_err(|_| DriverError::Encoding(format!("bad type {kind}")))?;
        let bytes = hex::decode(text.strip_prefix("0x").unwrap_or(&text))
            .map_err(|_| DriverError::Encoding(format!("not hex: {text}")))?;
        if bytes.len() > size || size > 32 {
            return Err(DriverError::Encoding(format!(
                "{} bytes do not fit {kind}",
                bytes.len()
            )));
        }
        let mut word = [0u8; 32];
        word[..bytes.len()].copy_from_slice(&bytes);
        return Ok(word);
    }

    if kind.starts_with("uint") {
        return parse_unsigned(&text);
    }

    // intN
    let signed: i128 = text
        .parse()
        .map_err(|_| DriverError::Encoding(format!("not an integer: {text}")))?;
    let fill = if signed < 0 { 0xff } else { 0x00 };
    let mut word = [fill; 32];
    word[16..].copy_from_slice(&signed.to_be_bytes());
    Ok(word)
}

fn parse_unsigned(text: &str) -> DriverResult<Word> {
    let mut word = [0u8; 32];
    if let Some(hex_digits) = text.strip_prefix("0x") {
        let padded = if hex_digits.len() % 2 == 1 {
            format!("0{hex_digits}")
        } else {
            hex_digits.to_string()
        };
        let bytes = hex::decode(&padded)
            .map_err(|_| DriverError::Encoding(format!("not hex: {text}")))?;
        if bytes.len() > 32 {
            return Err(DriverError::Encoding(format!("{text} overflows 256 bits")));
        }
        word[32 - bytes.len()..].copy_from_slice(&bytes);
        return Ok(word);
    }

    // decimal, accumulated big-endian so values above u128 still fit
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DriverError::Encoding(format!("not an unsigned integer: {text}")));
    }
    for digit in text.bytes().map(|b| u32::from(b - b'0')) {
        let mut carry = digit;
        for byte in word.iter_mut().rev() {
            let v = u32::from(*byte) * 10 + carry;
            *byte = (v & 0xff) as u8;
            carry = v >> 8;
        }
        if carry != 0 {
            return Err(DriverError::Encoding(format!("{text} overflows 256 bits")));
        }
    }
    Ok(word)
}

/// Decode one word according to its ABI type
#[must_use]
pub fn decode_word(kind: &str, word: &Word) -> Value {
    if kind == "address" {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&word[12..]);
        return Value::String(Address::from_bytes(bytes).to_hex());
    }
    if kind == "bool" {
        return Value::Bool(word[31] != 0);
    }
    if kind.starts_with("uint") {
        return Value::String(word_to_decimal(word));
    }
    if kind.starts_with("int") {
        let mut low = [0u8; 16];
        low.copy_from_slice(&word[16..]);
        return Value::String(i128::from_be_bytes(low).to_string());
    }
    Value::String(format!("0x{}", hex::encode(word)))
}

/// Decode return data against the declared outputs.
///
/// A single output yields its value, several yield an array. Outputs of
/// dynamic type fall back to the raw hex payload.
pub fn decode_outputs(outputs: &[AbiParam], data: &[u8]) -> Value {
    let raw = || Value::String(format!("0x{}", hex::encode(data)));
    if outputs.iter().any(|o| !is_static(&o.kind) || o.kind.ends_with(']'))
        || data.len() < outputs.len() * 32
    {
        return raw();
    }
    let mut values: Vec<Value> = outputs
        .iter()
        .enumerate()
        .map(|(i, o)| {
            let mut word = [0u8; 32];
            word.copy_from_slice(&data[i * 32..(i + 1) * 32]);
            decode_word(&o.kind, &word)
        })
        .collect();
    match values.len() {
        0 => Value::Null,
        1 => values.remove(0),
        _ => Value::Array(values),
    }
}

fn word_to_decimal(word: &Word) -> String {
    let mut digits = Vec::new();
    let mut n = *word;
    while n.iter().any(|&b| b != 0) {
        let mut rem = 0u32;
        for byte in &mut n {
            let v = (rem << 8) | u32::from(*byte);
            *byte = (v / 10) as u8;
            rem = v % 10;
        }
        digits.push(b'0' + rem as u8);
    }
    if digits.is_empty() {
        return "0".to_string();
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Render a JSON-RPC quantity
#[must_use]
pub fn to_quantity(n: u64) -> String {
    format!("0x{n:x}")
}

/// Parse a JSON-RPC quantity (`"0x1a"`)
pub fn parse_quantity(value: &Value) -> DriverResult<u128> {
    let s = value
        .as_str()
        .ok_or_else(|| DriverError::InvalidResponse(format!("expected quantity, got {value}")))?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|_| DriverError::InvalidResponse(format!("bad quantity: {s}")))
}

/// Parse a quantity that must fit in 64 bits
pub fn parse_quantity_u64(value: &Value) -> DriverResult<u64> {
    let n = parse_quantity(value)?;
    u64::try_from(n).map_err(|_| DriverError::InvalidResponse(format!("quantity too large: {n}")))
}
