//! Text encoding of angle vectors as they travel over the link.
//!
//! A vector is its values as decimal integers joined by `,`. The shutdown
//! sentinel starts with `#`, so it can never parse as a vector.

use crate::error::WireError;
use crate::pose::{AngleSet, AngleVector};

pub const SHUTDOWN_SENTINEL: &[u8] = b"#SHUTDOWN";

/// Terminates one message on stream transports.
pub const MESSAGE_DELIMITER: u8 = b'\n';

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Shutdown,
    Angles(AngleVector),
    Malformed(WireError),
}

pub fn encode(vector: &AngleVector) -> Vec<u8> {
    vector
        .values()
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(",")
        .into_bytes()
}

pub fn is_shutdown(payload: &[u8]) -> bool {
    trim(payload) == SHUTDOWN_SENTINEL
}

/// Every field must be an integer.
pub fn decode(payload: &[u8]) -> Result<AngleVector, WireError> {
    decode_with(payload, |_, field| Err(WireError::InvalidValue(field.to_owned())))
}

/// Like [`decode`] but an empty field takes the default for its position:
/// neutral for a lateral slot, straight otherwise.
pub fn decode_lenient(payload: &[u8]) -> Result<AngleVector, WireError> {
    decode_with(payload, |position, _| {
        Ok(if position % 3 == 2 {
            AngleSet::NEUTRAL
        } else {
            AngleSet::STRAIGHT
        })
    })
}

pub fn classify(payload: &[u8]) -> Inbound {
    if is_shutdown(payload) {
        return Inbound::Shutdown;
    }
    match decode(payload) {
        Ok(vector) => Inbound::Angles(vector),
        Err(error) => Inbound::Malformed(error),
    }
}

fn decode_with<F>(payload: &[u8], mut on_empty: F) -> Result<AngleVector, WireError>
where
    F: FnMut(usize, &str) -> Result<i32, WireError>,
{
    if is_shutdown(payload) {
        return Err(WireError::Sentinel);
    }
    let text = std::str::from_utf8(trim(payload)).map_err(|_| WireError::NotText)?;
    if text.is_empty() {
        return Err(WireError::Empty);
    }
    text.split(',')
        .enumerate()
        .map(|(position, field)| {
            let field = field.trim();
            if field.is_empty() {
                on_empty(position, field)
            } else {
                field
                    .parse::<i32>()
                    .map_err(|_| WireError::InvalidValue(field.to_owned()))
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .map(AngleVector::new)
}

fn trim(payload: &[u8]) -> &[u8] {
    let start = payload
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .unwrap_or(payload.len());
    let end = payload
        .iter()
        .rposition(|byte| !byte.is_ascii_whitespace())
        .map_or(start, |index| index + 1);
    &payload[start..end]
}
