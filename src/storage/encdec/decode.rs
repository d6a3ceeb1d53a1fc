use thiserror::Error;

use super::Decode;

#[derive(Debug, Clone, Error)]
pub enum DecodingError {
    #[error("Malformed input: {0} ({1:?})")]
    MalformedInput(String, Vec<u8>),
}

// Helper method to create MalformedInput error with just a message
pub fn malformed_input<S: Into<String>>(msg: S, bytes: &[u8]) -> DecodingError {
    DecodingError::MalformedInput(msg.into(), bytes.to_vec())
}

pub type DecodingResult<'a, T> = Result<(T, &'a [u8]), DecodingError>;

impl<const N: usize> Decode for [u8; N] {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        bytes
            .get(..N)
            .map(|slice| {
                (
                    slice.try_into().expect("slice with incorrect length"),
                    &bytes[N..],
                )
            })
            .ok_or(malformed_input("array insufficient bytes", bytes))
    }
}

impl Decode for u8 {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        bytes
            .first()
            .map(|b| (*b, &bytes[1..]))
            .ok_or(malformed_input("u8 insufficient bytes", bytes))
    }
}

impl Decode for u32 {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (raw, rest) = <[u8; 4]>::decode(bytes)?;
        Ok((u32::from_be_bytes(raw), rest))
    }
}

impl Decode for () {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        Ok(((), bytes))
    }
}

// Little-endian readers for record values. Keys never use these.

pub fn read_u32_le(bytes: &[u8]) -> DecodingResult<u32> {
    bytes
        .split_at_checked(4)
        .map(|(raw, rest)| (u32::from_le_bytes(raw.try_into().unwrap()), rest))
        .ok_or(malformed_input("u32 insufficient bytes", bytes))
}

pub fn read_i32_le(bytes: &[u8]) -> DecodingResult<i32> {
    bytes
        .split_at_checked(4)
        .map(|(raw, rest)| (i32::from_le_bytes(raw.try_into().unwrap()), rest))
        .ok_or(malformed_input("i32 insufficient bytes", bytes))
}

pub fn read_u64_le(bytes: &[u8]) -> DecodingResult<u64> {
    bytes
        .split_at_checked(8)
        .map(|(raw, rest)| (u64::from_le_bytes(raw.try_into().unwrap()), rest))
        .ok_or(malformed_input("u64 insufficient bytes", bytes))
}

pub fn read_i64_le(bytes: &[u8]) -> DecodingResult<i64> {
    bytes
        .split_at_checked(8)
        .map(|(raw, rest)| (i64::from_le_bytes(raw.try_into().unwrap()), rest))
        .ok_or(malformed_input("i64 insufficient bytes", bytes))
}

pub fn read_bytes(bytes: &[u8], len: usize) -> DecodingResult<Vec<u8>> {
    bytes
        .split_at_checked(len)
        .map(|(raw, rest)| (raw.to_vec(), rest))
        .ok_or(malformed_input("insufficient bytes", bytes))
}
