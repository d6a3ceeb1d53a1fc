pub mod decode;
pub mod encode;

use std::ops::Range;

pub use decode::{DecodingError, DecodingResult};

pub trait Encode {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decode
where
    Self: Sized,
{
    fn decode(bytes: &[u8]) -> DecodingResult<Self>;

    /// `decode` but requiring that the input is consumed exactly.
    fn decode_all(bytes: &[u8]) -> Result<Self, DecodingError> {
        let (out, rest) = Self::decode(bytes)?;

        if !rest.is_empty() {
            return Err(decode::malformed_input("trailing bytes", rest));
        }

        Ok(out)
    }
}

#[derive(Default, Clone)]
pub struct EncodeBuilder {
    output: Vec<u8>,
}

impl EncodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append<T: Encode>(mut self, data: &T) -> Self {
        self.output.extend(data.encode());
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.output
    }
}

/// Smallest range covering every key that starts with `prefix`: the
/// exclusive upper bound is the prefix with its last incrementable byte
/// bumped. An empty upper bound means unbounded above.
pub fn prefix_key_range(prefix: &[u8]) -> Range<Vec<u8>> {
    let start = prefix.to_vec();

    // A 0xff tail has no successor at that length, so cut it off before
    // incrementing. No non-0xff byte at all leaves the range open-ended.
    let trimmed = prefix
        .iter()
        .rposition(|byte| *byte != 0xff)
        .map(|pos| &prefix[..=pos])
        .unwrap_or(&[]);

    let mut end = trimmed.to_vec();
    if let Some(last) = end.last_mut() {
        *last += 1;
    }

    start..end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_range_increments_last_byte() {
        let range = prefix_key_range(&[0x74, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(range.start, vec![0x74, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(range.end, vec![0x74, 0x00, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn prefix_range_carries_over_max_bytes() {
        let range = prefix_key_range(&[0x74, 0xff, 0xff]);
        assert_eq!(range.end, vec![0x75]);
    }

    #[test]
    fn prefix_range_all_max_is_unbounded() {
        let range = prefix_key_range(&[0xff, 0xff]);
        assert!(range.end.is_empty());
    }
}
