use super::Encode;

// Key-side integer encodings are fixed-width big-endian so that
// lexicographic key order equals numeric order for range scans. Record
// values use little-endian layouts written inline by each record codec.

impl<const N: usize> Encode for [u8; N] {
    fn encode(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl Encode for u8 {
    fn encode(&self) -> Vec<u8> {
        vec![*self]
    }
}

impl Encode for u32 {
    fn encode(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }
}

impl Encode for () {
    fn encode(&self) -> Vec<u8> {
        Vec::new()
    }
}
