//! Symbol codec: characters ⇄ one-hot vectors over a fixed alphabet.
//!
//! Symbol `terminator` is reserved. On input it marks the end of the query
//! (the reader hands over to the writer); on output it means "stop".

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::tensor::argmax_f32;

/// Default alphabet size (7-bit ASCII).
pub const CHAR_COUNT: usize = 128;

/// Default terminator symbol.
pub const TERMINATOR: usize = 0;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("symbol {symbol} out of range [0, {char_count})")]
    OutOfRangeSymbol { symbol: u32, char_count: usize },
}

/// Alphabet description carried by the block and the runner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolCodec {
    char_count: usize,
    terminator: usize,
}

impl Default for SymbolCodec {
    fn default() -> Self {
        SymbolCodec { char_count: CHAR_COUNT, terminator: TERMINATOR }
    }
}

impl SymbolCodec {
    pub fn new(char_count: usize, terminator: usize) -> Self {
        assert!(char_count >= 1, "char_count must be at least 1");
        assert!(terminator < char_count, "terminator {terminator} outside alphabet of {char_count}");
        SymbolCodec { char_count, terminator }
    }

    pub fn char_count(&self) -> usize {
        self.char_count
    }

    pub fn terminator(&self) -> usize {
        self.terminator
    }

    /// Whether `symbol` lies in `[0, char_count)`.
    pub fn in_range(&self, symbol: u32) -> bool {
        (symbol as usize) < self.char_count
    }

    /// One-hot encode a symbol. Strict: out-of-range symbols are rejected.
    pub fn encode(&self, symbol: u32) -> Result<Vec<f32>, CodecError> {
        if !self.in_range(symbol) {
            return Err(CodecError::OutOfRangeSymbol { symbol, char_count: self.char_count });
        }
        let mut v = vec![0.0f32; self.char_count];
        v[symbol as usize] = 1.0;
        Ok(v)
    }

    pub fn encode_char(&self, c: char) -> Result<Vec<f32>, CodecError> {
        self.encode(c as u32)
    }

    pub fn terminator_vector(&self) -> Vec<f32> {
        let mut v = vec![0.0f32; self.char_count];
        v[self.terminator] = 1.0;
        v
    }

    /// Argmax decode, first max wins. An empty (or all-NaN) vector decodes
    /// to the terminator so that decoding loops stop.
    pub fn decode(&self, v: &[f32]) -> usize {
        argmax_f32(v).unwrap_or(self.terminator)
    }

    /// Render a decoded symbol as a character; invalid scalar values become U+FFFD.
    pub fn symbol_char(&self, symbol: usize) -> char {
        u32::try_from(symbol)
            .ok()
            .and_then(char::from_u32)
            .unwrap_or(char::REPLACEMENT_CHARACTER)
    }

    /// True when the terminator component of an input vector is non-zero.
    pub fn carries_terminator(&self, v: &[f32]) -> bool {
        v.get(self.terminator).is_some_and(|&x| x != 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_one_hot() {
        let codec = SymbolCodec::default();
        let v = codec.encode_char('5').unwrap();
        assert_eq!(v.len(), CHAR_COUNT);
        assert_eq!(v.iter().filter(|&&x| x == 1.0).count(), 1);
        assert_eq!(v['5' as usize], 1.0);
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        let codec = SymbolCodec::default();
        assert_eq!(
            codec.encode(128),
            Err(CodecError::OutOfRangeSymbol { symbol: 128, char_count: 128 })
        );
        assert!(codec.encode_char('é').is_err());
        assert!(codec.encode(127).is_ok());
    }

    #[test]
    fn test_decode_argmax_first_max() {
        let codec = SymbolCodec::new(4, 0);
        assert_eq!(codec.decode(&[0.1, 0.7, 0.7, 0.2]), 1);
        assert_eq!(codec.decode(&[]), 0);
    }

    #[test]
    fn test_decode_inverts_encode() {
        let codec = SymbolCodec::default();
        for c in ['a', '+', '0', ' '] {
            let v = codec.encode_char(c).unwrap();
            assert_eq!(codec.symbol_char(codec.decode(&v)), c);
        }
    }

    #[test]
    fn test_custom_terminator() {
        let codec = SymbolCodec::new(8, 7);
        let t = codec.terminator_vector();
        assert!(codec.carries_terminator(&t));
        assert!(!codec.carries_terminator(&codec.encode(0).unwrap()));
    }

    #[test]
    #[should_panic(expected = "outside alphabet")]
    fn test_terminator_must_be_in_alphabet() {
        SymbolCodec::new(4, 4);
    }
}
