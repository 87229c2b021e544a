//! Block construction settings.

use serde::{Serialize, Deserialize};

use crate::codec::{SymbolCodec, CHAR_COUNT, TERMINATOR};
use crate::runner::DEFAULT_MAX_RESPONSE_LEN;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockConfig {
    /// Alphabet size; inputs and outputs are one-hot vectors of this width.
    pub char_count: usize,
    /// Reserved symbol marking end of query / end of response.
    pub terminator: usize,
    /// Hidden width of the reader and writer cells.
    pub hidden_size: usize,
    /// Cap on decoded response length, in symbols.
    pub max_response_len: usize,
    /// Seed for weight init; the writer uses seed + 1.
    pub seed: u64,
}

impl Default for BlockConfig {
    fn default() -> Self {
        BlockConfig {
            char_count: CHAR_COUNT,
            terminator: TERMINATOR,
            hidden_size: 64,
            max_response_len: DEFAULT_MAX_RESPONSE_LEN,
            seed: 42,
        }
    }
}

impl BlockConfig {
    /// Small config for unit tests.
    pub fn test_config() -> Self {
        BlockConfig {
            char_count: 8,
            terminator: 0,
            hidden_size: 4,
            max_response_len: 16,
            seed: 42,
        }
    }

    pub fn codec(&self) -> SymbolCodec {
        SymbolCodec::new(self.char_count, self.terminator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_codec_defaults() {
        let cfg = BlockConfig::default();
        assert_eq!(cfg.codec(), SymbolCodec::default());
        assert_eq!(cfg.max_response_len, 1000);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let cfg = BlockConfig::test_config();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: BlockConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
