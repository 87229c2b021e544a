//! Query/response samples and the vector sequences derived from them.

use serde::{Serialize, Deserialize};

use crate::codec::{CodecError, SymbolCodec};

/// A query (e.g. "shift x by 2 in x^2+2") and its expected response
/// (e.g. "(x-2)^2+2").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    query: String,
    response: String,
}

/// Full teacher-forced stream for one sample.
///
/// `targets[t]` is `None` on encoder steps and the expected decoder output
/// on decoder steps. `inputs.len() == targets.len()`.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingSequence {
    pub inputs: Vec<Vec<f32>>,
    pub targets: Vec<Option<Vec<f32>>>,
}

impl Sample {
    pub fn new(query: impl Into<String>, response: impl Into<String>) -> Self {
        Sample { query: query.into(), response: response.into() }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    /// One-hot vector per query character.
    pub fn input_sequence(&self, codec: &SymbolCodec) -> Result<Vec<Vec<f32>>, CodecError> {
        self.query.chars().map(|c| codec.encode_char(c)).collect()
    }

    /// Desired decoder output: the response followed by one terminator.
    pub fn decoder_out_sequence(&self, codec: &SymbolCodec) -> Result<Vec<Vec<f32>>, CodecError> {
        let mut res = self
            .response
            .chars()
            .map(|c| codec.encode_char(c))
            .collect::<Result<Vec<_>, _>>()?;
        res.push(codec.terminator_vector());
        Ok(res)
    }

    /// Decoder input under teacher forcing: the response shifted right by
    /// one, led by a terminator.
    pub fn decoder_in_sequence(&self, codec: &SymbolCodec) -> Result<Vec<Vec<f32>>, CodecError> {
        let mut res = Vec::with_capacity(self.response.chars().count() + 1);
        res.push(codec.terminator_vector());
        for c in self.response.chars() {
            res.push(codec.encode_char(c)?);
        }
        Ok(res)
    }

    /// query ++ [terminator] ++ decoder_in, with decoder_out as targets on
    /// the decoder steps. This is the stream the runner feeds at inference
    /// time, with the model's own outputs in place of the response.
    pub fn training_sequence(&self, codec: &SymbolCodec) -> Result<TrainingSequence, CodecError> {
        let encoder = self.input_sequence(codec)?;
        let decoder_in = self.decoder_in_sequence(codec)?;
        let decoder_out = self.decoder_out_sequence(codec)?;

        let mut inputs = encoder;
        inputs.push(codec.terminator_vector());
        let mut targets: Vec<Option<Vec<f32>>> = vec![None; inputs.len()];
        inputs.extend(decoder_in);
        targets.extend(decoder_out.into_iter().map(Some));
        Ok(TrainingSequence { inputs, targets })
    }
}
