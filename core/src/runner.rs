//! Step-by-step inference driver.

use log::{debug, warn};

use crate::cell::{RecurrentCell, Reverse, StepError};
use crate::codec::SymbolCodec;

/// Length cap on decoded responses, in symbols.
pub const DEFAULT_MAX_RESPONSE_LEN: usize = 1000;

/// Feeds one input at a time through a cell with a batch of one,
/// carrying the state between calls.
pub struct Runner<'c, C: RecurrentCell<Reverse>> {
    cell: &'c C,
    state: Option<C::State>,
    steps: usize,
}

impl<'c, C: RecurrentCell<Reverse>> Runner<'c, C> {
    pub fn new(cell: &'c C) -> Self {
        Runner { cell, state: None, steps: 0 }
    }

    /// Advance one timestep and return the cell's output.
    ///
    /// On error the runner is left as it was: same state, same step count.
    pub fn step_time(&mut self, input: Vec<f32>) -> Result<Vec<f32>, StepError> {
        let state = match &self.state {
            Some(s) => s.clone(),
            None => self.cell.start_state(&()),
        };
        let step = self.cell.step(&(), vec![state], vec![input])?;
        let (output, next) = match (step.outputs.into_iter().next(), step.states.into_iter().next()) {
            (Some(y), Some(s)) => (y, s),
            _ => return Err(StepError::InvalidArgument("cell returned no output".into())),
        };
        self.state = Some(next);
        self.steps += 1;
        Ok(output)
    }

    pub fn state(&self) -> Option<&C::State> {
        self.state.as_ref()
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Forget the carried state; the next step starts afresh.
    pub fn reset(&mut self) {
        self.state = None;
        self.steps = 0;
    }
}

/// Run a query and decode the response.
///
/// Query characters outside the alphabet are skipped rather than rejected.
/// After the query one terminator is fed; the decoder then starts from the
/// terminator and feeds back each decoded symbol until it decodes the
/// terminator or `max_len` symbols have been produced.
pub fn query<C: RecurrentCell<Reverse>>(
    cell: &C,
    codec: &SymbolCodec,
    text: &str,
    max_len: usize,
) -> Result<String, StepError> {
    let mut runner = Runner::new(cell);
    let mut skipped = 0usize;
    for c in text.chars() {
        match codec.encode_char(c) {
            Ok(v) => {
                runner.step_time(v)?;
            }
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("query: skipped {skipped} character(s) outside the {}-symbol alphabet", codec.char_count());
    }
    runner.step_time(codec.terminator_vector())?;

    let terminator = codec.terminator();
    let mut last = terminator;
    let mut res = String::new();
    let mut emitted = 0usize;
    loop {
        let symbol = u32::try_from(last).unwrap_or(u32::MAX);
        let input = codec
            .encode(symbol)
            .map_err(|e| StepError::InvalidArgument(format!("decoded {e}")))?;
        let out = runner.step_time(input)?;
        last = codec.decode(&out);
        if last == terminator {
            break;
        }
        if emitted >= max_len {
            warn!("query: response hit the {max_len}-symbol cap");
            break;
        }
        res.push(codec.symbol_char(last));
        emitted += 1;
    }
    debug!("query: {} steps, {} symbols emitted", runner.steps(), emitted);
    Ok(res)
}
