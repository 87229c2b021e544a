/// Batch partitioning by phase.
///
/// `split` separates a batch into the sequences flagged `true` (reading)
/// and the rest (writing), keeping relative order within each side.
/// `join` is its exact inverse for the same flags:
///
///   join(f, split(f, x).0, split(f, x).1) == x
///
/// Both are generic over the item type, so inputs, states, outputs and
/// gradients of either computation mode all go through the same code.

use crate::cell::StepError;

/// Split `items` by `flags` into (flagged, unflagged).
pub fn split<T>(flags: &[bool], items: Vec<T>) -> Result<(Vec<T>, Vec<T>), StepError> {
    if flags.len() != items.len() {
        return Err(StepError::InvalidArgument(format!(
            "split: {} flags for {} items",
            flags.len(),
            items.len()
        )));
    }
    let k = count_flagged(flags);
    let mut reading = Vec::with_capacity(k);
    let mut writing = Vec::with_capacity(items.len() - k);
    for (item, &flag) in items.into_iter().zip(flags) {
        if flag {
            reading.push(item);
        } else {
            writing.push(item);
        }
    }
    Ok((reading, writing))
}

/// Merge two partitions back into batch order.
///
/// `reading` must hold exactly one item per `true` flag and `writing` one
/// per `false` flag.
pub fn join<T>(flags: &[bool], reading: Vec<T>, writing: Vec<T>) -> Result<Vec<T>, StepError> {
    let k = count_flagged(flags);
    if reading.len() != k || writing.len() != flags.len() - k {
        return Err(StepError::InvalidArgument(format!(
            "join: flags select {}/{} but got {}/{} items",
            k,
            flags.len() - k,
            reading.len(),
            writing.len()
        )));
    }
    let mut reading = reading.into_iter();
    let mut writing = writing.into_iter();
    let mut out = Vec::with_capacity(flags.len());
    for &flag in flags {
        let next = if flag { reading.next() } else { writing.next() };
        // Lengths were checked above, so neither iterator runs dry.
        if let Some(item) = next {
            out.push(item);
        }
    }
    Ok(out)
}

pub fn count_flagged(flags: &[bool]) -> usize {
    flags.iter().filter(|&&f| f).count()
}
