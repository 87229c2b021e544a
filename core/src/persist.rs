//! Block checkpoints.
//!
//! Only the two sub-cells are written; the codec is supplied again when the
//! block is loaded, and the response cap returns to its default.

use std::path::Path;

use log::info;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::block::DualPhaseBlock;
use crate::codec::SymbolCodec;
use crate::gradient::Parameterized;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("checkpoint io: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint format: {0}")]
    Format(#[from] serde_json::Error),
    /// Parsed, but a buffer disagrees with the sizes it declares.
    #[error("checkpoint shape: {0}")]
    Shape(String),
}

#[derive(Serialize)]
struct BlockCheckpointRef<'a, C> {
    reader: &'a C,
    writer: &'a C,
}

#[derive(Deserialize)]
struct BlockCheckpoint<C> {
    reader: C,
    writer: C,
}

/// Serialize the `{ reader, writer }` pair to a JSON string.
pub fn to_json<C: Serialize>(block: &DualPhaseBlock<C>) -> Result<String, PersistError> {
    let checkpoint = BlockCheckpointRef { reader: block.reader(), writer: block.writer() };
    Ok(serde_json::to_string(&checkpoint)?)
}

/// Rebuild a block from `to_json` output under `codec`. Buffer lengths are
/// checked against the cells' sizes before the block is handed out.
pub fn from_json<C>(json: &str, codec: SymbolCodec) -> Result<DualPhaseBlock<C>, PersistError>
where
    C: DeserializeOwned + Parameterized,
{
    let checkpoint: BlockCheckpoint<C> = serde_json::from_str(json)?;
    let block = DualPhaseBlock::new(checkpoint.reader, checkpoint.writer, codec);
    block.validate().map_err(PersistError::Shape)?;
    Ok(block)
}

/// Save a block's reader and writer to a JSON file.
pub fn save_block<C: Serialize>(path: &Path, block: &DualPhaseBlock<C>) -> Result<(), PersistError> {
    let json = to_json(block)?;
    std::fs::write(path, &json)?;
    info!("saved block checkpoint to {} ({} bytes)", path.display(), json.len());
    Ok(())
}

/// Load a block saved by `save_block`.
pub fn load_block<C>(path: &Path, codec: SymbolCodec) -> Result<DualPhaseBlock<C>, PersistError>
where
    C: DeserializeOwned + Parameterized,
{
    let json = std::fs::read_to_string(path)?;
    let block: DualPhaseBlock<C> = from_json(&json, codec)?;
    info!("loaded block checkpoint from {} ({} params)", path.display(), block.num_params());
    Ok(block)
}
