use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::error::{PacingError, SimulatorError};

/// How new blocks appear on the simulated chain during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPacing {
    /// The simulator mines a block every `interval` on its own.
    Autonomous { interval: Duration },
    /// Blocks are only mined on request, exactly `blocks` of them.
    Manual { blocks: u64 },
}

impl BlockPacing {
    /// Blocks the run skips on purpose. Autonomous runs report zero.
    pub fn skip_count(&self) -> u64 {
        match self {
            BlockPacing::Autonomous { .. } => 0,
            BlockPacing::Manual { blocks } => *blocks,
        }
    }
}

#[async_trait(?Send)]
pub trait BlockMiner {
    /// Mines a single block and returns once the simulator has produced it.
    async fn mine_block(&self) -> Result<(), SimulatorError>;
}

/// Advances the chain according to `pacing` and returns how many blocks were
/// mined by this call.
///
/// Manual pacing awaits every block before requesting the next one, so exactly
/// `blocks` blocks exist afterwards. The first failing block aborts the whole
/// advance.
pub async fn advance<M: BlockMiner + ?Sized>(
    miner: &M,
    pacing: &BlockPacing,
) -> Result<u64, PacingError> {
    let BlockPacing::Manual { blocks } = *pacing else {
        return Ok(0);
    };

    for mined in 0..blocks {
        miner
            .mine_block()
            .await
            .map_err(|source| PacingError::Aborted {
                mined,
                requested: blocks,
                source,
            })?;
        trace!(block = mined + 1, requested = blocks, "Mined block");
    }

    Ok(blocks)
}
