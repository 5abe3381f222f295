use lbft_core::block::BlockHash;
use lbft_db::def_table;

use crate::Snapshot;

def_table! {
    /// Checkpointed snapshots, by the hash of the block they were taken at
    snapshots: BlockHash => Snapshot
}
