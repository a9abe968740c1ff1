//! Import worker draining the block queue.

use crate::chain::{ImportOutcome, LocalChain};
use ember_storage::BlockQueue;
use ember_sync::SyncManager;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Spawn the import thread.
///
/// The worker blocks on [`BlockQueue::take`] and hands each block to
/// the chain; missing parents trigger gap recovery and fresh announced
/// imports complete the sync. The thread exits once the queue closes.
pub fn spawn(
    queue: Arc<BlockQueue>,
    chain: Arc<LocalChain>,
    sync: Arc<SyncManager>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("block-import".to_string())
        .spawn(move || loop {
            let wrapper = match queue.take() {
                Ok(wrapper) => wrapper,
                Err(e) => {
                    info!(reason = %e, "Block queue drained no further, import worker stopping");
                    break;
                }
            };
            match chain.try_import(&wrapper.block) {
                Ok(ImportOutcome::Imported) => {
                    debug!(number = wrapper.number(), "Block imported");
                    if wrapper.is_new_block {
                        sync.notify_new_block_imported(&wrapper);
                    }
                }
                Ok(ImportOutcome::Exists) => {
                    debug!(number = wrapper.number(), "Block already known");
                }
                Ok(ImportOutcome::NoParent) => {
                    info!(
                        number = wrapper.number(),
                        "Block parent is missing, recovering gap"
                    );
                    sync.recover_gap(&wrapper);
                }
                Err(e) => {
                    warn!(number = wrapper.number(), error = %e, "Block import failed");
                }
            }
        })
}
