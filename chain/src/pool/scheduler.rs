//! The block-cutting scheduler.
//!
//! Exactly one scheduler task runs per node; it is the sole writer to the
//! local chain. A block is cut when the queue reaches the fill cap or the
//! block interval elapses with a non-empty queue. After the atomic append
//! the block is indexed and pushed onto the broadcast channel; both are
//! best-effort since durability was already reached.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::ledger::Blockchain;
use crate::metrics::MetricsRegistry;
use crate::pool::receiver::Receiver;
use crate::search::Search;
use crate::types::Block;

/// Everything the scheduler task needs.
pub struct SchedulerContext {
    pub receiver: Arc<Receiver>,
    pub chain: Arc<Blockchain>,
    pub search: Arc<Search>,
    pub metrics: Arc<MetricsRegistry>,
    /// Committed blocks flow to the p2p broadcaster through this channel.
    pub committed: mpsc::Sender<Block>,
}

/// Runs the block-cutting loop forever. Spawn onto its own task.
pub async fn run_scheduler(ctx: SchedulerContext) {
    let config = ctx.receiver.config().clone();
    let interval = Duration::from_millis(config.max_block_interval_ms.max(1));
    tracing::info!(
        interval_ms = config.max_block_interval_ms,
        max_txs = config.max_txs_per_block,
        "monitoring the transaction queue"
    );

    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; consume it so the loop waits a
    // full interval before the first timed cut.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !ctx.receiver.is_empty() {
                    cut_block(&ctx, config.max_txs_per_block).await;
                }
            }
            _ = ctx.receiver.full_notified() => {
                while ctx.receiver.len() >= config.max_txs_per_block {
                    cut_block(&ctx, config.max_txs_per_block).await;
                }
            }
        }
    }
}

async fn cut_block(ctx: &SchedulerContext, max_txs: usize) {
    let candidates = ctx.receiver.drain(max_txs);
    if candidates.is_empty() {
        return;
    }

    let start = std::time::Instant::now();
    let block = match ctx.chain.add_block(candidates) {
        Ok(block) => block,
        Err(e) => {
            tracing::error!(error = %e, "failed to append block");
            return;
        }
    };
    ctx.metrics
        .node
        .block_commit_seconds
        .observe(start.elapsed().as_secs_f64());
    ctx.metrics.node.blocks_committed.inc();
    ctx.metrics
        .node
        .transactions_committed
        .inc_by(block.total_transactions);

    tracing::info!(
        height = block.height,
        hash = %block.hash.to_hex(),
        txs = block.total_transactions,
        "committed block"
    );

    let index_start = std::time::Instant::now();
    if let Err(e) = ctx.search.index_block(&block, ctx.chain.peer_id()) {
        tracing::error!(error = %e, "failed to index block");
    }
    ctx.metrics
        .node
        .index_batch_seconds
        .observe(index_start.elapsed().as_secs_f64());

    if ctx.committed.send(block).await.is_err() {
        tracing::debug!("broadcast channel closed, block not propagated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SharedStore;
    use crate::pool::receiver::{PoolConfig, PutOutcome};
    use crate::storage::MemChainStore;
    use crate::types::{DocumentMapping, FieldDef, FieldType, HASH_LEN, PeerId};
    use std::collections::BTreeMap;

    fn setup(
        config: PoolConfig,
    ) -> (SchedulerContext, mpsc::Receiver<Block>, tempfile::TempDir) {
        let store: SharedStore = Arc::new(MemChainStore::new());
        let peer = PeerId([7u8; HASH_LEN]);
        let chain = Arc::new(Blockchain::create(store.clone(), peer).unwrap());

        let mut fields = BTreeMap::new();
        fields.insert(
            "n".to_string(),
            FieldDef {
                field_type: FieldType::Number,
            },
        );
        store
            .put_mapping(&DocumentMapping {
                collection: "events".to_string(),
                fields,
            })
            .unwrap();

        let tmp = tempfile::TempDir::new().unwrap();
        let search = Arc::new(Search::new(store.clone(), tmp.path()).unwrap());
        let receiver = Arc::new(Receiver::new(store, peer, config));
        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        let (committed_tx, committed_rx) = mpsc::channel(16);

        (
            SchedulerContext {
                receiver,
                chain,
                search,
                metrics,
                committed: committed_tx,
            },
            committed_rx,
            tmp,
        )
    }

    fn enqueue(ctx: &SchedulerContext, n: usize) {
        for i in 0..n {
            let raw = format!(r#"{{"n":{i}}}"#);
            match ctx
                .receiver
                .put_unsigned(raw.as_bytes(), "events", Vec::new())
                .unwrap()
            {
                PutOutcome::Accepted(_) => {}
                other => panic!("expected Accepted, got {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cut_by_count_then_timer() {
        let (ctx, mut committed_rx, _tmp) = setup(PoolConfig {
            max_txs_per_block: 3,
            max_block_interval_ms: 10_000,
        });
        let receiver = ctx.receiver.clone();
        let chain = ctx.chain.clone();
        tokio::spawn(run_scheduler(ctx));
        tokio::task::yield_now().await;

        // Seven transactions within one interval: the fill cap cuts two
        // blocks of three right away.
        enqueue_on(&receiver, 7);
        let b1 = committed_rx.recv().await.unwrap();
        let b2 = committed_rx.recv().await.unwrap();
        assert_eq!(b1.total_transactions, 3);
        assert_eq!(b2.total_transactions, 3);

        // The straggler waits for the timer.
        tokio::time::sleep(Duration::from_millis(10_100)).await;
        let b3 = committed_rx.recv().await.unwrap();
        assert_eq!(b3.total_transactions, 1);

        assert_eq!(b2.prev_block_hash, Some(b1.hash));
        assert_eq!(b3.prev_block_hash, Some(b2.hash));
        assert_eq!(chain.height().unwrap(), Some(3));
        assert!(receiver.is_empty());

        fn enqueue_on(receiver: &Receiver, n: usize) {
            for i in 0..n {
                let raw = format!(r#"{{"n":{i}}}"#);
                receiver.put_unsigned(raw.as_bytes(), "events", Vec::new()).unwrap();
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cut_by_timer_batches_the_queue() {
        let (ctx, mut committed_rx, _tmp) = setup(PoolConfig {
            max_txs_per_block: 1000,
            max_block_interval_ms: 200,
        });
        enqueue(&ctx, 2);
        let chain = ctx.chain.clone();
        tokio::spawn(run_scheduler(ctx));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let block = committed_rx.recv().await.unwrap();
        assert_eq!(block.total_transactions, 2);
        assert_eq!(chain.height().unwrap(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_cuts_nothing() {
        let (ctx, mut committed_rx, _tmp) = setup(PoolConfig {
            max_txs_per_block: 10,
            max_block_interval_ms: 100,
        });
        let chain = ctx.chain.clone();
        tokio::spawn(run_scheduler(ctx));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(committed_rx.try_recv().is_err());
        assert_eq!(chain.height().unwrap(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn committed_blocks_are_indexed() {
        let (ctx, mut committed_rx, _tmp) = setup(PoolConfig {
            max_txs_per_block: 1000,
            max_block_interval_ms: 100,
        });
        enqueue(&ctx, 1);
        let search = ctx.search.clone();
        tokio::spawn(run_scheduler(ctx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = committed_rx.recv().await.unwrap();

        let request: crate::search::SearchRequest =
            serde_json::from_str(r#"{"query": {"field": "n", "min": 0}}"#).unwrap();
        let hits = search.query("events", request, "0x0", true).unwrap();
        assert_eq!(hits.total, 1);
    }
}
