//! Optimistic nonce sequencing for venues that require a pre-assigned,
//! strictly increasing transaction identifier before a remote ACK is known.
//!
//! One sequencer per signing identity. Issuance is atomic with respect to
//! other callers in the same process; a remote resync seeds or repairs the
//! counter, and rollback compensates for a nonce consumed locally but never
//! transmitted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;

/// The remote nonce authority: returns the next nonce the venue expects.
#[async_trait]
pub trait NonceSource: Send + Sync {
    async fn fetch_nonce(&self) -> Result<i64>;
}

/// Sync throttling for the sequencer.
#[derive(Debug, Clone, Deserialize)]
pub struct NonceConfig {
    /// Minimum interval between remote syncs (milliseconds). Guards against
    /// thundering-herd resync storms when many callers detect a gap at once.
    #[serde(default = "default_min_sync_interval_ms")]
    pub min_sync_interval_ms: u64,
}

fn default_min_sync_interval_ms() -> u64 {
    1_000
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            min_sync_interval_ms: default_min_sync_interval_ms(),
        }
    }
}

/// Sentinel for "not yet synced with the remote authority".
const UNSYNCED: i64 = -1;

#[derive(Debug)]
struct NonceState {
    current: i64,
    last_sync: Option<Instant>,
}

/// Optimistic nonce sequencer.
///
/// All state lives behind one async mutex, which doubles as the in-flight
/// sync guard: a caller that arrives while a sync is running waits on the
/// lock and then finds the freshly synced value, so no duplicate fetch is
/// issued.
pub struct NonceSequencer {
    source: Arc<dyn NonceSource>,
    config: NonceConfig,
    state: Mutex<NonceState>,
}

impl NonceSequencer {
    pub fn new(source: Arc<dyn NonceSource>, config: NonceConfig) -> Self {
        Self {
            source,
            config,
            state: Mutex::new(NonceState {
                current: UNSYNCED,
                last_sync: None,
            }),
        }
    }

    /// Return the next nonce and advance the counter.
    ///
    /// Performs a one-time remote sync on first use. Concurrent callers
    /// observe a strictly increasing sequence with no gaps or duplicates.
    pub async fn next(&self) -> Result<i64> {
        let mut state = self.state.lock().await;
        if state.current == UNSYNCED {
            self.sync_locked(&mut state, true).await?;
        }
        let nonce = state.current;
        state.current += 1;
        debug!(nonce, "Issued nonce");
        Ok(nonce)
    }

    /// Re-seed the counter from the remote authority.
    ///
    /// Idempotent under concurrent invocation, and rate-limited to at most
    /// one remote fetch per `min_sync_interval_ms`; within the interval the
    /// current value is returned untouched.
    pub async fn sync(&self) -> Result<i64> {
        let mut state = self.state.lock().await;
        self.sync_locked(&mut state, false).await?;
        Ok(state.current)
    }

    /// Compensate for a nonce consumed locally but never transmitted
    /// (e.g. signing failed before submission).
    ///
    /// Decrements by exactly one. Caller contract: never roll back a nonce
    /// the remote has observed, even if it rejected the transaction.
    pub async fn rollback(&self) {
        let mut state = self.state.lock().await;
        if state.current <= 0 {
            warn!(current = state.current, "Rollback ignored on unsynced sequencer");
            return;
        }
        state.current -= 1;
        debug!(current = state.current, "Rolled back nonce");
    }

    /// Discard all state; the next call re-syncs from scratch.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.current = UNSYNCED;
        state.last_sync = None;
        info!("Nonce sequencer reset");
    }

    /// Current counter without advancing it. `None` before the first sync.
    pub async fn peek(&self) -> Option<i64> {
        let state = self.state.lock().await;
        (state.current != UNSYNCED).then_some(state.current)
    }

    async fn sync_locked(&self, state: &mut NonceState, force: bool) -> Result<()> {
        let min_interval = Duration::from_millis(self.config.min_sync_interval_ms);
        if !force && state.current != UNSYNCED {
            if let Some(last) = state.last_sync {
                if last.elapsed() < min_interval {
                    debug!("Sync suppressed by minimum interval");
                    return Ok(());
                }
            }
        }

        let fetched = self.source.fetch_nonce().await?;
        info!(nonce = fetched, "Synced nonce from remote authority");
        state.current = fetched;
        state.last_sync = Some(Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

    use super::*;
    use crate::error::Error;

    struct CountingSource {
        value: AtomicI64,
        fetches: AtomicU32,
    }

    impl CountingSource {
        fn new(value: i64) -> Arc<Self> {
            Arc::new(Self {
                value: AtomicI64::new(value),
                fetches: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl NonceSource for CountingSource {
        async fn fetch_nonce(&self) -> Result<i64> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.value.load(Ordering::SeqCst))
        }
    }

    fn sequencer(source: Arc<CountingSource>) -> NonceSequencer {
        NonceSequencer::new(source, NonceConfig::default())
    }

    #[tokio::test]
    async fn first_next_syncs_then_increments() {
        let source = CountingSource::new(100);
        let seq = sequencer(source.clone());

        assert_eq!(seq.next().await.unwrap(), 100);
        assert_eq!(seq.next().await.unwrap(), 101);
        assert_eq!(seq.next().await.unwrap(), 102);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_next_yields_gapless_increasing_sequence() {
        let source = CountingSource::new(0);
        let seq = Arc::new(sequencer(source.clone()));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let seq = seq.clone();
            handles.push(tokio::spawn(async move { seq.next().await.unwrap() }));
        }

        let mut nonces = Vec::new();
        for handle in handles {
            nonces.push(handle.await.unwrap());
        }
        nonces.sort_unstable();

        let expected: Vec<i64> = (0..32).collect();
        assert_eq!(nonces, expected, "no gaps, no duplicates");
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1, "single sync");
    }

    #[tokio::test]
    async fn sync_is_rate_limited() {
        let source = CountingSource::new(5);
        let seq = sequencer(source.clone());

        seq.sync().await.unwrap();
        seq.sync().await.unwrap();
        seq.sync().await.unwrap();

        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sync_after_interval_fetches_again() {
        let source = CountingSource::new(5);
        let seq = NonceSequencer::new(
            source.clone(),
            NonceConfig {
                min_sync_interval_ms: 5,
            },
        );

        seq.sync().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.value.store(50, Ordering::SeqCst);
        assert_eq!(seq.sync().await.unwrap(), 50);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rollback_decrements_by_exactly_one() {
        let source = CountingSource::new(10);
        let seq = sequencer(source);

        assert_eq!(seq.next().await.unwrap(), 10);
        assert_eq!(seq.next().await.unwrap(), 11);
        seq.rollback().await;
        // The rolled-back nonce is reissued.
        assert_eq!(seq.next().await.unwrap(), 11);
    }

    #[tokio::test]
    async fn rollback_before_sync_is_ignored() {
        let source = CountingSource::new(10);
        let seq = sequencer(source);

        seq.rollback().await;
        assert_eq!(seq.peek().await, None);
        assert_eq!(seq.next().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn reset_forces_fresh_sync() {
        let source = CountingSource::new(10);
        let seq = sequencer(source.clone());

        seq.next().await.unwrap();
        seq.reset().await;
        source.value.store(99, Ordering::SeqCst);

        assert_eq!(seq.next().await.unwrap(), 99);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sync_failure_propagates_and_leaves_state_unsynced() {
        struct FailingSource;

        #[async_trait]
        impl NonceSource for FailingSource {
            async fn fetch_nonce(&self) -> Result<i64> {
                Err(Error::Unavailable {
                    status: 503,
                    message: "nonce endpoint down".into(),
                })
            }
        }

        let seq = NonceSequencer::new(Arc::new(FailingSource), NonceConfig::default());
        assert!(seq.next().await.is_err());
        assert_eq!(seq.peek().await, None);
    }
}
