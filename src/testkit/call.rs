//! Scripted async collaborators for resilience tests.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::nonce::NonceSource;

/// An operation that fails a fixed number of times before succeeding.
///
/// Cloneable; all clones share the same call counter.
#[derive(Clone)]
pub struct FlakyOp {
    failures: u32,
    calls: Arc<AtomicU32>,
}

impl FlakyOp {
    /// Fail the first `failures` calls with [`Error::ConnectionDropped`],
    /// then succeed forever.
    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Never succeeds.
    pub fn always_failing() -> Self {
        Self::failing(u32::MAX)
    }

    pub async fn call(&self) -> Result<u32> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(Error::ConnectionDropped(format!("scripted failure {n}")))
        } else {
            Ok(n)
        }
    }

    /// Total invocations so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// A [`NonceSource`] returning a settable value, with a fetch counter.
pub struct ScriptedNonceSource {
    value: AtomicI64,
    fetches: AtomicU32,
}

impl ScriptedNonceSource {
    pub fn new(value: i64) -> Arc<Self> {
        Arc::new(Self {
            value: AtomicI64::new(value),
            fetches: AtomicU32::new(0),
        })
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NonceSource for ScriptedNonceSource {
    async fn fetch_nonce(&self) -> Result<i64> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.value.load(Ordering::SeqCst))
    }
}
