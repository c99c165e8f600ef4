//! Per-key serialization of concurrent pull and push transfers

use crate::errors::ImageError;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::watch;

/// Which pool a transfer key lives in
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransferKind {
    Pull,
    Push,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Pull => "pull",
            TransferKind::Push => "push",
        }
    }

    fn other(&self) -> TransferKind {
        match self {
            TransferKind::Pull => TransferKind::Push,
            TransferKind::Push => TransferKind::Pull,
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a transfer ended, as seen by attached observers
///
/// Observers never learn more than this from the signal itself; in
/// particular a transfer abandoned mid-flight (the owning task dropped its
/// permit without recording an outcome) is indistinguishable from a
/// cancelled one, and observers re-check the reference store to see whether
/// the binding they wanted materialized.
#[derive(Clone, Debug)]
pub enum TransferStatus {
    Pending,
    Success,
    Failed(String),
    Abandoned,
}

impl TransferStatus {
    fn is_pending(&self) -> bool {
        matches!(self, TransferStatus::Pending)
    }
}

/// One-shot broadcast observers use to wait out an in-flight transfer
///
/// The signal starts unset and is marked exactly once, when the owning
/// [TransferPermit] completes or drops. Marking is permanent: current and
/// future waiters all proceed immediately afterwards.
#[derive(Clone)]
pub struct CompletionSignal {
    rx: watch::Receiver<TransferStatus>,
}

impl CompletionSignal {
    /// Wait until the transfer this signal tracks has finished
    pub async fn wait(&self) -> TransferStatus {
        let mut rx = self.rx.clone();
        loop {
            let status = rx.borrow_and_update().clone();
            if !status.is_pending() {
                return status;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without ever recording an outcome.
                return TransferStatus::Abandoned;
            }
        }
    }
}

/// Owned right to run the transfer for one `(kind, key)` pair
///
/// Dropping the permit releases the pool entry and wakes every waiter, so
/// cancellation and failure paths cannot leak a key. Use
/// [TransferPermit::complete] to record a real outcome first.
pub struct TransferPermit {
    pools: Arc<Mutex<Pools>>,
    kind: TransferKind,
    key: String,
    tx: Option<watch::Sender<TransferStatus>>,
}

impl TransferPermit {
    /// The key this permit holds
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Record the transfer outcome and release the key
    pub fn complete(mut self, status: TransferStatus) {
        self.finish(status);
    }

    fn finish(&mut self, status: TransferStatus) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(status);
            let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
            pools.pool_mut(self.kind).remove(&self.key);
            log::debug!("{} {} released", self.kind, self.key);
        }
    }
}

impl Drop for TransferPermit {
    fn drop(&mut self) {
        self.finish(TransferStatus::Abandoned);
    }
}

/// Result of trying to acquire a transfer key
pub enum Acquired {
    /// The caller owns the transfer and must see the permit through
    Owner(TransferPermit),
    /// A same-kind transfer already holds the key; wait on the signal
    Joined(CompletionSignal),
}

#[derive(Default)]
struct Pools {
    pulling: HashMap<String, watch::Receiver<TransferStatus>>,
    pushing: HashMap<String, watch::Receiver<TransferStatus>>,
}

impl Pools {
    fn pool(&self, kind: TransferKind) -> &HashMap<String, watch::Receiver<TransferStatus>> {
        match kind {
            TransferKind::Pull => &self.pulling,
            TransferKind::Push => &self.pushing,
        }
    }

    fn pool_mut(
        &mut self,
        kind: TransferKind,
    ) -> &mut HashMap<String, watch::Receiver<TransferStatus>> {
        match kind {
            TransferKind::Pull => &mut self.pulling,
            TransferKind::Push => &mut self.pushing,
        }
    }
}

/// Keyed deduplication of concurrent transfers
///
/// Holds one pool per transfer kind. Clones share the same pools. The
/// coordinator lock covers only the pool maps; it is never held while
/// transfer work or I/O runs.
#[derive(Clone, Default)]
pub struct TransferCoordinator {
    pools: Arc<Mutex<Pools>>,
}

impl TransferCoordinator {
    pub fn new() -> Self {
        TransferCoordinator::default()
    }

    /// Try to claim `key` for a transfer of `kind`
    ///
    /// A same-kind holder yields [Acquired::Joined] with its signal. A
    /// holder of the opposite kind is a hard
    /// [ImageError::OperationInProgress] conflict.
    pub fn acquire(&self, kind: TransferKind, key: &str) -> Result<Acquired, ImageError> {
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rx) = pools.pool(kind).get(key) {
            log::debug!("{} {} already in flight, attaching", kind, key);
            return Ok(Acquired::Joined(CompletionSignal { rx: rx.clone() }));
        }
        if pools.pool(kind.other()).contains_key(key) {
            return Err(ImageError::OperationInProgress {
                kind: kind.other().as_str(),
                key: key.to_owned(),
            });
        }
        let (tx, rx) = watch::channel(TransferStatus::Pending);
        pools.pool_mut(kind).insert(key.to_owned(), rx);
        log::debug!("{} {} acquired", kind, key);
        Ok(Acquired::Owner(TransferPermit {
            pools: self.pools.clone(),
            kind,
            key: key.to_owned(),
            tx: Some(tx),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_joins() {
        let coordinator = TransferCoordinator::new();
        let owner = match coordinator.acquire(TransferKind::Pull, "repo:tag").unwrap() {
            Acquired::Owner(permit) => permit,
            Acquired::Joined(_) => panic!("first acquire must own"),
        };
        let signal = match coordinator.acquire(TransferKind::Pull, "repo:tag").unwrap() {
            Acquired::Joined(signal) => signal,
            Acquired::Owner(_) => panic!("second acquire must join"),
        };
        owner.complete(TransferStatus::Success);
        assert!(matches!(signal.wait().await, TransferStatus::Success));
    }

    #[tokio::test]
    async fn cross_kind_conflict() {
        let coordinator = TransferCoordinator::new();
        let _owner = coordinator.acquire(TransferKind::Pull, "repo").unwrap();
        match coordinator.acquire(TransferKind::Push, "repo") {
            Err(ImageError::OperationInProgress { kind, key }) => {
                assert_eq!(kind, "pull");
                assert_eq!(key, "repo");
            }
            _ => panic!("push must conflict with in-flight pull"),
        }
    }

    #[tokio::test]
    async fn dropped_permit_releases() {
        let coordinator = TransferCoordinator::new();
        let signal = {
            let _owner = coordinator.acquire(TransferKind::Push, "repo").unwrap();
            match coordinator.acquire(TransferKind::Push, "repo").unwrap() {
                Acquired::Joined(signal) => signal,
                Acquired::Owner(_) => panic!("second acquire must join"),
            }
            // owner dropped here without completing
        };
        assert!(matches!(signal.wait().await, TransferStatus::Abandoned));
        // the key is free again
        match coordinator.acquire(TransferKind::Pull, "repo").unwrap() {
            Acquired::Owner(_) => {}
            Acquired::Joined(_) => panic!("released key must be acquirable"),
        }
    }

    #[tokio::test]
    async fn late_observer_proceeds_immediately() {
        let coordinator = TransferCoordinator::new();
        let owner = match coordinator.acquire(TransferKind::Pull, "k").unwrap() {
            Acquired::Owner(permit) => permit,
            Acquired::Joined(_) => panic!(),
        };
        let signal = match coordinator.acquire(TransferKind::Pull, "k").unwrap() {
            Acquired::Joined(signal) => signal,
            Acquired::Owner(_) => panic!(),
        };
        owner.complete(TransferStatus::Failed("connection reset".into()));
        // marking is permanent, waiting after the fact still returns
        assert!(matches!(signal.wait().await, TransferStatus::Failed(_)));
        assert!(matches!(signal.wait().await, TransferStatus::Failed(_)));
    }
}
