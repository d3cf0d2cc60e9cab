//! Lazy, cancellable read results.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::common::Result;
use crate::tree::TreeScanner;
use crate::types::{KeyComparer, NaturalOrder, TreeType};

/// Shared flag that stops a [`TreeStream`] from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Ask the stream to stop. It yields nothing further once it sees this.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once `cancel` was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Records of one range read, produced as they are pulled.
///
/// The flag is checked before every record, so cancellation never waits for
/// more I/O. Cancelling is a normal end of the sequence, not an error. After
/// an error the stream yields nothing further.
pub struct TreeStream<K, V, C = NaturalOrder> {
    scanner: TreeScanner<K, V, C>,
    cancel: CancelHandle,
    finished: bool,
}

impl<K, V, C> TreeStream<K, V, C>
where
    K: TreeType,
    V: TreeType,
    C: KeyComparer<K>,
{
    pub(crate) fn new(scanner: TreeScanner<K, V, C>) -> Self {
        Self {
            scanner,
            cancel: CancelHandle::default(),
            finished: false,
        }
    }

    /// Stop the stream.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle that can cancel this stream from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// True if the stream was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<K, V, C> Iterator for TreeStream<K, V, C>
where
    K: TreeType,
    V: TreeType,
    C: KeyComparer<K>,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.cancel.is_cancelled() {
            self.finished = true;
            return None;
        }
        match self.scanner.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
