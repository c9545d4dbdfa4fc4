// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Cooperative cancellation.

A [CancelFlag] is shared between the orchestrator and the fetch/build
phases. Cancelling stops new work from launching; phases holding running
containers react by stopping and removing them.
*/

use {
    std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    tokio::sync::Notify,
};

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cloneable cancellation token.
#[derive(Clone)]
pub struct CancelFlag {
    inner: Arc<Inner>,
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelFlag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Request cancellation, waking all waiters.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }

        let notified = self.inner.notify.notified();
        tokio::pin!(notified);

        // Register interest before re-checking to close the window
        // between the check and the wakeup.
        notified.as_mut().enable();

        if self.is_cancelled() {
            return;
        }

        notified.await;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());

        let waiter = flag.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });

        flag.cancel();

        assert!(handle.await.unwrap());
        assert!(flag.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_when_set() {
        let flag = CancelFlag::new();
        flag.cancel();

        flag.cancelled().await;
    }
}
