//! Flow-level cancellation.
//!
//! `FlowCancel::cancel()` でフロー全体が止まる（drop しただけでは止まらない）。
//! 実行中のタスクは今のページ/バッチを書き切ってから止まる（強制終了しない）。

use tokio::sync::watch;

/// Owner side: request cancellation of a running flow.
#[derive(Debug)]
pub struct FlowCancel {
    tx: watch::Sender<bool>,
}

/// Observer side, cloned into every running task.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl FlowCancel {
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelSignal { rx })
    }

    pub fn cancel(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.tx.send(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelSignal {
    /// A signal that is never raised.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // keep the value readable after the sender is gone
        drop(tx);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}
