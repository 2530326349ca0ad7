//! Transfer progress reporting
//!
//! Uploads and downloads call [`ProgressReporter::report`] once per chunk
//! with `(transferred, total)`. Values never decrease, and a successful
//! transfer always ends with `transferred == total` (a zero-byte file
//! reports `(0, 0)` once).
//!
//! Any `FnMut(u64, u64)` closure is a reporter. For message passing use
//! [`progress_channel`], which publishes the latest counters on a
//! `tokio::sync::watch` channel.

use drlms_core::TransferProgress;
use tokio::sync::watch;

/// Receives progress counters from a running transfer
pub trait ProgressReporter {
    fn report(&mut self, transferred: u64, total: u64);
}

impl<F> ProgressReporter for F
where
    F: FnMut(u64, u64),
{
    fn report(&mut self, transferred: u64, total: u64) {
        self(transferred, total);
    }
}

/// Reporter that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&mut self, _transferred: u64, _total: u64) {}
}

/// Reporter that publishes counters to a watch channel
#[derive(Debug)]
pub struct WatchReporter {
    tx: watch::Sender<TransferProgress>,
}

impl ProgressReporter for WatchReporter {
    fn report(&mut self, transferred: u64, total: u64) {
        self.tx.send_replace(TransferProgress::new(transferred, total));
    }
}

/// Create a reporter and the receiver that observes it.
///
/// Receivers only ever see the most recent counters; intermediate chunks
/// may be skipped but the final value is always delivered.
pub fn progress_channel() -> (WatchReporter, watch::Receiver<TransferProgress>) {
    let (tx, rx) = watch::channel(TransferProgress::default());
    (WatchReporter { tx }, rx)
}
