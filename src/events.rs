use bitcoin::Transaction;
use mockall::automock;

use crate::errors::ClientError;

/// Host-supplied sink for watcher events.
///
/// All callbacks fire on the thread driving the updater and never while the
/// transaction store's lock is held, so they may query the store freely.
#[automock]
pub trait WatcherEvents {
    /// A transaction was added to the database.
    fn on_add(&self, tx: &Transaction);

    /// The chain tip advanced to `height`.
    fn on_height(&self, height: u64);

    /// A broadcast attempt for `tx` completed.
    fn on_send(&self, outcome: Result<(), ClientError>, tx: &Transaction);

    /// All outstanding address and transaction queries have drained.
    fn on_quiet(&self);

    /// At least one server request failed since the last report.
    fn on_fail(&self);
}
