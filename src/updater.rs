use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bitcoin::{Address, Transaction, Txid};
use tracing::{debug, info, warn};

use crate::client::ChainClientApi;
use crate::constants::{DEFAULT_ADDRESS_POLL, HEIGHT_POLL_INTERVAL, PRIORITY_ADDRESS_POLL};
use crate::events::WatcherEvents;
use crate::store::TxStore;
use crate::types::{AddressSet, TxState};

struct AddressRow {
    poll: Duration,
    last_check: Instant,
}

/// Drives the transaction store toward the server's view of the chain.
///
/// The updater polls the chain tip, re-queries watched address histories on
/// their own schedules, chases the transactions those histories reference,
/// resolves confirmation heights, and replays unsent broadcasts. It runs
/// entirely in the caller's thread: the host calls [`TxUpdater::wakeup`] in
/// its event loop and sleeps at most the returned duration.
pub struct TxUpdater<C, E>
where
    C: ChainClientApi,
    E: WatcherEvents,
{
    db: Arc<TxStore>,
    client: C,
    events: E,
    watched: HashMap<Address, AddressRow>,
    priority_address: Option<Address>,
    /// Outstanding address and transaction queries; reaching zero is the
    /// host's "caught up" signal.
    queued_queries: u32,
    /// Guards the fork-suspect drain against overlapping runs.
    queued_get_indices: u32,
    failed: bool,
    last_height_poll: Instant,
}

impl<C, E> TxUpdater<C, E>
where
    C: ChainClientApi,
    E: WatcherEvents,
{
    pub fn new(db: Arc<TxStore>, client: C, events: E) -> Self {
        Self {
            db,
            client,
            events,
            watched: HashMap::new(),
            priority_address: None,
            queued_queries: 0,
            queued_get_indices: 0,
            failed: false,
            last_height_poll: Instant::now(),
        }
    }

    /// Bring a freshly loaded store back up to date.
    ///
    /// Polls the chain tip, probes the confirmation index of every row not
    /// yet in a block, re-checks any fork suspects, and re-broadcasts every
    /// transaction still waiting to be sent.
    pub fn start(&mut self) {
        let unsent = self.db.unsent_txs();

        self.get_height();

        for txid in self.db.unconfirmed_txids() {
            self.get_index(txid);
        }
        self.queue_get_indices();

        for tx in unsent {
            self.broadcast(tx);
        }
    }

    /// Watch an address, polling its history every `poll`.
    ///
    /// Watching an already watched address just updates its interval. The
    /// first history query goes out immediately.
    pub fn watch(&mut self, address: Address, poll: Duration) {
        debug!("watching address {} every {:?}", address, poll);
        self.watched.insert(
            address.clone(),
            AddressRow {
                poll,
                last_check: Instant::now(),
            },
        );
        self.query_address(&address);
    }

    /// Poll one address more aggressively than its configured interval, or
    /// `None` to return to normal polling.
    ///
    /// The previous priority address, if any, falls back to the default
    /// interval.
    pub fn prioritize(&mut self, address: Option<Address>) {
        if let Some(previous) = self.priority_address.take() {
            self.watch(previous, DEFAULT_ADDRESS_POLL);
        }
        if let Some(address) = address {
            self.watch(address.clone(), PRIORITY_ADDRESS_POLL);
            self.priority_address = Some(address);
        }
    }

    /// Record a locally created transaction and broadcast it.
    pub fn send(&mut self, tx: Transaction) {
        if self.db.insert(&tx, TxState::Unsent) {
            self.events.on_add(&tx);
        }
        self.broadcast(tx);
    }

    /// The addresses currently being watched.
    pub fn watching(&self) -> AddressSet {
        self.watched.keys().cloned().collect()
    }

    /// Run any polls that have come due.
    ///
    /// # Returns
    /// How long the host may sleep before the next scheduled poll. The host
    /// should call again after at most that long, or sooner on inbound
    /// network activity.
    pub fn wakeup(&mut self) -> Duration {
        let now = Instant::now();

        // Chain tip poll:
        let mut elapsed = now.duration_since(self.last_height_poll);
        if elapsed >= HEIGHT_POLL_INTERVAL {
            self.get_height();
            self.last_height_poll = now;
            elapsed = Duration::ZERO;
        }
        let mut next_wakeup = HEIGHT_POLL_INTERVAL - elapsed;

        // Address history polls:
        let mut due = Vec::new();
        for (address, row) in &mut self.watched {
            let elapsed = now.duration_since(row.last_check);
            if row.poll <= elapsed {
                row.last_check = now;
                next_wakeup = next_wakeup.min(row.poll);
                due.push(address.clone());
            } else {
                next_wakeup = next_wakeup.min(row.poll - elapsed);
            }
        }
        for address in due {
            self.query_address(&address);
        }

        // Report the last server failure:
        if self.failed {
            self.events.on_fail();
            self.failed = false;
        }

        next_wakeup
    }

    /// Funnel for every transaction hash the server mentions.
    ///
    /// Re-sighting a known hash extends its lifetime; an unknown hash gets
    /// fetched. `want_inputs` chases the transaction's inputs one level deep
    /// so that spends of our own coins resolve even when a reorganization
    /// reshuffles their ancestry.
    fn watch_tx(&mut self, txid: Txid, want_inputs: bool) {
        self.db.reset_timestamp(&txid);
        if !self.db.has_tx(&txid) {
            self.get_tx(txid, want_inputs);
        } else if want_inputs {
            if let Some(tx) = self.db.get_tx(&txid) {
                self.watch_inputs(&tx);
            }
        }
    }

    fn watch_inputs(&mut self, tx: &Transaction) {
        for input in &tx.input {
            self.watch_tx(input.previous_output.txid, false);
        }
    }

    fn finish_query(&mut self) {
        self.queued_queries -= 1;
        if self.queued_queries == 0 {
            self.events.on_quiet();
        }
    }

    /// Re-probe the confirmation index of every fork suspect, repeating
    /// until a pass leaves no suspects behind. Probes run one batch at a
    /// time; suspicion a probe casts on deeper blocks is picked up by the
    /// next pass.
    fn queue_get_indices(&mut self) {
        while self.queued_get_indices == 0 {
            let forked = self.db.forked_txids();
            if forked.is_empty() {
                return;
            }
            for txid in forked {
                self.get_index(txid);
            }
        }
    }

    // - server queries --------------------

    fn get_height(&mut self) {
        debug!("polling chain tip");
        match self.client.fetch_last_height() {
            Ok(height) => {
                if height != self.db.last_height() {
                    info!("chain tip moved to {}", height);
                    self.db.at_height(height);
                    self.events.on_height(height);

                    // A new block may have picked up anything not yet
                    // confirmed, and may have orphaned what was:
                    for txid in self.db.unconfirmed_txids() {
                        self.get_index(txid);
                    }
                    self.queue_get_indices();
                }
            }
            Err(err) => {
                warn!("chain tip poll failed: {}", err);
                self.failed = true;
            }
        }
    }

    fn get_tx(&mut self, txid: Txid, want_inputs: bool) {
        self.queued_queries += 1;
        debug!("fetching transaction {}", txid);
        match self.client.fetch_transaction(&txid) {
            Ok(tx) => self.tx_fetched(txid, tx, want_inputs),
            Err(err) => {
                // The transaction might still be in the mempool:
                debug!("transaction {} not indexed ({}), trying mempool", txid, err);
                self.get_tx_mem(txid, want_inputs);
            }
        }
        self.finish_query();
    }

    fn get_tx_mem(&mut self, txid: Txid, want_inputs: bool) {
        self.queued_queries += 1;
        match self.client.fetch_unconfirmed_transaction(&txid) {
            Ok(tx) => self.tx_fetched(txid, tx, want_inputs),
            Err(err) => {
                warn!("mempool fetch for {} failed: {}", txid, err);
                self.failed = true;
            }
        }
        self.finish_query();
    }

    fn tx_fetched(&mut self, txid: Txid, tx: Transaction, want_inputs: bool) {
        debug_assert_eq!(txid, tx.compute_txid());
        if self.db.insert(&tx, TxState::Unconfirmed) {
            info!("new transaction {}", txid);
            self.events.on_add(&tx);
        }
        if want_inputs {
            self.watch_inputs(&tx);
        }
        self.get_index(txid);
    }

    fn get_index(&mut self, txid: Txid) {
        self.queued_get_indices += 1;
        debug!("fetching confirmation index for {}", txid);
        match self.client.fetch_transaction_index(&txid) {
            Ok((height, _index)) => self.db.confirmed(&txid, height),
            // No index entry means the transaction is not in a block:
            Err(_) => self.db.unconfirmed(&txid),
        }
        self.queued_get_indices -= 1;
    }

    fn broadcast(&mut self, tx: Transaction) {
        let txid = tx.compute_txid();
        match self.client.broadcast_transaction(&tx) {
            Ok(()) => {
                info!("transaction {} accepted by the server", txid);
                self.db.unconfirmed(&txid);
                self.events.on_send(Ok(()), &tx);
            }
            Err(err) => {
                warn!("transaction {} rejected: {}", txid, err);
                self.db.forget(&txid);
                self.events.on_send(Err(err), &tx);
            }
        }
    }

    fn query_address(&mut self, address: &Address) {
        self.queued_queries += 1;
        debug!("querying history for {}", address);
        match self.client.fetch_history(address) {
            Ok(history) => {
                for entry in history {
                    self.watch_tx(entry.output.txid, true);
                    if let Some(spend) = entry.spend {
                        self.watch_tx(spend.txid, true);
                    }
                }
            }
            Err(err) => {
                warn!("history query for {} failed: {}", address, err);
                self.failed = true;
            }
        }
        self.finish_query();
    }
}
