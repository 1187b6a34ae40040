use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::{Address, Network, OutPoint, Transaction, Txid};
use tracing::warn;

use crate::config::WatcherConfig;
use crate::constants::DEFAULT_UNCONFIRMED_TIMEOUT_SECS;
use crate::errors::BlobError;
use crate::helper::{extract_address, now_secs};
use crate::types::{AddressSet, OutputInfo, TxState};

// Serialization magic. The legacy value identifies blobs written by the old
// address-keyed cache, which carried nothing worth importing.
const SERIAL_MAGIC: u32 = 0xfecd_b760;
const LEGACY_SERIAL_MAGIC: u32 = 0x3eab_61c3;
const SERIAL_TX: u8 = 0x42;

/// The transaction cache.
///
/// Every transaction relevant to the wallet lives here, keyed by its hash,
/// together with a small state machine (unsent, unconfirmed, confirmed) and
/// the highest block the watcher has seen. The whole store serializes to a
/// single blob the host can stash wherever it keeps wallet data.
///
/// All methods lock an internal mutex, so a store shared behind an `Arc` can
/// be queried from other threads while the updater runs.
pub struct TxStore {
    inner: Mutex<StoreInner>,
    network: Network,
    unconfirmed_timeout_secs: u64,
}

struct StoreInner {
    last_height: u64,
    rows: HashMap<Txid, TxRow>,
}

struct TxRow {
    tx: Transaction,
    state: TxState,
    block_height: u64,
    /// The last time the server acknowledged this transaction's existence
    /// (or the row's creation time), in epoch seconds.
    timestamp: u64,
    /// The transaction is certainly in a block, but there is some question
    /// whether that block is still on the main chain.
    need_check: bool,
}

impl TxStore {
    pub fn new(network: Network) -> Self {
        Self::with_unconfirmed_timeout(
            network,
            Duration::from_secs(DEFAULT_UNCONFIRMED_TIMEOUT_SECS),
        )
    }

    pub fn with_unconfirmed_timeout(network: Network, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                last_height: 0,
                rows: HashMap::new(),
            }),
            network,
            unconfirmed_timeout_secs: timeout.as_secs(),
        }
    }

    pub fn from_config(config: &WatcherConfig) -> Self {
        Self::with_unconfirmed_timeout(
            config.network,
            Duration::from_secs(config.unconfirmed_timeout_secs),
        )
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The highest block this store has seen.
    pub fn last_height(&self) -> u64 {
        self.lock().last_height
    }

    pub fn has_tx(&self, txid: &Txid) -> bool {
        self.lock().rows.contains_key(txid)
    }

    pub fn get_tx(&self, txid: &Txid) -> Option<Transaction> {
        self.lock().rows.get(txid).map(|row| row.tx.clone())
    }

    /// A transaction's block height, or 0 if it is absent or not in a block.
    pub fn get_tx_height(&self, txid: &Txid) -> u64 {
        let inner = self.lock();
        match inner.rows.get(txid) {
            Some(row) if row.state == TxState::Confirmed => row.block_height,
            _ => 0,
        }
    }

    /// True if the transaction exists and every input spends an output paying
    /// one of the given addresses.
    ///
    /// An input whose previous output is unknown to the store, or whose
    /// script has no standard address form, makes this false: the store
    /// cannot tell whose coins the input moves, so it refuses to call the
    /// transaction a spend.
    pub fn is_spend(&self, txid: &Txid, addresses: &AddressSet) -> bool {
        let inner = self.lock();
        let Some(row) = inner.rows.get(txid) else {
            return false;
        };
        row.tx.input.iter().all(|input| {
            let prev = input.previous_output;
            inner
                .rows
                .get(&prev.txid)
                .and_then(|funding| funding.tx.output.get(prev.vout as usize))
                .and_then(|output| extract_address(&output.script_pubkey, self.network))
                .is_some_and(|address| addresses.contains(&address))
        })
    }

    /// True if any stored transaction has an output paying the address.
    pub fn has_history(&self, address: &Address) -> bool {
        let inner = self.lock();
        inner.rows.values().any(|row| {
            row.tx.output.iter().any(|output| {
                extract_address(&output.script_pubkey, self.network).as_ref() == Some(address)
            })
        })
    }

    /// All outputs in the store that no stored transaction spends.
    pub fn get_utxos(&self) -> Vec<OutputInfo> {
        self.lock().utxos()
    }

    /// The unspent outputs whose scripts pay one of the given addresses.
    pub fn get_utxos_for(&self, addresses: &AddressSet) -> Vec<OutputInfo> {
        let inner = self.lock();
        inner
            .utxos()
            .into_iter()
            .filter(|utxo| {
                inner
                    .rows
                    .get(&utxo.outpoint.txid)
                    .and_then(|row| row.tx.output.get(utxo.outpoint.vout as usize))
                    .and_then(|output| extract_address(&output.script_pubkey, self.network))
                    .is_some_and(|address| addresses.contains(&address))
            })
            .collect()
    }

    pub fn count_unconfirmed(&self) -> usize {
        let inner = self.lock();
        inner
            .rows
            .values()
            .filter(|row| row.state == TxState::Unconfirmed)
            .count()
    }

    /// Insert a new transaction.
    ///
    /// Returns true if a row was created. An existing row is never stomped:
    /// inserting a known hash returns false and changes nothing.
    pub fn insert(&self, tx: &Transaction, state: TxState) -> bool {
        let txid = tx.compute_txid();
        let mut inner = self.lock();
        if inner.rows.contains_key(&txid) {
            return false;
        }
        inner.rows.insert(
            txid,
            TxRow {
                tx: tx.clone(),
                state,
                block_height: 0,
                timestamp: now_secs(),
                need_check: false,
            },
        );
        true
    }

    /// Record a new chain tip and mark fork suspects below it.
    pub fn at_height(&self, height: u64) {
        let mut inner = self.lock();
        inner.last_height = height;
        inner.check_fork(height);
    }

    /// Mark a transaction as confirmed in a block.
    ///
    /// A transaction already confirmed in a *different* block means the chain
    /// has forked, so the rows just below the old block become suspects. A
    /// re-confirmation at the same height clears the row's suspect flag.
    pub fn confirmed(&self, txid: &Txid, block_height: u64) {
        let mut inner = self.lock();
        let Some(row) = inner.rows.get(txid) else {
            debug_assert!(false, "confirmed() for unknown transaction {txid}");
            return;
        };
        let was = (row.state, row.block_height);
        if was.0 == TxState::Confirmed && was.1 != block_height {
            inner.check_fork(was.1);
        }
        if let Some(row) = inner.rows.get_mut(txid) {
            row.state = TxState::Confirmed;
            row.block_height = block_height;
            if was == (TxState::Confirmed, block_height) {
                row.need_check = false;
            }
        }
    }

    /// Mark a transaction as out of any block.
    ///
    /// If it was confirmed, the block that held it is gone, so the rows just
    /// below it become suspects.
    pub fn unconfirmed(&self, txid: &Txid) {
        let mut inner = self.lock();
        let Some(row) = inner.rows.get(txid) else {
            debug_assert!(false, "unconfirmed() for unknown transaction {txid}");
            return;
        };
        if row.state == TxState::Confirmed {
            let height = row.block_height;
            inner.check_fork(height);
        }
        if let Some(row) = inner.rows.get_mut(txid) {
            row.state = TxState::Unconfirmed;
            row.need_check = false;
        }
    }

    /// Delete a transaction. This happens when the network rejects a spend.
    pub fn forget(&self, txid: &Txid) {
        self.lock().rows.remove(txid);
    }

    /// Call this each time the server reports that it still sees the
    /// transaction, extending its lifetime in the serialized blob.
    pub fn reset_timestamp(&self, txid: &Txid) {
        if let Some(row) = self.lock().rows.get_mut(txid) {
            row.timestamp = now_secs();
        }
    }

    /// Hashes of all rows not yet in a block (unsent or unconfirmed).
    pub fn unconfirmed_txids(&self) -> Vec<Txid> {
        let inner = self.lock();
        inner
            .rows
            .iter()
            .filter(|(_, row)| row.state != TxState::Confirmed)
            .map(|(txid, _)| *txid)
            .collect()
    }

    /// Hashes of all confirmed rows whose block is a fork suspect.
    pub fn forked_txids(&self) -> Vec<Txid> {
        let inner = self.lock();
        inner
            .rows
            .iter()
            .filter(|(_, row)| row.state == TxState::Confirmed && row.need_check)
            .map(|(txid, _)| *txid)
            .collect()
    }

    /// All transactions still waiting for a successful broadcast.
    pub fn unsent_txs(&self) -> Vec<Transaction> {
        let inner = self.lock();
        inner
            .rows
            .values()
            .filter(|row| row.state == TxState::Unsent)
            .map(|row| row.tx.clone())
            .collect()
    }

    /// Write the store to an in-memory blob.
    ///
    /// Unconfirmed rows the server has not re-reported within the configured
    /// timeout are left out; they stay in memory until the process ends.
    pub fn serialize(&self) -> Vec<u8> {
        let inner = self.lock();
        let now = now_secs();
        let mut out = Vec::new();
        out.extend_from_slice(&SERIAL_MAGIC.to_le_bytes());
        out.extend_from_slice(&inner.last_height.to_le_bytes());
        for (txid, row) in &inner.rows {
            if row.state == TxState::Unconfirmed
                && row.timestamp.saturating_add(self.unconfirmed_timeout_secs) < now
            {
                continue;
            }
            out.push(SERIAL_TX);
            out.extend_from_slice(&txid.to_byte_array());
            out.extend_from_slice(&encode::serialize(&row.tx));
            out.push(row.state.to_byte());
            let height_or_timestamp = match row.state {
                TxState::Confirmed => row.block_height,
                _ => row.timestamp,
            };
            out.extend_from_slice(&height_or_timestamp.to_le_bytes());
            out.push(row.need_check as u8);
        }
        out
    }

    /// Reconstitute the store from an in-memory blob.
    ///
    /// Returns false and leaves the store untouched if the blob does not
    /// parse. A blob with the legacy magic loads successfully but imports
    /// nothing.
    pub fn load(&self, data: &[u8]) -> bool {
        match parse_blob(data) {
            Ok(Some((last_height, rows))) => {
                let mut inner = self.lock();
                inner.last_height = last_height;
                inner.rows = rows;
                true
            }
            Ok(None) => true,
            Err(err) => {
                warn!("rejecting transaction blob: {}", err);
                false
            }
        }
    }

    /// Human-readable listing of the store contents, for diagnostics.
    pub fn dump(&self) -> String {
        let inner = self.lock();
        let mut out = String::new();
        let _ = writeln!(out, "height: {}", inner.last_height);
        for (txid, row) in &inner.rows {
            let _ = writeln!(out, "================");
            let _ = writeln!(out, "hash: {txid}");
            match row.state {
                TxState::Unsent => {
                    let _ = writeln!(out, "state: unsent");
                }
                TxState::Unconfirmed => {
                    let _ = writeln!(out, "state: unconfirmed");
                }
                TxState::Confirmed => {
                    let _ = writeln!(out, "state: confirmed");
                    let _ = writeln!(out, "height: {}", row.block_height);
                    if row.need_check {
                        let _ = writeln!(out, "needs check.");
                    }
                }
            }
        }
        out
    }
}

impl StoreInner {
    /// Mark the transactions just below `height` as fork suspects.
    ///
    /// The server reports no block hashes, so the nearest confirmed block
    /// below the reference height is the cheapest probe point for whether a
    /// reorganization swept our transactions away.
    fn check_fork(&mut self, height: u64) {
        let mut prev_height = 0;
        for row in self.rows.values() {
            if row.state == TxState::Confirmed
                && row.block_height < height
                && prev_height < row.block_height
            {
                prev_height = row.block_height;
            }
        }

        for row in self.rows.values_mut() {
            if row.state == TxState::Confirmed && row.block_height == prev_height {
                row.need_check = true;
            }
        }
    }

    fn utxos(&self) -> Vec<OutputInfo> {
        let spent: HashSet<OutPoint> = self
            .rows
            .values()
            .flat_map(|row| row.tx.input.iter().map(|input| input.previous_output))
            .collect();

        let mut out = Vec::new();
        for (txid, row) in &self.rows {
            for (vout, output) in row.tx.output.iter().enumerate() {
                let outpoint = OutPoint {
                    txid: *txid,
                    vout: vout as u32,
                };
                if !spent.contains(&outpoint) {
                    out.push(OutputInfo {
                        outpoint,
                        value: output.value,
                    });
                }
            }
        }
        out
    }
}

fn parse_blob(data: &[u8]) -> Result<Option<(u64, HashMap<Txid, TxRow>)>, BlobError> {
    let mut reader = BlobReader::new(data);

    let magic = reader.read_u32()?;
    if magic == LEGACY_SERIAL_MAGIC {
        return Ok(None);
    }
    if magic != SERIAL_MAGIC {
        return Err(BlobError::BadMagic(magic));
    }

    let last_height = reader.read_u64()?;
    let now = now_secs();
    let mut rows = HashMap::new();
    while !reader.is_empty() {
        if reader.read_u8()? != SERIAL_TX {
            return Err(BlobError::BadRecordTag);
        }
        let txid = Txid::from_byte_array(reader.read_array::<32>()?);
        let (tx, consumed) = encode::deserialize_partial::<Transaction>(reader.remaining())?;
        reader.skip(consumed)?;
        if tx.compute_txid() != txid {
            return Err(BlobError::HashMismatch(txid));
        }
        let state_byte = reader.read_u8()?;
        let state = TxState::from_byte(state_byte).ok_or(BlobError::BadState(state_byte))?;
        let height_or_timestamp = reader.read_u64()?;
        let need_check = reader.read_u8()? != 0;

        // Unconfirmed rows keep their saved timestamp so the expiry clock
        // spans restarts; everything else is considered seen right now.
        let row = match state {
            TxState::Confirmed => TxRow {
                tx,
                state,
                block_height: height_or_timestamp,
                timestamp: now,
                need_check,
            },
            TxState::Unconfirmed => TxRow {
                tx,
                state,
                block_height: 0,
                timestamp: height_or_timestamp,
                need_check,
            },
            TxState::Unsent => TxRow {
                tx,
                state,
                block_height: 0,
                timestamp: now,
                need_check,
            },
        };
        rows.insert(txid, row);
    }

    Ok(Some((last_height, rows)))
}

struct BlobReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BlobReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], BlobError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(BlobError::Truncated)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<(), BlobError> {
        self.take(len).map(|_| ())
    }

    fn read_u8(&mut self) -> Result<u8, BlobError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, BlobError> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?))
    }

    fn read_u64(&mut self) -> Result<u64, BlobError> {
        Ok(u64::from_le_bytes(self.read_array::<8>()?))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], BlobError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }
}
