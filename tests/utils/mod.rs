#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    WPubkeyHash, Witness,
};
use bitcoin_tx_watcher::errors::ClientError;
use bitcoin_tx_watcher::events::WatcherEvents;

/// A deterministic p2wpkh address derived from a seed byte.
pub fn test_address(seed: u8) -> Address {
    let script = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([seed; 20]));
    Address::from_script(&script, Network::Bitcoin).expect("p2wpkh script has an address")
}

pub fn test_txid(seed: u8) -> Txid {
    Txid::from_byte_array([seed; 32])
}

pub fn payment_output(address: &Address, value: u64) -> TxOut {
    TxOut {
        value: Amount::from_sat(value),
        script_pubkey: address.script_pubkey(),
    }
}

/// A transaction with no inputs paying `value` sats to `address`. The tag
/// lands in the lock time so different tags give different txids.
pub fn funding_tx(address: &Address, value: u64, tag: u32) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(tag),
        input: vec![],
        output: vec![payment_output(address, value)],
    }
}

/// A transaction spending `prev` into a single output paying `address`.
pub fn spending_tx(prev: OutPoint, address: &Address, value: u64) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: prev,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![payment_output(address, value)],
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Add(Txid),
    Height(u64),
    Send(bool, Txid),
    Quiet,
    Fail,
}

/// Event sink that records everything in order.
#[derive(Clone, Default)]
pub struct RecordingEvents {
    log: Rc<RefCell<Vec<Event>>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.log.borrow().iter().filter(|e| *e == event).count()
    }
}

impl WatcherEvents for RecordingEvents {
    fn on_add(&self, tx: &Transaction) {
        self.log.borrow_mut().push(Event::Add(tx.compute_txid()));
    }

    fn on_height(&self, height: u64) {
        self.log.borrow_mut().push(Event::Height(height));
    }

    fn on_send(&self, outcome: Result<(), ClientError>, tx: &Transaction) {
        self.log
            .borrow_mut()
            .push(Event::Send(outcome.is_ok(), tx.compute_txid()));
    }

    fn on_quiet(&self) {
        self.log.borrow_mut().push(Event::Quiet);
    }

    fn on_fail(&self) {
        self.log.borrow_mut().push(Event::Fail);
    }
}
