//! Client-side Bitcoin wallet watcher.
//!
//! [`store::TxStore`] caches every transaction relevant to a wallet together
//! with its confirmation state, and [`updater::TxUpdater`] keeps that cache
//! converged against a remote full-node query service implementing
//! [`client::ChainClientApi`], reporting progress through
//! [`events::WatcherEvents`].

pub mod client;
pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod helper;
pub mod store;
pub mod types;
pub mod updater;
