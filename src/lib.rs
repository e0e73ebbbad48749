//! Versioned consensus state for a blockchain node.
//!
//! Tracks the latest committed view of a chain (validators, consensus
//! parameters, and a root commitment over each block's execution results) and
//! keeps a height-indexed history of all of it, so the validator set,
//! parameters, and results in force at any past height can be loaded.
//! Infrequently-changing records are stored as a snapshot at their change
//! height and cheap pointers elsewhere; execution results additionally
//! support compact Merkle proofs of inclusion.
//!
//! # Status
//!
//! `chainstate` is **ALPHA** software and is not yet recommended for
//! production use. Developers should be prepared for breaking changes and
//! occasional instability.
//!
//! # Example
//!
//! ```rust
//! use chainstate::{
//!     db::MemDb,
//!     params::ConsensusParams,
//!     responses::ExecutionResponses,
//!     state::{BlockHeader, Genesis, State},
//!     validators::Validator,
//! };
//! use commonware_cryptography::{ed25519::PrivateKey, sha256, PrivateKeyExt, Signer};
//! use std::sync::Arc;
//!
//! // Initialize from genesis (persisted immediately, so height 1 records
//! // are loadable before any block commits).
//! let db = Arc::new(MemDb::new());
//! let genesis = Genesis {
//!     chain_id: "example".into(),
//!     genesis_time: 0,
//!     validators: vec![Validator::new(PrivateKey::from_seed(0).public_key(), 10)],
//!     consensus_params: ConsensusParams::default(),
//! };
//! let mut state = State::get_state(db.clone(), &genesis).unwrap();
//! assert_eq!(state.load_validators(1).unwrap().len(), 1);
//!
//! // Commit an (empty) block and persist the next height's records.
//! let header = BlockHeader {
//!     height: 1,
//!     time: 1,
//!     hash: sha256::hash(b"block"),
//! };
//! state.set_block_and_validators(&header, &ExecutionResponses::for_block(1, 0));
//! state.save().unwrap();
//! assert_eq!(state.load_validators(2).unwrap().len(), 1);
//! ```

pub mod db;
pub mod merkle;
pub mod params;
pub mod responses;
pub mod results;
pub mod state;
pub mod validators;

pub use state::{BlockHeader, Genesis, State};
