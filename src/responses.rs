//! Crash-safe staging of a block's raw execution responses.
//!
//! Execution responses are persisted *before* the height's permanent
//! snapshots are committed. If the process crashes in between, the staged
//! record is replayed on restart to recover the in-flight validator and
//! parameter changes. Exactly one staged record exists at a time: saving the
//! next height's responses overwrites the previous record, which is dead the
//! moment its height's snapshots are durable.

use crate::{
    db::{self, Database},
    params::ParamUpdates,
    validators::ValidatorUpdate,
};
use bytes::{Buf, BufMut, Bytes};
use commonware_codec::{
    DecodeExt, Encode, EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write,
};
use thiserror::Error;
use tracing::debug;

/// Key under which the staged record lives. A single slot: each save
/// overwrites the last.
const RESPONSES_KEY: &[u8] = b"responses";

/// Errors that can occur when staging or recovering responses.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no staged responses")]
    NoStagedResponses,
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("database error: {0}")]
    Db(#[from] db::Error),
}

/// An event attribute attached to a response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tag {
    pub key: Bytes,
    pub value: Bytes,
}

impl Write for Tag {
    fn write(&self, buf: &mut impl BufMut) {
        self.key.write(buf);
        self.value.write(buf);
    }
}

impl EncodeSize for Tag {
    fn encode_size(&self) -> usize {
        self.key.encode_size() + self.value.encode_size()
    }
}

impl Read for Tag {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        let key = Bytes::read_cfg(buf, &RangeCfg::from(..))?;
        let value = Bytes::read_cfg(buf, &RangeCfg::from(..))?;
        Ok(Self { key, value })
    }
}

/// The raw outcome of executing one transaction.
///
/// Only `code` and `data` feed the result commitment; `log` and `tags` are
/// carried for operators and indexers and round-trip through staging.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxResponse {
    pub code: u32,
    pub data: Bytes,
    pub log: Bytes,
    pub tags: Vec<Tag>,
}

impl Write for TxResponse {
    fn write(&self, buf: &mut impl BufMut) {
        self.code.write(buf);
        self.data.write(buf);
        self.log.write(buf);
        self.tags.write(buf);
    }
}

impl EncodeSize for TxResponse {
    fn encode_size(&self) -> usize {
        self.code.encode_size()
            + self.data.encode_size()
            + self.log.encode_size()
            + self.tags.encode_size()
    }
}

impl Read for TxResponse {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        let code = u32::read(buf)?;
        let data = Bytes::read_cfg(buf, &RangeCfg::from(..))?;
        let log = Bytes::read_cfg(buf, &RangeCfg::from(..))?;
        let tags = Vec::<Tag>::read_cfg(buf, &(RangeCfg::from(..), ()))?;
        Ok(Self {
            code,
            data,
            log,
            tags,
        })
    }
}

/// The end-of-block delta: changes taking effect at the next height.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndBlock {
    pub validator_updates: Vec<ValidatorUpdate>,
    pub param_updates: Option<ParamUpdates>,
    pub tags: Vec<Tag>,
}

impl Write for EndBlock {
    fn write(&self, buf: &mut impl BufMut) {
        self.validator_updates.write(buf);
        self.param_updates.write(buf);
        self.tags.write(buf);
    }
}

impl EncodeSize for EndBlock {
    fn encode_size(&self) -> usize {
        self.validator_updates.encode_size()
            + self.param_updates.encode_size()
            + self.tags.encode_size()
    }
}

impl Read for EndBlock {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        let validator_updates =
            Vec::<ValidatorUpdate>::read_cfg(buf, &(RangeCfg::from(..), ()))?;
        let param_updates = Option::<ParamUpdates>::read(buf)?;
        let tags = Vec::<Tag>::read_cfg(buf, &(RangeCfg::from(..), ()))?;
        Ok(Self {
            validator_updates,
            param_updates,
            tags,
        })
    }
}

/// Every response produced while executing one block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionResponses {
    pub height: u64,
    pub deliver_tx: Vec<TxResponse>,
    pub end_block: EndBlock,
}

impl ExecutionResponses {
    /// Prepare a container for a block with `tx_count` transactions. Each
    /// slot starts as a default response and is filled exactly once, in
    /// transaction order; that order is the canonical order for the block's
    /// result commitment.
    pub fn for_block(height: u64, tx_count: usize) -> Self {
        Self {
            height,
            deliver_tx: vec![TxResponse::default(); tx_count],
            end_block: EndBlock::default(),
        }
    }
}

impl Write for ExecutionResponses {
    fn write(&self, buf: &mut impl BufMut) {
        self.height.write(buf);
        self.deliver_tx.write(buf);
        self.end_block.write(buf);
    }
}

impl EncodeSize for ExecutionResponses {
    fn encode_size(&self) -> usize {
        self.height.encode_size() + self.deliver_tx.encode_size() + self.end_block.encode_size()
    }
}

impl Read for ExecutionResponses {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        let height = u64::read(buf)?;
        let deliver_tx = Vec::<TxResponse>::read_cfg(buf, &(RangeCfg::from(..), ()))?;
        let end_block = EndBlock::read(buf)?;
        Ok(Self {
            height,
            deliver_tx,
            end_block,
        })
    }
}

/// Stage `responses` durably, overwriting any previously staged record.
pub fn save_responses<D: Database>(db: &D, responses: &ExecutionResponses) -> Result<(), Error> {
    debug!(
        height = responses.height,
        txs = responses.deliver_tx.len(),
        "staging execution responses"
    );
    db.put(RESPONSES_KEY, responses.encode().to_vec())?;
    Ok(())
}

/// Recover the most recently staged record. Absence is an expected outcome
/// (first run, or no recovery pending) and callers must tolerate it.
pub fn load_responses<D: Database>(db: &D) -> Result<ExecutionResponses, Error> {
    let Some(bytes) = db.get(RESPONSES_KEY)? else {
        return Err(Error::NoStagedResponses);
    };
    Ok(ExecutionResponses::decode(&bytes[..])?)
}
