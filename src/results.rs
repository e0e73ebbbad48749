//! Canonical hashing of per-transaction execution results.
//!
//! Each committed block carries a single digest summarizing the outcome of
//! every transaction it executed. [TxResult] reduces one outcome to the two
//! consensus-relevant fields (status code and payload) and hashes a canonical
//! textual rendering of them; [TxResults] commits to the ordered list with a
//! [crate::merkle] tree so a light client can verify a single outcome against
//! the published root without replaying the block.
//!
//! The canonical rendering is a versioned wire contract: changing it forks
//! the chain. It is the JSON-shaped string
//! `{"code":<decimal>,"data":"<lowercase hex>"}` hashed with SHA-256. An
//! absent payload and a zero-length payload render identically (`""`), which
//! makes them the same result by construction.

use crate::merkle::{Builder, Error as MerkleError, Proof};
use bytes::{Buf, BufMut, Bytes};
use commonware_codec::{
    EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write,
};
use commonware_cryptography::{hash, sha256::Digest, Sha256};
use commonware_utils::hex;

use crate::responses::TxResponse;

/// The essential outcome of a single transaction's execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxResult {
    /// Status code (`0` = success).
    pub code: u32,
    /// Raw payload returned by execution.
    pub data: Bytes,
}

impl TxResult {
    pub fn new(code: u32, data: impl Into<Bytes>) -> Self {
        Self {
            code,
            data: data.into(),
        }
    }

    /// Digest of the canonical textual form of this result.
    pub fn hash(&self) -> Digest {
        let canonical = format!(r#"{{"code":{},"data":"{}"}}"#, self.code, hex(&self.data));
        hash(canonical.as_bytes())
    }
}

impl Write for TxResult {
    fn write(&self, buf: &mut impl BufMut) {
        self.code.write(buf);
        self.data.write(buf);
    }
}

impl EncodeSize for TxResult {
    fn encode_size(&self) -> usize {
        self.code.encode_size() + self.data.encode_size()
    }
}

impl Read for TxResult {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        let code = u32::read(buf)?;
        let data = Bytes::read_cfg(buf, &RangeCfg::from(..))?;
        Ok(Self { code, data })
    }
}

/// The ordered results of one block, in transaction order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxResults(pub Vec<TxResult>);

impl TxResults {
    /// Extract the consensus-relevant fields from staged execution responses.
    pub fn from_responses(responses: &[TxResponse]) -> Self {
        Self(
            responses
                .iter()
                .map(|r| TxResult {
                    code: r.code,
                    data: r.data.clone(),
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merkle root over the per-result digests.
    pub fn hash(&self) -> Digest {
        self.tree().root()
    }

    /// Inclusion proof for the result at `index`.
    pub fn prove(&self, index: u32) -> Result<Proof<Sha256>, MerkleError> {
        self.tree().proof(index)
    }

    fn tree(&self) -> crate::merkle::Tree<Sha256> {
        let mut builder = Builder::new(self.0.len());
        for result in &self.0 {
            builder.add(&result.hash());
        }
        builder.build()
    }
}

impl Write for TxResults {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl EncodeSize for TxResults {
    fn encode_size(&self) -> usize {
        self.0.encode_size()
    }
}

impl Read for TxResults {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        let results = Vec::<TxResult>::read_cfg(buf, &(RangeCfg::from(..), ()))?;
        Ok(Self(results))
    }
}
