//! Chain-wide consensus parameters and sparse updates to them.
//!
//! Parameters bound what a valid block may contain (size, gas, gossip
//! chunking). Execution may announce changes at the end of a block as a
//! [ParamUpdates] record: each sub-group, and each field within a present
//! sub-group, is optional, and an unspecified field always retains the
//! current value. Applying an update is pure and infallible.

use bytes::{Buf, BufMut};
use commonware_codec::{
    EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write,
};

/// Limits on a whole block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockSize {
    pub max_bytes: u64,
    pub max_txs: u64,
    pub max_gas: i64,
}

/// Limits on a single transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxSize {
    pub max_bytes: u64,
    pub max_gas: i64,
}

/// Parameters governing block gossip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockGossip {
    pub block_part_size_bytes: u64,
}

/// The full set of consensus parameters in force for the next block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsensusParams {
    pub block_size: BlockSize,
    pub tx_size: TxSize,
    pub block_gossip: BlockGossip,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            block_size: BlockSize {
                max_bytes: 22_020_096, // 21 MiB
                max_txs: 100_000,
                max_gas: -1,
            },
            tx_size: TxSize {
                max_bytes: 10_240, // 10 KiB
                max_gas: -1,
            },
            block_gossip: BlockGossip {
                block_part_size_bytes: 65_536, // 64 KiB
            },
        }
    }
}

impl ConsensusParams {
    /// Apply a sparse update, returning the resulting parameters. Fields not
    /// present in `updates` keep their current value; `None` returns the
    /// current parameters unchanged.
    pub fn update(&self, updates: Option<&ParamUpdates>) -> ConsensusParams {
        let mut res = self.clone();
        let Some(updates) = updates else {
            return res;
        };
        if let Some(u) = &updates.block_size {
            if let Some(v) = u.max_bytes {
                res.block_size.max_bytes = v;
            }
            if let Some(v) = u.max_txs {
                res.block_size.max_txs = v;
            }
            if let Some(v) = u.max_gas {
                res.block_size.max_gas = v;
            }
        }
        if let Some(u) = &updates.tx_size {
            if let Some(v) = u.max_bytes {
                res.tx_size.max_bytes = v;
            }
            if let Some(v) = u.max_gas {
                res.tx_size.max_gas = v;
            }
        }
        if let Some(u) = &updates.block_gossip {
            if let Some(v) = u.block_part_size_bytes {
                res.block_gossip.block_part_size_bytes = v;
            }
        }
        res
    }
}

impl Write for ConsensusParams {
    fn write(&self, buf: &mut impl BufMut) {
        self.block_size.max_bytes.write(buf);
        self.block_size.max_txs.write(buf);
        self.block_size.max_gas.write(buf);
        self.tx_size.max_bytes.write(buf);
        self.tx_size.max_gas.write(buf);
        self.block_gossip.block_part_size_bytes.write(buf);
    }
}

impl Read for ConsensusParams {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        Ok(Self {
            block_size: BlockSize {
                max_bytes: u64::read(buf)?,
                max_txs: u64::read(buf)?,
                max_gas: i64::read(buf)?,
            },
            tx_size: TxSize {
                max_bytes: u64::read(buf)?,
                max_gas: i64::read(buf)?,
            },
            block_gossip: BlockGossip {
                block_part_size_bytes: u64::read(buf)?,
            },
        })
    }
}

impl FixedSize for ConsensusParams {
    const SIZE: usize = u64::SIZE * 4 + i64::SIZE * 2;
}

/// Sparse update to [BlockSize].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockSizeUpdate {
    pub max_bytes: Option<u64>,
    pub max_txs: Option<u64>,
    pub max_gas: Option<i64>,
}

/// Sparse update to [TxSize].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxSizeUpdate {
    pub max_bytes: Option<u64>,
    pub max_gas: Option<i64>,
}

/// Sparse update to [BlockGossip].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockGossipUpdate {
    pub block_part_size_bytes: Option<u64>,
}

/// A sparse, partially-populated update to [ConsensusParams], announced by
/// execution at the end of a block and staged with the block's responses.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParamUpdates {
    pub block_size: Option<BlockSizeUpdate>,
    pub tx_size: Option<TxSizeUpdate>,
    pub block_gossip: Option<BlockGossipUpdate>,
}

impl ParamUpdates {
    /// A fully-populated update carrying every field of `params`.
    pub fn full(params: &ConsensusParams) -> Self {
        Self {
            block_size: Some(BlockSizeUpdate {
                max_bytes: Some(params.block_size.max_bytes),
                max_txs: Some(params.block_size.max_txs),
                max_gas: Some(params.block_size.max_gas),
            }),
            tx_size: Some(TxSizeUpdate {
                max_bytes: Some(params.tx_size.max_bytes),
                max_gas: Some(params.tx_size.max_gas),
            }),
            block_gossip: Some(BlockGossipUpdate {
                block_part_size_bytes: Some(params.block_gossip.block_part_size_bytes),
            }),
        }
    }
}

impl Write for BlockSizeUpdate {
    fn write(&self, buf: &mut impl BufMut) {
        self.max_bytes.write(buf);
        self.max_txs.write(buf);
        self.max_gas.write(buf);
    }
}

impl EncodeSize for BlockSizeUpdate {
    fn encode_size(&self) -> usize {
        self.max_bytes.encode_size() + self.max_txs.encode_size() + self.max_gas.encode_size()
    }
}

impl Read for BlockSizeUpdate {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        Ok(Self {
            max_bytes: Option::<u64>::read(buf)?,
            max_txs: Option::<u64>::read(buf)?,
            max_gas: Option::<i64>::read(buf)?,
        })
    }
}

impl Write for TxSizeUpdate {
    fn write(&self, buf: &mut impl BufMut) {
        self.max_bytes.write(buf);
        self.max_gas.write(buf);
    }
}

impl EncodeSize for TxSizeUpdate {
    fn encode_size(&self) -> usize {
        self.max_bytes.encode_size() + self.max_gas.encode_size()
    }
}

impl Read for TxSizeUpdate {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        Ok(Self {
            max_bytes: Option::<u64>::read(buf)?,
            max_gas: Option::<i64>::read(buf)?,
        })
    }
}

impl Write for BlockGossipUpdate {
    fn write(&self, buf: &mut impl BufMut) {
        self.block_part_size_bytes.write(buf);
    }
}

impl EncodeSize for BlockGossipUpdate {
    fn encode_size(&self) -> usize {
        self.block_part_size_bytes.encode_size()
    }
}

impl Read for BlockGossipUpdate {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        Ok(Self {
            block_part_size_bytes: Option::<u64>::read(buf)?,
        })
    }
}

impl Write for ParamUpdates {
    fn write(&self, buf: &mut impl BufMut) {
        self.block_size.write(buf);
        self.tx_size.write(buf);
        self.block_gossip.write(buf);
    }
}

impl EncodeSize for ParamUpdates {
    fn encode_size(&self) -> usize {
        self.block_size.encode_size() + self.tx_size.encode_size() + self.block_gossip.encode_size()
    }
}

impl Read for ParamUpdates {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        Ok(Self {
            block_size: Option::<BlockSizeUpdate>::read(buf)?,
            tx_size: Option::<TxSizeUpdate>::read(buf)?,
            block_gossip: Option::<BlockGossipUpdate>::read(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};

    fn make_params(
        block_bytes: u64,
        block_txs: u64,
        block_gas: i64,
        tx_bytes: u64,
        tx_gas: i64,
        part_size: u64,
    ) -> ConsensusParams {
        ConsensusParams {
            block_size: BlockSize {
                max_bytes: block_bytes,
                max_txs: block_txs,
                max_gas: block_gas,
            },
            tx_size: TxSize {
                max_bytes: tx_bytes,
                max_gas: tx_gas,
            },
            block_gossip: BlockGossip {
                block_part_size_bytes: part_size,
            },
        }
    }

    #[test]
    fn test_apply_updates() {
        let initial = make_params(1, 2, 3, 4, 5, 6);

        let cases = [
            // No update record: unchanged.
            (None, make_params(1, 2, 3, 4, 5, 6)),
            // Present but empty record: unchanged.
            (Some(ParamUpdates::default()), make_params(1, 2, 3, 4, 5, 6)),
            // One sub-group, one field.
            (
                Some(ParamUpdates {
                    tx_size: Some(TxSizeUpdate {
                        max_bytes: Some(123),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                make_params(1, 2, 3, 123, 5, 6),
            ),
            // One sub-group, two of three fields; the third keeps its value.
            (
                Some(ParamUpdates {
                    block_size: Some(BlockSizeUpdate {
                        max_txs: Some(44),
                        max_gas: Some(55),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                make_params(1, 44, 55, 4, 5, 6),
            ),
            // All three sub-groups at once.
            (
                Some(ParamUpdates {
                    block_size: Some(BlockSizeUpdate {
                        max_txs: Some(789),
                        ..Default::default()
                    }),
                    tx_size: Some(TxSizeUpdate {
                        max_gas: Some(888),
                        ..Default::default()
                    }),
                    block_gossip: Some(BlockGossipUpdate {
                        block_part_size_bytes: Some(2002),
                    }),
                }),
                make_params(1, 789, 3, 4, 888, 2002),
            ),
        ];

        for (i, (updates, expected)) in cases.iter().enumerate() {
            let res = initial.update(updates.as_ref());
            assert_eq!(&res, expected, "case {i}");
        }
    }

    #[test]
    fn test_full_update_replaces_everything() {
        let initial = make_params(1, 2, 3, 4, 5, 6);
        let target = make_params(7, 8, 9, 10, 11, 12);
        assert_eq!(initial.update(Some(&ParamUpdates::full(&target))), target);
    }

    #[test]
    fn test_params_codec_roundtrip() {
        let params = make_params(1, 2, -1, 4, 5, 6);
        let encoded = params.encode();
        assert_eq!(encoded.len(), ConsensusParams::SIZE);
        assert_eq!(ConsensusParams::decode(&encoded[..]).unwrap(), params);
    }

    #[test]
    fn test_updates_codec_roundtrip() {
        let updates = ParamUpdates {
            block_size: Some(BlockSizeUpdate {
                max_bytes: None,
                max_txs: Some(44),
                max_gas: Some(-1),
            }),
            tx_size: None,
            block_gossip: Some(BlockGossipUpdate {
                block_part_size_bytes: None,
            }),
        };
        let encoded = updates.encode();
        assert_eq!(ParamUpdates::decode(&encoded[..]).unwrap(), updates);
    }
}
