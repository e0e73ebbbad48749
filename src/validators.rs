//! Validator sets: the weighted parties eligible to produce the next block.
//!
//! A [ValidatorSet] is an address-ordered list of validators. Its digest is a
//! [crate::merkle] root over per-validator digests, so two sets with the same
//! members and powers always commit to the same value. End-of-block updates
//! are applied by address: power zero removes a validator, any other power
//! inserts or replaces one.

use crate::merkle::Builder;
use bytes::{Buf, BufMut};
use commonware_codec::{
    Encode, EncodeSize, Error as CodecError, FixedSize, RangeCfg, Read, ReadExt, Write,
};
use commonware_cryptography::{ed25519::PublicKey, hash, sha256::Digest, Sha256};
use tracing::warn;

/// A single weighted validator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validator {
    pub public_key: PublicKey,
    pub power: u64,
}

impl Validator {
    pub fn new(public_key: PublicKey, power: u64) -> Self {
        Self { public_key, power }
    }

    /// Address: the digest of the public key.
    pub fn address(&self) -> Digest {
        hash(self.public_key.as_ref())
    }

    /// Digest of this validator's canonical encoding (key then power).
    pub fn hash(&self) -> Digest {
        hash(&self.encode())
    }
}

impl Write for Validator {
    fn write(&self, buf: &mut impl BufMut) {
        self.public_key.write(buf);
        self.power.write(buf);
    }
}

impl Read for Validator {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        let public_key = PublicKey::read(buf)?;
        let power = u64::read(buf)?;
        Ok(Self { public_key, power })
    }
}

impl FixedSize for Validator {
    const SIZE: usize = PublicKey::SIZE + u64::SIZE;
}

/// A change to one validator, announced by execution at the end of a block.
///
/// `power == 0` removes the validator with this key's address; any other
/// power upserts it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorUpdate {
    pub public_key: PublicKey,
    pub power: u64,
}

impl Write for ValidatorUpdate {
    fn write(&self, buf: &mut impl BufMut) {
        self.public_key.write(buf);
        self.power.write(buf);
    }
}

impl Read for ValidatorUpdate {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        let public_key = PublicKey::read(buf)?;
        let power = u64::read(buf)?;
        Ok(Self { public_key, power })
    }
}

impl FixedSize for ValidatorUpdate {
    const SIZE: usize = PublicKey::SIZE + u64::SIZE;
}

/// An address-ordered set of validators.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
}

impl ValidatorSet {
    /// Build a set from arbitrary-order validators.
    pub fn new(mut validators: Vec<Validator>) -> Self {
        validators.sort_by_key(Validator::address);
        Self { validators }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    pub fn get_by_address(&self, address: &Digest) -> Option<&Validator> {
        self.validators.iter().find(|v| v.address() == *address)
    }

    /// Sum of all validator powers.
    pub fn total_power(&self) -> u64 {
        self.validators.iter().map(|v| v.power).sum()
    }

    /// Merkle root over the per-validator digests, in address order.
    pub fn hash(&self) -> Digest {
        let mut builder = Builder::<Sha256>::new(self.validators.len());
        for validator in &self.validators {
            builder.add(&validator.hash());
        }
        builder.build().root()
    }

    /// Apply end-of-block updates in order. Removing an address that is not
    /// in the set is a no-op (the update has already taken effect as far as
    /// this set is concerned).
    pub fn apply_updates(&mut self, updates: &[ValidatorUpdate]) {
        for update in updates {
            let address = hash(update.public_key.as_ref());
            let position = self.validators.iter().position(|v| v.address() == address);
            match (position, update.power) {
                (Some(i), 0) => {
                    self.validators.remove(i);
                }
                (Some(i), power) => {
                    self.validators[i].power = power;
                }
                (None, 0) => {
                    warn!(?address, "removal of unknown validator ignored");
                }
                (None, power) => {
                    let validator = Validator::new(update.public_key.clone(), power);
                    let at = self
                        .validators
                        .partition_point(|v| v.address() < address);
                    self.validators.insert(at, validator);
                }
            }
        }
    }
}

impl Write for ValidatorSet {
    fn write(&self, buf: &mut impl BufMut) {
        self.validators.write(buf);
    }
}

impl EncodeSize for ValidatorSet {
    fn encode_size(&self) -> usize {
        self.validators.encode_size()
    }
}

impl Read for ValidatorSet {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        let validators = Vec::<Validator>::read_cfg(buf, &(RangeCfg::from(..), ()))?;
        Ok(Self { validators })
    }
}
