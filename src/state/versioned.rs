//! Height-indexed storage of infrequently-changing records.
//!
//! Validator sets and consensus parameters change at arbitrary heights but
//! must be loadable for *every* height. Storing a full copy per height would
//! be redundant, so a full snapshot is filed only at a change height; every
//! other height files a back-pointer to the governing change height. The
//! write path only ever points at a snapshot height, so a load follows at
//! most one indirection.

use super::Error;
use crate::db::{Batch, Database};
use bytes::{Buf, BufMut};
use commonware_codec::{
    DecodeExt, Encode, EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write,
};

const SNAPSHOT_CONTEXT: u8 = 0;
const POINTER_CONTEXT: u8 = 1;

/// The kinds of per-height records kept by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Kind {
    Validators,
    ConsensusParams,
    Results,
}

impl Kind {
    fn prefix(&self) -> u8 {
        match self {
            Kind::Validators => 0x01,
            Kind::ConsensusParams => 0x02,
            Kind::Results => 0x03,
        }
    }
}

/// Composite key for a record of `kind` filed at `height`.
pub(super) fn key(kind: Kind, height: u64) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = kind.prefix();
    key[1..].copy_from_slice(&height.to_be_bytes());
    key
}

/// A record filed at some height: either a full snapshot (filed at the change
/// height) or a pointer to the change height holding the snapshot.
///
/// An explicit tagged variant keeps the decode path unambiguous; there is no
/// field-presence sniffing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) enum Record<T> {
    Snapshot(T),
    LastChanged(u64),
}

impl<T: Write> Write for Record<T> {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Self::Snapshot(value) => {
                SNAPSHOT_CONTEXT.write(buf);
                value.write(buf);
            }
            Self::LastChanged(height) => {
                POINTER_CONTEXT.write(buf);
                height.write(buf);
            }
        }
    }
}

impl<T: EncodeSize> EncodeSize for Record<T> {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Snapshot(value) => value.encode_size(),
            Self::LastChanged(_) => u64::SIZE,
        }
    }
}

impl<T: Read> Read for Record<T> {
    type Cfg = T::Cfg;

    fn read_cfg(buf: &mut impl Buf, cfg: &Self::Cfg) -> Result<Self, CodecError> {
        match u8::read(buf)? {
            SNAPSHOT_CONTEXT => Ok(Self::Snapshot(T::read_cfg(buf, cfg)?)),
            POINTER_CONTEXT => Ok(Self::LastChanged(u64::read(buf)?)),
            e => Err(CodecError::InvalidEnum(e)),
        }
    }
}

/// Queue the record for `height` into `batch`: a snapshot iff `height` is the
/// change height, a pointer otherwise. Pointers are only ever written with
/// `last_changed < height`, so they always reference a snapshot directly.
pub(super) fn save<T>(batch: &mut Batch, kind: Kind, height: u64, value: &T, last_changed: u64)
where
    T: Write + EncodeSize + Clone,
{
    let record = if last_changed == height {
        Record::Snapshot(value.clone())
    } else {
        Record::LastChanged(last_changed)
    };
    batch.put(key(kind, height), record.encode().to_vec());
}

/// Load the full value governing `height`, following at most one indirection.
pub(super) fn load<D, T>(db: &D, kind: Kind, height: u64) -> Result<T, Error>
where
    D: Database,
    T: Read<Cfg = ()>,
{
    match get(db, kind, height)? {
        Record::Snapshot(value) => Ok(value),
        Record::LastChanged(changed) => match get(db, kind, changed) {
            Ok(Record::Snapshot(value)) => Ok(value),
            Ok(Record::LastChanged(_)) => {
                Err(Error::Corruption("record pointer does not reference a snapshot"))
            }
            Err(Error::NoRecordForHeight(_)) => {
                Err(Error::Corruption("record pointer references a missing snapshot"))
            }
            Err(err) => Err(err),
        },
    }
}

fn get<D, T>(db: &D, kind: Kind, height: u64) -> Result<Record<T>, Error>
where
    D: Database,
    T: Read<Cfg = ()>,
{
    // No state exists below the first block.
    if height < 1 {
        return Err(Error::NoRecordForHeight(height));
    }
    let Some(bytes) = db.get(&key(kind, height))? else {
        return Err(Error::NoRecordForHeight(height));
    };
    Ok(Record::<T>::decode(&bytes[..])?)
}
