//! Binary Merkle tree over an ordered sequence of digests.
//!
//! The tree commits to a list of leaf digests so that a single compact root
//! can be published and any element later proven against it. Construction and
//! verification must agree bit-for-bit: both pair the lone trailing node at an
//! odd level with itself, and both derive level widths from the element count
//! so a self-paired step consumes no proof sibling. The root of an empty
//! sequence is the digest of the empty byte string.
//!
//! # Example
//!
//! ```rust
//! use chainstate::merkle::Builder;
//! use commonware_cryptography::{hash, Hasher, Sha256};
//!
//! let elements: Vec<_> = (0u64..5).map(|i| hash(&i.to_be_bytes())).collect();
//! let mut builder = Builder::<Sha256>::new(elements.len());
//! for element in &elements {
//!     builder.add(element);
//! }
//! let tree = builder.build();
//!
//! let proof = tree.proof(3).unwrap();
//! let mut hasher = Sha256::new();
//! assert!(proof.verify(&mut hasher, 3, 5, &elements[3], &tree.root()));
//! ```

use bytes::{Buf, BufMut};
use commonware_codec::{
    Encode, EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write,
};
use commonware_cryptography::Hasher;
use thiserror::Error;

/// A proof path can never be deeper than the leaf count representable in u32.
const MAX_PROOF_DEPTH: usize = 32;

/// Errors that can occur when generating proofs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("leaf index {index} out of bounds for {total} leaves")]
    IndexOutOfBounds { index: u32, total: u32 },
}

/// Accumulates leaf digests for a [Tree].
pub struct Builder<H: Hasher> {
    leaves: Vec<H::Digest>,
}

impl<H: Hasher> Builder<H> {
    /// Create a builder expecting roughly `capacity` leaves.
    pub fn new(capacity: usize) -> Self {
        Self {
            leaves: Vec::with_capacity(capacity),
        }
    }

    /// Append a leaf digest. Order is significant.
    pub fn add(&mut self, leaf: &H::Digest) {
        self.leaves.push(leaf.clone());
    }

    /// Hash all levels and produce the finished [Tree].
    pub fn build(self) -> Tree<H> {
        if self.leaves.is_empty() {
            return Tree {
                levels: Vec::new(),
                root: H::empty(),
            };
        }

        let mut hasher = H::new();
        let mut levels = vec![self.leaves];
        while levels.last().unwrap().len() > 1 {
            let prev = levels.last().unwrap();
            let mut next = Vec::with_capacity(prev.len().div_ceil(2));
            for pair in prev.chunks(2) {
                let left = &pair[0];
                // A lone trailing node is paired with itself.
                let right = pair.last().unwrap();
                hasher.update(left.as_ref());
                hasher.update(right.as_ref());
                next.push(hasher.finalize());
            }
            levels.push(next);
        }
        let root = levels.last().unwrap()[0].clone();
        Tree { levels, root }
    }
}

/// A fully-hashed binary Merkle tree.
pub struct Tree<H: Hasher> {
    // levels[0] holds the leaves; each following level halves (rounding up).
    // Empty for a tree over zero leaves.
    levels: Vec<Vec<H::Digest>>,
    root: H::Digest,
}

impl<H: Hasher> Tree<H> {
    /// The root digest committed to by this tree.
    pub fn root(&self) -> H::Digest {
        self.root.clone()
    }

    /// Number of leaves in the tree.
    pub fn len(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Whether the tree commits to zero leaves.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Generate an inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: u32) -> Result<Proof<H>, Error> {
        let total = self.len() as u32;
        if index >= total {
            return Err(Error::IndexOutOfBounds { index, total });
        }

        let leaf = self.levels[0][index as usize].clone();
        let mut siblings = Vec::new();
        let mut idx = index as usize;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = idx ^ 1;
            // A self-paired node contributes no sibling; the verifier
            // reconstructs the pairing from the leaf count.
            if sibling < level.len() {
                siblings.push(level[sibling].clone());
            }
            idx >>= 1;
        }

        Ok(Proof {
            total,
            index,
            leaf,
            siblings,
        })
    }
}

/// A compact certificate that one leaf is part of a committed sequence.
pub struct Proof<H: Hasher> {
    /// Claimed number of leaves in the tree.
    pub total: u32,
    /// Claimed position of the proven leaf.
    pub index: u32,
    /// Claimed digest of the proven leaf.
    pub leaf: H::Digest,
    /// Sibling digests from the leaf up to (but excluding) the root.
    pub siblings: Vec<H::Digest>,
}

impl<H: Hasher> Proof<H> {
    /// Verify this proof against an expected position, leaf count, leaf digest,
    /// and root. Any mismatch yields `false`; verification never errors since an
    /// invalid proof is an expected outcome of untrusted input.
    pub fn verify(
        &self,
        hasher: &mut H,
        index: u32,
        total: u32,
        leaf: &H::Digest,
        root: &H::Digest,
    ) -> bool {
        if index != self.index || total != self.total || leaf != &self.leaf {
            return false;
        }
        if total == 0 || index >= total {
            return false;
        }

        let mut node = self.leaf.clone();
        let mut idx = index as usize;
        let mut width = total as usize;
        let mut siblings = self.siblings.iter();
        while width > 1 {
            let sibling_idx = idx ^ 1;
            if sibling_idx >= width {
                // Lone trailing node: combined with itself, no sibling consumed.
                hasher.update(node.as_ref());
                hasher.update(node.as_ref());
            } else {
                let Some(sibling) = siblings.next() else {
                    return false;
                };
                if idx % 2 == 0 {
                    hasher.update(node.as_ref());
                    hasher.update(sibling.as_ref());
                } else {
                    hasher.update(sibling.as_ref());
                    hasher.update(node.as_ref());
                }
            }
            node = hasher.finalize();
            idx >>= 1;
            width = width.div_ceil(2);
        }

        // Reject padded proofs.
        if siblings.next().is_some() {
            return false;
        }
        node == *root
    }
}

impl<H: Hasher> Clone for Proof<H> {
    fn clone(&self) -> Self {
        Self {
            total: self.total,
            index: self.index,
            leaf: self.leaf.clone(),
            siblings: self.siblings.clone(),
        }
    }
}

impl<H: Hasher> PartialEq for Proof<H> {
    fn eq(&self, other: &Self) -> bool {
        self.total == other.total
            && self.index == other.index
            && self.leaf == other.leaf
            && self.siblings == other.siblings
    }
}

impl<H: Hasher> Eq for Proof<H> {}

impl<H: Hasher> std::fmt::Debug for Proof<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proof")
            .field("total", &self.total)
            .field("index", &self.index)
            .field("leaf", &self.leaf)
            .field("siblings", &self.siblings)
            .finish()
    }
}

impl<H: Hasher> Write for Proof<H> {
    fn write(&self, buf: &mut impl BufMut) {
        self.total.write(buf);
        self.index.write(buf);
        self.leaf.write(buf);
        self.siblings.write(buf);
    }
}

impl<H: Hasher> EncodeSize for Proof<H> {
    fn encode_size(&self) -> usize {
        self.total.encode_size()
            + self.index.encode_size()
            + self.leaf.encode_size()
            + self.siblings.encode_size()
    }
}

impl<H: Hasher> Read for Proof<H> {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        let total = u32::read(buf)?;
        let index = u32::read(buf)?;
        let leaf = H::Digest::read(buf)?;
        let siblings =
            Vec::<H::Digest>::read_cfg(buf, &(RangeCfg::from(0..=MAX_PROOF_DEPTH), ()))?;
        Ok(Self {
            total,
            index,
            leaf,
            siblings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::DecodeExt;
    use commonware_cryptography::{hash, sha256, Digest as _, Sha256};
    use rand::{rngs::StdRng, SeedableRng};

    fn digests(n: u64) -> Vec<sha256::Digest> {
        (0..n).map(|i| hash(&i.to_be_bytes())).collect()
    }

    fn build(elements: &[sha256::Digest]) -> Tree<Sha256> {
        let mut builder = Builder::<Sha256>::new(elements.len());
        for element in elements {
            builder.add(element);
        }
        builder.build()
    }

    #[test]
    fn test_empty_root() {
        let tree = build(&[]);
        assert!(tree.is_empty());
        assert_eq!(tree.root(), hash(&[]));
        assert_eq!(
            tree.proof(0),
            Err(Error::IndexOutOfBounds { index: 0, total: 0 })
        );
    }

    #[test]
    fn test_single_leaf() {
        let elements = digests(1);
        let tree = build(&elements);
        // A single element is its own root.
        assert_eq!(tree.root(), elements[0]);

        let proof = tree.proof(0).unwrap();
        assert!(proof.siblings.is_empty());
        let mut hasher = Sha256::new();
        assert!(proof.verify(&mut hasher, 0, 1, &elements[0], &tree.root()));
    }

    #[test]
    fn test_prove_and_verify_all() {
        let mut hasher = Sha256::new();
        for n in [2u64, 3, 4, 5, 7, 8, 9, 16, 33] {
            let elements = digests(n);
            let tree = build(&elements);
            let root = tree.root();
            for (i, element) in elements.iter().enumerate() {
                let proof = tree.proof(i as u32).unwrap();
                assert!(
                    proof.verify(&mut hasher, i as u32, n as u32, element, &root),
                    "n={n} i={i}"
                );
            }
        }
    }

    #[test]
    fn test_random_leaves_prove_and_verify() {
        let mut rng = StdRng::seed_from_u64(42);
        let elements: Vec<sha256::Digest> =
            (0..12).map(|_| sha256::Digest::random(&mut rng)).collect();
        let tree = build(&elements);
        let root = tree.root();
        let mut hasher = Sha256::new();
        for (i, element) in elements.iter().enumerate() {
            let proof = tree.proof(i as u32).unwrap();
            assert!(proof.verify(&mut hasher, i as u32, 12, element, &root));
        }
    }

    #[test]
    fn test_roots_distinct() {
        // Different leaf counts and different orders commit to different roots.
        let a = build(&digests(4)).root();
        let b = build(&digests(5)).root();
        assert_ne!(a, b);

        let mut reversed = digests(4);
        reversed.reverse();
        assert_ne!(a, build(&reversed).root());
    }

    #[test]
    fn test_verify_rejects_mismatch() {
        let elements = digests(6);
        let tree = build(&elements);
        let root = tree.root();
        let mut hasher = Sha256::new();

        let proof = tree.proof(2).unwrap();
        assert!(proof.verify(&mut hasher, 2, 6, &elements[2], &root));

        // Wrong index, total, leaf, or root.
        assert!(!proof.verify(&mut hasher, 3, 6, &elements[2], &root));
        assert!(!proof.verify(&mut hasher, 2, 7, &elements[2], &root));
        assert!(!proof.verify(&mut hasher, 2, 6, &elements[3], &root));
        assert!(!proof.verify(&mut hasher, 2, 6, &elements[2], &elements[0]));
    }

    #[test]
    fn test_verify_rejects_tampered_siblings() {
        let elements = digests(7);
        let tree = build(&elements);
        let root = tree.root();
        let mut hasher = Sha256::new();

        for i in 0..elements.len() {
            let proof = tree.proof(i as u32).unwrap();
            for s in 0..proof.siblings.len() {
                let mut tampered = proof.clone();
                let mut raw: [u8; 32] = tampered.siblings[s].as_ref().try_into().unwrap();
                raw[0] ^= 0x01;
                tampered.siblings[s] = sha256::Digest::from(raw);
                assert!(
                    !tampered.verify(&mut hasher, i as u32, 7, &elements[i], &root),
                    "i={i} s={s}"
                );
            }

            // Dropping or padding the path also fails.
            let mut short = proof.clone();
            short.siblings.pop();
            assert!(!short.verify(&mut hasher, i as u32, 7, &elements[i], &root));
            let mut long = proof.clone();
            long.siblings.push(hash(b"extra"));
            assert!(!long.verify(&mut hasher, i as u32, 7, &elements[i], &root));
        }
    }

    #[test]
    fn test_proof_codec() {
        let elements = digests(5);
        let tree = build(&elements);
        let proof = tree.proof(4).unwrap();

        let encoded = proof.encode();
        let decoded = Proof::<Sha256>::decode(&encoded[..]).unwrap();
        assert_eq!(proof, decoded);

        let mut hasher = Sha256::new();
        assert!(decoded.verify(&mut hasher, 4, 5, &elements[4], &tree.root()));
    }
}
