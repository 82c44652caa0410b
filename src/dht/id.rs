//! Fixed-length identifiers and the Kademlia XOR metric.

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;
use rand::Rng as _;

use super::error::DhtError;
use crate::constants::ID_LEN;

/// A fixed-size bit vector used as node ID, lookup target and XOR distance.
///
/// Bits are numbered from the most significant bit of the first byte.
/// Mixing identities of different sizes in [`xor`](Self::xor) or
/// [`compare`](Self::compare) is a caller bug and panics; identities built
/// from network input must have their length validated first (see
/// [`from_bytes`](Self::from_bytes)).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    size: usize,
    data: Vec<u8>,
}

impl Identity {
    /// An all-zero identity of `size` bits.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            data: vec![0u8; size.div_ceil(8)],
        }
    }

    /// A random 160-bit node ID.
    pub fn generate() -> Self {
        let mut data = vec![0u8; ID_LEN];
        rand::rng().fill(&mut data[..]);
        Self {
            size: ID_LEN * 8,
            data,
        }
    }

    /// Wraps raw bytes; the size is `8 * data.len()` bits.
    pub fn from_raw(data: &[u8]) -> Self {
        Self {
            size: data.len() * 8,
            data: data.to_vec(),
        }
    }

    /// Parses a 20-byte node ID received from the network.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DhtError> {
        if data.len() != ID_LEN {
            return Err(DhtError::InvalidNodeId(data.len()));
        }
        Ok(Self::from_raw(data))
    }

    /// Parses a 40 character hex node ID.
    pub fn from_hex(s: &str) -> Result<Self, DhtError> {
        if s.len() != ID_LEN * 2 || !s.is_ascii() {
            return Err(DhtError::InvalidNodeId(s.len() / 2));
        }
        let data = (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| DhtError::InvalidNodeId(s.len() / 2))?;
        Ok(Self::from_raw(&data))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }

    /// Returns bit `index` as 0 or 1.
    pub fn bit(&self, index: usize) -> u8 {
        assert!(
            index < self.size,
            "identity bit index {} out of range for size {}",
            index,
            self.size
        );
        (self.data[index / 8] >> (7 - index % 8)) & 1
    }

    fn assign(&mut self, index: usize, value: bool) {
        assert!(
            index < self.size,
            "identity bit index {} out of range for size {}",
            index,
            self.size
        );
        let mask = 1u8 << (7 - index % 8);
        if value {
            self.data[index / 8] |= mask;
        } else {
            self.data[index / 8] &= !mask;
        }
    }

    pub fn set(&mut self, index: usize) {
        self.assign(index, true);
    }

    pub fn unset(&mut self, index: usize) {
        self.assign(index, false);
    }

    /// Compares the first `prefix_len` bits; later bits are ignored.
    ///
    /// Two IDs belong to the same bucket range iff this returns `Equal` for
    /// the bucket's prefix length.
    pub fn compare(&self, other: &Identity, prefix_len: usize) -> Ordering {
        assert!(
            prefix_len <= self.size && prefix_len <= other.size,
            "prefix length {} exceeds identity size ({} / {})",
            prefix_len,
            self.size,
            other.size
        );

        let whole = prefix_len / 8;
        match self.data[..whole].cmp(&other.data[..whole]) {
            Ordering::Equal => {}
            unequal => return unequal,
        }

        (whole * 8..prefix_len)
            .map(|i| self.bit(i).cmp(&other.bit(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// The Kademlia distance between two identities of the same size.
    pub fn xor(&self, other: &Identity) -> Identity {
        assert_eq!(
            self.size, other.size,
            "xor of identities with different sizes"
        );
        Identity {
            size: self.size,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| a ^ b)
                .collect(),
        }
    }

    /// Number of leading bits shared with `other`.
    pub fn common_prefix_len(&self, other: &Identity) -> usize {
        let distance = self.xor(other);
        for (i, &byte) in distance.data.iter().enumerate() {
            if byte != 0 {
                return (i * 8 + byte.leading_zeros() as usize).min(self.size);
            }
        }
        self.size
    }

    /// A random identity sharing exactly `prefix_len` leading bits with `self`.
    ///
    /// With `prefix_len == size` this is `self` unchanged.
    pub fn random_with_prefix(&self, prefix_len: usize) -> Identity {
        let mut rng = rand::rng();
        let mut id = self.clone();
        for i in prefix_len..self.size {
            if i == prefix_len {
                id.assign(i, self.bit(i) == 0);
            } else {
                id.assign(i, rng.random::<bool>());
            }
        }
        id
    }

    /// `target`'s first `prefix_bytes` bytes followed by the rest of `self`.
    ///
    /// Crawlers advertise such an ID so they look close to every target.
    pub fn neighbor_of(&self, target: &Identity, prefix_bytes: usize) -> Identity {
        assert_eq!(self.size, target.size, "neighbor of identity with different size");
        let split = prefix_bytes.min(self.data.len());
        let mut data = Vec::with_capacity(self.data.len());
        data.extend_from_slice(&target.data[..split]);
        data.extend_from_slice(&self.data[split..]);
        Identity {
            size: self.size,
            data,
        }
    }

    /// The identity as a string of `0`/`1` characters.
    pub fn to_bit_string(&self) -> String {
        (0..self.size)
            .map(|i| if self.bit(i) == 1 { '1' } else { '0' })
            .collect()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data.as_slice() {
            [a, b, ..] => write!(f, "Identity({:02x}{:02x}..)", a, b),
            _ => write!(f, "Identity({})", self.to_bit_string()),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.data {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
