use super::*;

/// Stratum's `mining.notify` sends the previous block hash as eight
/// little-endian 32-bit words, each individually byte-swapped — a historical
/// quirk of the original stratum mining software, distinct from both the
/// hash's natural byte order and the little-endian-word trick used for
/// [`MerkleNode`](super::MerkleNode).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PrevHash(BlockHash);

impl PrevHash {
    pub fn as_byte_array(&self) -> &[u8; 32] {
        self.0.as_byte_array()
    }

    pub fn from_byte_array(b: [u8; 32]) -> Self {
        Self(BlockHash::from_byte_array(b))
    }
}

impl From<BlockHash> for PrevHash {
    fn from(h: BlockHash) -> Self {
        Self(h)
    }
}

impl From<PrevHash> for BlockHash {
    fn from(p: PrevHash) -> Self {
        p.0
    }
}

fn swap_words(bytes: &mut [u8; 32]) {
    for word in bytes.chunks_exact_mut(4) {
        word.reverse();
    }
}

impl FromStr for PrevHash {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        swap_words(&mut bytes);
        Ok(PrevHash(BlockHash::from_byte_array(bytes)))
    }
}

impl fmt::Display for PrevHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes = *self.0.as_byte_array();
        swap_words(&mut bytes);
        write!(f, "{}", hex::encode(bytes))
    }
}

impl Serialize for PrevHash {
    fn serialize<S: Serializer>(&self, ser: S) -> std::result::Result<S::Ok, S::Error> {
        ser.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PrevHash {
    fn deserialize<D: Deserializer<'de>>(de: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(de)?;
        s.parse().map_err(de::Error::custom)
    }
}
