//! Item-key codec.
//!
//! An [`ItemKey`] binds the per-feed sequence number to the feed-author's
//! raw item id: a big-endian `u64` sequence id, an ASCII `'-'`, then the
//! raw id (a SHA-512 digest of whatever made the entry unique in the
//! feed). Keys order lexicographically over the raw bytes; the sequence
//! id is the high-order prefix, so newer keys compare greater.
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha512};

/// SHA-512 digest of a string, used for raw item ids and feed URL keys.
pub fn make_hash(input: &str) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(input.as_bytes());
    hasher.finalize().to_vec()
}

// 8 bytes of sequence id plus the '-' separator.
const RAW_ID_OFFSET: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey(Vec<u8>);

impl ItemKey {
    pub fn new(sequence_id: u64, raw_id: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(RAW_ID_OFFSET + raw_id.len());
        bytes.extend_from_slice(&sequence_id.to_be_bytes());
        bytes.push(b'-');
        bytes.extend_from_slice(raw_id);
        ItemKey(bytes)
    }

    /// Whether this key carries `raw_id` as its suffix.
    pub fn is_raw_item_id(&self, raw_id: &[u8]) -> bool {
        self.0.len() >= RAW_ID_OFFSET && &self.0[RAW_ID_OFFSET..] == raw_id
    }

    /// The key under which the item record lives in the items bucket.
    pub fn store_key(&self) -> String {
        URL_SAFE.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Position of the key matching `raw_id` in `keys`, if any. Linear scan;
/// feeds hold at most ten thousand keys.
pub fn find_raw_item_id(keys: &[ItemKey], raw_id: &[u8]) -> Option<usize> {
    keys.iter().position(|key| key.is_raw_item_id(raw_id))
}

impl Serialize for ItemKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for ItemKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = URL_SAFE
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)?;
        Ok(ItemKey(bytes))
    }
}
