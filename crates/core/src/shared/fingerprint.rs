use serde::{Deserialize, Serialize};

/// Content-derived file identity used to detect stale cache entries.
///
/// Two fingerprints are equal only when the byte length and the BLAKE3
/// digest of the content both match, so rewriting a file in place with the
/// same size and timestamp is still detected.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub len: u64,
    pub blake3: String,
}

impl Fingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self {
            len: bytes.len() as u64,
            blake3: blake3::hash(bytes).to_hex().to_string(),
        }
    }
}
