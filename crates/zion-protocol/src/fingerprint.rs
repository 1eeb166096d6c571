//! Message fingerprints.

use std::fmt;

use zion_transport::PeerId;

/// BLAKE3 digest identifying one logical message.
///
/// Computed over `type`, `from`, `timestamp` and `nonce` only. Variable
/// length fields are length-prefixed so `("ab", "c")` and `("a", "bc")`
/// never collide.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn compute(kind: &str, from: &PeerId, timestamp: u64, nonce: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        write_field(&mut hasher, kind.as_bytes());
        write_field(&mut hasher, from.as_str().as_bytes());
        hasher.update(&timestamp.to_be_bytes());
        write_field(&mut hasher, nonce.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

fn write_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Short hex form, enough to tell messages apart in logs.
impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..6] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}
