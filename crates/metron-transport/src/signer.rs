use crate::error::{Result, TransportError};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC of the uncompressed JSON body.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

/// HMAC-SHA256 request signer keyed by the shared secret.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    pub fn new(key: &str) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|e| TransportError::Crypto(format!("invalid signing key: {e}")))?;
        Ok(Self { mac })
    }

    /// Lowercase hex signature of `data`.
    pub fn sign(&self, data: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a hex signature.
    pub fn verify(&self, data: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(data);
        mac.verify_slice(&expected).is_ok()
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signer(***)")
    }
}
