use crate::compress::Compressor;
use crate::crypto::HybridEncryptor;
use crate::error::Result;
use crate::signer::Signer;
use serde_json::Value;

/// A request body after the sign → compress → encrypt pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedBody {
    /// Bytes to put on the wire.
    pub payload: Vec<u8>,
    /// Hex HMAC of the plain JSON, when a signer is configured.
    pub signature: Option<String>,
    /// Whether `payload` (or the plaintext inside the envelope) is gzip.
    pub compressed: bool,
}

/// Applies signing, compression and encryption to outgoing bodies.
#[derive(Debug, Clone, Default)]
pub struct RequestProcessor {
    signer: Option<Signer>,
    compressor: Option<Compressor>,
    encryptor: Option<HybridEncryptor>,
}

impl RequestProcessor {
    pub fn new(
        signer: Option<Signer>,
        compressor: Option<Compressor>,
        encryptor: Option<HybridEncryptor>,
    ) -> Self {
        Self {
            signer,
            compressor,
            encryptor,
        }
    }

    pub fn is_signing(&self) -> bool {
        self.signer.is_some()
    }

    pub fn is_encrypting(&self) -> bool {
        self.encryptor.is_some()
    }

    /// Runs the pipeline. The signature always covers the plain JSON so the
    /// collector can verify after undoing encryption and compression.
    pub fn process(&self, body: &Value) -> Result<PreparedBody> {
        let json = serde_json::to_vec(body)?;
        let signature = self.signer.as_ref().map(|s| s.sign(&json));

        let (mut payload, compressed) = match &self.compressor {
            Some(compressor) => compressor.encode(json)?,
            None => (json, false),
        };

        if let Some(encryptor) = &self.encryptor {
            let envelope = encryptor.encrypt(&payload)?;
            payload = serde_json::to_vec(&envelope)?;
        }

        Ok(PreparedBody {
            payload,
            signature,
            compressed,
        })
    }
}
