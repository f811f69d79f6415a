use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Result, anyhow};
use base64::Engine;
use hmac::Mac;
use sha2::Sha256;

type HmacSha256 = hmac::Hmac<Sha256>;

const NONCE_LEN: usize = 12;

/// Seals connection credentials while they sit in the registry. Plaintext
/// only exists inside a dispatch snapshot.
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

/// HMAC-SHA256(material, "devcascade-credentials-v1") -> 256-bit key.
fn derive_key(material: &[u8]) -> Result<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(b"devcascade-credentials-v1")
        .map_err(|e| anyhow!("HMAC init failed: {}", e))?;
    mac.update(material);
    let bytes = mac.finalize().into_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

impl CredentialVault {
    /// Key material from configuration. The same material opens the same
    /// sealed values, which only matters within one process.
    pub fn from_material(material: &str) -> Result<Self> {
        let key = derive_key(material.as_bytes())?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| anyhow!("invalid credential key: {}", e))?;
        Ok(Self { cipher })
    }

    /// Fresh random key for this process.
    pub fn ephemeral() -> Result<Self> {
        let material: [u8; 32] = rand::random();
        let key = derive_key(&material)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| anyhow!("invalid credential key: {}", e))?;
        Ok(Self { cipher })
    }

    /// Returns base64(nonce || ciphertext).
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| anyhow!("sealing credential failed: {}", e))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    pub fn open(&self, sealed: &str) -> Result<String> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(sealed)
            .map_err(|e| anyhow!("sealed credential is not base64: {}", e))?;
        if combined.len() <= NONCE_LEN {
            return Err(anyhow!("sealed credential too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| anyhow!("opening credential failed: {}", e))?;
        String::from_utf8(plaintext).map_err(|e| anyhow!("credential is not UTF-8: {}", e))
    }
}
