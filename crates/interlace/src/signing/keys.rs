//! Signing keys.
//!
//! Private keys use the cosign encrypted format: a PEM block whose body is a
//! JSON envelope holding scrypt parameters, a nacl/secretbox nonce, and the
//! sealed PKCS#8 key.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use crypto_secretbox::aead::generic_array::GenericArray;
use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::SigningError;
use crate::secrets::PassphraseSource;

pub const COSIGN_PEM_TYPE: &str = "ENCRYPTED COSIGN PRIVATE KEY";
pub const SIGSTORE_PEM_TYPE: &str = "ENCRYPTED SIGSTORE PRIVATE KEY";

const KDF_NAME: &str = "scrypt";
const CIPHER_NAME: &str = "nacl/secretbox";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;

type Result<T> = std::result::Result<T, SigningError>;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct EncryptedKey {
    pub kdf: Kdf,
    pub cipher: Cipher,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Kdf {
    pub name: String,
    pub params: ScryptParams,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ScryptParams {
    #[serde(rename = "N")]
    pub n: u64,
    pub r: u32,
    pub p: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Cipher {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// A signing key with its public half.
#[derive(Debug, Clone)]
pub struct KeyPair {
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl KeyPair {
    pub fn new(signing: SigningKey) -> Self {
        let verifying = *signing.verifying_key();
        Self { signing, verifying }
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying
    }
}

/// Where the cycle's signing key is read from.
#[derive(Debug)]
pub struct KeySource {
    key_path: PathBuf,
    passphrase: PassphraseSource,
}

impl KeySource {
    pub fn new(key_path: impl Into<PathBuf>, passphrase: PassphraseSource) -> Self {
        Self {
            key_path: key_path.into(),
            passphrase,
        }
    }

    /// Resolves the passphrase up front; every later `load` reuses it.
    pub fn resolve_passphrase(self) -> Result<Self> {
        let passphrase = self
            .passphrase
            .into_provided()
            .map_err(|e| SigningError::Passphrase(e.to_string()))?;
        Ok(Self {
            key_path: self.key_path,
            passphrase,
        })
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Reads, decrypts, and parses the private key.
    pub fn load(&self) -> Result<KeyPair> {
        let pem = std::fs::read(&self.key_path).map_err(|e| SigningError::ReadKey {
            path: self.key_path.clone(),
            source: e,
        })?;
        let passphrase = self
            .passphrase
            .resolve()
            .map_err(|e| SigningError::Passphrase(e.to_string()))?;
        decrypt_signing_key(&pem, &passphrase).map(KeyPair::new)
    }
}

/// Decrypts a cosign-format encrypted private key.
pub fn decrypt_signing_key(pem_bytes: &[u8], passphrase: &SecretString) -> Result<SigningKey> {
    let block = pem::parse(pem_bytes).map_err(|e| SigningError::MalformedKey(e.to_string()))?;
    if block.tag() != COSIGN_PEM_TYPE && block.tag() != SIGSTORE_PEM_TYPE {
        return Err(SigningError::MalformedKey(format!(
            "unexpected PEM block '{}'",
            block.tag()
        )));
    }

    let envelope: EncryptedKey = serde_json::from_slice(block.contents())
        .map_err(|e| SigningError::MalformedKey(format!("invalid key envelope: {}", e)))?;

    if envelope.kdf.name != KDF_NAME {
        return Err(SigningError::MalformedKey(format!(
            "unsupported kdf '{}'",
            envelope.kdf.name
        )));
    }
    if envelope.cipher.name != CIPHER_NAME {
        return Err(SigningError::MalformedKey(format!(
            "unsupported cipher '{}'",
            envelope.cipher.name
        )));
    }
    if envelope.cipher.nonce.len() != NONCE_LEN {
        return Err(SigningError::MalformedKey(format!(
            "nonce must be {} bytes, got {}",
            NONCE_LEN,
            envelope.cipher.nonce.len()
        )));
    }

    let key = derive_key(passphrase, &envelope.kdf)?;
    let cipher = XSalsa20Poly1305::new_from_slice(&key)
        .map_err(|e| SigningError::Decrypt(e.to_string()))?;
    let plaintext = cipher
        .decrypt(
            GenericArray::from_slice(&envelope.cipher.nonce),
            envelope.ciphertext.as_slice(),
        )
        .map_err(|_| SigningError::Decrypt("incorrect passphrase or corrupted key".to_string()))?;

    let secret = p256::SecretKey::from_pkcs8_der(&plaintext)
        .map_err(|e| SigningError::MalformedKey(format!("not a P-256 PKCS#8 key: {}", e)))?;
    Ok(SigningKey::from(secret))
}

pub(crate) fn derive_key(passphrase: &SecretString, kdf: &Kdf) -> Result<[u8; KEY_LEN]> {
    let n = kdf.params.n;
    if n < 2 || !n.is_power_of_two() {
        return Err(SigningError::MalformedKey(format!(
            "scrypt N must be a power of two, got {}",
            n
        )));
    }
    let log_n = n.trailing_zeros() as u8;
    let params = scrypt::Params::new(log_n, kdf.params.r, kdf.params.p, KEY_LEN)
        .map_err(|e| SigningError::MalformedKey(format!("invalid scrypt params: {}", e)))?;

    let mut key = [0u8; KEY_LEN];
    scrypt::scrypt(
        passphrase.expose_secret().as_bytes(),
        &kdf.salt,
        &params,
        &mut key,
    )
    .map_err(|e| SigningError::Decrypt(e.to_string()))?;
    Ok(key)
}

/// Reads a PEM `PUBLIC KEY`.
pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey> {
    let pem = std::fs::read_to_string(path).map_err(|e| SigningError::ReadKey {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_verifying_key(&pem)
}

pub fn parse_verifying_key(pem: &str) -> Result<VerifyingKey> {
    let public = p256::PublicKey::from_public_key_pem(pem)
        .map_err(|e| SigningError::MalformedKey(format!("invalid public key: {}", e)))?;
    Ok(VerifyingKey::from(public))
}

/// Base64 of raw bytes, the encoding used throughout envelopes and annotations.
pub fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_b64(value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value.trim())
        .map_err(|e| SigningError::Encode(format!("invalid base64: {}", e)))
}
