//! DSSE envelopes.

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature as EcdsaSignature, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::keys::{decode_b64, encode_b64, KeyPair};
use crate::error::SigningError;

pub const IN_TOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

type Result<T> = std::result::Result<T, SigningError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub payload_type: String,
    /// Base64 of the payload bytes.
    pub payload: String,
    pub signatures: Vec<EnvelopeSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    pub keyid: String,
    /// Base64 of the raw signature bytes.
    pub sig: String,
}

pub trait Signer {
    /// Signs `data`, returning the signature bytes and the key id.
    fn sign(&self, data: &[u8]) -> Result<(Vec<u8>, String)>;
}

pub trait Verifier {
    fn verify(&self, keyid: &str, data: &[u8], signature: &[u8]) -> Result<()>;
}

/// ECDSA P-256 over the SHA-256 digest, DER-encoded; the key id is always empty.
impl Signer for KeyPair {
    fn sign(&self, data: &[u8]) -> Result<(Vec<u8>, String)> {
        let digest = Sha256::digest(data);
        let signature: EcdsaSignature = self
            .signing_key()
            .sign_prehash(&digest)
            .map_err(|e| SigningError::Sign(e.to_string()))?;
        Ok((signature.to_der().as_bytes().to_vec(), String::new()))
    }
}

impl Verifier for KeyPair {
    fn verify(&self, keyid: &str, data: &[u8], signature: &[u8]) -> Result<()> {
        self.verifying_key().verify(keyid, data, signature)
    }
}

impl Verifier for VerifyingKey {
    fn verify(&self, _keyid: &str, data: &[u8], signature: &[u8]) -> Result<()> {
        let digest = Sha256::digest(data);
        let signature = EcdsaSignature::from_der(signature)
            .map_err(|e| SigningError::Verify(format!("malformed signature: {}", e)))?;
        self.verify_prehash(&digest, &signature)
            .map_err(|e| SigningError::Verify(e.to_string()))
    }
}

/// Pre-authentication encoding: `DSSEv1 <len> <type> <len> <payload>`.
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut encoded = format!(
        "DSSEv1 {} {} {} ",
        payload_type.len(),
        payload_type,
        payload.len()
    )
    .into_bytes();
    encoded.extend_from_slice(payload);
    encoded
}

/// Wraps `payload` in an envelope signed by `signer`.
pub fn sign_envelope(signer: &dyn Signer, payload_type: &str, payload: &[u8]) -> Result<Envelope> {
    let (signature, keyid) = signer.sign(&pae(payload_type, payload))?;
    Ok(Envelope {
        payload_type: payload_type.to_string(),
        payload: encode_b64(payload),
        signatures: vec![EnvelopeSignature {
            keyid,
            sig: encode_b64(&signature),
        }],
    })
}

/// Checks every signature on `envelope` and returns the decoded payload.
pub fn verify_envelope(envelope: &Envelope, verifier: &dyn Verifier) -> Result<Vec<u8>> {
    if envelope.signatures.is_empty() {
        return Err(SigningError::Verify("envelope carries no signatures".to_string()));
    }

    let payload = decode_b64(&envelope.payload)?;
    let encoded = pae(&envelope.payload_type, &payload);
    for signature in &envelope.signatures {
        let raw = decode_b64(&signature.sig)?;
        verifier.verify(&signature.keyid, &encoded, &raw)?;
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::keys::testing::signing_key;

    #[test]
    fn pae_layout() {
        assert_eq!(
            pae("application/vnd.in-toto+json", b"{}"),
            b"DSSEv1 28 application/vnd.in-toto+json 2 {}".to_vec()
        );
    }

    #[test]
    fn sign_then_verify() {
        let keys = KeyPair::new(signing_key(1));
        let envelope = sign_envelope(&keys, IN_TOTO_PAYLOAD_TYPE, br#"{"a":1}"#).unwrap();

        assert_eq!(envelope.signatures.len(), 1);
        assert_eq!(envelope.signatures[0].keyid, "");
        let payload = verify_envelope(&envelope, &keys).unwrap();
        assert_eq!(payload, br#"{"a":1}"#);
    }

    #[test]
    fn tampered_payload_fails() {
        let keys = KeyPair::new(signing_key(1));
        let mut envelope = sign_envelope(&keys, IN_TOTO_PAYLOAD_TYPE, br#"{"a":1}"#).unwrap();
        envelope.payload = encode_b64(br#"{"a":2}"#);

        let err = verify_envelope(&envelope, &keys).unwrap_err();
        assert!(matches!(err, SigningError::Verify(_)));
    }

    #[test]
    fn changed_payload_type_fails() {
        let keys = KeyPair::new(signing_key(1));
        let mut envelope = sign_envelope(&keys, IN_TOTO_PAYLOAD_TYPE, b"x").unwrap();
        envelope.payload_type = "text/plain".to_string();
        assert!(verify_envelope(&envelope, &keys).is_err());
    }

    #[test]
    fn mismatched_key_fails() {
        let signer = KeyPair::new(signing_key(1));
        let other = KeyPair::new(signing_key(2));
        let envelope = sign_envelope(&signer, IN_TOTO_PAYLOAD_TYPE, b"payload").unwrap();

        assert!(verify_envelope(&envelope, other.verifying_key()).is_err());
        assert!(verify_envelope(&envelope, signer.verifying_key()).is_ok());
    }

    #[test]
    fn unsigned_envelope_is_rejected() {
        let envelope = Envelope {
            payload_type: IN_TOTO_PAYLOAD_TYPE.to_string(),
            payload: encode_b64(b"{}"),
            signatures: Vec::new(),
        };
        let keys = KeyPair::new(signing_key(1));
        assert!(verify_envelope(&envelope, &keys).is_err());
    }
}
