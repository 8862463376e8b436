//! Keys, DSSE envelopes, and signed manifest bundles.

mod archive;
mod bundle;
mod dsse;
pub(crate) mod keys;

pub use archive::{pack_manifest, unpack_yamls};
pub use bundle::{
    decode_message, sha256_hex, sign_manifest, SignedBundle, MESSAGE_ANNOTATION,
    SIGNATURE_ANNOTATION,
};
pub use dsse::{
    pae, sign_envelope, verify_envelope, Envelope, EnvelopeSignature, Signer, Verifier,
    IN_TOTO_PAYLOAD_TYPE,
};
pub use keys::{
    decrypt_signing_key, decode_b64, encode_b64, load_verifying_key, parse_verifying_key,
    KeyPair, KeySource, COSIGN_PEM_TYPE, SIGSTORE_PEM_TYPE,
};
