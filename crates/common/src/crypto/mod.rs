//! Shared cryptographic primitives: the credential vault, webhook signatures
//! and random tokens.

pub mod random;
pub mod signature;
pub mod vault;

pub use random::random_token;
pub use signature::{
    derive_subkey, hmac_sha256, sign_base64, sign_hex, verify, InvalidHmacKey, SignatureEncoding,
};
pub use vault::{KdfParams, KeyRing, SealedBox, VaultError};
