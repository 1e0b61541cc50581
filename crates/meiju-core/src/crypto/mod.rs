//! Cryptographic primitives for the Meiju cloud protocol.
//!
//! Everything the cloud exchange needs lives in [`cloud`]: device-id
//! derivation, request signing, the two password encodings used by the
//! login endpoint, and AES decryption of session keys and per-field
//! secrets.

pub mod cloud;

pub use cloud::{CloudSecurity, CryptoError};
