//! Security engine for the Meiju cloud protocol.
//!
//! The cloud API authenticates every request with an HMAC-SHA256 signature
//! and protects sensitive response fields with AES. Four pieces make up the
//! protocol:
//!
//! 1. A per-account device id derived from the account name (MD5-based).
//! 2. Request signing: `HMAC-SHA256(hmac_key, iot_key || body || nonce)`.
//! 3. Two password encodings sent together in the login request: the
//!    "standard" SHA256 form salted with the login id and login key, and
//!    the IAM double-MD5 form. The same password always yields two
//!    different encodings; the server verifies each against its own store.
//! 4. AES decryption: the login response carries the session key wrapped
//!    with a fixed protocol key (ECB + PKCS#7); per-field secrets such as
//!    appliance serial numbers are decrypted with the unwrapped session key
//!    (ECB without an iv, CBC with one).

use hmac::{Hmac, Mac};
use md5::Md5;
use sha2::{Digest, Sha256};
use thiserror::Error;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyInit, KeyIvInit};
use aes::{Aes128, Aes256};

/// Key used to salt the standard (SHA256) password encoding.
pub const LOGIN_KEY: &str = "ad0ee21d48a64bf49f4fb583ab76e799";

/// Prefix mixed into the signing input ahead of the request body.
pub const IOT_KEY: &str = "prod_secret123@muc";

/// HMAC secret for request signatures.
pub const HMAC_KEY: &str = "PROD_VnoClJI9aikS8dyy";

/// Fixed AES-128 key that wraps the session key in the login response.
///
/// This is a protocol constant, not configuration: it is used exactly once
/// per login to unwrap `data.key` and never for any other field.
pub const SESSION_WRAP_KEY: &[u8; 16] = b"96c7acdfdb8af79a";

type HmacSha256 = Hmac<Sha256>;

type Aes128EcbDec = ecb::Decryptor<Aes128>;
type Aes256EcbDec = ecb::Decryptor<Aes256>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Error type for security engine operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Ciphertext is not a valid hex string.
    #[error("ciphertext is not valid hex")]
    InvalidHex,

    /// AES key length is not 16 or 32 bytes.
    #[error("unsupported AES key length: {0} bytes")]
    UnsupportedKeyLength(usize),

    /// IV is present but not one AES block long.
    #[error("invalid AES iv length")]
    InvalidIv,

    /// Ciphertext is truncated, corrupt, or carries bad PKCS#7 padding.
    #[error("decryption failed: corrupt ciphertext or padding")]
    Decrypt,

    /// Decrypted bytes are not valid UTF-8.
    #[error("decrypted data is not valid UTF-8")]
    NotUtf8,

    /// Field decryption was requested before a session key was installed.
    #[error("no decryption key available")]
    MissingKey,
}

/// Cryptographic state for one cloud session.
///
/// Holds the three configured protocol keys plus the AES session key
/// installed after a successful login. All operations are deterministic;
/// the only mutable state is the session key/iv pair.
#[derive(Clone)]
pub struct CloudSecurity {
    login_key: String,
    iot_key: String,
    hmac_key: String,
    session_key: Option<Vec<u8>>,
    session_iv: Option<Vec<u8>>,
}

impl CloudSecurity {
    /// Creates a security engine with explicit protocol keys.
    pub fn new(
        login_key: impl Into<String>,
        iot_key: impl Into<String>,
        hmac_key: impl Into<String>,
    ) -> Self {
        Self {
            login_key: login_key.into(),
            iot_key: iot_key.into(),
            hmac_key: hmac_key.into(),
            session_key: None,
            session_iv: None,
        }
    }

    /// Derives the stable device id for an account.
    ///
    /// The id is the first 16 hex characters of `md5("Hello, {account}!")`,
    /// so the same account always maps to the same device id across
    /// processes and hosts.
    ///
    /// # Example
    ///
    /// ```
    /// use meiju_core::crypto::CloudSecurity;
    ///
    /// let id = CloudSecurity::device_id("user@example.com");
    /// assert_eq!(id.len(), 16);
    /// assert_eq!(id, CloudSecurity::device_id("user@example.com"));
    /// ```
    pub fn device_id(account: &str) -> String {
        let digest = md5_hex(format!("Hello, {account}!").as_bytes());
        digest[..16].to_string()
    }

    /// Signs a serialized request body with the given nonce.
    ///
    /// The signature is `HMAC-SHA256(hmac_key, iot_key || body || nonce)`
    /// rendered as lowercase hex. Any change to the body, the nonce, or
    /// either key changes the output.
    pub fn sign(&self, body: &str, nonce: &str) -> String {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.hmac_key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(self.iot_key.as_bytes());
        mac.update(body.as_bytes());
        mac.update(nonce.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Encodes a password for the standard login field.
    ///
    /// `sha256(login_id || sha256_hex(password) || login_key)` as hex.
    /// One-way and deterministic; the login id salts the encoding so the
    /// same password encodes differently per account.
    pub fn encrypt_password(&self, login_id: &str, password: &str) -> String {
        let inner = sha256_hex(password.as_bytes());
        sha256_hex(format!("{login_id}{inner}{}", self.login_key).as_bytes())
    }

    /// Encodes a password for the IAM login field.
    ///
    /// `md5(md5_hex(password))` as hex. Deliberately a different algorithm
    /// from [`encrypt_password`](Self::encrypt_password); the two encodings
    /// are sent side by side and never compared to each other.
    pub fn encrypt_iam_password(&self, password: &str) -> String {
        md5_hex(md5_hex(password.as_bytes()).as_bytes())
    }

    /// Installs the AES session key (and optional iv) for field decryption.
    pub fn set_session_key(&mut self, key: impl Into<Vec<u8>>, iv: Option<Vec<u8>>) {
        self.session_key = Some(key.into());
        self.session_iv = iv;
    }

    /// Returns `true` once a session key has been installed.
    pub fn has_session_key(&self) -> bool {
        self.session_key.is_some()
    }

    /// Unwraps the session key delivered in a login response.
    ///
    /// The cloud sends the session key as hex ciphertext under the fixed
    /// [`SESSION_WRAP_KEY`] (AES-ECB + PKCS#7). Malformed hex, corrupt
    /// ciphertext, and bad padding all surface as a [`CryptoError`]; a
    /// garbage key is never silently accepted.
    pub fn unwrap_session_key(&self, hex_ciphertext: &str) -> Result<String, CryptoError> {
        self.decrypt_with(hex_ciphertext, SESSION_WRAP_KEY, None)
    }

    /// Decrypts a hex-encoded response field with the session key.
    ///
    /// ECB when no session iv is installed, CBC otherwise. Fails with
    /// [`CryptoError::MissingKey`] when no session key is available.
    pub fn decrypt_field(&self, hex_ciphertext: &str) -> Result<String, CryptoError> {
        let key = self.session_key.as_deref().ok_or(CryptoError::MissingKey)?;
        self.decrypt_with(hex_ciphertext, key, self.session_iv.as_deref())
    }

    /// Decrypts a hex-encoded field with an explicit key and optional iv.
    pub fn decrypt_with(
        &self,
        hex_ciphertext: &str,
        key: &[u8],
        iv: Option<&[u8]>,
    ) -> Result<String, CryptoError> {
        let ciphertext = hex::decode(hex_ciphertext).map_err(|_| CryptoError::InvalidHex)?;
        let plaintext = aes_decrypt(key, iv, &ciphertext)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::NotUtf8)
    }
}

impl Default for CloudSecurity {
    /// A security engine wired with the production protocol keys.
    fn default() -> Self {
        Self::new(LOGIN_KEY, IOT_KEY, HMAC_KEY)
    }
}

impl std::fmt::Debug for CloudSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSecurity")
            .field("session_key", &"[REDACTED]")
            .field("has_session_key", &self.has_session_key())
            .finish()
    }
}

/// AES decryption with PKCS#7 unpadding, dispatched on key length and mode.
fn aes_decrypt(key: &[u8], iv: Option<&[u8]>, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.is_empty() || data.len() % 16 != 0 {
        return Err(CryptoError::Decrypt);
    }
    if let Some(iv) = iv {
        if iv.len() != 16 {
            return Err(CryptoError::InvalidIv);
        }
    }

    match (key.len(), iv) {
        (16, None) => Aes128EcbDec::new_from_slice(key)
            .map_err(|_| CryptoError::UnsupportedKeyLength(key.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| CryptoError::Decrypt),
        (32, None) => Aes256EcbDec::new_from_slice(key)
            .map_err(|_| CryptoError::UnsupportedKeyLength(key.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| CryptoError::Decrypt),
        (16, Some(iv)) => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidIv)?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| CryptoError::Decrypt),
        (32, Some(iv)) => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidIv)?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| CryptoError::Decrypt),
        (n, _) => Err(CryptoError::UnsupportedKeyLength(n)),
    }
}

fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::BlockEncryptMut;

    type Aes128EcbEnc = ecb::Encryptor<Aes128>;
    type Aes128CbcEnc = cbc::Encryptor<Aes128>;

    fn ecb_encrypt_hex(key: &[u8], plaintext: &[u8]) -> String {
        let ct = Aes128EcbEnc::new_from_slice(key)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        hex::encode(ct)
    }

    fn cbc_encrypt_hex(key: &[u8], iv: &[u8], plaintext: &[u8]) -> String {
        let ct = Aes128CbcEnc::new_from_slices(key, iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        hex::encode(ct)
    }

    #[test]
    fn test_device_id_known_value() {
        assert_eq!(
            CloudSecurity::device_id("test@example.com"),
            "366d15365135c3a6"
        );
    }

    #[test]
    fn test_device_id_stable_and_distinct() {
        let a = CloudSecurity::device_id("alice");
        let b = CloudSecurity::device_id("bob");
        assert_eq!(a.len(), 16);
        assert_eq!(a, CloudSecurity::device_id("alice"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_sign_known_value() {
        let security = CloudSecurity::default();
        assert_eq!(
            security.sign(r#"{"a":1}"#, "1700000000"),
            "e74af869374d06edbd54360323b39dcd0ad6f5f246211f8c200d940d7e9b3520"
        );
    }

    #[test]
    fn test_sign_sensitive_to_body_and_nonce() {
        let security = CloudSecurity::default();
        let base = security.sign(r#"{"a":1}"#, "1700000000");
        assert_eq!(base, security.sign(r#"{"a":1}"#, "1700000000"));
        assert_ne!(base, security.sign(r#"{"a":2}"#, "1700000000"));
        assert_ne!(base, security.sign(r#"{"a":1}"#, "1700000001"));

        let other_keys = CloudSecurity::new(LOGIN_KEY, "other-iot-key", HMAC_KEY);
        assert_ne!(base, other_keys.sign(r#"{"a":1}"#, "1700000000"));
    }

    #[test]
    fn test_encrypt_password_known_value() {
        let security = CloudSecurity::default();
        assert_eq!(
            security.encrypt_password("abc123", "secret"),
            "effe23ebee5f83d838d387f4796f7a96d1b95bfb0f249f7cc89f5ccc17591a23"
        );
    }

    #[test]
    fn test_encrypt_iam_password_known_value() {
        let security = CloudSecurity::default();
        assert_eq!(
            security.encrypt_iam_password("secret"),
            "7022cd14c42ff272619d6beacdc9ffde"
        );
    }

    #[test]
    fn test_password_encodings_distinct() {
        let security = CloudSecurity::default();
        let standard = security.encrypt_password("login-id", "hunter2");
        let iam = security.encrypt_iam_password("hunter2");
        assert_ne!(standard, iam);
        // Small input changes must change both encodings.
        assert_ne!(standard, security.encrypt_password("login-id", "hunter3"));
        assert_ne!(iam, security.encrypt_iam_password("hunter3"));
    }

    #[test]
    fn test_unwrap_session_key_roundtrip() {
        let security = CloudSecurity::default();
        let wrapped = ecb_encrypt_hex(SESSION_WRAP_KEY, b"0123456789abcdef");
        assert_eq!(
            security.unwrap_session_key(&wrapped).unwrap(),
            "0123456789abcdef"
        );
    }

    #[test]
    fn test_unwrap_session_key_rejects_bad_hex() {
        let security = CloudSecurity::default();
        assert_eq!(
            security.unwrap_session_key("zz not hex"),
            Err(CryptoError::InvalidHex)
        );
    }

    #[test]
    fn test_unwrap_session_key_rejects_truncated_ciphertext() {
        let security = CloudSecurity::default();
        // 15 bytes: not a whole AES block.
        let truncated = hex::encode([0u8; 15]);
        assert_eq!(
            security.unwrap_session_key(&truncated),
            Err(CryptoError::Decrypt)
        );
    }

    #[test]
    fn test_unwrap_session_key_rejects_corrupt_padding() {
        let security = CloudSecurity::default();
        // Dropping the final (all-padding) block leaves 'f' (0x66) as the
        // trailing byte, which is never a valid PKCS#7 padding value.
        let wrapped = ecb_encrypt_hex(SESSION_WRAP_KEY, b"0123456789abcdef");
        let corrupt = &wrapped[..32];
        assert_eq!(
            security.unwrap_session_key(corrupt),
            Err(CryptoError::Decrypt)
        );
    }

    #[test]
    fn test_decrypt_field_ecb_roundtrip() {
        let mut security = CloudSecurity::default();
        security.set_session_key(b"0123456789abcdef".to_vec(), None);
        let ct = ecb_encrypt_hex(b"0123456789abcdef", b"SN1234567890");
        assert_eq!(security.decrypt_field(&ct).unwrap(), "SN1234567890");
    }

    #[test]
    fn test_decrypt_field_cbc_roundtrip() {
        let key = b"0123456789abcdef";
        let iv = b"fedcba9876543210";
        let mut security = CloudSecurity::default();
        security.set_session_key(key.to_vec(), Some(iv.to_vec()));
        let ct = cbc_encrypt_hex(key, iv, b"chained mode payload");
        assert_eq!(security.decrypt_field(&ct).unwrap(), "chained mode payload");
    }

    #[test]
    fn test_decrypt_with_explicit_key_and_iv() {
        let security = CloudSecurity::default();
        let key = b"0123456789abcdef";
        let iv = b"fedcba9876543210";
        let ct = cbc_encrypt_hex(key, iv, b"explicit");
        assert_eq!(security.decrypt_with(&ct, key, Some(iv)).unwrap(), "explicit");
        // Wrong iv must not decrypt to the original plaintext.
        assert_ne!(
            security.decrypt_with(&ct, key, Some(b"0000000000000000")).ok(),
            Some("explicit".to_string())
        );
    }

    #[test]
    fn test_decrypt_field_without_key_fails() {
        let security = CloudSecurity::default();
        let ct = ecb_encrypt_hex(b"0123456789abcdef", b"data");
        assert_eq!(security.decrypt_field(&ct), Err(CryptoError::MissingKey));
    }

    #[test]
    fn test_decrypt_rejects_unsupported_key_length() {
        let security = CloudSecurity::default();
        let ct = ecb_encrypt_hex(b"0123456789abcdef", b"data");
        assert_eq!(
            security.decrypt_with(&ct, b"short", None),
            Err(CryptoError::UnsupportedKeyLength(5))
        );
    }

    #[test]
    fn test_debug_redacts_session_key() {
        let mut security = CloudSecurity::default();
        security.set_session_key(b"super-secret-key".to_vec(), None);
        let debug = format!("{:?}", security);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret-key"));
    }
}
