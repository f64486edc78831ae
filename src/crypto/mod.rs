//! Key exchange primitives and the symmetric stream ciphers.
//!
//! During login the relay impersonates the real server: it hands the client
//! its own RSA public key, recovers the shared secret the client encrypted
//! for it, and re-wraps that secret under the real server's key. Once both
//! sides have agreed, every byte on both sockets is AES-128-CFB8 encrypted
//! with the secret as both key and IV, per the proxied protocol.
//!
//! All asymmetric operations here are stateless per call; no cipher object
//! is reused across operations.

use std::fmt;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use crate::error::{RelayError, Result};

type Aes128Cfb8Enc = cfb8::Encryptor<aes::Aes128>;
type Aes128Cfb8Dec = cfb8::Decryptor<aes::Aes128>;

/// RSA modulus size used for the relay's own keypair, matching what the
/// proxied servers deploy.
pub const KEY_BITS: usize = 1024;

/// Length of the negotiated AES secret in bytes.
pub const SECRET_LEN: usize = 16;

/// The relay's long-lived RSA keypair, presented to clients in place of the
/// real server's key.
pub struct ProxyKeyPair {
    private: RsaPrivateKey,
    public_der: Vec<u8>,
}

impl ProxyKeyPair {
    /// Generate a fresh keypair.
    ///
    /// Failure here means the crypto provider itself is unusable and the
    /// process should not continue.
    pub fn generate() -> Result<Self> {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, KEY_BITS)
            .map_err(|e| RelayError::CryptoConfiguration(format!("RSA key generation: {e}")))?;
        let public_der = RsaPublicKey::from(&private)
            .to_public_key_der()
            .map_err(|e| RelayError::CryptoConfiguration(format!("SPKI encoding: {e}")))?
            .as_bytes()
            .to_vec();

        Ok(Self {
            private,
            public_der,
        })
    }

    /// The public half, DER-encoded (SubjectPublicKeyInfo) as it appears on
    /// the wire.
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_der
    }

    /// Recover material the client encrypted for the relay.
    ///
    /// A decryption failure means the client encrypted for some other key;
    /// that is a protocol violation, fatal to the session.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.private
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map(Zeroizing::new)
            .map_err(|e| RelayError::Encryption(format!("RSA decrypt: {e}")))
    }
}

impl fmt::Debug for ProxyKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyKeyPair")
            .field("public_der", &format_args!("[{} bytes]", self.public_der.len()))
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// Captured key material from the real server's encryption request. Lives
/// only for the login sub-phase and is consumed when the symmetric ciphers
/// are installed.
pub struct KeyExchangeContext {
    /// Server id string from the encryption request.
    pub server_id: String,
    server_public_key: RsaPublicKey,
    server_public_der: Vec<u8>,
}

impl KeyExchangeContext {
    /// Parse the server's DER-encoded public key as captured off the wire.
    pub fn new(server_id: String, server_public_der: &[u8]) -> Result<Self> {
        let server_public_key = RsaPublicKey::from_public_key_der(server_public_der)
            .map_err(|e| RelayError::Encryption(format!("server public key: {e}")))?;

        Ok(Self {
            server_id,
            server_public_key,
            server_public_der: server_public_der.to_vec(),
        })
    }

    /// The server's public key bytes as received.
    pub fn server_public_der(&self) -> &[u8] {
        &self.server_public_der
    }

    /// Re-wrap material under the real server's public key for forwarding.
    pub fn encrypt_for_server(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.server_public_key
            .encrypt(&mut rand::rngs::OsRng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| RelayError::Encryption(format!("RSA encrypt: {e}")))
    }
}

impl fmt::Debug for KeyExchangeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyExchangeContext")
            .field("server_id", &self.server_id)
            .field(
                "server_public_der",
                &format_args!("[{} bytes]", self.server_public_der.len()),
            )
            .finish()
    }
}

/// Validate a decrypted secret's length and fix its size.
pub fn secret_from_bytes(bytes: &[u8]) -> Result<[u8; SECRET_LEN]> {
    bytes.try_into().map_err(|_| {
        RelayError::Encryption(format!(
            "shared secret is {} bytes, expected {SECRET_LEN}",
            bytes.len()
        ))
    })
}

/// Incremental AES-128-CFB8 decryption of an inbound byte stream.
pub struct StreamDecryptor(Aes128Cfb8Dec);

impl StreamDecryptor {
    /// Key and IV are both the shared secret, per the proxied protocol.
    pub fn new(secret: &[u8; SECRET_LEN]) -> Self {
        Self(Aes128Cfb8Dec::new(secret.into(), secret.into()))
    }

    /// Decrypt in place, continuing the stream from the previous call.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data {
            self.0
                .decrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(byte)));
        }
    }
}

/// Incremental AES-128-CFB8 encryption of an outbound byte stream.
pub struct StreamEncryptor(Aes128Cfb8Enc);

impl StreamEncryptor {
    /// Key and IV are both the shared secret, per the proxied protocol.
    pub fn new(secret: &[u8; SECRET_LEN]) -> Self {
        Self(Aes128Cfb8Enc::new(secret.into(), secret.into()))
    }

    /// Encrypt in place, continuing the stream from the previous call.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data {
            self.0
                .encrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(byte)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: [u8; SECRET_LEN] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
        0x0F,
    ];

    #[test]
    fn test_cfb8_roundtrip_across_chunks() {
        let plaintext = b"frames cross chunk boundaries arbitrarily".to_vec();

        let mut encryptor = StreamEncryptor::new(&SECRET);
        let mut ciphertext = plaintext.clone();
        // encrypt in uneven chunks to exercise the streaming state
        let (a, b) = ciphertext.split_at_mut(7);
        encryptor.encrypt(a);
        encryptor.encrypt(b);

        assert_ne!(ciphertext, plaintext);

        let mut decryptor = StreamDecryptor::new(&SECRET);
        let (a, b) = ciphertext.split_at_mut(19);
        decryptor.decrypt(a);
        decryptor.decrypt(b);

        assert_eq!(ciphertext, plaintext);
    }

    #[test]
    fn test_rsa_wrap_unwrap() {
        let keys = ProxyKeyPair::generate().unwrap();

        // a peer holding only the DER key can encrypt for us
        let peer = KeyExchangeContext::new(String::new(), keys.public_key_der()).unwrap();
        let wrapped = peer.encrypt_for_server(&SECRET).unwrap();
        assert_eq!(wrapped.len(), KEY_BITS / 8);

        let unwrapped = keys.decrypt(&wrapped).unwrap();
        assert_eq!(&unwrapped[..], &SECRET[..]);
    }

    #[test]
    fn test_decrypt_rejects_foreign_ciphertext() {
        let ours = ProxyKeyPair::generate().unwrap();
        let theirs = ProxyKeyPair::generate().unwrap();

        let ctx = KeyExchangeContext::new(String::new(), theirs.public_key_der()).unwrap();
        let wrapped = ctx.encrypt_for_server(&SECRET).unwrap();

        let err = ours.decrypt(&wrapped).unwrap_err();
        assert!(matches!(err, RelayError::Encryption(_)));
    }

    #[test]
    fn test_secret_length_enforced() {
        assert!(secret_from_bytes(&[0u8; 16]).is_ok());
        assert!(matches!(
            secret_from_bytes(&[0u8; 15]),
            Err(RelayError::Encryption(_))
        ));
    }
}
