//! Cryptographic envelope for mesh messages
//!
//! One engine per node, bound to the shared 32-byte network key plus
//! per-instance Ed25519 signing and X25519 exchange keypairs. Every mesh
//! message travels as `nonce(12) ‖ ciphertext ‖ tag(16)` under AES-256-GCM.
//!
//! Key material is exposed through accessors; persisting it (and the
//! network key rotation that makes timestamp+counter nonces safe across
//! restarts) is the embedding host's job.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::constants::{NONCE_LEN, TAG_LEN, TOKEN_SIGNATURE_LEN};
use crate::error::{CryptoError, Result};

/// Context string for deriving session keys from the X25519 shared secret.
const KEY_DERIVATION_INFO: &[u8] = b"SABER-PROTOCOL-KEY";

/// Length of the fixed token trailer: u64 timestamp plus u64 expiry.
const TOKEN_TIMES_LEN: usize = 16;

/// Per-node cryptographic engine.
pub struct MeshCrypto {
    /// Shared across the mesh; every envelope is sealed under it.
    network_key: [u8; 32],
    signing_key: SigningKey,
    exchange_secret: StaticSecret,
    exchange_public: X25519PublicKey,
    /// Known signing keys of other nodes.
    known_public_keys: HashMap<String, VerifyingKey>,
    /// Monotone within this instance; combined with the timestamp to build
    /// unique nonces.
    nonce_counter: u64,
}

impl MeshCrypto {
    /// Fresh engine with a random network key and new keypairs.
    pub fn new() -> Self {
        let mut network_key = [0u8; 32];
        OsRng.fill_bytes(&mut network_key);
        Self::with_network_key(network_key)
    }

    /// Engine joined to an existing mesh via its shared network key.
    pub fn with_network_key(network_key: [u8; 32]) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let exchange_secret = StaticSecret::random_from_rng(OsRng);
        let exchange_public = X25519PublicKey::from(&exchange_secret);

        Self {
            network_key,
            signing_key,
            exchange_secret,
            exchange_public,
            known_public_keys: HashMap::new(),
            nonce_counter: 0,
        }
    }

    fn current_timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Unique nonce: 8 bytes of current-ms timestamp plus 4 bytes of the
    /// pre-incremented counter. Two calls within the same millisecond
    /// differ in the counter half.
    fn generate_nonce(&mut self) -> [u8; NONCE_LEN] {
        self.nonce_counter = self.nonce_counter.wrapping_add(1);
        let timestamp = Self::current_timestamp_ms();

        let mut nonce = [0u8; NONCE_LEN];
        nonce[..8].copy_from_slice(&timestamp.to_le_bytes());
        nonce[8..].copy_from_slice(&(self.nonce_counter as u32).to_le_bytes());
        nonce
    }

    /// Seal a payload: `nonce(12) ‖ ciphertext ‖ tag(16)` under the
    /// network key.
    pub fn encrypt(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let key = Key::<Aes256Gcm>::from_slice(&self.network_key);
        let cipher = Aes256Gcm::new(key);

        let nonce_bytes = self.generate_nonce();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, payload)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a sealed payload, verifying the authentication tag.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decryption(format!(
                "envelope too short: {} bytes",
                sealed.len()
            ))
            .into());
        }

        let key = Key::<Aes256Gcm>::from_slice(&self.network_key);
        let cipher = Aes256Gcm::new(key);

        let nonce = Nonce::from_slice(&sealed[..NONCE_LEN]);
        cipher
            .decrypt(nonce, &sealed[NONCE_LEN..])
            .map_err(|e| CryptoError::Decryption(e.to_string()).into())
    }

    /// Detached Ed25519 signature over `message`.
    pub fn sign(&self, message: &[u8]) -> [u8; TOKEN_SIGNATURE_LEN] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Verify `signature` over `message` against a known node's key.
    ///
    /// Returns `Ok(false)` for a well-formed but wrong signature; unknown
    /// signers and malformed signatures are `Verification` errors.
    pub fn verify(&self, node_id: &str, message: &[u8], signature: &[u8]) -> Result<bool> {
        let public_key = self
            .known_public_keys
            .get(node_id)
            .ok_or_else(|| CryptoError::Verification(format!("unknown node: {node_id}")))?;

        let signature = Signature::from_slice(signature)
            .map_err(|e| CryptoError::Verification(e.to_string()))?;

        Ok(public_key.verify(message, &signature).is_ok())
    }

    /// Learn another node's signing key.
    pub fn register_node_key(&mut self, node_id: &str, public_key: &[u8]) -> Result<()> {
        let bytes: [u8; 32] = public_key
            .try_into()
            .map_err(|_| CryptoError::Verification("public key must be 32 bytes".into()))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| CryptoError::Verification(e.to_string()))?;

        self.known_public_keys.insert(node_id.to_string(), key);
        Ok(())
    }

    /// SHA-256 digest.
    pub fn hash(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    /// X25519 agreement with a peer's public key, then HKDF-SHA256 into a
    /// 32-byte session key.
    pub fn key_exchange(&self, peer_public: &[u8]) -> Result<[u8; 32]> {
        let peer_bytes: [u8; 32] = peer_public
            .try_into()
            .map_err(|_| CryptoError::KeyExchange("peer public key must be 32 bytes".into()))?;

        let peer_key = X25519PublicKey::from(peer_bytes);
        let shared_secret = self.exchange_secret.diffie_hellman(&peer_key);

        let hkdf = Hkdf::<Sha256>::new(None, shared_secret.as_bytes());
        let mut derived = [0u8; 32];
        hkdf.expand(KEY_DERIVATION_INFO, &mut derived)
            .map_err(|e| CryptoError::KeyExchange(e.to_string()))?;

        Ok(derived)
    }

    /// Our Ed25519 verifying key, to hand to peers.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Our X25519 public key, to hand to peers.
    pub fn exchange_public_key(&self) -> [u8; 32] {
        self.exchange_public.to_bytes()
    }

    /// The shared network key, for the collaborator that persists or
    /// rotates it.
    pub fn network_key(&self) -> &[u8; 32] {
        &self.network_key
    }

    /// Issue a sealed token binding `node_id` to an expiry `ttl_seconds`
    /// from now: `node_id ‖ timestamp ‖ expiry ‖ signature`, AEAD-sealed.
    pub fn generate_security_token(&mut self, node_id: &str, ttl_seconds: u64) -> Result<Vec<u8>> {
        let timestamp = Self::current_timestamp_ms();
        let expiry = timestamp + ttl_seconds * 1000;

        let mut token = Vec::with_capacity(node_id.len() + TOKEN_TIMES_LEN + TOKEN_SIGNATURE_LEN);
        token.extend_from_slice(node_id.as_bytes());
        token.extend_from_slice(&timestamp.to_le_bytes());
        token.extend_from_slice(&expiry.to_le_bytes());

        let signature = self.sign(&token);
        token.extend_from_slice(&signature);

        self.encrypt(&token)
    }

    /// Open and validate a security token, returning the node id and
    /// expiry. The signer must be registered and the expiry in the future.
    pub fn verify_security_token(&self, token: &[u8]) -> Result<(String, u64)> {
        let plaintext = self.decrypt(token)?;

        if plaintext.len() < TOKEN_TIMES_LEN + TOKEN_SIGNATURE_LEN {
            return Err(CryptoError::Verification("token too short".into()).into());
        }

        let (payload, signature) = plaintext.split_at(plaintext.len() - TOKEN_SIGNATURE_LEN);

        let node_id_len = payload.len() - TOKEN_TIMES_LEN;
        let node_id = String::from_utf8_lossy(&payload[..node_id_len]).into_owned();

        let mut expiry_bytes = [0u8; 8];
        expiry_bytes.copy_from_slice(&payload[node_id_len + 8..]);
        let expiry = u64::from_le_bytes(expiry_bytes);

        if Self::current_timestamp_ms() >= expiry {
            return Err(CryptoError::Verification("token expired".into()).into());
        }

        if !self.verify(&node_id, payload, signature)? {
            return Err(CryptoError::Verification("invalid token signature".into()).into());
        }

        Ok((node_id, expiry))
    }
}

impl Default for MeshCrypto {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let mut crypto = MeshCrypto::new();
        let payload = b"timestamped audio frame";

        let sealed = crypto.encrypt(payload).unwrap();
        assert!(sealed.len() >= payload.len() + NONCE_LEN + TAG_LEN);

        let opened = crypto.decrypt(&sealed).unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn test_nonces_never_repeat() {
        let mut crypto = MeshCrypto::new();
        let a = crypto.encrypt(b"same payload").unwrap();
        let b = crypto.encrypt(b"same payload").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_bit_flip_fails_decryption() {
        let mut crypto = MeshCrypto::new();
        let sealed = crypto.encrypt(b"integrity matters").unwrap();

        for i in [NONCE_LEN, sealed.len() / 2, sealed.len() - 1] {
            let mut tampered = sealed.clone();
            tampered[i] ^= 0x01;
            assert!(matches!(
                crypto.decrypt(&tampered),
                Err(Error::Crypto(CryptoError::Decryption(_)))
            ));
        }

        // Untampered still opens
        let opened = crypto.decrypt(&sealed).unwrap();
        assert_eq!(opened, b"integrity matters");
    }

    #[test]
    fn test_short_envelope_rejected() {
        let crypto = MeshCrypto::new();
        assert!(matches!(
            crypto.decrypt(&[0u8; 27]),
            Err(Error::Crypto(CryptoError::Decryption(_)))
        ));
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = MeshCrypto::new();
        let message = b"mesh control message";
        let signature = signer.sign(message);

        let mut verifier = MeshCrypto::new();
        verifier
            .register_node_key("peer", &signer.public_key())
            .unwrap();

        assert!(verifier.verify("peer", message, &signature).unwrap());
        assert!(!verifier.verify("peer", b"different message", &signature).unwrap());
    }

    #[test]
    fn test_verify_unknown_node_errors() {
        let crypto = MeshCrypto::new();
        let signature = crypto.sign(b"m");
        assert!(matches!(
            crypto.verify("stranger", b"m", &signature),
            Err(Error::Crypto(CryptoError::Verification(_)))
        ));
    }

    #[test]
    fn test_malformed_key_rejected() {
        let mut crypto = MeshCrypto::new();
        assert!(crypto.register_node_key("p", &[0u8; 31]).is_err());
    }

    #[test]
    fn test_key_exchange_is_symmetric() {
        let alice = MeshCrypto::new();
        let bob = MeshCrypto::new();

        let shared_a = alice.key_exchange(&bob.exchange_public_key()).unwrap();
        let shared_b = bob.key_exchange(&alice.exchange_public_key()).unwrap();
        assert_eq!(shared_a, shared_b);

        assert!(alice.key_exchange(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_hash() {
        let crypto = MeshCrypto::new();
        let digest = crypto.hash(b"abc");
        // SHA-256("abc"), first bytes
        assert_eq!(&digest[..4], &[0xba, 0x78, 0x16, 0xbf]);
    }

    #[test]
    fn test_security_token_round_trip() {
        let mut issuer = MeshCrypto::new();
        let network_key = *issuer.network_key();

        let mut verifier = MeshCrypto::with_network_key(network_key);
        verifier
            .register_node_key("sink-7", &issuer.public_key())
            .unwrap();

        let token = issuer.generate_security_token("sink-7", 60).unwrap();
        let (node_id, expiry) = verifier.verify_security_token(&token).unwrap();

        assert_eq!(node_id, "sink-7");
        assert!(expiry > MeshCrypto::current_timestamp_ms());
    }

    #[test]
    fn test_security_token_expires() {
        let mut issuer = MeshCrypto::new();
        let network_key = *issuer.network_key();

        let mut verifier = MeshCrypto::with_network_key(network_key);
        verifier
            .register_node_key("sink-7", &issuer.public_key())
            .unwrap();

        let token = issuer.generate_security_token("sink-7", 1).unwrap();
        assert!(verifier.verify_security_token(&token).is_ok());

        thread::sleep(Duration::from_millis(1100));
        assert!(matches!(
            verifier.verify_security_token(&token),
            Err(Error::Crypto(CryptoError::Verification(_)))
        ));
    }

    #[test]
    fn test_token_from_unknown_signer_rejected() {
        let mut issuer = MeshCrypto::new();
        let verifier = MeshCrypto::with_network_key(*issuer.network_key());

        let token = issuer.generate_security_token("sink-7", 60).unwrap();
        assert!(matches!(
            verifier.verify_security_token(&token),
            Err(Error::Crypto(CryptoError::Verification(_)))
        ));
    }
}
