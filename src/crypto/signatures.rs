use crate::crypto::hash::Hash256;
use crate::crypto::keys::{Address, PrivateKey, PublicKey};
use crate::{LedgerError, Result};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of the serialized form: r, s and the recovery id.
pub const SIGNATURE_LENGTH: usize = 65;

/// Recoverable ECDSA signature over a 32-byte digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Signature {
    r: [u8; 32],
    s: [u8; 32],
    recovery_id: u8,
}

impl Signature {
    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        *self == Self::null()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(LedgerError::Crypto("Invalid signature length".to_string()));
        }

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];

        r.copy_from_slice(&bytes[0..32]);
        s.copy_from_slice(&bytes[32..64]);

        Ok(Self {
            r,
            s,
            recovery_id: bytes[64],
        })
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Self::from_bytes(&hex::decode(hex_str)?)
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LENGTH] {
        let mut bytes = [0u8; SIGNATURE_LENGTH];
        bytes[0..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        bytes[64] = self.recovery_id;
        bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn to_compact(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[0..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        bytes
    }

    pub fn recovery_id(&self) -> u8 {
        self.recovery_id
    }

    fn from_recoverable(signature: &RecoverableSignature) -> Self {
        let (recovery_id, compact) = signature.serialize_compact();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[0..32]);
        s.copy_from_slice(&compact[32..64]);

        Self {
            r,
            s,
            recovery_id: recovery_id.to_i32() as u8,
        }
    }

    fn to_recoverable(&self) -> Result<RecoverableSignature> {
        let recovery_id = RecoveryId::from_i32(self.recovery_id as i32)
            .map_err(|e| LedgerError::Crypto(format!("Invalid recovery ID: {}", e)))?;

        RecoverableSignature::from_compact(&self.to_compact(), recovery_id)
            .map_err(|e| LedgerError::Crypto(format!("Invalid recoverable signature: {}", e)))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

fn message(digest: &Hash256) -> Result<Message> {
    Message::from_digest_slice(digest.as_bytes())
        .map_err(|e| LedgerError::Crypto(format!("Invalid message: {}", e)))
}

// Signature creation and verification utilities
pub struct SignatureUtils;

impl SignatureUtils {
    pub fn sign(private_key: &PrivateKey, digest: &Hash256) -> Result<Signature> {
        let secp = Secp256k1::signing_only();
        let signature = secp.sign_ecdsa_recoverable(&message(digest)?, private_key.secret());
        Ok(Signature::from_recoverable(&signature))
    }

    pub fn recover_public_key(digest: &Hash256, signature: &Signature) -> Result<PublicKey> {
        let secp = Secp256k1::verification_only();
        let recovered = secp
            .recover_ecdsa(&message(digest)?, &signature.to_recoverable()?)
            .map_err(|e| LedgerError::Crypto(format!("Failed to recover public key: {}", e)))?;

        Ok(PublicKey::from_secp256k1(&recovered))
    }

    /// Checks that `signature` over `digest` was produced by `public_key`.
    pub fn verify_public_key(public_key: &PublicKey, digest: &Hash256, signature: &Signature) -> Result<()> {
        let recovered = Self::recover_public_key(digest, signature)?;
        if &recovered != public_key {
            return Err(LedgerError::InvalidSignature);
        }

        // Recovery alone accepts high-s forms; the standard check does not
        let secp = Secp256k1::verification_only();
        let standard = signature.to_recoverable()?.to_standard();
        let key = secp256k1::PublicKey::from_slice(public_key.to_bytes())
            .map_err(|e| LedgerError::Crypto(format!("Invalid public key: {}", e)))?;
        secp.verify_ecdsa(&message(digest)?, &standard, &key)
            .map_err(|_| LedgerError::InvalidSignature)
    }

    /// Checks that `signature` over `digest` was produced by the owner of `address`.
    pub fn verify_address(address: &Address, digest: &Hash256, signature: &Signature) -> Result<()> {
        let recovered = Self::recover_public_key(digest, signature)?;
        if recovered.to_address() != *address {
            return Err(LedgerError::InvalidSignature);
        }
        Self::verify_public_key(&recovered, digest, signature)
    }
}

impl PrivateKey {
    pub fn sign(&self, digest: &Hash256) -> Result<Signature> {
        SignatureUtils::sign(self, digest)
    }
}

impl PublicKey {
    pub fn verify(&self, digest: &Hash256, signature: &Signature) -> Result<bool> {
        match SignatureUtils::verify_public_key(self, digest, signature) {
            Ok(()) => Ok(true),
            Err(LedgerError::InvalidSignature) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
