use ed25519_dalek::{ed25519::{self, signature::Signer}, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest as ShaDigest, Sha512};

use super::error::MutexError;

pub type Digest = [u8; 64];

/// Anything that travels between nodes and needs a signature over its content.
pub trait Hashable {
    fn hash(&self) -> Digest;
}

/// Signing identity of a single node. Neighbors learn the public half at
/// bootstrap and use it to authenticate every envelope on the shared link.
pub struct Keypair {
    pubkey: Pubkey,
    dalek_signer: SigningKey,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Pubkey {
    pub key: [u8; 32],
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Signature {
    pub signer: Pubkey,
    pub sig: [u8; 64],
}

impl Keypair {
    pub fn new_pair() -> Self {
        let mut csprng = OsRng;
        Self::from_signing_key(SigningKey::generate(&mut csprng))
    }

    /// Deterministic keypair for tests.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    fn from_signing_key(dalek_signer: SigningKey) -> Self {
        let pubkey = Pubkey::from(&dalek_signer.verifying_key().to_bytes());
        Keypair {
            pubkey,
            dalek_signer,
        }
    }

    pub fn sign(&self, digest: &Digest) -> Signature {
        let sig = self.dalek_signer.sign(digest).to_bytes();

        Signature {
            signer: self.pubkey,
            sig,
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.pubkey
    }
}

impl AsRef<[u8]> for Pubkey {
    fn as_ref(&self) -> &[u8] {
        &self.key
    }
}

impl From<&[u8; 32]> for Pubkey {
    fn from(bytes: &[u8; 32]) -> Self {
        Pubkey { key: *bytes }
    }
}

impl Signature {
    /// Checks the signature against `expected`, the key the receiver already
    /// trusts for this sender. The embedded signer is only a hint.
    pub fn verify(&self, expected: &Pubkey, digest: &Digest) -> Result<(), MutexError> {
        if &self.signer != expected {
            return Err(MutexError::BadSignature("unexpected signer".to_string()));
        }
        let dalek_sig = ed25519::Signature::from_bytes(&self.sig);
        let dalek_pubkey = VerifyingKey::from_bytes(&expected.key)
            .map_err(|e| MutexError::BadSignature(e.to_string()))?;
        dalek_pubkey
            .verify_strict(digest, &dalek_sig)
            .map_err(|e| MutexError::BadSignature(e.to_string()))
    }
}

/// Sha512 over a sequence of byte chunks.
pub fn digest_of<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Digest {
    let mut hasher = Sha512::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    let result = hasher.finalize();
    let mut digest = [0u8; 64];
    digest.copy_from_slice(&result[..]);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = Keypair::new_pair();
        let digest: Digest = [4; 64];
        let signature = keypair.sign(&digest);

        assert_eq!(signature.signer, keypair.pubkey());
        assert!(signature.verify(&keypair.pubkey(), &digest).is_ok());
    }

    #[test]
    fn test_verify_rejects_other_key_and_tampered_digest() {
        let keypair = Keypair::from_seed([1u8; 32]);
        let other = Keypair::from_seed([2u8; 32]);
        let digest = digest_of([b"grant".as_slice()]);
        let signature = keypair.sign(&digest);

        assert!(signature.verify(&other.pubkey(), &digest).is_err());

        let tampered = digest_of([b"request".as_slice()]);
        assert!(signature.verify(&keypair.pubkey(), &tampered).is_err());
    }

    #[test]
    fn test_seeded_keypairs_are_stable() {
        let a = Keypair::from_seed([9u8; 32]);
        let b = Keypair::from_seed([9u8; 32]);
        assert_eq!(a.pubkey(), b.pubkey());
    }
}
