use std::sync::Mutex;

use blind_rsa_signatures::{KeyPair, Options, PublicKey, Signature};
use log::error;

use crate::error::CoreError;

const MODULUS_BITS: usize = 2048;

/// RSA blind-signature primitive owned by the coordinator.
///
/// The coordinator signs opaque blinded payloads it cannot read
/// (`sign_blinded`) and later verifies signatures on the unblinded message
/// it still cannot connect back to the Alice that requested the blind
/// signature (`verify_unblinded`). That separation is the anonymity
/// boundary between Alice and Bob.
pub struct BlindSigner {
    keypair: KeyPair,
    options: Options,
    // rsa signing is not internally synchronized; one coordinator-wide
    // instance is shared across request handlers behind this lock.
    rng: Mutex<rand::rngs::ThreadRng>,
}

impl BlindSigner {
    /// Generate a fresh key pair. In production the key material would be
    /// loaded from disk across restarts; persistence is out of scope for
    /// the core, so this is the only constructor.
    pub fn generate() -> anyhow::Result<Self> {
        let keypair = KeyPair::generate(&mut rand::thread_rng(), MODULUS_BITS)
            .map_err(|e| anyhow::anyhow!("failed to generate blind-signing key pair: {e}"))?;

        Ok(BlindSigner {
            keypair,
            options: Options::default(),
            rng: Mutex::new(rand::thread_rng()),
        })
    }

    /// Raw RSA signing on an opaque blinded payload. Does not hash — the
    /// client has already prepared the blinded, hashed output script.
    pub fn sign_blinded(&self, blinded_message: &[u8]) -> Result<Vec<u8>, CoreError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| CoreError::Fatal("blind signer lock poisoned".into()))?;

        let blind_sig = self
            .keypair
            .sk
            .blind_sign(&mut *rng, blinded_message, &self.options)
            .map_err(|e| {
                error!("blind signing failed: {e}");
                CoreError::Fatal(format!("blind signing failed: {e}"))
            })?;

        Ok(blind_sig.to_vec())
    }

    /// Verify a (now-unblinded) signature against the plaintext output
    /// script the client intends to register as a Bob. Never panics: any
    /// malformed input simply fails verification.
    pub fn verify_unblinded(&self, message: &[u8], signature: &[u8]) -> bool {
        let sig = Signature::new(signature.to_vec());
        self.keypair
            .pk
            .verify(&sig, message, &self.options)
            .is_ok()
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.keypair.pk
    }
}
