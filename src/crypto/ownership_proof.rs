use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{ecdsa, Message, PublicKey, Secp256k1};
use bitcoin::ScriptBuf;

/// Proof that the requester controls the private key behind a P2WPKH
/// output: a plain ECDSA signature, by that output's public key, over the
/// session-binding message (the Alice's `blinded_output_hex`).
#[derive(Debug, Clone)]
pub struct OwnershipProof {
    pub pubkey: PublicKey,
    pub signature: ecdsa::Signature,
}

/// `true` iff `proof` is a valid signature by `pubkey` over `message`, and
/// `pubkey` actually hashes to the pubkey-hash committed in `script`
/// (a native SegWit v0 P2WPKH scriptPubKey: `OP_0 <20-byte-hash>`).
pub fn verify_ownership_proof(script: &ScriptBuf, message: &[u8], proof: &OwnershipProof) -> bool {
    let btc_pubkey = bitcoin::PublicKey::new(proof.pubkey);
    let Some(wpubkey_hash) = btc_pubkey.wpubkey_hash() else {
        return false;
    };
    let expected_script = ScriptBuf::new_v0_p2wpkh(&wpubkey_hash);
    if &expected_script != script {
        return false;
    }

    let digest = sha256::Hash::hash(message);
    let Ok(msg) = Message::from_digest_slice(digest.as_ref()) else {
        return false;
    };

    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(&msg, &proof.signature, &proof.pubkey).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::SecretKey;

    #[test]
    fn valid_proof_verifies_against_matching_script() {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let pk = PublicKey::from_secret_key(&secp, &sk);
        let wpubkey_hash = bitcoin::PublicKey::new(pk).wpubkey_hash().unwrap();
        let script = ScriptBuf::new_v0_p2wpkh(&wpubkey_hash);

        let message = b"deadbeef-blinded-output-hex";
        let digest = sha256::Hash::hash(message);
        let msg = Message::from_digest_slice(digest.as_ref()).unwrap();
        let signature = secp.sign_ecdsa(&msg, &sk);

        let proof = OwnershipProof { pubkey: pk, signature };
        assert!(verify_ownership_proof(&script, message, &proof));
    }

    #[test]
    fn proof_rejected_for_wrong_script() {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let pk = PublicKey::from_secret_key(&secp, &sk);

        let other_sk = SecretKey::from_slice(&[8u8; 32]).unwrap();
        let other_pk = PublicKey::from_secret_key(&secp, &other_sk);
        let other_wpubkey_hash = bitcoin::PublicKey::new(other_pk).wpubkey_hash().unwrap();
        let unrelated_script = ScriptBuf::new_v0_p2wpkh(&other_wpubkey_hash);

        let message = b"some message";
        let digest = sha256::Hash::hash(message);
        let msg = Message::from_digest_slice(digest.as_ref()).unwrap();
        let signature = secp.sign_ecdsa(&msg, &sk);

        let proof = OwnershipProof { pubkey: pk, signature };
        assert!(!verify_ownership_proof(&unrelated_script, message, &proof));
    }
}
