use bitcoin::secp256k1::{ecdsa, Message, PublicKey, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{ScriptBuf, Transaction, Witness};

/// Verifies a P2WPKH witness stack (`[signature, pubkey]`) against the
/// BIP-143 sighash for `tx`'s input at `input_index`, spending an output of
/// `value` sats locked by `script`, after verifying each signature
/// matches the corresponding input's script.
pub fn verify_input_signature(
    tx: &Transaction,
    input_index: usize,
    value: u64,
    script: &ScriptBuf,
    witness: &Witness,
) -> bool {
    if witness.len() != 2 {
        return false;
    }
    let Some(sig_bytes) = witness.nth(0) else {
        return false;
    };
    let Some(pubkey_bytes) = witness.nth(1) else {
        return false;
    };

    // last byte of the witness signature is the sighash type flag (BIP 143)
    let Some((sighash_byte, der_sig)) = sig_bytes.split_last() else {
        return false;
    };
    let Ok(sighash_type) = EcdsaSighashType::from_consensus(*sighash_byte as u32) else {
        return false;
    };
    let Ok(signature) = ecdsa::Signature::from_der(der_sig) else {
        return false;
    };
    let Ok(pubkey) = PublicKey::from_slice(pubkey_bytes) else {
        return false;
    };

    let Some(script_code) = script.p2wpkh_script_code() else {
        return false;
    };

    let mut cache = SighashCache::new(tx);
    let Ok(sighash) = cache.segwit_signature_hash(input_index, &script_code, value, sighash_type)
    else {
        return false;
    };
    let Ok(message) = Message::from_digest_slice(sighash.as_ref()) else {
        return false;
    };

    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(&message, &signature, &pubkey).is_ok()
}
