use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{OutPoint, ScriptBuf, Txid, Witness};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::crypto::OwnershipProof;
use crate::error::CoreError;
use crate::round::{InputRegistration, RegisterAliceRequest};

#[derive(Serialize)]
pub struct RoundStateDto {
    pub round_id: u64,
    pub phase: String,
    pub denomination: u64,
    pub registered_peer_count: usize,
    pub required_peer_count: usize,
    pub max_inputs_per_peer: usize,
    pub registration_timeout_seconds: u64,
    pub fee_per_input: u64,
    pub fee_per_output: u64,
    pub coordinator_fee_percent: f64,
}

#[derive(Deserialize)]
pub struct OutpointDto {
    pub hash: String,
    pub n: u32,
}

#[derive(Deserialize)]
pub struct ProofDto {
    pub pubkey: String,
    pub signature: String,
}

#[derive(Deserialize)]
pub struct InputDto {
    pub input: OutpointDto,
    pub proof: ProofDto,
}

#[derive(Deserialize)]
pub struct RegisterInputsRequest {
    pub blinded_output_hex: String,
    pub change_output_script: String,
    pub inputs: Vec<InputDto>,
}

#[derive(Serialize)]
pub struct RegisterInputsResponse {
    pub unique_id: Uuid,
    pub blinded_output_signature: String,
    pub round_id: u64,
}

#[derive(Serialize)]
pub struct ConfirmationResponse {
    pub round_hash: String,
}

#[derive(Deserialize)]
pub struct RegisterOutputRequest {
    pub output_script: String,
    pub signature_hex: String,
}

#[derive(Deserialize)]
pub struct WitnessDto {
    pub witness: Vec<String>,
}

#[derive(Deserialize)]
pub struct PostSignaturesRequest {
    pub signatures: Vec<WitnessDto>,
}

#[derive(Serialize)]
pub struct CoinJoinResponse {
    pub transaction_hex: String,
}

pub fn decode_register_inputs(
    req: RegisterInputsRequest,
) -> Result<RegisterAliceRequest, CoreError> {
    let change_script = ScriptBuf::from(
        hex::decode(&req.change_output_script)
            .map_err(|_| CoreError::InvalidRequest("change_output_script is not valid hex".into()))?,
    );

    let mut inputs = Vec::with_capacity(req.inputs.len());
    for input in req.inputs {
        let txid = Txid::from_str(&input.input.hash)
            .map_err(|_| CoreError::InvalidRequest("input.hash is not a valid txid".into()))?;
        let outpoint = OutPoint {
            txid,
            vout: input.input.n,
        };

        let pubkey_bytes = hex::decode(&input.proof.pubkey)
            .map_err(|_| CoreError::InvalidRequest("proof.pubkey is not valid hex".into()))?;
        let pubkey = bitcoin::secp256k1::PublicKey::from_slice(&pubkey_bytes)
            .map_err(|_| CoreError::InvalidRequest("proof.pubkey is not a valid public key".into()))?;

        let sig_bytes = hex::decode(&input.proof.signature)
            .map_err(|_| CoreError::InvalidRequest("proof.signature is not valid hex".into()))?;
        let signature = bitcoin::secp256k1::ecdsa::Signature::from_compact(&sig_bytes)
            .or_else(|_| bitcoin::secp256k1::ecdsa::Signature::from_der(&sig_bytes))
            .map_err(|_| CoreError::InvalidRequest("proof.signature is malformed".into()))?;

        inputs.push(InputRegistration {
            outpoint,
            proof: OwnershipProof { pubkey, signature },
        });
    }

    Ok(RegisterAliceRequest {
        blinded_output_hex: req.blinded_output_hex,
        change_script,
        inputs,
    })
}

pub fn decode_witnesses(req: PostSignaturesRequest) -> Result<Vec<Witness>, CoreError> {
    let mut out = Vec::with_capacity(req.signatures.len());
    for item in req.signatures {
        let mut witness = Witness::new();
        for element_hex in &item.witness {
            let bytes = hex::decode(element_hex)
                .map_err(|_| CoreError::InvalidRequest("witness element is not valid hex".into()))?;
            witness.push(bytes);
        }
        out.push(witness);
    }
    Ok(out)
}

pub fn encode_transaction(tx: &bitcoin::Transaction) -> String {
    serialize_hex(tx)
}
