pub mod blind_signer;
pub mod ownership_proof;

pub use blind_signer::BlindSigner;
pub use ownership_proof::{verify_ownership_proof, OwnershipProof};
