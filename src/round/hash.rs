use bitcoin::hashes::{sha256, Hash, HashEngine};

/// Deterministic commitment computed on entry to OutputRegistration. It
/// binds the round's id and its now-frozen parameters
/// (denomination, final anonymity set reached after ConnectionConfirmation,
/// and the set of blinded outputs admitted) so that Bobs addressing the
/// round by this hash cannot be redirected to a different round and cannot
/// learn the underlying `round_id` sequence.
///
/// Design note: a round hash needs to commit to something the moment
/// OutputRegistration opens, but no Bob has registered yet at that point.
/// This commits to what *does* exist at that moment — the round parameters
/// and the admitted Alices' blinded outputs — which is the strongest
/// commitment available before Bobs register; the Bob set itself is
/// separately constrained to be exactly `anonymity_set` distinct scripts
/// by `Round::register_bob`.
pub fn compute_round_hash(
    round_id: u64,
    denomination: u64,
    anonymity_set: usize,
    fee_per_input: u64,
    fee_per_output: u64,
    blinded_output_hexes: &[String],
) -> [u8; 32] {
    let mut engine = sha256::Hash::engine();
    engine.input(&round_id.to_le_bytes());
    engine.input(&denomination.to_le_bytes());
    engine.input(&(anonymity_set as u64).to_le_bytes());
    engine.input(&fee_per_input.to_le_bytes());
    engine.input(&fee_per_output.to_le_bytes());

    let mut hexes: Vec<&String> = blinded_output_hexes.iter().collect();
    hexes.sort();
    for hex in hexes {
        engine.input(hex.as_bytes());
    }

    sha256::Hash::from_engine(engine).to_byte_array()
}
