use bitcoin::ScriptBuf;

/// Output-side participant. A Bob carries no field linkable to any
/// Alice — that is the anonymity invariant the blind signature exists to
/// enforce; do not add one.
#[derive(Debug, Clone)]
pub struct Bob {
    pub output_script: ScriptBuf,
}
