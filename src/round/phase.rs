/// The four-phase round state machine. Transitions are one-way:
/// `InputRegistration -> ConnectionConfirmation -> OutputRegistration ->
/// Signing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum Phase {
    InputRegistration,
    ConnectionConfirmation,
    OutputRegistration,
    Signing,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum RoundStatus {
    Running,
    Succeeded,
    Failed,
}
