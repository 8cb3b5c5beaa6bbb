pub mod alice;
pub mod bob;
pub mod hash;
pub mod phase;
pub mod round;
pub mod signature;

pub use alice::{Alice, AliceInput, AliceState};
pub use bob::Bob;
pub use phase::{Phase, RoundStatus};
pub use round::{
    ConfirmConnectionResponse, InputRegistration, RegisterAliceRequest, RegisterAliceResponse,
    Round,
};
