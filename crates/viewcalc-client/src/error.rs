use thiserror::Error;
use viewcalc_common::ValueKind;
use viewcalc_engine::{EngineError, LeaseError, WaitError};

use crate::session::ClientState;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {operation} while the session is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ClientState,
    },

    #[error("session has been shut down")]
    Terminated,

    #[error("cycle access is not enabled for this session")]
    CycleAccessDisabled,

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// A value could not be turned into a display payload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("{converter} converter cannot display a {found:?} value")]
    UnexpectedKind {
        converter: &'static str,
        found: ValueKind,
    },

    #[error("{0} cannot be represented as JSON")]
    NotRepresentable(String),
}
