use fvm_actor_utils::messaging::MessagingError;
use fvm_ipld_encoding::Error as SerializationError;
use fvm_sdk::sys::ErrorNumber;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use thiserror::Error;

use crate::token::state::StateError as LedgerStateError;
use crate::token::state::StateInvariantError;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("error in underlying state {0}")]
    LedgerState(#[from] LedgerStateError),
    #[error("value {amount:?} for {name:?} must be non-negative")]
    InvalidNegative { name: &'static str, amount: TokenAmount },
    #[error("the {0} of an offering must not be empty")]
    EmptyField(&'static str),
    #[error("the total share pool must be positive, cannot create an offering of {0:?}")]
    InvalidSharePool(TokenAmount),
    #[error("new owner cannot be the zero address")]
    ZeroAddressOwner,
    #[error("error calling other actor: {0}")]
    Messaging(#[from] MessagingError),
    #[error("error during serialization {0}")]
    Serialization(#[from] SerializationError),
    #[error("error in state invariants {0}")]
    StateInvariant(#[from] StateInvariantError),
}

impl From<&TokenError> for ExitCode {
    fn from(error: &TokenError) -> Self {
        match error {
            TokenError::Serialization(_) => ExitCode::USR_SERIALIZATION,
            TokenError::InvalidNegative { name: _, amount: _ }
            | TokenError::EmptyField(_)
            | TokenError::InvalidSharePool(_)
            | TokenError::ZeroAddressOwner => ExitCode::USR_ILLEGAL_ARGUMENT,
            TokenError::StateInvariant(_) => ExitCode::USR_ILLEGAL_STATE,
            TokenError::LedgerState(state_error) => match state_error {
                LedgerStateError::IpldHamt(_) | LedgerStateError::Serialization(_) => {
                    ExitCode::USR_SERIALIZATION
                }
                LedgerStateError::NegativeBalance { amount: _, holder: _ }
                | LedgerStateError::NegativeIssued { issued: _, delta: _ }
                | LedgerStateError::MissingState(_) => ExitCode::USR_ILLEGAL_STATE,
                LedgerStateError::InsufficientBalance { holder: _, balance: _, delta: _ } => {
                    ExitCode::USR_INSUFFICIENT_FUNDS
                }
                LedgerStateError::ExceedsAvailableShares { issued: _, max_shares: _, delta: _ } => {
                    ExitCode::USR_FORBIDDEN
                }
            },
            TokenError::Messaging(messaging_error) => match messaging_error {
                MessagingError::Syscall(e) => match e {
                    ErrorNumber::IllegalArgument => ExitCode::USR_ILLEGAL_ARGUMENT,
                    ErrorNumber::Forbidden | ErrorNumber::IllegalOperation => {
                        ExitCode::USR_FORBIDDEN
                    }
                    ErrorNumber::AssertionFailed => ExitCode::USR_ASSERTION_FAILED,
                    ErrorNumber::InsufficientFunds => ExitCode::USR_INSUFFICIENT_FUNDS,
                    ErrorNumber::IllegalCid
                    | ErrorNumber::NotFound
                    | ErrorNumber::InvalidHandle => ExitCode::USR_NOT_FOUND,
                    ErrorNumber::Serialization | ErrorNumber::IllegalCodec => {
                        ExitCode::USR_SERIALIZATION
                    }
                    _ => ExitCode::USR_UNSPECIFIED,
                },
                MessagingError::AddressNotResolved(_)
                | MessagingError::AddressNotInitialized(_) => ExitCode::USR_NOT_FOUND,
                MessagingError::Ipld(_) => ExitCode::USR_SERIALIZATION,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use fvm_shared::error::ExitCode;

    use crate::token::state::StateError;
    use crate::token::TokenError;

    #[test]
    fn it_creates_exit_codes() {
        let error = TokenError::LedgerState(StateError::MissingState(cid::Cid::default()));
        let msg = error.to_string();
        let exit_code = ExitCode::from(&error);
        // taking the exit code doesn't consume the error
        println!("{}: {:?}", msg, exit_code);
        assert_eq!(exit_code, ExitCode::USR_ILLEGAL_STATE);
    }
}
