use cid::Cid;
use frc42_dispatch::match_method;
use fvm_actor_utils::{
    blockstore::Blockstore, syscalls::fvm_syscalls::FvmSyscalls, util::ActorRuntime,
};
use fvm_ipld_encoding::DAG_CBOR;
use fvm_sdk::{self as sdk, error::StateReadError, NO_DATA_BLOCK_ID};
use fvm_shared::{address::Address, error::ExitCode};
use security_token::token::state::{LedgerState, StateError};
use security_token::token::types::{
    BalanceReturn, ConstructorParams, IssueParams, IssueReturn, IssuedSharesReturn, OfferingTerms,
    OwnershipReturn, RedeemParams, RedeemReturn, SecurityToken, SharePriceReturn,
    TotalSharesReturn, TransferOwnershipParams,
};
use security_token::token::{Token, TokenError};
use serde::{de::DeserializeOwned, ser::Serialize};
use thiserror::Error;

/// Errors that can occur during the execution of this actor
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Error from the underlying ledger library
    #[error("error in token: {0}")]
    Token(#[from] TokenError),
    /// Actor state not found
    #[error("actor state not found {0}")]
    NoState(#[from] StateReadError),
    /// Error from the underlying ledger state
    #[error("underlying state error {0}")]
    State(#[from] StateError),
    /// The caller is not allowed to administer the offering
    #[error("address not authorized")]
    AddressNotAuthorized,
}

impl From<&RuntimeError> for ExitCode {
    fn from(error: &RuntimeError) -> Self {
        match error {
            RuntimeError::Token(e) => e.into(),
            RuntimeError::NoState(_) => ExitCode::USR_NOT_FOUND,
            RuntimeError::State(e) => match e {
                StateError::IpldHamt(_) | StateError::Serialization(_) => {
                    ExitCode::USR_SERIALIZATION
                }
                StateError::MissingState(_)
                | StateError::NegativeBalance { .. }
                | StateError::NegativeIssued { .. } => ExitCode::USR_ILLEGAL_STATE,
                StateError::InsufficientBalance { .. } => ExitCode::USR_INSUFFICIENT_FUNDS,
                StateError::ExceedsAvailableShares { .. } => ExitCode::USR_FORBIDDEN,
            },
            RuntimeError::AddressNotAuthorized => ExitCode::USR_FORBIDDEN,
        }
    }
}

/// Constructs a new offering, recording the caller as the initial owner
pub fn construct_token(
    runtime: ActorRuntime<FvmSyscalls, Blockstore>,
    params: ConstructorParams,
) -> Result<u32, RuntimeError> {
    // the deployer administers the offering until ownership is transferred
    let owner = sdk::message::caller();
    let custodian = runtime.resolve_or_init(&params.custodian).map_err(TokenError::Messaging)?;

    let offering = OfferingTerms {
        name: params.name,
        symbol: params.symbol,
        offering_name: params.offering_name,
        offering_type: params.offering_type,
        share_price: params.share_price,
    };
    let state = Token::<FvmSyscalls, Blockstore>::create_state(
        runtime.bs(),
        offering,
        params.total_shares,
        owner,
        custodian,
    )?;

    let cid = state.save(runtime.bs())?;
    sdk::sself::set_root(&cid).map_err(|_| RuntimeError::NoState(StateReadError))?;

    Ok(NO_DATA_BLOCK_ID)
}

/// A security token actor backed by the ledger library
pub struct SecurityTokenActor {
    state: LedgerState,
}

impl SecurityTokenActor {
    pub fn load(
        runtime: &ActorRuntime<FvmSyscalls, Blockstore>,
        cid: &Cid,
    ) -> Result<Self, RuntimeError> {
        Ok(Self { state: Token::<FvmSyscalls, Blockstore>::load_state(runtime.bs(), cid)? })
    }

    pub fn save(&self) -> Result<Cid, RuntimeError> {
        Ok(self.state.save(&Blockstore::default())?)
    }

    fn token(&mut self) -> Token<'_, FvmSyscalls, Blockstore> {
        let runtime = ActorRuntime::<FvmSyscalls, Blockstore>::new_fvm_runtime();
        Token::wrap(runtime, &mut self.state)
    }

    /// Issuance, redemption and ownership transfer are reserved to the current owner
    fn require_caller_is_owner(&self) -> Result<(), RuntimeError> {
        let caller = sdk::message::caller();
        if caller != self.state.owner {
            return Err(RuntimeError::AddressNotAuthorized);
        }
        Ok(())
    }
}

/// Implementation of the security token interface in a FVM actor
///
/// Here the Ipld parameter structs are marshalled and passed to the underlying library functions
impl SecurityToken for SecurityTokenActor {
    type TokenError = RuntimeError;

    fn name(&self) -> String {
        self.state.offering.name.clone()
    }

    fn symbol(&self) -> String {
        self.state.offering.symbol.clone()
    }

    fn offering_name(&self) -> String {
        self.state.offering.offering_name.clone()
    }

    fn offering_type(&self) -> String {
        self.state.offering.offering_type.clone()
    }

    fn total_shares(&self) -> TotalSharesReturn {
        self.state.max_shares.clone()
    }

    fn share_price(&self) -> SharePriceReturn {
        self.state.offering.share_price.clone()
    }

    fn issued_shares(&self) -> IssuedSharesReturn {
        self.state.issued.clone()
    }

    fn custodian(&self) -> Address {
        Address::new_id(self.state.custodian)
    }

    fn owner(&self) -> Address {
        Address::new_id(self.state.owner)
    }

    fn balance_of(&mut self, params: Address) -> Result<BalanceReturn, RuntimeError> {
        Ok(self.token().balance_of(&params)?)
    }

    fn issue_shares(&mut self, params: IssueParams) -> Result<IssueReturn, RuntimeError> {
        self.require_caller_is_owner()?;
        Ok(self.token().issue(&params.to, &params.amount)?)
    }

    fn redeem_shares(&mut self, params: RedeemParams) -> Result<RedeemReturn, RuntimeError> {
        self.require_caller_is_owner()?;
        Ok(self.token().redeem(&params.holder, &params.amount)?)
    }

    fn transfer_ownership(
        &mut self,
        params: TransferOwnershipParams,
    ) -> Result<OwnershipReturn, RuntimeError> {
        self.require_caller_is_owner()?;
        Ok(self.token().transfer_ownership(&params.new_owner)?)
    }
}

fn load_actor() -> Result<SecurityTokenActor, RuntimeError> {
    let root_cid = sdk::sself::root()?;
    let runtime = ActorRuntime::<FvmSyscalls, Blockstore>::new_fvm_runtime();
    SecurityTokenActor::load(&runtime, &root_cid)
}

fn flush_state(actor: &SecurityTokenActor) -> Result<(), RuntimeError> {
    let cid = actor.save()?;
    sdk::sself::set_root(&cid).map_err(|_| RuntimeError::NoState(StateReadError))?;
    Ok(())
}

fn token_invoke(method_num: u64, params: u32) -> Result<u32, RuntimeError> {
    match_method!(method_num, {
        "Constructor" => {
            let params = unpack_params(params);
            let runtime = ActorRuntime::<FvmSyscalls, Blockstore>::new_fvm_runtime();
            construct_token(runtime, params)
        }
        "Name" => {
            let actor = load_actor()?;
            Ok(return_block(&actor.name()))
        }
        "Symbol" => {
            let actor = load_actor()?;
            Ok(return_block(&actor.symbol()))
        }
        "OfferingName" => {
            let actor = load_actor()?;
            Ok(return_block(&actor.offering_name()))
        }
        "OfferingType" => {
            let actor = load_actor()?;
            Ok(return_block(&actor.offering_type()))
        }
        "TotalShares" => {
            let actor = load_actor()?;
            Ok(return_block(&actor.total_shares()))
        }
        "SharePrice" => {
            let actor = load_actor()?;
            Ok(return_block(&actor.share_price()))
        }
        "IssuedShares" => {
            let actor = load_actor()?;
            Ok(return_block(&actor.issued_shares()))
        }
        "Custodian" => {
            let actor = load_actor()?;
            Ok(return_block(&actor.custodian()))
        }
        "Owner" => {
            let actor = load_actor()?;
            Ok(return_block(&actor.owner()))
        }
        "BalanceOf" => {
            let params = unpack_params(params);
            let mut actor = load_actor()?;
            let res = actor.balance_of(params)?;
            Ok(return_block(&res))
        }
        "IssueShares" => {
            let params = unpack_params(params);
            let mut actor = load_actor()?;
            let res = actor.issue_shares(params)?;
            flush_state(&actor)?;
            Ok(return_block(&res))
        }
        "RedeemShares" => {
            let params = unpack_params(params);
            let mut actor = load_actor()?;
            let res = actor.redeem_shares(params)?;
            flush_state(&actor)?;
            Ok(return_block(&res))
        }
        "TransferOwnership" => {
            let params = unpack_params(params);
            let mut actor = load_actor()?;
            let res = actor.transfer_ownership(params)?;
            flush_state(&actor)?;
            Ok(return_block(&res))
        }
        _ => {
            sdk::vm::abort(
                ExitCode::USR_UNHANDLED_MESSAGE.value(),
                Some("Unknown method number"),
            )
        }
    })
}

/// Conduct method dispatch. Handle input parameters and return data.
#[no_mangle]
pub fn invoke(params: u32) -> u32 {
    std::panic::set_hook(Box::new(|info| {
        sdk::vm::abort(ExitCode::USR_ASSERTION_FAILED.value(), Some(&format!("{info}")))
    }));

    let method_num = sdk::message::method_number();
    match token_invoke(method_num, params) {
        Ok(ret) => ret,
        Err(err) => sdk::vm::abort(ExitCode::from(&err).value(), Some(&err.to_string())),
    }
}

// deserialise params for passing to token methods
// this aborts on errors as malformed parameters cannot be reported back to the caller
fn unpack_params<O: DeserializeOwned>(params: u32) -> O {
    let params = match sdk::message::params_raw(params) {
        Ok(Some(params)) => params,
        Ok(None) => {
            sdk::vm::abort(
                ExitCode::USR_ILLEGAL_ARGUMENT.value(),
                Some(String::from("missing parameters").as_str()),
            );
        }
        Err(e) => {
            sdk::vm::abort(
                ExitCode::USR_SERIALIZATION.value(),
                Some(format!("failed to get raw params {e}").as_str()),
            );
        }
    };

    match params.deserialize() {
        Ok(p) => p,
        Err(e) => {
            sdk::vm::abort(
                ExitCode::USR_SERIALIZATION.value(),
                Some(format!("failed to deserialize params {e}").as_str()),
            );
        }
    }
}

// serialise and save return data to the blockstore
// this also aborts on error as the failure cannot be reported back to the caller
fn return_block<T>(value: &T) -> u32
where
    T: Serialize + ?Sized,
{
    let bytes = match fvm_ipld_encoding::to_vec(value) {
        Ok(b) => b,
        Err(e) => {
            sdk::vm::abort(
                ExitCode::USR_SERIALIZATION.value(),
                Some(format!("failed to serialise return data {e}").as_str()),
            );
        }
    };

    sdk::ipld::put_block(DAG_CBOR, bytes.as_slice()).unwrap_or_else(|e| {
        sdk::vm::abort(
            ExitCode::USR_SERIALIZATION.value(),
            Some(format!("failed to serialise return data {e}").as_str()),
        )
    })
}
