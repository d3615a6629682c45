use std::ops::Neg;

use cid::Cid;
pub use error::TokenError;
use fvm_actor_utils::messaging::MessagingError;
use fvm_actor_utils::syscalls::Syscalls;
use fvm_actor_utils::util::ActorRuntime;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::ActorID;
use num_traits::Zero;

use self::state::{LedgerState, StateInvariantError, StateSummary};
use self::types::{IssueReturn, OfferingTerms, OwnershipReturn, RedeemReturn};

mod error;
pub mod state;
pub mod types;

/// The reserved f00 address. It can never hold shares or administer an offering; ownership
/// transfers to it are rejected.
pub const ZERO_ADDRESS: Address = Address::new_id(0);

type Result<T> = std::result::Result<T, TokenError>;

/// Library functions implementing the core behaviour of a tokenized security
///
/// Holds injectable services to access/interface with IPLD/FVM layer.
pub struct Token<'st, S, BS>
where
    S: Syscalls,
    BS: Blockstore,
{
    /// Runtime services to interact with the execution environment
    runtime: ActorRuntime<S, BS>,
    /// Reference to ledger state that will be inspected/mutated
    state: &'st mut LedgerState,
}

impl<'st, S, BS> Token<'st, S, BS>
where
    S: Syscalls,
    BS: Blockstore,
{
    /// Creates a new clean ledger state instance, checking the offering terms
    ///
    /// This should be wrapped in a Token handle for convenience. Must be flushed to the blockstore
    /// explicitly to persist changes. The share pool must be positive, the name and symbol must
    /// not be empty and the share price must be non-negative.
    pub fn create_state(
        bs: &BS,
        offering: OfferingTerms,
        max_shares: TokenAmount,
        owner: ActorID,
        custodian: ActorID,
    ) -> Result<LedgerState> {
        validate_offering(&offering)?;
        if !max_shares.is_positive() {
            return Err(TokenError::InvalidSharePool(max_shares));
        }
        Ok(LedgerState::new(bs, offering, max_shares, owner, custodian)?)
    }

    /// Creates a new clean ledger state instance, specifying the underlying Hamt bit width
    pub fn create_state_with_bit_width(
        bs: &BS,
        offering: OfferingTerms,
        max_shares: TokenAmount,
        owner: ActorID,
        custodian: ActorID,
        hamt_bit_width: u32,
    ) -> Result<LedgerState> {
        validate_offering(&offering)?;
        if !max_shares.is_positive() {
            return Err(TokenError::InvalidSharePool(max_shares));
        }
        Ok(LedgerState::new_with_bit_width(
            bs,
            offering,
            max_shares,
            owner,
            custodian,
            hamt_bit_width,
        )?)
    }

    /// Wrap an existing ledger state
    pub fn wrap(runtime: ActorRuntime<S, BS>, state: &'st mut LedgerState) -> Self {
        Self { runtime, state }
    }

    /// Replace the current state with another
    /// The previous state is returned and can be safely dropped
    pub fn replace(&mut self, state: LedgerState) -> LedgerState {
        std::mem::replace(self.state, state)
    }

    /// For an already initialised state tree, loads the state tree from the blockstore at a Cid
    pub fn load_state(bs: &BS, state_cid: &Cid) -> Result<LedgerState> {
        Ok(LedgerState::load(bs, state_cid)?)
    }

    /// Loads a fresh copy of the state from a blockstore from a given cid, replacing existing state
    /// The old state is returned to enable comparisons and the like but can be safely dropped otherwise
    pub fn load_replace(&mut self, cid: &Cid) -> Result<LedgerState> {
        let new_state = LedgerState::load(&self.runtime, cid)?;
        Ok(std::mem::replace(self.state, new_state))
    }

    /// Flush state and return Cid for root
    pub fn flush(&mut self) -> Result<Cid> {
        Ok(self.state.save(&self.runtime)?)
    }

    /// Get a reference to the wrapped state tree
    pub fn state(&self) -> &LedgerState {
        self.state
    }

    /// Get a reference to the underlying runtime
    pub fn runtime(&self) -> &ActorRuntime<S, BS> {
        &self.runtime
    }

    /// Opens an atomic transaction on LedgerState which allows a closure to make multiple
    /// modifications to the state tree.
    ///
    /// If the closure returns an error, the transaction is dropped atomically and no change is
    /// observed on ledger state.
    fn transaction<F, Res>(&mut self, f: F) -> Result<Res>
    where
        F: FnOnce(&mut LedgerState, &ActorRuntime<S, BS>) -> Result<Res>,
    {
        let mut mutable_state = self.state.clone();
        let res = f(&mut mutable_state, &self.runtime)?;
        // if closure didn't error, save state
        *self.state = mutable_state;
        Ok(res)
    }
}

impl<'st, S, BS> Token<'st, S, BS>
where
    S: Syscalls,
    BS: Blockstore,
{
    /// Returns the name of the security
    pub fn name(&self) -> String {
        self.state.offering.name.clone()
    }

    /// Returns the ticker symbol of the security
    pub fn symbol(&self) -> String {
        self.state.offering.symbol.clone()
    }

    /// Returns the name of the offering
    pub fn offering_name(&self) -> String {
        self.state.offering.offering_name.clone()
    }

    /// Returns the type of the offering
    pub fn offering_type(&self) -> String {
        self.state.offering.offering_type.clone()
    }

    /// Returns the fixed price of a single share
    pub fn share_price(&self) -> TokenAmount {
        self.state.offering.share_price.clone()
    }

    /// Returns the fixed size of the share pool
    pub fn max_shares(&self) -> TokenAmount {
        self.state.max_shares.clone()
    }

    /// Gets the number of shares currently allocated to holders
    ///
    /// This equals the sum of `balance_of` called on all addresses. This equals the sum of all
    /// successful issuances minus the sum of all successful redemptions.
    pub fn issued_shares(&self) -> TokenAmount {
        self.state.issued.clone()
    }

    /// Returns the current owner of the offering
    pub fn owner(&self) -> ActorID {
        self.state.owner
    }

    /// Returns the custodian recorded at creation
    pub fn custodian(&self) -> ActorID {
        self.state.custodian
    }

    /// Returns the balance associated with a particular address
    ///
    /// Accounts that have never received shares implicitly have a zero-balance
    pub fn balance_of(&self, holder: &Address) -> Result<TokenAmount> {
        // Don't instantiate an account if unable to resolve to an ID address, as non-initialized
        // addresses have an implicit zero balance
        match self.runtime.resolve_id(holder) {
            Ok(holder) => Ok(self.state.get_balance(&self.runtime, holder)?),
            Err(MessagingError::AddressNotResolved(_)) => {
                // uninitialized address has implicit zero balance
                Ok(TokenAmount::zero())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Allocates shares from the pool into a holder's account
    ///
    /// - The requested value MUST be non-negative
    /// - The requested value MUST NOT push the issued counter beyond the total available shares;
    ///   if it would, the issuance is discarded and this method returns an error
    ///
    /// Upon successful issuance
    /// - The holder's balance increases by the requested value
    /// - The issued counter increases by the requested value
    pub fn issue(&mut self, to: &Address, amount: &TokenAmount) -> Result<IssueReturn> {
        let amount = validate_amount(amount, "issue")?;
        // init the recipient account so shares can be credited against its actor ID
        let to_id = self.runtime.resolve_or_init(to)?;

        self.transaction(|state, bs| {
            let balance = state.change_balance_by(&bs, to_id, amount)?;
            let issued = state.change_issued_by(amount)?.clone();
            Ok(IssueReturn { balance, issued })
        })
    }

    /// Returns shares from a holder's account to the pool
    ///
    /// - The requested value MUST be non-negative
    /// - The requested value MUST NOT exceed the holder's balance; if it would, the redemption is
    ///   discarded and this method returns an error
    ///
    /// Upon successful redemption
    /// - The holder's balance decreases by the requested value
    /// - The issued counter decreases by the requested value
    pub fn redeem(&mut self, holder: &Address, amount: &TokenAmount) -> Result<RedeemReturn> {
        let amount = validate_amount(amount, "redeem")?;
        let holder_id = self.runtime.resolve_or_init(holder)?;

        self.transaction(|state, bs| {
            let balance = state.change_balance_by(&bs, holder_id, &amount.neg())?;
            let issued = state.change_issued_by(&amount.neg())?.clone();
            Ok(RedeemReturn { balance, issued })
        })
    }

    /// Replaces the owner of the offering
    ///
    /// - The new owner MUST NOT be the zero address; such a transfer is discarded and this method
    ///   returns an error, leaving the current owner in place
    ///
    /// Returns the replaced owner alongside the new one.
    pub fn transfer_ownership(&mut self, new_owner: &Address) -> Result<OwnershipReturn> {
        if self.runtime.same_address(new_owner, &ZERO_ADDRESS) {
            return Err(TokenError::ZeroAddressOwner);
        }
        let new_id = self.runtime.resolve_or_init(new_owner)?;

        let previous = self.state.owner;
        self.state.owner = new_id;

        Ok(OwnershipReturn {
            previous_owner: Address::new_id(previous),
            owner: Address::new_id(new_id),
        })
    }

    /// Checks the state invariants, returning a state summary if they are all met
    pub fn check_invariants(
        &self,
    ) -> std::result::Result<StateSummary<'_, ActorRuntime<S, BS>>, StateInvariantError> {
        self.state.check_invariants(&self.runtime)
    }
}

/// Validates that a share amount for issuance/redemption is non-negative
///
/// Returns the argument, or an error.
pub fn validate_amount<'a>(a: &'a TokenAmount, name: &'static str) -> Result<&'a TokenAmount> {
    if a.is_negative() {
        return Err(TokenError::InvalidNegative { name, amount: a.clone() });
    }
    Ok(a)
}

fn validate_offering(offering: &OfferingTerms) -> Result<()> {
    if offering.name.is_empty() {
        return Err(TokenError::EmptyField("name"));
    }
    if offering.symbol.is_empty() {
        return Err(TokenError::EmptyField("symbol"));
    }
    if offering.share_price.is_negative() {
        return Err(TokenError::InvalidNegative {
            name: "share price",
            amount: offering.share_price.clone(),
        });
    }
    Ok(())
}
