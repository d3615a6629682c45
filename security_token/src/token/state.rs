use anyhow::bail;
use cid::multihash::Code;
use cid::Cid;
use fvm_ipld_blockstore::Block;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::Cbor;
use fvm_ipld_encoding::CborStore;
use fvm_ipld_encoding::DAG_CBOR;
use fvm_ipld_hamt::Hamt;
use fvm_ipld_hamt::{BytesKey, Error as HamtError};
use fvm_shared::bigint::Zero;
use fvm_shared::econ::TokenAmount;
use fvm_shared::ActorID;
use integer_encoding::VarInt;
use thiserror::Error;

use crate::token::types::OfferingTerms;

/// This value has been chosen to optimise to reduce gas-costs when accessing the balances map. Non-
/// standard use cases of the ledger library might find a different value to be more efficient.
pub const DEFAULT_HAMT_BIT_WIDTH: u32 = 3;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("ipld hamt error: {0}")]
    IpldHamt(#[from] HamtError),
    #[error("missing state at cid: {0}")]
    MissingState(Cid),
    #[error("underlying serialization error: {0}")]
    Serialization(String),
    #[error(
        "insufficient balance: cannot decrease {holder:?}'s balance of {balance:?} by {delta:?}"
    )]
    InsufficientBalance { holder: ActorID, balance: TokenAmount, delta: TokenAmount },
    #[error(
        "exceeds total available shares: {issued:?} of {max_shares:?} already issued, cannot apply delta of {delta:?}"
    )]
    ExceedsAvailableShares { issued: TokenAmount, max_shares: TokenAmount, delta: TokenAmount },
    #[error("issued shares cannot be negative, cannot apply delta of {delta:?} to {issued:?}")]
    NegativeIssued { issued: TokenAmount, delta: TokenAmount },
    #[error("balance cannot be negative, cannot set balance of {holder:?} to {amount:?}")]
    NegativeBalance { amount: TokenAmount, holder: ActorID },
}

#[derive(Error, Debug)]
pub enum StateInvariantError {
    #[error("issued shares was negative: {0}")]
    IssuedNegative(TokenAmount),
    #[error("issued shares {issued:?} exceed the total share pool of {max_shares:?}")]
    IssuedAboveCap { issued: TokenAmount, max_shares: TokenAmount },
    #[error("the account for {account:?} had a negative balance of {balance:?}")]
    BalanceNegative { account: ActorID, balance: TokenAmount },
    #[error("stored a zero balance which should have been removed for {0}")]
    ExplicitZeroBalance(ActorID),
    #[error(
        "the issued share counter {issued:?} does not match the sum of all balances {balance_sum:?}"
    )]
    BalanceIssuedMismatch { issued: TokenAmount, balance_sum: TokenAmount },
    #[error("invalid serialized holder key {0:?}")]
    InvalidHolderKey(BytesKey),
    #[error("underlying state error {0}")]
    State(#[from] StateError),
}

type Result<T> = std::result::Result<T, StateError>;

type Map<'bs, BS, K, V> = Hamt<&'bs BS, V, K>;
type BalanceMap<'bs, BS> = Map<'bs, BS, BytesKey, TokenAmount>;

/// Ledger state IPLD structure
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct LedgerState {
    /// Terms of the offering, fixed at creation
    pub offering: OfferingTerms,
    /// Fixed size of the share pool; issuance beyond this is rejected
    pub max_shares: TokenAmount,
    /// Shares currently allocated to holders
    pub issued: TokenAmount,
    /// Administrator of the offering, initially the deployer
    pub owner: ActorID,
    /// Custodian recorded at creation, not altered by any operation
    pub custodian: ActorID,
    /// Map<ActorId, TokenAmount> of balances as a Hamt
    pub balances: Cid,
    /// Bit-width to use when loading Hamts
    hamt_bit_width: u32,
}

/// An abstraction over the IPLD layer to get and modify ledger state without dealing with HAMTs
/// etc.
///
/// This is a simple wrapper of state and in general does not account for protocol level checks
/// such as caller authorization. This is left for the caller to handle. However, invariants such
/// as non-negative balances, the issuance cap and a non-negative issued counter are enforced.
impl LedgerState {
    /// Create a new ledger state-tree, without committing it (the root cid) to a blockstore
    pub fn new<BS: Blockstore>(
        store: &BS,
        offering: OfferingTerms,
        max_shares: TokenAmount,
        owner: ActorID,
        custodian: ActorID,
    ) -> Result<Self> {
        Self::new_with_bit_width(
            store,
            offering,
            max_shares,
            owner,
            custodian,
            DEFAULT_HAMT_BIT_WIDTH,
        )
    }

    /// Create a new ledger state-tree, without committing it (the root cid) to a blockstore
    ///
    /// Explicitly sets the bit width of underlying Hamt structures. Caller must ensure
    /// 1 <= hamt_bit_width <= 8.
    pub fn new_with_bit_width<BS: Blockstore>(
        store: &BS,
        offering: OfferingTerms,
        max_shares: TokenAmount,
        owner: ActorID,
        custodian: ActorID,
        hamt_bit_width: u32,
    ) -> Result<Self> {
        // Blockstore is still needed to create a valid Cid for the Hamt
        let empty_balance_map = BalanceMap::new_with_bit_width(store, hamt_bit_width).flush()?;

        Ok(Self {
            offering,
            max_shares,
            issued: Default::default(),
            owner,
            custodian,
            balances: empty_balance_map,
            hamt_bit_width,
        })
    }

    /// Loads a fresh copy of the state from a blockstore from a given cid
    pub fn load<BS: Blockstore>(bs: &BS, cid: &Cid) -> Result<Self> {
        // Load the actor state from the state tree.
        let state = match bs.get_cbor::<Self>(cid) {
            Ok(Some(state)) => Ok(state),
            Ok(None) => Err(StateError::MissingState(*cid)),
            Err(err) => Err(StateError::Serialization(err.to_string())),
        }?;

        Ok(state)
    }

    /// Saves the current state to the blockstore, returning the cid
    pub fn save<BS: Blockstore>(&self, bs: &BS) -> Result<Cid> {
        let serialized = match fvm_ipld_encoding::to_vec(self) {
            Ok(s) => s,
            Err(err) => return Err(StateError::Serialization(err.to_string())),
        };
        let block = Block { codec: DAG_CBOR, data: serialized };
        let cid = match bs.put(Code::Blake2b256, &block) {
            Ok(cid) => cid,
            Err(err) => return Err(StateError::Serialization(err.to_string())),
        };
        Ok(cid)
    }

    /// Get the balance of an ActorID from the currently stored state
    pub fn get_balance<BS: Blockstore>(&self, bs: &BS, holder: ActorID) -> Result<TokenAmount> {
        let balances = self.get_balance_map(bs)?;

        let balance = match balances.get(&actor_id_key(holder))? {
            Some(amount) => amount.clone(),
            None => TokenAmount::zero(),
        };

        Ok(balance)
    }

    /// Changes the balance of the specified account by the delta
    ///
    /// Caller must ensure that the sign of the delta is consistent with ledger rules (i.e.
    /// negative issuances are not allowed). Returns the new balance of the account.
    pub fn change_balance_by<BS: Blockstore>(
        &mut self,
        bs: &BS,
        holder: ActorID,
        delta: &TokenAmount,
    ) -> Result<TokenAmount> {
        if delta.is_zero() {
            // This is a no-op as far as mutating state
            return self.get_balance(bs, holder);
        }

        let mut balance_map = self.get_balance_map(bs)?;
        let holder_key = actor_id_key(holder);
        let balance = balance_map.get(&holder_key)?;
        let balance = match balance {
            Some(amount) => amount.clone(),
            None => TokenAmount::zero(),
        };

        let new_balance = &balance + delta;

        // if the new_balance is negative, return an error
        if new_balance.is_negative() {
            return Err(StateError::InsufficientBalance {
                holder,
                balance,
                delta: delta.clone(),
            });
        }

        if new_balance.is_zero() {
            balance_map.delete(&holder_key)?;
        } else {
            balance_map.set(holder_key, new_balance.clone())?;
        }

        self.balances = balance_map.flush()?;

        Ok(new_balance)
    }

    /// Set the balance of the account returning the old balance
    pub fn set_balance<BS: Blockstore>(
        &mut self,
        bs: &BS,
        holder: ActorID,
        new_balance: &TokenAmount,
    ) -> Result<TokenAmount> {
        // if the new balance is negative, return an error
        if new_balance.is_negative() {
            return Err(StateError::NegativeBalance { amount: new_balance.clone(), holder });
        }

        let mut balance_map = self.get_balance_map(bs)?;
        let holder_key = actor_id_key(holder);
        let old_balance = match balance_map.get(&holder_key)? {
            Some(amount) => amount.clone(),
            None => TokenAmount::zero(),
        };

        // if the new balance is zero, remove from balance map
        if new_balance.is_zero() {
            balance_map.delete(&holder_key)?;
            self.balances = balance_map.flush()?;
            return Ok(old_balance);
        }

        // else, set the new balance
        balance_map.set(holder_key, new_balance.clone())?;
        self.balances = balance_map.flush()?;
        Ok(old_balance)
    }

    /// Retrieve the balance map as a HAMT
    pub fn get_balance_map<'bs, BS: Blockstore>(&self, bs: &'bs BS) -> Result<BalanceMap<'bs, BS>> {
        Ok(BalanceMap::load_with_bit_width(&self.balances, bs, self.hamt_bit_width)?)
    }

    /// Retrieve the number of share holders
    ///
    /// This involves iterating through the entire HAMT
    pub fn count_holders<BS: Blockstore>(&self, bs: &BS) -> Result<usize> {
        let balance_map = self.get_balance_map(bs)?;
        let mut count = 0;
        balance_map.for_each(|_, _| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    /// Increase/decrease the issued-share counter by the specified value
    ///
    /// The counter is bounded below by zero and above by the share pool. Returns the new count of
    /// issued shares.
    pub fn change_issued_by(&mut self, delta: &TokenAmount) -> Result<&TokenAmount> {
        let new_issued = &self.issued + delta;
        if new_issued.is_negative() {
            return Err(StateError::NegativeIssued {
                issued: self.issued.clone(),
                delta: delta.clone(),
            });
        }
        if new_issued.gt(&self.max_shares) {
            return Err(StateError::ExceedsAvailableShares {
                issued: self.issued.clone(),
                max_shares: self.max_shares.clone(),
                delta: delta.clone(),
            });
        }

        self.issued = new_issued;
        Ok(&self.issued)
    }

    /// Checks that the current state obeys all system invariants
    ///
    /// Checks that there are no zero balances explicitly stored in the blockstore. Checks that
    /// balances and the issued counter are never negative and that the counter never exceeds the
    /// share pool. Checks that the sum of all balances matches the issued counter.
    ///
    /// Returns a state summary that can be used to check application specific invariants.
    pub fn check_invariants<'bs, BS: Blockstore>(
        &self,
        bs: &'bs BS,
    ) -> std::result::Result<StateSummary<'bs, BS>, StateInvariantError> {
        // check the issued counter is within bounds
        if self.issued.is_negative() {
            return Err(StateInvariantError::IssuedNegative(self.issued.clone()));
        }
        if self.issued.gt(&self.max_shares) {
            return Err(StateInvariantError::IssuedAboveCap {
                issued: self.issued.clone(),
                max_shares: self.max_shares.clone(),
            });
        }

        // check balances
        let mut balance_sum = TokenAmount::zero();
        let mut maybe_err: Option<StateInvariantError> = None;
        let balances = self.get_balance_map(bs)?;
        let res = balances.for_each(|holder_key, balance| {
            let holder = match decode_actor_id(holder_key) {
                None => {
                    maybe_err = Some(StateInvariantError::InvalidHolderKey(holder_key.clone()));
                    bail!("invariant failed");
                }
                Some(a) => a,
            };
            // all balances must be positive
            if balance.is_negative() {
                maybe_err = Some(StateInvariantError::BalanceNegative {
                    account: holder,
                    balance: balance.clone(),
                });
                bail!("invariant failed")
            }
            // zero balances should not be stored in the Hamt
            if balance.is_zero() {
                maybe_err = Some(StateInvariantError::ExplicitZeroBalance(holder));
                bail!("invariant failed")
            }

            balance_sum = balance_sum.clone() + balance.clone();
            Ok(())
        });

        if res.is_err() {
            return Err(maybe_err.unwrap());
        }

        // all balances must add up to the issued counter
        if balance_sum.ne(&self.issued) {
            return Err(StateInvariantError::BalanceIssuedMismatch {
                issued: self.issued.clone(),
                balance_sum,
            });
        }

        Ok(StateSummary {
            balance_map: self.get_balance_map(bs)?,
            issued: self.issued.clone(),
            max_shares: self.max_shares.clone(),
        })
    }
}

pub fn actor_id_key(a: ActorID) -> BytesKey {
    a.encode_var_vec().into()
}

pub fn decode_actor_id(key: &BytesKey) -> Option<ActorID> {
    u64::decode_var(key.0.as_slice()).map(|a| a.0)
}

impl Cbor for LedgerState {}

/// A summary of the current state to allow checking application specific invariants
pub struct StateSummary<'bs, BS>
where
    BS: Blockstore,
{
    pub balance_map: BalanceMap<'bs, BS>,
    pub issued: TokenAmount,
    pub max_shares: TokenAmount,
}

#[cfg(test)]
mod test {
    use fvm_ipld_blockstore::MemoryBlockstore;
    use fvm_shared::econ::TokenAmount;
    use fvm_shared::{bigint::Zero, ActorID};

    use super::LedgerState;
    use crate::token::state::{StateError, StateInvariantError};
    use crate::token::types::OfferingTerms;

    const OWNER: ActorID = 1;
    const CUSTODIAN: ActorID = 2;

    fn offering() -> OfferingTerms {
        OfferingTerms {
            name: String::from("Security Token"),
            symbol: String::from("ST"),
            offering_name: String::from("Token Offering"),
            offering_type: String::from("Equity"),
            share_price: TokenAmount::from_atto(100),
        }
    }

    fn new_state(bs: &MemoryBlockstore) -> LedgerState {
        LedgerState::new(bs, offering(), TokenAmount::from_atto(100_000), OWNER, CUSTODIAN)
            .unwrap()
    }

    #[test]
    fn it_instantiates() {
        let bs = &MemoryBlockstore::new();
        let state = new_state(bs);
        let cid = state.save(bs).unwrap();
        let saved_state = LedgerState::load(bs, &cid).unwrap();
        assert_eq!(state, saved_state);
    }

    #[test]
    fn it_increases_balance_from_zero() {
        let bs = &MemoryBlockstore::new();
        let mut state = new_state(bs);
        let holder: ActorID = 3;

        // Initially any holder has an implicit balance of 0
        assert_eq!(state.get_balance(bs, holder).unwrap(), TokenAmount::zero());

        let amount = TokenAmount::from_atto(100);
        state.change_balance_by(bs, holder, &amount).unwrap();

        assert_eq!(state.get_balance(bs, holder).unwrap(), amount);
    }

    #[test]
    fn it_fails_to_decrease_balance_below_zero() {
        let bs = &MemoryBlockstore::new();
        let mut state = new_state(bs);
        let holder: ActorID = 3;

        // can't decrease from zero
        state.change_balance_by(bs, holder, &TokenAmount::from_atto(-1)).unwrap_err();
        let balance = state.get_balance(bs, holder).unwrap();
        assert_eq!(balance, TokenAmount::zero());

        // can't become negative from a positive balance
        state.change_balance_by(bs, holder, &TokenAmount::from_atto(50)).unwrap();
        state.change_balance_by(bs, holder, &TokenAmount::from_atto(-100)).unwrap_err();
    }

    #[test]
    fn it_sets_balances() {
        let bs = &MemoryBlockstore::new();
        let mut state = new_state(bs);
        let holder: ActorID = 3;

        // can set a positive balance
        let old_balance = state.set_balance(bs, holder, &TokenAmount::from_atto(1)).unwrap();
        assert_eq!(old_balance, TokenAmount::from_atto(0));
        let balance = state.get_balance(bs, holder).unwrap();
        assert_eq!(balance, TokenAmount::from_atto(1));

        // can set a new positive balance, overwriting the old one
        let old_balance = state.set_balance(bs, holder, &TokenAmount::from_atto(100)).unwrap();
        assert_eq!(old_balance, TokenAmount::from_atto(1));
        let balance = state.get_balance(bs, holder).unwrap();
        assert_eq!(balance, TokenAmount::from_atto(100));

        // cannot set a negative balance
        state.set_balance(bs, holder, &TokenAmount::from_atto(-1)).unwrap_err();
    }

    #[test]
    fn it_bounds_the_issued_counter_by_the_pool() {
        let bs = &MemoryBlockstore::new();
        let mut state = new_state(bs);

        // can issue the entire pool
        let issued = state.change_issued_by(&TokenAmount::from_atto(100_000)).unwrap();
        assert_eq!(issued, &TokenAmount::from_atto(100_000));

        // a single further share is rejected and the counter is unchanged
        let err = state.change_issued_by(&TokenAmount::from_atto(1)).unwrap_err();
        if let StateError::ExceedsAvailableShares { issued, max_shares, delta } = err {
            assert_eq!(issued, TokenAmount::from_atto(100_000));
            assert_eq!(max_shares, TokenAmount::from_atto(100_000));
            assert_eq!(delta, TokenAmount::from_atto(1));
        } else {
            panic!("unexpected error {err:?}");
        }
        assert_eq!(state.issued, TokenAmount::from_atto(100_000));
    }

    #[test]
    fn it_keeps_the_issued_counter_non_negative() {
        let bs = &MemoryBlockstore::new();
        let mut state = new_state(bs);

        state.change_issued_by(&TokenAmount::from_atto(500)).unwrap();
        state.change_issued_by(&TokenAmount::from_atto(-501)).unwrap_err();
        assert_eq!(state.issued, TokenAmount::from_atto(500));

        // redeeming the entire issuance is fine
        state.change_issued_by(&TokenAmount::from_atto(-500)).unwrap();
        assert_eq!(state.issued, TokenAmount::zero());
    }

    #[test]
    fn it_checks_that_balances_sum_to_the_issued_counter() {
        let bs = &MemoryBlockstore::new();
        let mut state = new_state(bs);

        // consistent mutations pass the audit
        state.change_balance_by(bs, 3, &TokenAmount::from_atto(1000)).unwrap();
        state.change_issued_by(&TokenAmount::from_atto(1000)).unwrap();
        let summary = state.check_invariants(bs).unwrap();
        assert_eq!(summary.issued, TokenAmount::from_atto(1000));

        // a balance written without adjusting the counter is caught
        state.set_balance(bs, 4, &TokenAmount::from_atto(7)).unwrap();
        let err = state.check_invariants(bs).unwrap_err();
        assert!(matches!(err, StateInvariantError::BalanceIssuedMismatch { .. }));
    }

    #[test]
    fn it_allows_variable_bit_width() {
        let bs = &MemoryBlockstore::new();
        let mut state = LedgerState::new_with_bit_width(
            bs,
            offering(),
            TokenAmount::from_atto(100_000),
            OWNER,
            CUSTODIAN,
            8,
        )
        .unwrap();
        let amount = TokenAmount::from_atto(5);
        for holder in 3_u64..13_u64 {
            state.set_balance(bs, holder, &amount).unwrap();
        }
        let cid = state.save(bs).unwrap();

        let loaded_state = LedgerState::load(bs, &cid).unwrap();
        assert_eq!(loaded_state.hamt_bit_width, 8);
        for holder in 3_u64..13_u64 {
            // loading the hamts with the wrong bitwidth would result in corrupted data
            let balance = loaded_state.get_balance(bs, holder).unwrap();
            assert_eq!(balance, amount);
        }
    }
}
