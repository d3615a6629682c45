use fvm_ipld_encoding::tuple::{Deserialize_tuple, Serialize_tuple};
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;

/// The external interface of a tokenized security. This represents the surface exposed to other
/// on-chain actors.
///
/// Implementations must link the methods to standard dispatch numbers (as defined by
/// [FRC-0042](https://github.com/filecoin-project/FIPs/blob/master/FRCs/frc-0042.md)).
pub trait SecurityToken {
    type TokenError;

    /// Returns the name of the security
    ///
    /// Must not be empty
    fn name(&self) -> String;

    /// Returns the ticker symbol of the security
    ///
    /// Must not be empty. Should be a short uppercase string
    fn symbol(&self) -> String;

    /// Returns the name of the offering this security was created under
    fn offering_name(&self) -> String;

    /// Returns the type of the offering, e.g. "Equity"
    fn offering_type(&self) -> String;

    /// Returns the fixed size of the share pool
    ///
    /// Must be positive and never changes. Issued shares never exceed this value.
    fn total_shares(&self) -> TotalSharesReturn;

    /// Returns the price of a single share, fixed at creation
    fn share_price(&self) -> SharePriceReturn;

    /// Returns the number of shares currently allocated to holders
    ///
    /// Must be non-negative and must equal the sum of all balances.
    fn issued_shares(&self) -> IssuedSharesReturn;

    /// Returns the custodian recorded at creation
    ///
    /// No operation alters the custodian.
    fn custodian(&self) -> Address;

    /// Returns the current owner of the offering
    ///
    /// Initially the deployer. Never the zero address.
    fn owner(&self) -> Address;

    /// Returns the balance of an address
    ///
    /// Balance is always non-negative. Uninitialised addresses have an implicit zero balance.
    fn balance_of(&mut self, params: Address) -> Result<BalanceReturn, Self::TokenError>;

    /// Allocates shares from the pool to a holder
    ///
    /// Fails if the allocation would push the issued counter beyond the total available shares.
    /// On success the holder's balance and the issued counter both increase by the requested
    /// amount.
    fn issue_shares(&mut self, params: IssueParams) -> Result<IssueReturn, Self::TokenError>;

    /// Returns shares from a holder to the pool
    ///
    /// Fails if the holder's balance is smaller than the requested amount. On success the
    /// holder's balance and the issued counter both decrease by the requested amount.
    fn redeem_shares(&mut self, params: RedeemParams) -> Result<RedeemReturn, Self::TokenError>;

    /// Replaces the owner of the offering
    ///
    /// Fails if the new owner is the zero address, leaving the current owner in place.
    fn transfer_ownership(
        &mut self,
        params: TransferOwnershipParams,
    ) -> Result<OwnershipReturn, Self::TokenError>;
}

pub type TotalSharesReturn = TokenAmount;
pub type SharePriceReturn = TokenAmount;
pub type IssuedSharesReturn = TokenAmount;
pub type BalanceReturn = TokenAmount;

/// Terms of an offering, recorded at creation and never altered
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct OfferingTerms {
    pub name: String,
    pub symbol: String,
    pub offering_name: String,
    pub offering_type: String,
    /// Price of a single share
    pub share_price: TokenAmount,
}

/// Parameters for constructing a new security token actor
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug)]
pub struct ConstructorParams {
    pub name: String,
    pub symbol: String,
    pub offering_name: String,
    pub offering_type: String,
    /// Fixed size of the share pool
    pub total_shares: TokenAmount,
    pub share_price: TokenAmount,
    /// Custodian recorded for the lifetime of the offering
    pub custodian: Address,
}

/// Instruction to allocate shares to a holder
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug)]
pub struct IssueParams {
    pub to: Address,
    /// A non-negative number of shares to allocate
    pub amount: TokenAmount,
}

/// The updated values after a successful issuance
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug)]
pub struct IssueReturn {
    /// The new balance of the recipient
    pub balance: TokenAmount,
    /// Shares issued across all holders after the allocation
    pub issued: TokenAmount,
}

/// Instruction to return shares from a holder to the pool
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug)]
pub struct RedeemParams {
    pub holder: Address,
    /// A non-negative number of shares to redeem
    pub amount: TokenAmount,
}

/// The updated values after a successful redemption
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug)]
pub struct RedeemReturn {
    /// The new balance of the holder
    pub balance: TokenAmount,
    /// Shares issued across all holders after the redemption
    pub issued: TokenAmount,
}

/// Instruction to replace the owner of the offering
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug)]
pub struct TransferOwnershipParams {
    pub new_owner: Address,
}

/// Return value after a successful ownership transfer
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug)]
pub struct OwnershipReturn {
    /// The owner that was replaced
    pub previous_owner: Address,
    /// The owner from this point on
    pub owner: Address,
}
