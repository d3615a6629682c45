//! Ledger library for a tokenized security with a fixed share pool.
//!
//! The ledger tracks a single offering: fixed terms recorded at creation (name,
//! symbol, offering metadata, share price, custodian), a hard cap on the number
//! of shares that can ever be issued, and a per-holder balance map. Shares are
//! allocated by issuance and returned by redemption; an owner address
//! administers the offering and can be replaced. All mutations are atomic
//! accept/reject transitions on the IPLD state tree.

pub mod token;
