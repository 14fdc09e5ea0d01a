//! Contracts for external collaborators.
//!
//! The core never talks to the network itself; the credit ledger, the leak
//! database and the device identity service are supplied by the caller behind
//! these traits. Only request/response shapes are fixed here.

use crate::error::Result;

/// Outcome of a debit request against the credit ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Ok,
    Insufficient,
}

/// Credit ledger collaborator. Debited before a transform starts; refunded
/// when the transform fails internally. Balances live entirely on the other
/// side of this trait.
pub trait CreditLedger {
    fn debit(&self, amount: u32) -> Result<DebitOutcome>;
    fn refund(&self, amount: u32, reason: &str) -> Result<()>;
}

/// A leak-database match for an extracted watermark code.
#[derive(Debug, Clone, PartialEq)]
pub struct LeakRecord {
    pub owner: String,
    pub metadata: String,
}

/// Leak database collaborator: code-to-owner resolution is external; the
/// detector only ever produces candidate frequencies.
pub trait LeakDirectory {
    fn lookup(&self, code: u32) -> Result<Option<LeakRecord>>;
}

/// Device identity collaborator: an opaque per-device hash the pipeline may
/// weave into an artifact header. The core performs no fingerprinting.
pub trait DeviceIdentity {
    fn device_hash(&self) -> Result<String>;
}

/// Ledger that approves every debit. Development and test use.
pub struct NullLedger;

impl CreditLedger for NullLedger {
    fn debit(&self, _amount: u32) -> Result<DebitOutcome> {
        Ok(DebitOutcome::Ok)
    }

    fn refund(&self, _amount: u32, _reason: &str) -> Result<()> {
        Ok(())
    }
}
