//! Token usage accounting.
//!
//! [`UsageLedger`] prices and records every completed call of a run;
//! [`UsageStore`] appends the run totals to durable files when the run ends.

mod ledger;
mod store;

pub use ledger::*;
pub use store::*;
