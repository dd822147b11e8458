pub mod auth;
pub mod ballot;
pub mod election;
pub mod export;
pub mod ledger;
pub mod roster;
pub mod tally;
