//! Transaction coordination.
//!
//! A [`TransactionManager`] drives one logical transaction across every
//! enlisted [`ResourceManager`](crate::resource::ResourceManager):
//! - one participant is committed directly (one-phase)
//! - several are prepared, then committed only if none vetoed
//! - every two-phase decision is written to the recovery log first
//! - startup recovery finishes what a crash interrupted

mod manager;
mod recovery;
mod state;

pub use manager::{Enlistment, TransactionManager};
pub use recovery::RecoveryReport;
pub use state::{TransactionInfo, TransactionState};
