//! Process exit codes of `seedrun`.
//! An interrupted run that drained cleanly is a success.

pub const SUCCESS: i32 = 0;
pub const INTERNAL_ERROR: i32 = 2; // Stats dir/ledger unusable, bad configuration
