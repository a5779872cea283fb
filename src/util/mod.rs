//! Building blocks of a backup run that don't know about plans.

pub mod process;
pub mod retention;
