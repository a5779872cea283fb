//! Library to run scheduled database backups.
//!
//! A backup [plan](plan::Plan) names a database, a dump timeout and a
//! retention count. [`backup::run`] performs a single run of a plan:
//! it dumps the database with an external tool, stores the archive and
//! the tool's log next to earlier backups of the plan and prunes the
//! oldest backups beyond the retention count.
//!
//! Deciding *when* a plan runs is up to the caller.

#![forbid(unsafe_code)]

pub mod backup;
pub mod cli;
pub mod plan;
pub mod util;
