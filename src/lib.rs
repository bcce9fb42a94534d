//! rbackup: verified, timestamped directory backups to local or ssh destinations.
//!
//! This crate provides the backup and restore engine, the capability traits
//! it runs against, and the command definitions for the `rbackup` binary.

pub mod archive;
pub mod commands;
pub mod config;
pub mod destination;
pub mod error;
pub mod fs_util;
pub mod human;
pub mod logger;
pub mod remote;
pub mod restore;
pub mod retention;
pub mod session;
pub mod sysexits;
pub mod transfer;
pub mod verify;

pub use error::{BackupError, Result};
