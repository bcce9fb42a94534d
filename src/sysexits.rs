//! Exit status codes used by rbackup, following BSD sysexits.
//! reference: [SYSEXITS](https://man.freebsd.org/cgi/man.cgi?query=sysexits&apropos=0&sektion=0&manpath=FreeBSD+11.2-stable&arch=default&format=html)

/// value: 0 <br>
/// Session succeeded, or there was deliberately nothing to do.
pub const EX_OK: i32 = 0;

/// value: 64 <br>
/// The command was used incorrectly, e.g. no subcommand was given.
pub const EX_USAGE: i32 = 64;

/// value: 65 <br>
/// An archive failed its integrity check.
pub const EX_DATAERR: i32 = 65;

/// value: 66 <br>
/// The source directory or the archive did not exist or was not readable.
pub const EX_NOINPUT: i32 = 66;

/// value: 69 <br>
/// The remote host did not answer the connectivity probe.
pub const EX_UNAVAILABLE: i32 = 69;

/// value: 71 <br>
/// The local staging area could not be created.
pub const EX_OSERR: i32 = 71;

/// value: 73 <br>
/// A destination directory (local or remote) cannot be created or written.
pub const EX_CANTCREAT: i32 = 73;

/// value: 74 <br>
/// Archive creation, placement or extraction failed, or the destination is out of space.
pub const EX_IOERR: i32 = 74;

/// value: 75 <br>
/// The secure copy failed; the external scheduler retries on its next cycle.
pub const EX_TEMPFAIL: i32 = 75;

/// value: 78 <br>
/// The configuration file or an override is invalid.
pub const EX_CONFIG: i32 = 78;
