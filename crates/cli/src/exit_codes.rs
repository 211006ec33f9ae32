//! CLI Exit Code Registry
//!
//! Single source of truth for `fledger` exit codes. Exit codes are part of
//! the shell contract — scripts rely on them.
//!
//! | Code | Meaning                                             |
//! |------|-----------------------------------------------------|
//! | 0    | Success                                             |
//! | 1    | General error                                       |
//! | 2    | CLI usage error (bad args, unreadable file)         |
//! | 3    | Partial success (session completed, some files failed) |
//! | 4    | Session conflict (user already has an active session)  |
//! | 5    | Session cancelled                                   |

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// The session completed but one or more files failed.
pub const EXIT_PARTIAL: u8 = 3;

/// The user already has a pending or processing session.
pub const EXIT_SESSION_CONFLICT: u8 = 4;

/// The session was cancelled before it finished.
pub const EXIT_CANCELLED: u8 = 5;
