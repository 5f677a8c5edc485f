//! Exit codes for the CLI.
//!
//! Scripts can tell the common tree failures apart without parsing stderr.

/// Successful execution
pub const SUCCESS: u8 = 0;

/// General/unspecified error
pub const GENERAL_ERROR: u8 = 1;

/// Command-line usage error (bad arguments, malformed path or ACL)
pub const USAGE_ERROR: u8 = 2;

/// State directory missing, locked by another process, or unreadable
pub const STATE_INVALID: u8 = 3;

/// Access control refused the operation
pub const FORBIDDEN: u8 = 5;

/// The tree changed underneath the request (conflict or failed precondition)
pub const CONFLICT: u8 = 6;

/// Cell, box or resource not found
pub const NOT_FOUND: u8 = 7;

/// A lock or the cell stayed busy for too long
pub const BUSY: u8 = 8;
