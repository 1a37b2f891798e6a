//! Standard exit codes for CLI operations.

#![allow(dead_code)]

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - any conversion or IO failure
pub const ERROR: i32 = 1;

/// Usage error - invalid arguments or options (sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
