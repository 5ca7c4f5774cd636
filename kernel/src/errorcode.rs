// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Standard return errors.

/// Standard errors used across the port stack.
///
/// This is a closed set: drivers either recover internally (protocol
/// resync, transaction retry) or report one of these to the caller.
/// Success is expressed as `Ok(())` of a `Result`, never as a variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// Generic failure condition.
    FAIL,
    /// Underlying resource is busy.
    BUSY,
    /// Operation in progress, call again later to complete.
    AGAIN,
    /// No such device, or not the expected device.
    NODEV,
    /// Operation is not supported by the device that is attached.
    NOSUPPORT,
    /// Operation is not permitted in the current mode.
    INVALOP,
    /// An argument is invalid or out of range.
    INVAL,
    /// A size or length is invalid.
    SIZE,
    /// A deadline expired before the operation completed.
    TIMEDOUT,
    /// Lower-level hardware driver reported an I/O fault.
    IO,
}
