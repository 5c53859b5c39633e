// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::sync::{atomic::AtomicBool, atomic::Ordering};

#[doc(hidden)]
pub use log as _log;

#[macro_export]
macro_rules! debug {
    ($msg:literal, $($arg:tt)+) => {
        hdawg_log::_log::debug!(target: concat!("hdawg.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        hdawg_log::_log::debug!(target: concat!("hdawg.rust::", module_path!()), $msg);
    };
}

#[macro_export]
macro_rules! info {
    ($msg:literal, $($arg:tt)+) => {
        hdawg_log::_log::info!(target: concat!("hdawg.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        hdawg_log::_log::info!(target: concat!("hdawg.rust::", module_path!()), $msg);
    };
}

#[macro_export]
macro_rules! warn {
    ($msg:literal, $($arg:tt)+) => {
        hdawg_log::_log::warn!(target: concat!("hdawg.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        hdawg_log::_log::warn!(target: concat!("hdawg.rust::", module_path!()), $msg);
    };
}

/// Log a diagnostic message at info level if diagnostics logging is enabled.
///
/// Used for the per-cycle bookkeeping of the commit pipeline (dirty regions,
/// buffer lengths, verified delays), which is too chatty for normal operation.
#[macro_export]
macro_rules! diagnostic {
    ($msg:literal, $($arg:tt)+) => {
        if hdawg_log::is_diagnostics_enabled() {
             hdawg_log::_log::info!(target: concat!("hdawg.rust::", module_path!()), $msg, $($arg)+);
        }
    };
    ($msg:literal) => {
        if hdawg_log::is_diagnostics_enabled() {
            hdawg_log::_log::info!(target: concat!("hdawg.rust::", module_path!()), $msg);
        }
    };
}

static DIAGNOSTICS_ENABLED: AtomicBool = AtomicBool::new(false);

#[inline]
pub fn is_diagnostics_enabled() -> bool {
    DIAGNOSTICS_ENABLED.load(Ordering::Acquire)
}

/// Initialize the logging.
///
/// This function is meant to be called once when the host opens the
/// instrument. No concrete logger is installed here; the host framework owns
/// the `log` backend and only the diagnostics switch is ours.
pub fn init_logging(with_diagnostics: bool) {
    DIAGNOSTICS_ENABLED.store(with_diagnostics, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_switch() {
        init_logging(true);
        assert!(is_diagnostics_enabled());
        init_logging(false);
        assert!(!is_diagnostics_enabled());
    }
}
