// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Blocking waits between device polls.
///
/// Poll budgets are counted in slept intervals rather than wall-clock time,
/// so a sleeper that returns immediately gives reproducible timeouts.
pub trait Sleep: std::fmt::Debug {
    fn sleep(&self, duration: Duration);
}

impl Sleep for Box<dyn Sleep> {
    fn sleep(&self, duration: Duration) {
        self.as_ref().sleep(duration);
    }
}

/// A sleeper that uses [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StdSleeper;

impl Sleep for StdSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
