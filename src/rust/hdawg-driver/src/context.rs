// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use crate::config::DriverConfig;
use crate::device::{DeviceApi, Nodes};
use crate::sleep::Sleep;
use crate::store::{ParameterStore, Severity};

/// The collaborators one device operation works with, borrowed from the session.
pub struct DeviceContext<'a> {
    pub device: &'a mut dyn DeviceApi,
    pub store: &'a mut dyn ParameterStore,
    pub sleeper: &'a dyn Sleep,
    pub config: &'a DriverConfig,
    pub nodes: &'a Nodes,
}

impl DeviceContext<'_> {
    /// Warn both in the driver log and in the host's user-facing log.
    pub fn warn(&mut self, text: &str) {
        hdawg_log::warn!("{}: {}", self.nodes.device(), text);
        self.store.log_message(text, Severity::Warning);
    }

    pub fn info(&mut self, text: &str) {
        hdawg_log::info!("{}: {}", self.nodes.device(), text);
        self.store.log_message(text, Severity::Info);
    }
}
