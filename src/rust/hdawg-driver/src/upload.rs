// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Compilation and upload of a sequencer program.
//!
//! Both phases poll the device and draw from one shared timeout budget,
//! counted in slept poll intervals.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::CacheOverflowPolicy;
use crate::context::DeviceContext;
use crate::{Error, Result};

const COMPILE_PENDING: i64 = -1;
const COMPILE_OK: i64 = 0;
const COMPILE_FAILED: i64 = 1;
const COMPILE_WARNINGS: i64 = 2;

const ELF_OK: i64 = 0;
const ELF_FAILED: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Idle,
    Compiling,
    CompileOk,
    CompileFailed,
    Uploading,
    UploadOk,
    UploadFailed,
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadStage::Idle => "idle",
            UploadStage::Compiling | UploadStage::CompileOk | UploadStage::CompileFailed => {
                "compilation"
            }
            UploadStage::Uploading | UploadStage::UploadOk | UploadStage::UploadFailed => "upload",
        };
        write!(f, "{name}")
    }
}

/// One attempt at getting a program onto the device.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSession {
    stage: UploadStage,
    compile_status: Option<i64>,
    progress: f64,
    budget: Duration,
    remaining: Duration,
    report_line: usize,
}

impl UploadSession {
    pub fn new(budget: Duration) -> Self {
        Self {
            stage: UploadStage::Idle,
            compile_status: None,
            progress: 0.0,
            budget,
            remaining: budget,
            report_line: 1,
        }
    }

    pub fn stage(&self) -> UploadStage {
        self.stage
    }

    pub fn compile_status(&self) -> Option<i64> {
        self.compile_status
    }

    /// Budget spent so far, in slept poll time.
    pub fn elapsed(&self) -> Duration {
        self.budget.saturating_sub(self.remaining)
    }

    /// Compile `program`, upload the result and check the waveform cache.
    ///
    /// `stop` is sampled at every compile poll.
    pub fn run(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        program: &str,
        stop: &AtomicBool,
    ) -> Result<()> {
        self.compile(ctx, program, stop)?;
        self.upload(ctx)?;
        check_cache(ctx)
    }

    fn spend(&mut self, ctx: &DeviceContext<'_>, interval: Duration) {
        ctx.sleeper.sleep(interval);
        self.remaining = self.remaining.saturating_sub(interval);
    }

    fn timeout(&self) -> Error {
        Error::Timeout {
            stage: self.stage,
            elapsed: self.elapsed(),
        }
    }

    fn compile(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        program: &str,
        stop: &AtomicBool,
    ) -> Result<()> {
        self.stage = UploadStage::Compiling;
        ctx.device.set_compiler_source(program)?;
        hdawg_log::debug!("Compiling sequencer program of {} bytes", program.len());
        let mut status = ctx.device.compile_status()?;
        while status == COMPILE_PENDING {
            if stop.load(Ordering::Acquire) {
                self.stage = UploadStage::CompileFailed;
                return Err(Error::Stopped);
            }
            if self.remaining.is_zero() {
                return Err(self.timeout());
            }
            self.spend(ctx, ctx.config.compile_poll_interval());
            status = ctx.device.compile_status()?;
        }
        self.compile_status = Some(status);
        match status {
            COMPILE_OK => {}
            COMPILE_WARNINGS => {
                let message = ctx.device.compile_message()?;
                ctx.warn(&format!(
                    "Compilation successful with warnings, will upload the program to the \
                    instrument.\nCompiler warning: {message}"
                ));
            }
            COMPILE_FAILED => {
                self.stage = UploadStage::CompileFailed;
                return Err(Error::CompilerFailed(ctx.device.compile_message()?));
            }
            unknown => {
                self.stage = UploadStage::CompileFailed;
                let message = ctx.device.compile_message()?;
                return Err(Error::CompilerFailed(format!(
                    "Unknown compiler status '{unknown}' reported by instrument: {message}"
                )));
            }
        }
        self.stage = UploadStage::CompileOk;
        Ok(())
    }

    fn upload(&mut self, ctx: &mut DeviceContext<'_>) -> Result<()> {
        ctx.sleeper.sleep(ctx.config.upload_settle());
        self.stage = UploadStage::Uploading;
        loop {
            self.progress = ctx.device.upload_progress()?;
            if self.progress >= 1.0
                || matches!(ctx.device.upload_status()?, ELF_OK | ELF_FAILED)
            {
                break;
            }
            if self.remaining.is_zero() {
                return Err(self.timeout());
            }
            hdawg_log::info!(
                "< {} > progress: {:.1}%",
                self.report_line,
                self.progress * 100.0
            );
            self.report_line += 1;
            self.spend(ctx, ctx.config.upload_poll_interval(self.progress));
        }
        match ctx.device.upload_status()? {
            ELF_OK => {
                hdawg_log::info!("< {} > progress: 100% - Success", self.report_line);
                self.stage = UploadStage::UploadOk;
                Ok(())
            }
            ELF_FAILED => {
                self.stage = UploadStage::UploadFailed;
                Err(Error::UploadFailed {
                    progress: self.progress,
                })
            }
            status => {
                self.stage = UploadStage::UploadFailed;
                Err(Error::UnknownUploadStatus {
                    status,
                    progress: self.progress,
                })
            }
        }
    }
}

/// Fail or warn when the program fills the waveform cache.
pub fn check_cache(ctx: &mut DeviceContext<'_>) -> Result<()> {
    let utilisation = ctx.device.get_double(&ctx.nodes.memory_usage())?;
    if utilisation < ctx.config.cache_overflow_threshold {
        return Ok(());
    }
    match ctx.config.cache_overflow {
        CacheOverflowPolicy::Halt => Err(Error::CacheOverflow { utilisation }),
        CacheOverflowPolicy::Warn => {
            ctx.warn("Warning: out of sequencer cache memory. Expect lower performance.");
            Ok(())
        }
    }
}
