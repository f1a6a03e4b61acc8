// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Logging setup based on `logforth`.
//!
//! By default, this crate logs at `debug` and everything else at `info`.
//! Set `RUST_LOG` to override, e.g. `RUST_LOG=benor=trace` to see every message.

use logforth::color::LevelColor;
use logforth::filter::EnvFilter;
use logforth::{Layout, append};

/// Filter used if `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "benor=debug,info";

/// Prints only level and message, without timestamps or targets.
#[derive(Clone, Copy, Debug)]
struct MinimalLogforthLayout;

impl Layout for MinimalLogforthLayout {
    fn format(
        &self,
        record: &log::Record,
        _: &[Box<dyn logforth::Diagnostic>],
    ) -> anyhow::Result<Vec<u8>> {
        let colors = LevelColor::default();
        let level = colors.colorize_record_level(false, record.level());
        let message = record.args();
        Ok(format!("{level:>5} {message}").into_bytes())
    }
}

/// Logs to stderr with the minimal layout.
pub fn enable_logforth() {
    enable_logforth_append(append::Stderr::default().with_layout(MinimalLogforthLayout));
}

/// Logs to stderr with logforth's default layout, including timestamps.
pub fn enable_logforth_stderr() {
    enable_logforth_append(append::Stderr::default());
}

fn enable_logforth_append<A: logforth::Append>(to_append: A) {
    let filter = EnvFilter::from_default_env_or(DEFAULT_FILTER);
    logforth::builder()
        .dispatch(|d| d.filter(filter).append(to_append))
        .apply();
}
