// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Logger setup for the library and binary.
//!
//! All modules log through the [`log`] facade; [`logforth`] is the backend.
//! The filter is taken from `RUST_LOG` and defaults to [`DEFAULT_FILTER`].
//!
//! Every process registers its role in the benchmark (`primary`,
//! `secondary-<i>` or `local`) as the [`ROLE_KEY`] diagnostic, so the logs of
//! several secondaries can be told apart once collected.

use std::borrow::Cow;
use std::time::{Duration, Instant};

use logforth::color::LevelColor;
use logforth::diagnostic::{StaticDiagnostic, Visitor};
use logforth::filter::EnvFilter;
use logforth::{Diagnostic, Layout, append};

/// Filter used whenever `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "diablo=debug,info";

/// Diagnostic key holding the role of this process.
pub const ROLE_KEY: &str = "role";

/// Single-line layout: seconds since startup, colored level, role, module and message.
#[derive(Clone, Copy, Debug)]
struct BenchLayout {
    start: Instant,
}

impl BenchLayout {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

/// Picks the role out of the registered diagnostics.
#[derive(Default)]
struct RoleVisitor(Option<String>);

impl Visitor for RoleVisitor {
    fn visit(&mut self, key: Cow<str>, value: Cow<str>) -> anyhow::Result<()> {
        if key == ROLE_KEY {
            self.0 = Some(value.into_owned());
        }
        Ok(())
    }
}

impl Layout for BenchLayout {
    fn format(
        &self,
        record: &log::Record,
        diagnostics: &[Box<dyn Diagnostic>],
    ) -> anyhow::Result<Vec<u8>> {
        let mut role = RoleVisitor::default();
        for d in diagnostics {
            d.visit(&mut role)?;
        }
        let role = role.0.as_deref().unwrap_or("-");
        let clock = format_clock(self.start.elapsed());
        let colors = LevelColor::default();
        let level = colors.colorize_record_level(false, record.level());
        let target = record.target().trim_start_matches("diablo::");
        let message = record.args();
        Ok(format!("{clock} {level:>5} {role} [{target}] {message}").into_bytes())
    }
}

fn format_clock(elapsed: Duration) -> String {
    format!("{:>9.3}s", elapsed.as_secs_f64())
}

/// Logs to stderr using the compact layout, tagging every line with `role`.
pub fn enable_logforth(role: &str) {
    enable_logforth_append(role, append::Stderr::default().with_layout(BenchLayout::new()));
}

/// Logs to stderr using logforth's default (timestamped) layout.
///
/// Preferable when output of several secondaries is collected into one file.
pub fn enable_logforth_stderr(role: &str) {
    enable_logforth_append(role, append::Stderr::default());
}

fn role_diagnostic(role: &str) -> StaticDiagnostic {
    let mut diagnostic = StaticDiagnostic::default();
    diagnostic.insert(ROLE_KEY, role);
    diagnostic
}

fn enable_logforth_append<A: logforth::Append>(role: &str, to_append: A) {
    let filter = EnvFilter::from_default_env_or(DEFAULT_FILTER);
    logforth::builder()
        .dispatch(|d| {
            d.filter(filter)
                .diagnostic(role_diagnostic(role))
                .append(to_append)
        })
        .apply();
}

#[cfg(test)]
mod tests {
    use log::{Level, debug, error, info, log_enabled, trace, warn};

    use super::*;

    #[test]
    fn default_filter() {
        enable_logforth("test");

        // crate-external targets default to "info"
        assert!(log_enabled!(target: "other", Level::Error));
        assert!(log_enabled!(target: "other", Level::Warn));
        assert!(log_enabled!(target: "other", Level::Info));
        assert!(!log_enabled!(target: "other", Level::Debug));
        assert!(!log_enabled!(target: "other", Level::Trace));

        // our own modules log down to "debug"
        assert!(log_enabled!(target: "diablo::engine", Level::Debug));
        assert!(!log_enabled!(target: "diablo::chain::dispatch", Level::Trace));

        trace!("trace");
        debug!("debug");
        info!("info");
        warn!("warn");
        error!("error");
    }

    #[test]
    fn lines_carry_role_and_module() {
        let layout = BenchLayout::new();
        let diagnostics: Vec<Box<dyn Diagnostic>> = vec![role_diagnostic("secondary-1").into()];
        let line = layout
            .format(
                &log::Record::builder()
                    .args(format_args!("benchmark started"))
                    .level(Level::Info)
                    .target("diablo::engine")
                    .build(),
                &diagnostics,
            )
            .unwrap();
        let line = String::from_utf8(line).unwrap();
        assert!(line.trim_start().starts_with("0."), "{line}");
        assert!(line.ends_with("secondary-1 [engine] benchmark started"), "{line}");

        let line = layout
            .format(
                &log::Record::builder()
                    .args(format_args!("x"))
                    .level(Level::Warn)
                    .target("reqwest::connect")
                    .build(),
                &[],
            )
            .unwrap();
        assert!(String::from_utf8(line).unwrap().ends_with("- [reqwest::connect] x"));
    }

    #[test]
    fn clock_is_fixed_width() {
        assert_eq!(format_clock(Duration::from_millis(1_500)), "    1.500s");
        assert_eq!(format_clock(Duration::from_secs(3_600)), " 3600.000s");
    }
}
