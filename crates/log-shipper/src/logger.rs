// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line format for the shipper's own logs.
//!
//! ```text
//! LOG_SHIPPER | LEVEL | [span{fields}: ]message fields
//! ```
//!
//! The prefix keeps the shipper's lines apart from the host function's output,
//! which ends up in the same log stream.

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

/// Crates whose logs are silenced regardless of the configured level.
const QUIET_CRATES: [&str; 4] = ["h2", "hyper", "rustls", "reqwest"];

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "LOG_SHIPPER | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// `EnvFilter` directives for `log_level` with the noisy HTTP crates turned off.
#[must_use]
pub fn env_filter(log_level: &str) -> String {
    let mut directives: Vec<String> = QUIET_CRATES.iter().map(|c| format!("{c}=off")).collect();
    directives.push(log_level.to_string());
    directives.join(",")
}
