//! End-of-run summary.
//!
//! Printed on stdout after every scan, including interrupted ones, from
//! whatever the [`RunContext`] holds at that point:
//!
//! - infected files, then possibly infected files, each with the engines
//!   that flagged it and the link to the full report
//! - submissions whose report was not retrieved
//! - files too large to upload
//!
//! Colors come from `yansi` and are off when `--no-color` or `NO_COLOR` is
//! set. Sizes are formatted with `bytesize`.
//!
//! # Example
//!
//! ```
//! use scan_tool::context::RunContext;
//! use scan_tool::summary::Summary;
//!
//! let ctx = RunContext::new();
//! let mut out = Vec::new();
//! Summary::new(&ctx, 3).write_to(&mut out).unwrap();
//! assert!(String::from_utf8(out).unwrap().contains("No infected files found"));
//! ```

use std::io::{self, Write};

use bytesize::ByteSize;
use yansi::Paint;

use crate::context::RunContext;
use crate::report::{Report, Verdict};

/// Summary of a scan run.
#[derive(Debug)]
pub struct Summary<'a> {
    ctx: &'a RunContext,
    maybe_limit: u32,
}

impl<'a> Summary<'a> {
    /// Summarize `ctx`, classifying reports against `maybe_limit`.
    #[must_use]
    pub fn new(ctx: &'a RunContext, maybe_limit: u32) -> Self {
        Self { ctx, maybe_limit }
    }

    /// Files flagged by more engines than the limit.
    pub fn infected(&self) -> impl Iterator<Item = (&'a str, &'a Report)> + 'a {
        self.with_verdict(Verdict::Infected)
    }

    /// Files flagged by at least one engine but no more than the limit, or
    /// only by a Metadefender aggregate result.
    pub fn possibly_infected(&self) -> impl Iterator<Item = (&'a str, &'a Report)> + 'a {
        self.with_verdict(Verdict::PossiblyInfected)
    }

    fn with_verdict(&self, verdict: Verdict) -> impl Iterator<Item = (&'a str, &'a Report)> + 'a {
        let limit = self.maybe_limit;
        self.ctx
            .findings()
            .filter(move |(_, report)| report.verdict(limit) == verdict)
    }

    /// Write the summary.
    ///
    /// # Errors
    ///
    /// Returns any error of `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let infected: Vec<_> = self.infected().collect();
        let possibly: Vec<_> = self.possibly_infected().collect();

        if infected.is_empty() && possibly.is_empty() {
            writeln!(writer, "{}", "No infected files found.".green())?;
        }
        if !infected.is_empty() {
            writeln!(writer, "{}", "Infected files:".red().bold())?;
            for (file, report) in &infected {
                write_finding(writer, file, report)?;
            }
        }
        if !possibly.is_empty() {
            writeln!(writer, "{}", "Possibly infected files:".yellow().bold())?;
            for (file, report) in &possibly {
                write_finding(writer, file, report)?;
            }
        }

        if !self.ctx.queued.is_empty() {
            writeln!(
                writer,
                "{}",
                "Submitted files without a report yet:".cyan().bold()
            )?;
            for scan in &self.ctx.queued {
                writeln!(writer, "  {} (scan id {})", scan.file, scan.scan_id)?;
            }
        }

        if !self.ctx.large_files.is_empty() {
            writeln!(writer, "{}", "Files too large to upload:".cyan().bold())?;
            for large in &self.ctx.large_files {
                writeln!(writer, "  {} ({})", large.file, ByteSize::b(large.size))?;
            }
        }
        Ok(())
    }

    /// The summary as a string.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = Vec::new();
        // Writing to a Vec cannot fail.
        let _ = self.write_to(&mut out);
        String::from_utf8_lossy(&out).into_owned()
    }
}

fn write_finding<W: Write>(writer: &mut W, file: &str, report: &Report) -> io::Result<()> {
    writeln!(writer, "  {} ({}/{})", file, report.positives, report.total)?;
    for engine in report.detections() {
        writeln!(writer, "      {}: {}", engine.engine, engine.result.dim())?;
    }
    if !report.permalink.is_empty() {
        writeln!(writer, "      {}", report.permalink.underline())?;
    }
    Ok(())
}
