//! Console rendering of import runs and status reports.

use std::collections::BTreeMap;
use std::io::Write;

use chrono::SecondsFormat;
use serde::Serialize;
use uls_core::{ImportRun, RecordTypeReport};
use uls_data::StatusReport;

use crate::CliError;

pub(crate) fn line(writer: &mut dyn Write, text: &str) -> Result<(), CliError> {
    writeln!(writer, "{text}").map_err(CliError::WriteOutput)
}

pub(crate) fn write_run(writer: &mut dyn Write, run: &ImportRun) -> Result<(), CliError> {
    let finished = run.finished_at.map_or_else(
        || "unfinished".to_owned(),
        |at| at.to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    line(
        writer,
        &format!(
            "run {} {} {} started {} finished {} from {}",
            run.id,
            run.mode,
            run.status,
            run.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            finished,
            run.sources.join(", ")
        ),
    )?;
    if let Some(error) = &run.error {
        line(writer, &format!("  error: {error}"))?;
    }
    for report in &run.record_types {
        write_record_type(writer, report)?;
    }
    let stale: Vec<String> = run.stale_record_types().map(ToString::to_string).collect();
    if !stale.is_empty() {
        line(writer, &format!("  stale record types: {}", stale.join(", ")))?;
    }
    Ok(())
}

fn write_record_type(writer: &mut dyn Write, report: &RecordTypeReport) -> Result<(), CliError> {
    let counts = &report.counts;
    line(
        writer,
        &format!(
            "  {} {} {} read={} loaded={} warnings={} kept={} rejected={} unrecognized={}",
            report.type_code,
            report.table_name.as_deref().unwrap_or("-"),
            report.outcome,
            counts.read,
            counts.loaded,
            counts.loaded_with_warnings,
            counts.kept,
            counts.rejected,
            counts.unrecognized
        ),
    )?;
    if let Some(error) = &report.error {
        line(writer, &format!("    error: {error}"))?;
    }
    Ok(())
}

pub(crate) fn write_status(writer: &mut dyn Write, report: &StatusReport) -> Result<(), CliError> {
    if report.runs.is_empty() {
        line(writer, "no import runs recorded")?;
    }
    for run in &report.runs {
        write_run(writer, run)?;
    }
    line(writer, "tables:")?;
    for (table, rows) in &report.tables {
        line(writer, &format!("  {table} {rows}"))?;
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusView<'a> {
    runs: &'a [ImportRun],
    tables: &'a BTreeMap<String, u64>,
}

pub(crate) fn write_status_json(
    writer: &mut dyn Write,
    report: &StatusReport,
) -> Result<(), CliError> {
    let view = StatusView {
        runs: &report.runs,
        tables: &report.tables,
    };
    let payload = serde_json::to_string_pretty(&view).map_err(CliError::SerializeStatus)?;
    writer
        .write_all(payload.as_bytes())
        .map_err(CliError::WriteOutput)?;
    writer.write_all(b"\n").map_err(CliError::WriteOutput)?;
    Ok(())
}
