use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use readalong::{AlignmentReport, BookAlignment, WordAlignment};
use serde::Serialize;

/// Full alignment dump written next to the report on request.
#[derive(Serialize)]
pub struct AlignmentDump<'a> {
    pub book: &'a BookAlignment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<&'a [Vec<WordAlignment>]>,
}

pub fn write_report(path: &Path, report: &AlignmentReport) -> Result<(), String> {
    write_json(path, report, "report")
}

pub fn write_alignment(path: &Path, dump: &AlignmentDump<'_>) -> Result<(), String> {
    write_json(path, dump, "alignment")
}

fn write_json<T: Serialize>(path: &Path, value: &T, what: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            format!(
                "Failed to create {what} output directory '{}': {err}",
                parent.display()
            )
        })?;
    }

    let file = File::create(path)
        .map_err(|err| format!("Failed to create {what} file '{}': {err}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|err| {
        format!(
            "Failed to serialize {what} JSON '{}': {err}",
            path.display()
        )
    })?;
    writer
        .write_all(b"\n")
        .and_then(|()| writer.flush())
        .map_err(|err| format!("Failed to finalize {what} file '{}': {err}", path.display()))?;
    Ok(())
}
