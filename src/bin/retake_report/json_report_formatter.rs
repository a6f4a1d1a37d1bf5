use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use retake_aligner::Report;

/// Pretty JSON with a trailing newline, to `path` or stdout.
pub fn write_report(path: Option<&Path>, report: &Report) -> Result<(), String> {
    let Some(path) = path else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        serde_json::to_writer_pretty(&mut handle, report)
            .map_err(|err| format!("Failed to serialize report JSON to stdout: {err}"))?;
        return handle
            .write_all(b"\n")
            .map_err(|err| format!("Failed to finalize report on stdout: {err}"));
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            format!(
                "Failed to create report output directory '{}': {err}",
                parent.display()
            )
        })?;
    }

    let mut file = File::create(path)
        .map_err(|err| format!("Failed to create report file '{}': {err}", path.display()))?;
    serde_json::to_writer_pretty(&mut file, report).map_err(|err| {
        format!(
            "Failed to serialize report JSON '{}': {err}",
            path.display()
        )
    })?;
    file.write_all(b"\n")
        .map_err(|err| format!("Failed to finalize report file '{}': {err}", path.display()))
}
