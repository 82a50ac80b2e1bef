//! Connection smoke test
//!
//! Each check is independent and reports its own outcome; nothing here
//! returns an error.

use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::cloud::CloudClients;
use crate::config::PipelineConfig;

/// Outcome of one smoke-test check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub check: &'static str,
    pub ok: bool,
    pub detail: String,
}

impl Diagnostic {
    fn pass(check: &'static str, detail: impl Into<String>) -> Self {
        Self {
            check,
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(check: &'static str, detail: impl Into<String>) -> Self {
        Self {
            check,
            ok: false,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.ok { "OK" } else { "FAIL" };
        write!(f, "[{}] {}: {}", marker, self.check, self.detail)
    }
}

/// Run every check in order
pub async fn run_diagnostics(config: &PipelineConfig) -> Vec<Diagnostic> {
    let mut results = Vec::new();

    results.push(match std::env::current_exe() {
        Ok(path) => Diagnostic::pass(
            "executable",
            format!("{} ({} {})", path.display(), env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        ),
        Err(e) => Diagnostic::fail("executable", e.to_string()),
    });

    match CloudClients::from_config(config) {
        Ok(clients) => {
            results.push(Diagnostic::pass(
                "cloud clients",
                format!("{:?} backend for project {}", config.backend, config.project_id),
            ));
            results.push(check_credentials(&clients).await);
        }
        Err(e) => {
            results.push(Diagnostic::fail("cloud clients", e.to_string()));
            results.push(Diagnostic::fail(
                "warehouse credentials",
                "skipped, no clients",
            ));
        }
    }

    match std::env::current_dir() {
        Ok(dir) => {
            results.push(Diagnostic::pass("working directory", dir.display().to_string()));
            results.push(list_directory(&dir));
        }
        Err(e) => {
            results.push(Diagnostic::fail("working directory", e.to_string()));
            results.push(Diagnostic::fail("directory listing", "skipped, no working directory"));
        }
    }

    results
}

async fn check_credentials(clients: &CloudClients) -> Diagnostic {
    let project = clients.warehouse.project_id().to_string();
    match clients.warehouse.list_datasets().await {
        Ok(datasets) => Diagnostic::pass(
            "warehouse credentials",
            format!("project {}, {} datasets visible", project, datasets.len()),
        ),
        Err(e) => Diagnostic::fail("warehouse credentials", format!("project {}: {}", project, e)),
    }
}

/// Sorted entry names of `dir`
pub(crate) fn list_directory(dir: &Path) -> Diagnostic {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => return Diagnostic::fail("directory listing", e.to_string()),
    };

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    if names.is_empty() {
        Diagnostic::pass("directory listing", "(empty)")
    } else {
        Diagnostic::pass("directory listing", names.join(", "))
    }
}
