use serde::Deserialize;

/// One entry of Terraform's machine-readable (`-json`) log stream.
#[derive(Debug, Clone, Deserialize)]
struct LogLine {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    diagnostic: Option<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Diagnostic {
    pub severity: String,
    pub summary: String,
    #[serde(default)]
    pub detail: String,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == "error"
    }
}

/// Every diagnostic in a `-json` log stream. Lines that are not JSON (some
/// wrappers print banners) are ignored.
pub fn parse_diagnostics(stream: &str) -> Vec<Diagnostic> {
    stream
        .lines()
        .filter(|line| line.trim_start().starts_with('{'))
        .filter_map(|line| serde_json::from_str::<LogLine>(line).ok())
        .filter(|line| line.kind == "diagnostic")
        .filter_map(|line| line.diagnostic)
        .collect()
}

/// The first error-severity diagnostic, if any. Warnings are logged.
pub fn first_error(stream: &str) -> Option<Diagnostic> {
    let mut first = None;
    for diagnostic in parse_diagnostics(stream) {
        if diagnostic.is_error() {
            if first.is_none() {
                first = Some(diagnostic);
            }
        } else {
            tracing::warn!(summary = %diagnostic.summary, detail = %diagnostic.detail, "terraform warning");
        }
    }
    first
}
