//! Build-time helpers for rendering the Dockyard manual pages.

use std::fmt::Write as _;
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Iso8601;

const FALLBACK_DATE: &str = "1970-01-01";

/// Date stamped on the page when `SOURCE_DATE_EPOCH` is absent or unusable.
pub const fn fallback_date() -> &'static str {
    FALLBACK_DATE
}

/// Formats a `SOURCE_DATE_EPOCH` value as an ISO 8601 date.
///
/// Unusable values fall back to [`fallback_date`] and push a warning, without
/// the `cargo:warning=` prefix, onto `warnings`.
///
/// # Examples
/// ```
/// use dockyard_build_util::manual_date;
///
/// let mut warnings = Vec::new();
/// assert_eq!(manual_date(Some("86400"), &mut warnings), "1970-01-02");
/// assert!(warnings.is_empty());
/// ```
pub fn manual_date(source_date_epoch: Option<&str>, warnings: &mut Vec<String>) -> String {
    let Some(raw) = source_date_epoch else {
        return FALLBACK_DATE.into();
    };
    let Ok(seconds) = raw.trim().parse::<i64>() else {
        warnings.push(format!(
            "Invalid SOURCE_DATE_EPOCH '{raw}'; expected integer seconds since Unix epoch; \
             falling back to {FALLBACK_DATE}"
        ));
        return FALLBACK_DATE.into();
    };
    OffsetDateTime::from_unix_timestamp(seconds)
        .ok()
        .and_then(|moment| moment.format(&Iso8601::DATE).ok())
        .unwrap_or_else(|| {
            warnings.push(format!(
                "Invalid SOURCE_DATE_EPOCH '{raw}'; not a representable date; falling back to \
                 {FALLBACK_DATE}"
            ));
            FALLBACK_DATE.into()
        })
}

/// Finds the `target` directory enclosing a build script's `OUT_DIR`.
#[must_use]
pub fn target_root(out_dir: &Utf8Path) -> Option<&Utf8Path> {
    out_dir.ancestors().find(|dir| dir.file_name() == Some("target"))
}

/// Directory packagers collect pages from: `target/generated-man/<target>/<profile>`.
///
/// Falls back to a relative `target` when `out_dir` is not inside one.
#[must_use]
pub fn generated_man_dir(out_dir: Option<&Utf8Path>, target: &str, profile: &str) -> Utf8PathBuf {
    out_dir
        .and_then(target_root)
        .map_or_else(|| Utf8PathBuf::from("target"), Utf8Path::to_path_buf)
        .join("generated-man")
        .join(target)
        .join(profile)
}

/// An environment variable documented on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    /// Variable name.
    pub name: String,
    /// One-line description.
    pub summary: String,
}

/// A section 8 manual page for a daemon binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManPage {
    name: String,
    version: String,
    date: String,
    summary: String,
    description: Vec<String>,
    environment: Vec<EnvEntry>,
    files: Vec<(String, String)>,
}

impl ManPage {
    /// Starts a page for `name` at `version`.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            date: date.into(),
            summary: String::new(),
            description: Vec::new(),
            environment: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Sets the NAME line summary.
    #[must_use]
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Appends a DESCRIPTION paragraph.
    #[must_use]
    pub fn paragraph(mut self, text: impl Into<String>) -> Self {
        self.description.push(text.into());
        self
    }

    /// Documents an environment variable.
    #[must_use]
    pub fn env(mut self, name: impl Into<String>, summary: impl Into<String>) -> Self {
        self.environment.push(EnvEntry {
            name: name.into(),
            summary: summary.into(),
        });
        self
    }

    /// Documents a file the daemon reads or writes.
    #[must_use]
    pub fn file(mut self, path: impl Into<String>, summary: impl Into<String>) -> Self {
        self.files.push((path.into(), summary.into()));
        self
    }

    /// File name of the rendered page.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.8", self.name)
    }

    /// Renders the page as roff.
    #[must_use]
    pub fn render(&self) -> String {
        let mut page = String::new();
        let _ = writeln!(
            page,
            ".TH \"{}\" \"8\" \"{}\" \"{} {}\" \"System Administration\"",
            self.name.to_uppercase(),
            self.date,
            self.name,
            self.version
        );
        let _ = writeln!(page, ".SH NAME\n{} \\- {}", self.name, escape(&self.summary));
        let _ = writeln!(page, ".SH SYNOPSIS\n.B {}", self.name);
        if !self.description.is_empty() {
            page.push_str(".SH DESCRIPTION\n");
            let paragraphs: Vec<String> = self.description.iter().map(|text| escape(text)).collect();
            page.push_str(&paragraphs.join("\n.PP\n"));
            page.push('\n');
        }
        if !self.environment.is_empty() {
            page.push_str(".SH ENVIRONMENT\n");
            for entry in &self.environment {
                let _ = writeln!(page, ".TP\n.B {}\n{}", entry.name, escape(&entry.summary));
            }
        }
        if !self.files.is_empty() {
            page.push_str(".SH FILES\n");
            for (path, summary) in &self.files {
                let _ = writeln!(page, ".TP\n.I {path}\n{}", escape(summary));
            }
        }
        page
    }
}

// Lines starting with a control character would be read as requests.
fn escape(text: &str) -> String {
    let escaped = text.replace('\\', "\\e");
    escaped
        .lines()
        .map(|line| {
            if line.starts_with('.') || line.starts_with('\'') {
                format!("\\&{line}")
            } else {
                line.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Writes `data` to `dir/name` through a sibling temporary file.
///
/// # Errors
///
/// Propagates any filesystem error.
pub fn write_atomically(dir: &Utf8Path, name: &str, data: &[u8]) -> io::Result<Utf8PathBuf> {
    fs::create_dir_all(dir)?;
    let destination = dir.join(name);
    let staging = dir.join(format!(".{name}.tmp"));
    fs::write(&staging, data)?;
    fs::rename(&staging, &destination)?;
    Ok(destination)
}
