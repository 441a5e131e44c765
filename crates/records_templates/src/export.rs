//! Export packaging.
//!
//! Writes `<exports>/<subject>/<key>_<subject>.md` and copies every referenced
//! file into `<exports>/<subject>/files/`, rewriting links to the copies.
//! The new `files/` directory is staged next to the old one and swapped in
//! only after every copy succeeded. The old `files/` is kept aside until the
//! markdown is in place and restored if that last step fails.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{RecordsError, RecordsResult};
use crate::links;

/// Name of the directory holding copied files.
pub const FILES_DIR: &str = "files";

/// Where the previous `files/` waits while a new export is swapped in.
const PREVIOUS_FILES_DIR: &str = ".files-previous";

/// A file copied into the export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedFile {
    pub source: PathBuf,
    /// Path relative to the subject directory, e.g. `files/scan.xml`
    pub relative: String,
}

/// What an export wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub subject_dir: PathBuf,
    pub markdown_path: PathBuf,
    pub files: Vec<ExportedFile>,
}

/// Materializes rendered markdown and its referenced files.
#[derive(Debug, Clone)]
pub struct ExportPackager {
    exports_dir: PathBuf,
}

impl ExportPackager {
    pub fn new(exports_dir: impl Into<PathBuf>) -> Self {
        Self {
            exports_dir: exports_dir.into(),
        }
    }

    pub fn subject_dir(&self, subject: &str) -> PathBuf {
        self.exports_dir.join(subject)
    }

    pub fn markdown_path(&self, key: &str, subject: &str) -> PathBuf {
        self.subject_dir(subject)
            .join(format!("{}_{}.md", key, subject))
    }

    /// Write the export. On failure a subject directory created by this call
    /// is removed again and an existing export is left as it was.
    pub fn write(
        &self,
        key: &str,
        subject: &str,
        markdown: &str,
        references: &[PathBuf],
    ) -> RecordsResult<ExportReport> {
        for source in references {
            if !source.is_file() {
                return Err(RecordsError::export_io(
                    source,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "referenced file not found"),
                ));
            }
        }

        let subject_dir = self.subject_dir(subject);
        let created = !subject_dir.exists();
        fs::create_dir_all(&subject_dir).map_err(|e| RecordsError::export_io(&subject_dir, e))?;

        let result = self.write_into(&subject_dir, key, subject, markdown, references);
        if result.is_err() && created {
            let _ = fs::remove_dir_all(&subject_dir);
        }
        result
    }

    fn write_into(
        &self,
        subject_dir: &Path,
        key: &str,
        subject: &str,
        markdown: &str,
        references: &[PathBuf],
    ) -> RecordsResult<ExportReport> {
        let staging = tempfile::Builder::new()
            .prefix(".files-")
            .tempdir_in(subject_dir)
            .map_err(|e| RecordsError::export_io(subject_dir, e))?;

        let mut markdown = markdown.to_string();
        let mut files = Vec::with_capacity(references.len());
        for (source, name) in destination_names(references) {
            let target = staging.path().join(&name);
            fs::copy(&source, &target).map_err(|e| RecordsError::export_io(&source, e))?;
            debug!("Copied {:?} -> {}/{}", source, FILES_DIR, name);

            let relative = format!("{}/{}", FILES_DIR, name);
            markdown = links::rewrite(&markdown, &source, &relative);
            files.push(ExportedFile { source, relative });
        }

        let markdown_path = self.markdown_path(key, subject);
        let mut temp =
            NamedTempFile::new_in(subject_dir).map_err(|e| RecordsError::export_io(subject_dir, e))?;
        temp.write_all(markdown.as_bytes())
            .map_err(|e| RecordsError::export_io(temp.path(), e))?;

        let files_dir = subject_dir.join(FILES_DIR);
        let previous = subject_dir.join(PREVIOUS_FILES_DIR);
        if previous.exists() {
            fs::remove_dir_all(&previous).map_err(|e| RecordsError::export_io(&previous, e))?;
        }
        let had_previous = files_dir.exists();
        if had_previous {
            fs::rename(&files_dir, &previous).map_err(|e| RecordsError::export_io(&files_dir, e))?;
        }

        let staged = staging.keep();
        if let Err(e) = fs::rename(&staged, &files_dir) {
            let _ = fs::remove_dir_all(&staged);
            restore_previous(&previous, &files_dir, had_previous);
            return Err(RecordsError::export_io(&files_dir, e));
        }

        if let Err(e) = temp.persist(&markdown_path) {
            let _ = fs::remove_dir_all(&files_dir);
            restore_previous(&previous, &files_dir, had_previous);
            return Err(RecordsError::export_io(&markdown_path, e.error));
        }

        if had_previous {
            if let Err(e) = fs::remove_dir_all(&previous) {
                warn!("Could not remove previous export files {:?}: {}", previous, e);
            }
        }

        info!(
            "Exported {} with {} file(s) to {:?}",
            key,
            files.len(),
            markdown_path
        );
        Ok(ExportReport {
            subject_dir: subject_dir.to_path_buf(),
            markdown_path,
            files,
        })
    }
}

fn restore_previous(previous: &Path, files_dir: &Path, had_previous: bool) {
    if had_previous {
        if let Err(e) = fs::rename(previous, files_dir) {
            warn!("Could not restore previous export files {:?}: {}", previous, e);
        }
    }
}

/// Assign each distinct source a unique file name. Clashing names get a
/// numeric suffix: `scan.xml`, `scan_1.xml`, `scan_2.xml`.
pub fn destination_names(references: &[PathBuf]) -> Vec<(PathBuf, String)> {
    let mut seen_sources = HashSet::new();
    let mut used = HashSet::new();
    let mut names = Vec::new();

    for source in references {
        if !seen_sources.insert(source.clone()) {
            continue;
        }
        let stem = links::file_stem(source);
        let extension = source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut name = format!("{}{}", stem, extension);
        let mut suffix = 0;
        while !used.insert(name.to_lowercase()) {
            suffix += 1;
            name = format!("{}_{}{}", stem, suffix, extension);
        }
        names.push((source.clone(), name));
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::TableModel;
    use tempfile::tempdir;

    #[test]
    fn test_collision_safe_names() {
        let references = vec![
            PathBuf::from("/day1/scan.xml"),
            PathBuf::from("/day2/scan.xml"),
            PathBuf::from("/day1/scan.xml"),
            PathBuf::from("/day3/Scan.XML"),
        ];
        let names: Vec<String> = destination_names(&references)
            .into_iter()
            .map(|(_, name)| name)
            .collect();
        assert_eq!(names, vec!["scan.xml", "scan_1.xml", "Scan_2.XML"]);
    }

    #[test]
    fn test_write_rewrites_links() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("window.png");
        fs::write(&source, b"png").unwrap();

        let packager = ExportPackager::new(temp.path().join("exports"));
        let markdown = format!("Window:\n{}\n", links::markdown_link(&source));
        let report = packager
            .write("surgery", "EX042", &markdown, &[source.clone()])
            .unwrap();

        assert_eq!(
            report.markdown_path,
            temp.path().join("exports/EX042/surgery_EX042.md")
        );
        assert_eq!(
            fs::read_to_string(&report.markdown_path).unwrap(),
            "Window:\n![window](<files/window.png>)\n"
        );
        assert_eq!(
            fs::read(temp.path().join("exports/EX042/files/window.png")).unwrap(),
            b"png"
        );
        assert!(source.exists());
    }

    #[test]
    fn test_write_rewrites_links_with_pipes_in_table_cells() {
        let temp = tempdir().unwrap();
        let run = temp.path().join("run|1");
        fs::create_dir_all(&run).unwrap();
        let source = run.join("scan.xml");
        fs::write(&source, b"<PVScan/>").unwrap();

        let mut table = TableModel::fields("imaging-fov", "Imaging FOV");
        table.push_field("Metadata File", links::plain_link(&source));
        let markdown = table.to_markdown();
        assert!(markdown.contains("run\\|1"));

        let packager = ExportPackager::new(temp.path().join("exports"));
        let report = packager
            .write("surgery", "EX042", &markdown, &[source])
            .unwrap();

        let written = fs::read_to_string(&report.markdown_path).unwrap();
        assert!(written.contains("[scan.xml](<files/scan.xml>)"));
        assert!(!written.contains("run\\|1"));
    }

    #[test]
    fn test_failed_markdown_write_keeps_previous_export() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("window.png");
        fs::write(&source, b"png").unwrap();

        let packager = ExportPackager::new(temp.path().join("exports"));
        let subject_dir = packager.subject_dir("EX042");
        fs::create_dir_all(subject_dir.join(FILES_DIR)).unwrap();
        fs::write(subject_dir.join(FILES_DIR).join("old.png"), b"old").unwrap();
        // A directory in place of the markdown file makes the final rename fail.
        let markdown_path = packager.markdown_path("surgery", "EX042");
        fs::create_dir_all(markdown_path.join("blocker")).unwrap();

        let result = packager.write("surgery", "EX042", "x", &[source]);

        assert!(matches!(result, Err(RecordsError::ExportIo { .. })));
        assert_eq!(fs::read(subject_dir.join("files/old.png")).unwrap(), b"old");
        assert!(!subject_dir.join("files/window.png").exists());
        assert!(markdown_path.is_dir());

        let mut entries: Vec<String> = fs::read_dir(&subject_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();
        assert_eq!(entries, vec!["files", "surgery_EX042.md"]);
    }

    #[test]
    fn test_missing_reference_creates_nothing() {
        let temp = tempdir().unwrap();
        let packager = ExportPackager::new(temp.path().join("exports"));
        let result = packager.write(
            "surgery",
            "EX042",
            "x",
            &[temp.path().join("missing.png")],
        );

        assert!(matches!(result, Err(RecordsError::ExportIo { .. })));
        assert!(!packager.subject_dir("EX042").exists());
    }
}
