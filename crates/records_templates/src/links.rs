//! Markdown link forms for referenced files.
//!
//! Every link the engine emits uses one of three forms so the export step can
//! find and rewrite it:
//!
//! - images: `![stem](<path>)`
//! - documents Obsidian can preview inline: `![[path]]`
//! - anything else: `[file name](<path>)`

use std::path::Path;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "svg", "webp", "avif"];

const PREVIEW_EXTENSIONS: &[&str] = &[
    "pdf", "md", "canvas", "mp3", "wav", "m4a", "ogg", "flac", "mp4", "webm", "mov", "mkv",
];

/// How a file is linked from markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStyle {
    Image,
    Embed,
    Plain,
}

impl LinkStyle {
    pub fn for_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            LinkStyle::Image
        } else if PREVIEW_EXTENSIONS.contains(&extension.as_str()) {
            LinkStyle::Embed
        } else {
            LinkStyle::Plain
        }
    }
}

/// Link a file using the style its extension calls for.
pub fn markdown_link(path: &Path) -> String {
    match LinkStyle::for_path(path) {
        LinkStyle::Image => format!("![{}](<{}>)", file_stem(path), path.display()),
        LinkStyle::Embed => format!("![[{}]]", path.display()),
        LinkStyle::Plain => plain_link(path),
    }
}

/// Link a file without embedding it.
pub fn plain_link(path: &Path) -> String {
    format!("[{}](<{}>)", file_name(path), path.display())
}

/// Point every link to `from` at `to` instead.
///
/// Links inside table cells have `|` escaped as `\|`; those are matched too
/// and keep the escaping.
pub fn rewrite(markdown: &str, from: &Path, to: &str) -> String {
    let from = from.display().to_string();
    let mut markdown = replace_link(markdown, &from, to);
    if from.contains('|') {
        markdown = replace_link(&markdown, &from.replace('|', "\\|"), &to.replace('|', "\\|"));
    }
    markdown
}

fn replace_link(markdown: &str, from: &str, to: &str) -> String {
    markdown
        .replace(&format!("(<{}>)", from), &format!("(<{}>)", to))
        .replace(&format!("[[{}]]", from), &format!("[[{}]]", to))
}

pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_link_styles() {
        assert_eq!(
            markdown_link(Path::new("/data/window.PNG")),
            "![window](</data/window.PNG>)"
        );
        assert_eq!(
            markdown_link(Path::new("/data/protocol.pdf")),
            "![[/data/protocol.pdf]]"
        );
        assert_eq!(
            markdown_link(Path::new("/data/analysis.ipynb")),
            "[analysis.ipynb](</data/analysis.ipynb>)"
        );
    }

    #[test]
    fn test_rewrite_is_exact() {
        let markdown = format!(
            "{}\n{}\n{}",
            markdown_link(Path::new("/a/scan.pdf")),
            markdown_link(Path::new("/a/scan.pdf.bak")),
            plain_link(Path::new("/a/scan.pdf")),
        );
        let rewritten = rewrite(&markdown, &PathBuf::from("/a/scan.pdf"), "files/scan.pdf");

        assert_eq!(
            rewritten,
            "![[files/scan.pdf]]\n[scan.pdf.bak](</a/scan.pdf.bak>)\n[scan.pdf](<files/scan.pdf>)"
        );
    }

    #[test]
    fn test_rewrite_matches_escaped_pipes() {
        let markdown = "| File | [scan.xml](</data/run\\|1/scan.xml>) |\n![[/data/run|1/notes.pdf]]";
        let rewritten = rewrite(markdown, Path::new("/data/run|1/scan.xml"), "files/scan.xml");
        let rewritten = rewrite(&rewritten, Path::new("/data/run|1/notes.pdf"), "files/notes.pdf");

        assert_eq!(
            rewritten,
            "| File | [scan.xml](<files/scan.xml>) |\n![[files/notes.pdf]]"
        );
    }
}
