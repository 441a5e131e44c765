//! File selection collaborators.
//!
//! The resolver and callbacks never talk to a user directly. They ask an
//! injected [`FileSelector`] for paths. A cancelled or declined selection is
//! an empty list, not an error.

use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::debug;

use crate::definition::PlaceholderKind;
use crate::error::{RecordsError, RecordsResult};

/// A request for zero or more files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionRequest {
    /// Placeholder or callback name the selection is for
    pub name: String,
    /// Prompt shown to the user
    pub title: String,
    /// Placeholder kind, `None` for callback prompts
    pub kind: Option<PlaceholderKind>,
    /// Whether more than one file may be returned
    pub multiple: bool,
}

impl SelectionRequest {
    pub fn placeholder(kind: PlaceholderKind, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            kind: Some(kind),
            multiple: true,
        }
    }

    pub fn callback(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            kind: None,
            multiple: false,
        }
    }
}

/// Supplies file paths for a selection request.
///
/// Implementations may block (for example on user input). An empty result
/// means the user declined; failures are reported as
/// [`RecordsError::PlaceholderResolution`].
pub trait FileSelector {
    fn select(&self, request: &SelectionRequest) -> RecordsResult<Vec<PathBuf>>;
}

/// Selector that replays pre-supplied answers, keyed by request name.
///
/// Every request is recorded so callers can check what was asked and how
/// often. A request with no remaining answer is an error.
#[derive(Debug, Default)]
pub struct ScriptedSelector {
    answers: Mutex<HashMap<String, VecDeque<Vec<PathBuf>>>>,
    requests: Mutex<Vec<SelectionRequest>>,
}

impl ScriptedSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an answer for the next request named `name`.
    pub fn answer<I, P>(self, name: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let paths = paths.into_iter().map(Into::into).collect();
        self.queue(name.into(), paths);
        self
    }

    /// Queue a declined (empty) selection for `name`.
    pub fn decline(self, name: impl Into<String>) -> Self {
        self.queue(name.into(), Vec::new());
        self
    }

    fn queue(&self, name: String, paths: Vec<PathBuf>) {
        let mut answers = self.answers.lock().unwrap_or_else(|e| e.into_inner());
        answers.entry(name).or_default().push_back(paths);
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<SelectionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of requests received for `name`.
    pub fn request_count(&self, name: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.name == name)
            .count()
    }
}

impl FileSelector for ScriptedSelector {
    fn select(&self, request: &SelectionRequest) -> RecordsResult<Vec<PathBuf>> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let mut answers = self.answers.lock().unwrap_or_else(|e| e.into_inner());
        answers
            .get_mut(&request.name)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| RecordsError::PlaceholderResolution {
                name: request.name.clone(),
                message: "no scripted selection available".to_string(),
            })
    }
}

/// Terminal prompt selector.
///
/// Prints the request title and reads one path per line until a blank line
/// or end of input. Paths that do not exist are reported and re-prompted.
/// Single-file requests stop after the first accepted path.
pub struct PromptSelector<R, W> {
    input: Mutex<R>,
    output: Mutex<W>,
}

impl PromptSelector<io::BufReader<io::Stdin>, io::Stderr> {
    /// Prompt on stderr, read from stdin.
    pub fn stdio() -> Self {
        Self::new(io::BufReader::new(io::stdin()), io::stderr())
    }
}

impl<R: BufRead, W: Write> PromptSelector<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: Mutex::new(input),
            output: Mutex::new(output),
        }
    }

    fn prompt(&self, request: &SelectionRequest) -> io::Result<Vec<PathBuf>> {
        let mut input = self.input.lock().unwrap_or_else(|e| e.into_inner());
        let mut output = self.output.lock().unwrap_or_else(|e| e.into_inner());

        let hint = if request.multiple {
            "one path per line, blank line to finish"
        } else {
            "blank line to skip"
        };
        writeln!(output, "{} ({}):", request.title, hint)?;
        output.flush()?;

        let mut selected = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            if input.read_line(&mut line)? == 0 {
                break;
            }
            let entry = line.trim().trim_matches(|c| c == '"' || c == '\'');
            if entry.is_empty() {
                break;
            }

            let path = PathBuf::from(entry);
            match path.canonicalize() {
                Ok(resolved) if resolved.is_file() => {
                    debug!("Selected {:?} for {}", resolved, request.name);
                    selected.push(resolved);
                    if !request.multiple {
                        break;
                    }
                }
                _ => {
                    writeln!(output, "  not a file: {}", entry)?;
                    output.flush()?;
                }
            }
        }
        Ok(selected)
    }
}

impl<R: BufRead, W: Write> FileSelector for PromptSelector<R, W> {
    fn select(&self, request: &SelectionRequest) -> RecordsResult<Vec<PathBuf>> {
        self.prompt(request)
            .map_err(|e| RecordsError::PlaceholderResolution {
                name: request.name.clone(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn test_scripted_answers_in_order() {
        let selector = ScriptedSelector::new()
            .answer("Protocol", ["/a.pdf"])
            .decline("Protocol");
        let request = SelectionRequest::placeholder(PlaceholderKind::Documents, "Protocol");

        assert_eq!(selector.select(&request).unwrap(), vec![PathBuf::from("/a.pdf")]);
        assert!(selector.select(&request).unwrap().is_empty());
        assert!(matches!(
            selector.select(&request),
            Err(RecordsError::PlaceholderResolution { .. })
        ));
        assert_eq!(selector.request_count("Protocol"), 3);
    }

    #[test]
    fn test_prompt_reads_until_blank_line() {
        let temp = tempdir().unwrap();
        let first = temp.path().join("one.png");
        let second = temp.path().join("two.png");
        fs::write(&first, b"1").unwrap();
        fs::write(&second, b"2").unwrap();

        let input = format!(
            "{}\n/definitely/missing.png\n\"{}\"\n\n",
            first.display(),
            second.display()
        );
        let mut output = Vec::new();
        let selected = {
            let selector = PromptSelector::new(Cursor::new(input), &mut output);
            selector
                .select(&SelectionRequest::placeholder(PlaceholderKind::Images, "Window"))
                .unwrap()
        };

        assert_eq!(
            selected,
            vec![first.canonicalize().unwrap(), second.canonicalize().unwrap()]
        );
        let printed = String::from_utf8(output).unwrap();
        assert!(printed.starts_with("Window ("));
        assert!(printed.contains("not a file: /definitely/missing.png"));
    }

    #[test]
    fn test_prompt_cancel_is_empty() {
        let selector = PromptSelector::new(Cursor::new("\n"), Vec::new());
        let selected = selector
            .select(&SelectionRequest::callback("imaging_metadata_file", "Imaging metadata"))
            .unwrap();
        assert!(selected.is_empty());
    }
}
