//! Lab records CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3..=12: One code per records error kind (see `ExitCodes`)

use std::process::ExitCode;

use clap::Parser;
use records_templates::{ErrorKind, RecordsError};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::Cli;

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const REGISTRY_ERROR: u8 = 3;
    pub const UNKNOWN_TEMPLATE: u8 = 4;
    pub const PLACEHOLDER_RESOLUTION: u8 = 5;
    pub const INDEX_OUT_OF_RANGE: u8 = 6;
    pub const PARSE_ERROR: u8 = 7;
    pub const SYNTAX_ERROR: u8 = 8;
    pub const RENDER_ERROR: u8 = 9;
    pub const INVALID_SUBJECT: u8 = 10;
    pub const CONFIG_ERROR: u8 = 11;
    pub const EXPORT_IO_ERROR: u8 = 12;

    pub fn for_kind(kind: ErrorKind) -> u8 {
        match kind {
            ErrorKind::Registry => Self::REGISTRY_ERROR,
            ErrorKind::UnknownTemplate => Self::UNKNOWN_TEMPLATE,
            ErrorKind::PlaceholderResolution => Self::PLACEHOLDER_RESOLUTION,
            ErrorKind::IndexOutOfRange => Self::INDEX_OUT_OF_RANGE,
            ErrorKind::Parse => Self::PARSE_ERROR,
            ErrorKind::Syntax => Self::SYNTAX_ERROR,
            ErrorKind::Render => Self::RENDER_ERROR,
            ErrorKind::InvalidSubject => Self::INVALID_SUBJECT,
            ErrorKind::Config => Self::CONFIG_ERROR,
            ErrorKind::ExportIo => Self::EXPORT_IO_ERROR,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "records=debug" } else { "records=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},warn", level)));
    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }

    let result = if cli.list {
        commands::list::execute(&cli)
    } else {
        commands::generate::execute(&cli)
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let (kind, code) = categorize_error(&e);
            eprintln!("{}: {:#}", kind, e);
            ExitCode::from(code)
        }
    }
}

/// Pick the error kind label and exit code for a failed command
fn categorize_error(e: &anyhow::Error) -> (String, u8) {
    match e.downcast_ref::<RecordsError>() {
        Some(records_error) => {
            let kind = records_error.kind();
            (kind.to_string(), ExitCodes::for_kind(kind))
        }
        None => ("Error".to_string(), ExitCodes::GENERAL_ERROR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_exit_codes_are_distinct() {
        let kinds = [
            ErrorKind::Registry,
            ErrorKind::UnknownTemplate,
            ErrorKind::PlaceholderResolution,
            ErrorKind::IndexOutOfRange,
            ErrorKind::Parse,
            ErrorKind::Syntax,
            ErrorKind::Render,
            ErrorKind::InvalidSubject,
            ErrorKind::Config,
            ErrorKind::ExportIo,
        ];
        let codes: HashSet<u8> = kinds.iter().map(|k| ExitCodes::for_kind(*k)).collect();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&ExitCodes::SUCCESS));
        assert!(!codes.contains(&ExitCodes::GENERAL_ERROR));
        assert!(!codes.contains(&ExitCodes::INVALID_ARGS));
    }

    #[test]
    fn test_categorize_records_error() {
        let error = anyhow::Error::new(RecordsError::UnknownTemplate("nope".to_string()));
        let (kind, code) = categorize_error(&error.context("Failed to generate records"));
        assert_eq!(kind, "UnknownTemplateError");
        assert_eq!(code, ExitCodes::UNKNOWN_TEMPLATE);

        let (kind, code) = categorize_error(&anyhow::anyhow!("boom"));
        assert_eq!(kind, "Error");
        assert_eq!(code, ExitCodes::GENERAL_ERROR);
    }
}
