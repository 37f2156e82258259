use core::fmt;

use camino::Utf8PathBuf;
use miette::Diagnostic;
use quill_il::FormatError;
use quill_syntax::SyntaxError;
use thiserror::Error;

/// Where a runtime error happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Canonical template name.
    pub template: String,
    /// Source line of the failing instruction.
    pub line: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.template, self.line)
    }
}

fn at(location: &Option<Location>) -> String {
    location
        .as_ref()
        .map(|l| format!(" (at {l})"))
        .unwrap_or_default()
}

/// Everything that can go wrong compiling or rendering a template.
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    /// The template source is malformed.
    #[error("failed to compile `{template}`: {source}")]
    #[diagnostic(code(quill::syntax))]
    Syntax {
        /// Canonical template name.
        template: String,
        /// Lexer, parser or compiler failure.
        #[source]
        #[diagnostic_source]
        source: SyntaxError,
    },

    /// A compiled artifact is corrupt.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Format(#[from] FormatError),

    /// No source file exists for a template name.
    #[error("template `{name}` not found in `{searched}`")]
    #[diagnostic(
        code(quill::resolution),
        help("templates are looked up with each configured extension in turn")
    )]
    Resolution {
        /// Canonical template name.
        name: String,
        /// Directory that was searched.
        searched: Utf8PathBuf,
    },

    /// Execution failed.
    #[error("{message}{}", at(.location))]
    #[diagnostic(code(quill::runtime))]
    Runtime {
        /// What went wrong.
        message: String,
        /// Template and line, when known.
        location: Option<Location>,
    },

    /// The [`Env`](crate::Env) is not usable.
    #[error("invalid configuration: {0}")]
    #[diagnostic(code(quill::config))]
    Config(String),

    /// Reading a source or writing an artifact failed.
    #[error("{path}: {source}")]
    #[diagnostic(code(quill::io))]
    Io {
        /// File or directory involved.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// A runtime error without a location; the VM fills it in.
    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime {
            message: message.into(),
            location: None,
        }
    }

    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach a location to a runtime error that does not have one yet.
    pub(crate) fn located(self, template: &str, line: u32) -> Self {
        match self {
            Error::Runtime {
                message,
                location: None,
            } => Error::Runtime {
                message,
                location: Some(Location {
                    template: template.to_owned(),
                    line,
                }),
            },
            other => other,
        }
    }
}
