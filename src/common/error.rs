//! Diagnostics.
//!
//! All fatal conditions in the compiler carry a `Diagnostic`: a message plus
//! the source position it points at, rendered GCC-style:
//!
//! ```text
//! file.c:10:5: error: expected ';'
//!     int x = 42
//!             ^
//! ```
//!
//! Fallible phases return `Result<T, Diagnostic>` and propagate with `?`;
//! the driver is the single consumer that prints and sets the exit status.

use thiserror::Error;

use crate::common::source::SourceManager;
use crate::frontend::lexer::token::Loc;

/// A source-pointed fatal error.
#[derive(Debug, Clone, Error)]
#[error("{rendered}")]
pub struct Diagnostic {
    rendered: String,
}

impl Diagnostic {
    /// Build a diagnostic pointing at `loc`, with the offending source line
    /// and a caret under the column.
    pub fn at(files: &SourceManager, loc: Loc, msg: &str) -> Diagnostic {
        let file = files.get(loc.file_no);
        let mut rendered = format!("{}:{}:{}: error: {}", file.name, loc.line, loc.col, msg);
        if let Some(text) = files.line_text(loc.file_no, loc.line) {
            rendered.push('\n');
            rendered.push_str(text);
            rendered.push('\n');
            for _ in 1..loc.col {
                rendered.push(' ');
            }
            rendered.push('^');
        }
        Diagnostic { rendered }
    }

    /// A diagnostic with no usable source position (driver-level failures).
    pub fn plain(msg: &str) -> Diagnostic {
        Diagnostic {
            rendered: format!("rycc: error: {}", msg),
        }
    }
}

pub type CResult<T> = Result<T, Diagnostic>;

/// Driver-level failures, either a compile diagnostic or an environment
/// problem (I/O, subprocess, usage).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{0}")]
    Compile(#[from] Diagnostic),
    #[error("rycc: error: {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("rycc: error: {0}")]
    Usage(String),
    #[error("rycc: error: {0}")]
    Subprocess(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_excerpt_with_caret() {
        let mut sm = SourceManager::new();
        let no = sm.add("t.c", "int x = ;\n".to_string(), true);
        let loc = Loc {
            file_no: no,
            line: 1,
            col: 9,
        };
        let d = Diagnostic::at(&sm, loc, "expected an expression");
        let s = d.to_string();
        assert!(s.starts_with("t.c:1:9: error: expected an expression"));
        assert!(s.ends_with("        ^"));
    }
}
