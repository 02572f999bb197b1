//! Registry of input files.
//!
//! Every file that enters the compiler (the main translation unit, included
//! headers, and synthetic buffers produced by macro pasting or `_Pragma`)
//! is registered here. Diagnostics consult the registry to render the
//! offending source line.

/// One registered input file.
#[derive(Debug)]
pub struct SourceFile {
    pub name: String,
    pub contents: String,
    pub file_no: usize,
    /// False for synthetic buffers (paste results, built-in macro bodies).
    pub is_input: bool,
    /// Index into the include search path list this file was found in.
    /// Used by `#include_next` to continue the search past it.
    pub incl_no: Option<usize>,
    /// Line-number adjustment from `#line` directives.
    pub line_delta: i64,
    /// Display name override from `#line N "name"`.
    pub display_name: Option<String>,
}

impl SourceFile {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn display_line(&self, line: u32) -> i64 {
        line as i64 + self.line_delta
    }
}

#[derive(Debug, Default)]
pub struct SourceManager {
    files: Vec<SourceFile>,
}

impl SourceManager {
    pub fn new() -> Self {
        SourceManager { files: Vec::new() }
    }

    pub fn add(&mut self, name: &str, contents: String, is_input: bool) -> usize {
        let file_no = self.files.len();
        self.files.push(SourceFile {
            name: name.to_string(),
            contents,
            file_no,
            is_input,
            incl_no: None,
            line_delta: 0,
            display_name: None,
        });
        file_no
    }

    pub fn get_mut(&mut self, file_no: usize) -> &mut SourceFile {
        &mut self.files[file_no]
    }

    pub fn get(&self, file_no: usize) -> &SourceFile {
        &self.files[file_no]
    }

    pub fn set_incl_no(&mut self, file_no: usize, incl_no: usize) {
        self.files[file_no].incl_no = Some(incl_no);
    }

    /// The text of a 1-based line, without its trailing newline.
    pub fn line_text(&self, file_no: usize, line: u32) -> Option<&str> {
        let file = self.files.get(file_no)?;
        file.contents
            .lines()
            .nth(line.saturating_sub(1) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_lookup() {
        let mut sm = SourceManager::new();
        let no = sm.add("t.c", "int x;\nint y;\n".to_string(), true);
        assert_eq!(sm.line_text(no, 1), Some("int x;"));
        assert_eq!(sm.line_text(no, 2), Some("int y;"));
        assert_eq!(sm.line_text(no, 3), None);
    }
}
