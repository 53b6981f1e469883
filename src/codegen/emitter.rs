/// Indentable output buffer for emitted Go source.
///
/// Every `line` is written at the current depth. Snippets that carry their own nesting
/// (lines starting with tabs) keep it on top of the current depth.
#[derive(Debug, Clone, Default)]
pub struct CodeBuffer {
    out: String,
    depth: usize,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_depth(depth: usize) -> Self {
        Self {
            out: String::new(),
            depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn line(&mut self, text: &str) {
        if text.is_empty() {
            self.out.push('\n');
            return;
        }
        for _ in 0..self.depth {
            self.out.push('\t');
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    pub fn lines<S: AsRef<str>>(&mut self, lines: &[S]) {
        for line in lines {
            self.line(line.as_ref());
        }
    }

    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    pub fn indent(&mut self) {
        self.depth += 1;
    }

    pub fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Writes `header` and indents, e.g. `open("if x {")`.
    pub fn open(&mut self, header: &str) {
        self.line(header);
        self.indent();
    }

    /// Dedents and writes `footer`, e.g. `close("}")` or `close("} else {")` followed by `indent`.
    pub fn close(&mut self, footer: &str) {
        self.dedent();
        self.line(footer);
    }

    /// `} else {` between two indented branches.
    pub fn else_branch(&mut self, header: &str) {
        self.dedent();
        self.line(header);
        self.indent();
    }

    pub fn append(&mut self, other: &CodeBuffer) {
        self.out.push_str(&other.out);
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn into_string(self) -> String {
        self.out
    }
}

/// Helper for snippets built as `Vec<String>` with relative nesting expressed by leading tabs.
pub fn nest(depth: usize, text: impl AsRef<str>) -> String {
    let mut line = "\t".repeat(depth);
    line.push_str(text.as_ref());
    line
}
