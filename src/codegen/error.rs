use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("invalid {node} at statement {position}: {reason}")]
    InvalidInput {
        node: String,
        position: usize,
        reason: String,
    },

    #[error("exceeded maximum statement limit ({limit}) - possible infinite loop or pathological program")]
    StatementLimit { limit: usize },

    #[error("exceeded maximum security() calls ({limit}) - possible infinite loop or resource exhaustion")]
    SecurityCallLimit { limit: usize },

    #[error("failed to parse AST JSON: {0}")]
    AstJson(#[from] serde_json::Error),

    #[error("failed to read template {}: {source}", path.display())]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write output {}: {source}", path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template is missing required placeholder {0}")]
    MissingPlaceholder(String),

    #[error("template is missing import marker line {0}")]
    MissingImportMarker(String),
}

pub type Result<T> = std::result::Result<T, CodegenError>;

/// Expression-level failure. Carries no position; the statement generator attaches one.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("unsupported {node}: {reason}")]
pub struct LowerError {
    pub node: &'static str,
    pub reason: String,
}

impl LowerError {
    pub fn new(node: &'static str, reason: impl Into<String>) -> Self {
        Self {
            node,
            reason: reason.into(),
        }
    }

    pub fn at(self, position: usize) -> CodegenError {
        CodegenError::InvalidInput {
            node: self.node.to_string(),
            position,
            reason: self.reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_limit_message() {
        let err = CodegenError::SecurityCallLimit { limit: 100 };
        assert!(err
            .to_string()
            .starts_with("exceeded maximum security() calls (100)"));
    }

    #[test]
    fn test_lower_error_gets_position() {
        let err = LowerError::new("CallExpression", "ta.sma needs a period").at(3);
        let msg = err.to_string();
        assert!(msg.contains("CallExpression"));
        assert!(msg.contains("statement 3"));
        assert!(msg.contains("ta.sma needs a period"));
    }
}
