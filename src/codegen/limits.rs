use serde::{Deserialize, Serialize};

use crate::codegen::error::{CodegenError, Result};

/// Hard ceilings applied while generating a single program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeGenerationLimits {
    pub max_statements_per_pass: usize,
    pub max_security_calls: usize,
}

impl Default for CodeGenerationLimits {
    fn default() -> Self {
        Self {
            max_statements_per_pass: 10_000,
            max_security_calls: 100,
        }
    }
}

/// Counts emitted statements within one pass and refuses to go past the ceiling.
pub struct StatementCounter {
    count: usize,
    limits: CodeGenerationLimits,
}

impl StatementCounter {
    pub fn new(limits: CodeGenerationLimits) -> Self {
        Self { count: 0, limits }
    }

    pub fn increment(&mut self) -> Result<()> {
        self.count += 1;
        if self.count > self.limits.max_statements_per_pass {
            return Err(CodegenError::StatementLimit {
                limit: self.limits.max_statements_per_pass,
            });
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

pub struct SecurityCallValidator {
    limits: CodeGenerationLimits,
}

impl SecurityCallValidator {
    pub fn new(limits: CodeGenerationLimits) -> Self {
        Self { limits }
    }

    pub fn validate_call_count(&self, actual_calls: usize) -> Result<()> {
        if actual_calls > self.limits.max_security_calls {
            return Err(CodegenError::SecurityCallLimit {
                limit: self.limits.max_security_calls,
            });
        }
        Ok(())
    }
}

/// Guard compiled into the emitted program: rejects oversized datasets before the bar loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSafetyGuard {
    pub max_bars_per_execution: usize,
}

impl Default for RuntimeSafetyGuard {
    fn default() -> Self {
        Self {
            max_bars_per_execution: 1_000_000,
        }
    }
}

impl RuntimeSafetyGuard {
    pub fn bar_count_validation(&self) -> Vec<String> {
        vec![
            format!("const maxBars = {}", self.max_bars_per_execution),
            "barCount := len(ctx.Data)".to_string(),
            "if barCount > maxBars {".to_string(),
            "\tfmt.Fprintf(os.Stderr, \"Error: bar count (%d) exceeds safety limit (%d)\\n\", barCount, maxBars)"
                .to_string(),
            "\tos.Exit(1)".to_string(),
            "}".to_string(),
        ]
    }

    pub fn iteration_variable(&self) -> &'static str {
        "i"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = CodeGenerationLimits::default();
        assert_eq!(limits.max_statements_per_pass, 10_000);
        assert_eq!(limits.max_security_calls, 100);
    }

    #[test]
    fn test_statement_counter_ceiling() {
        let mut counter = StatementCounter::new(CodeGenerationLimits {
            max_statements_per_pass: 3,
            max_security_calls: 100,
        });

        for _ in 0..3 {
            counter.increment().unwrap();
        }
        assert_eq!(counter.count(), 3);

        let err = counter.increment().unwrap_err();
        assert!(matches!(err, CodegenError::StatementLimit { limit: 3 }));
        assert!(err.to_string().contains("(3)"));

        counter.reset();
        assert_eq!(counter.count(), 0);
        assert!(counter.increment().is_ok());
    }

    #[test]
    fn test_security_call_validator() {
        let validator = SecurityCallValidator::new(CodeGenerationLimits::default());
        assert!(validator.validate_call_count(0).is_ok());
        assert!(validator.validate_call_count(100).is_ok());

        let err = validator.validate_call_count(101).unwrap_err();
        assert!(err
            .to_string()
            .contains("exceeded maximum security() calls (100)"));
    }

    #[test]
    fn test_bar_count_validation_snippet() {
        let guard = RuntimeSafetyGuard {
            max_bars_per_execution: 500,
        };
        let snippet = guard.bar_count_validation().join("\n");
        assert!(snippet.contains("const maxBars = 500"));
        assert!(snippet.contains("if barCount > maxBars {"));
        assert!(snippet.contains("os.Exit(1)"));
        assert_eq!(guard.iteration_variable(), "i");
    }
}
