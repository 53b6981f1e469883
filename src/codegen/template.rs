use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::codegen::error::{CodegenError, Result};
use crate::codegen::security::AST_IMPORT;

pub const STRATEGY_FUNC_PLACEHOLDER: &str = "{{STRATEGY_FUNC}}";
pub const STRATEGY_NAME_PLACEHOLDER: &str = "{{STRATEGY_NAME}}";

/// Additional imports are inserted after this line.
pub const IMPORT_MARKER: &str = "\"github.com/quant5-lab/runner/runtime/strategy\"";

/// Import lines replaced with comments when the body needs no series precalculation.
pub const PRUNED_IMPORTS: [(&str, &str); 2] = [
    (
        "_ \"github.com/quant5-lab/runner/runtime/ta\"",
        "// ta import not needed",
    ),
    (
        "_ \"github.com/quant5-lab/runner/runtime/value\"",
        "// value import not needed",
    ),
];

/// Generated strategy, ready for template injection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyCode {
    /// Body of `executeStrategy`, indented one level.
    pub function_body: String,
    pub strategy_name: String,
    pub needs_series_precalc: bool,
    pub additional_imports: BTreeSet<String>,
}

impl StrategyCode {
    pub fn strategy_function(&self) -> String {
        format!(
            "func executeStrategy(ctx *context.Context, dataDir string, securityContexts map[string]*context.Context) (*output.Collector, *strategy.Strategy) {{\n\
             \tcollector := output.NewCollector()\n\
             \tstrat := strategy.NewStrategy()\n\
             \n\
             {}\
             \n\
             \treturn collector, strat\n\
             }}",
            self.function_body
        )
    }
}

/// Reads the template, fills it, and writes the output in one write.
pub fn inject_strategy(
    template_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    code: &StrategyCode,
) -> Result<()> {
    let template_path = template_path.as_ref();
    let output_path = output_path.as_ref();

    let template = fs::read_to_string(template_path).map_err(|source| CodegenError::TemplateRead {
        path: template_path.to_path_buf(),
        source,
    })?;
    let rendered = render_strategy(&template, code)?;

    fs::write(output_path, rendered).map_err(|source| CodegenError::OutputWrite {
        path: output_path.to_path_buf(),
        source,
    })?;
    info!(output = %output_path.display(), strategy = %code.strategy_name, "wrote strategy program");
    Ok(())
}

/// Template substitution without I/O.
pub fn render_strategy(template: &str, code: &StrategyCode) -> Result<String> {
    if !template.contains(STRATEGY_FUNC_PLACEHOLDER) {
        return Err(CodegenError::MissingPlaceholder(
            STRATEGY_FUNC_PLACEHOLDER.to_string(),
        ));
    }

    let mut output = template.replacen(STRATEGY_FUNC_PLACEHOLDER, &code.strategy_function(), 1);
    if output.contains(STRATEGY_NAME_PLACEHOLDER) {
        output = output.replacen(STRATEGY_NAME_PLACEHOLDER, &escape_name(&code.strategy_name), 1);
    } else {
        warn!("template has no {} placeholder", STRATEGY_NAME_PLACEHOLDER);
    }

    let mut lines: Vec<String> = output.lines().map(str::to_string).collect();

    if !code.needs_series_precalc {
        for (import, comment) in PRUNED_IMPORTS {
            match lines.iter_mut().find(|line| line.trim() == import) {
                Some(line) => {
                    debug!(import, "pruning unused import");
                    *line = format!("{}{comment}", leading_whitespace(line));
                }
                None => warn!(import, "import line to prune not found in template"),
            }
        }
    }

    let pending = pending_imports(&output, code);
    if !pending.is_empty() {
        let marker = lines
            .iter()
            .position(|line| line.trim() == IMPORT_MARKER)
            .ok_or_else(|| CodegenError::MissingImportMarker(IMPORT_MARKER.to_string()))?;
        let indent = leading_whitespace(&lines[marker]).to_string();
        for (offset, import) in pending.iter().enumerate() {
            lines.insert(marker + 1 + offset, format!("{indent}\"{import}\""));
        }
        debug!(count = pending.len(), "inserted additional imports");
    }

    let mut rendered = lines.join("\n");
    if output.ends_with('\n') {
        rendered.push('\n');
    }
    Ok(rendered)
}

/// Imports to add. Anything the template already imports (the fetcher in particular) is
/// skipped, and the AST package only goes in when the body references it.
fn pending_imports(rendered: &str, code: &StrategyCode) -> Vec<String> {
    code.additional_imports
        .iter()
        .filter(|import| {
            let quoted = format!("\"{import}\"");
            if rendered.lines().any(|line| line.trim().ends_with(&quoted)) {
                return false;
            }
            import.as_str() != AST_IMPORT || code.function_body.contains("&ast.")
        })
        .cloned()
        .collect()
}

fn leading_whitespace(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// The name lands inside a Go string literal in the template.
fn escape_name(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}
