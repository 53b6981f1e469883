use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::ast::Program;
use crate::codegen::{generate_strategy_code_with_config, inject_strategy, VariableTable};
use crate::config::GeneratorConfig;
use crate::security::{analyze_program, extract_max_period};

#[derive(Parser)]
#[command(name = "tsl-gen")]
#[command(about = "Translate TSL strategy ASTs into runnable Go backtest programs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a Go program from a TSL AST
    Generate {
        /// Path to the program AST (ESTree JSON)
        #[arg(long)]
        ast: PathBuf,
        /// Go template containing {{STRATEGY_FUNC}}
        #[arg(long, default_value = "templates/strategy.go.tmpl")]
        template: PathBuf,
        /// Output Go file
        #[arg(long)]
        out: PathBuf,
        /// Generator config (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Maximum statements emitted per pass
        #[arg(long)]
        max_statements: Option<usize>,
        /// Maximum security() calls per program
        #[arg(long)]
        max_security_calls: Option<usize>,
        /// Bar count the generated program refuses to exceed
        #[arg(long)]
        max_bars: Option<usize>,
    },
    /// List the security() calls of a program and their prefetch warmup
    Inspect {
        /// Path to the program AST (ESTree JSON)
        #[arg(long)]
        ast: PathBuf,
        /// Generator config (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_program(path: &Path) -> Result<Program> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read AST file: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse AST JSON: {}", path.display()))
}

impl Cli {
    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::Generate {
                ast,
                template,
                out,
                config,
                max_statements,
                max_security_calls,
                max_bars,
            } => {
                let mut config = GeneratorConfig::load(config.as_deref())?;
                if let Some(max) = max_statements {
                    config.limits.max_statements_per_pass = max;
                }
                if let Some(max) = max_security_calls {
                    config.limits.max_security_calls = max;
                }
                if let Some(max) = max_bars {
                    config.safety.max_bars_per_execution = max;
                }

                let program = load_program(&ast)?;
                let code = generate_strategy_code_with_config(&program, &config)
                    .with_context(|| format!("Failed to generate code for {}", ast.display()))?;
                inject_strategy(&template, &out, &code)?;

                println!(
                    "Generated \"{}\" ({} statements) -> {}",
                    code.strategy_name,
                    program.body.len(),
                    out.display()
                );
                Ok(())
            }
            Commands::Inspect { ast, config } => {
                let config = GeneratorConfig::load(config.as_deref())?;
                let program = load_program(&ast)?;
                let calls = analyze_program(&program)?;

                if calls.is_empty() {
                    println!("No security() calls found");
                    return Ok(());
                }

                let variables = VariableTable::from_program(&program);
                println!("{} security() call(s):", calls.len());
                for call in &calls {
                    let max_period = extract_max_period(&variables.resolve_constants(&call.expression));
                    println!(
                        "  {:<24} name={:<16} max_period={:<5} warmup={}{}",
                        call.key().to_string(),
                        call.name,
                        max_period,
                        max_period.max(config.min_security_warmup),
                        if call.lookahead { " lookahead" } else { "" }
                    );
                }
                Ok(())
            }
        }
    }
}
