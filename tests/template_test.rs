//! Tests for template injection against the bundled host template

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;
use tsl_gen::ast::builders::*;
use tsl_gen::codegen::{generate_strategy_code_from_ast, inject_strategy, render_strategy, CodegenError};

fn bundled_template() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates/strategy.go.tmpl")
}

#[test]
fn test_inject_plain_strategy() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("main.go");
    let prog = program(vec![
        strategy_header("Plain"),
        expr_stmt(call_named("plot", vec![ident("close")])),
    ]);
    let code = generate_strategy_code_from_ast(&prog).unwrap();

    inject_strategy(bundled_template(), &out, &code).unwrap();
    let go = fs::read_to_string(&out).unwrap();

    assert!(go.starts_with("package main\n"));
    assert!(go.contains("const strategyName = \"Plain\""));
    assert!(go.contains("func executeStrategy(ctx *context.Context, dataDir string, securityContexts map[string]*context.Context) (*output.Collector, *strategy.Strategy) {"));
    assert!(!go.contains("{{STRATEGY_FUNC}}"));
    assert!(!go.contains("{{STRATEGY_NAME}}"));
    // no live preload imports once pruned
    assert!(go.contains("// ta import not needed"));
    assert!(go.contains("// value import not needed"));
    assert!(!go.contains("\"github.com/quant5-lab/runner/runtime/ta\""));
    assert!(!go.contains("\"github.com/quant5-lab/runner/runtime/value\""));
    assert!(!go.contains("\"github.com/quant5-lab/runner/security\""));
}

#[test]
fn test_inject_security_strategy() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("main.go");
    let prog = program(vec![var_decl(
        "dailyClose",
        security("BTCUSDT", "1D", ident("close")),
    )]);
    let code = generate_strategy_code_from_ast(&prog).unwrap();

    inject_strategy(bundled_template(), &out, &code).unwrap();
    let go = fs::read_to_string(&out).unwrap();

    assert!(go.contains("\t_ \"github.com/quant5-lab/runner/runtime/ta\"\n"));
    assert!(go.contains("\t_ \"github.com/quant5-lab/runner/runtime/value\"\n"));
    assert!(go.contains(
        "\t\"github.com/quant5-lab/runner/runtime/strategy\"\n\t\"github.com/quant5-lab/runner/ast\"\n\t\"github.com/quant5-lab/runner/security\"\n"
    ));
    assert_eq!(go.matches("\"github.com/quant5-lab/runner/datafetcher\"").count(), 1);
    assert!(go.contains("securityContexts[\"BTCUSDT:1D\"] = sec_btcusdt_1d_ctx"));
}

#[test]
fn test_missing_template() {
    let dir = TempDir::new().unwrap();
    let code = generate_strategy_code_from_ast(&program(vec![])).unwrap();

    let err = inject_strategy(dir.path().join("absent.tmpl"), dir.path().join("out.go"), &code)
        .unwrap_err();
    assert!(matches!(err, CodegenError::TemplateRead { .. }));
    assert!(!dir.path().join("out.go").exists());
}

#[test]
fn test_unwritable_output() {
    let dir = TempDir::new().unwrap();
    let code = generate_strategy_code_from_ast(&program(vec![])).unwrap();

    let err = inject_strategy(bundled_template(), dir.path().join("missing/dir/out.go"), &code)
        .unwrap_err();
    assert!(matches!(err, CodegenError::OutputWrite { .. }));
}

#[test]
fn test_template_without_func_placeholder() {
    let code = generate_strategy_code_from_ast(&program(vec![])).unwrap();
    let err = render_strategy("package main\n\nfunc main() {}\n", &code).unwrap_err();
    assert!(matches!(err, CodegenError::MissingPlaceholder(_)));
}
