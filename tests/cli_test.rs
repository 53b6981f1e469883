//! Tests for the command-line driver

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use tempfile::TempDir;
use tsl_gen::ast::builders::*;
use tsl_gen::ast::Program;
use tsl_gen::cli::{Cli, Commands};

fn bundled_template() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates/strategy.go.tmpl")
}

fn write_program(dir: &Path, prog: &Program) -> PathBuf {
    let path = dir.join("program.json");
    fs::write(&path, serde_json::to_string_pretty(prog).unwrap()).unwrap();
    path
}

fn security_program(calls: usize) -> Program {
    program(
        (0..calls)
            .map(|i| var_decl(&format!("v{i}"), security("BTCUSDT", "1D", ident("close"))))
            .collect(),
    )
}

#[test]
fn test_parse_generate_defaults() {
    let cli = Cli::try_parse_from(["tsl-gen", "generate", "--ast", "p.json", "--out", "main.go"]).unwrap();
    match cli.command {
        Commands::Generate {
            template,
            config,
            max_security_calls,
            ..
        } => {
            assert_eq!(template, PathBuf::from("templates/strategy.go.tmpl"));
            assert!(config.is_none());
            assert!(max_security_calls.is_none());
        }
        _ => panic!("expected generate"),
    }
}

#[test]
fn test_generate_writes_program() {
    let dir = TempDir::new().unwrap();
    let ast = write_program(dir.path(), &security_program(2));
    let out = dir.path().join("main.go");

    let cli = Cli::try_parse_from([
        "tsl-gen",
        "generate",
        "--ast",
        ast.to_str().unwrap(),
        "--template",
        bundled_template().to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
    ])
    .unwrap();
    cli.execute().unwrap();

    let go = fs::read_to_string(&out).unwrap();
    assert_eq!(go.matches("fetcher.Fetch(").count(), 1);
    assert!(go.contains("const strategyName = \"Generated Strategy\""));
}

#[test]
fn test_flag_overrides_config_file() {
    let dir = TempDir::new().unwrap();
    let ast = write_program(dir.path(), &security_program(3));
    let config = dir.path().join("config.json");
    fs::write(&config, r#"{"limits": {"max_security_calls": 10}}"#).unwrap();
    let out = dir.path().join("main.go");

    let cli = Cli::try_parse_from([
        "tsl-gen",
        "generate",
        "--ast",
        ast.to_str().unwrap(),
        "--template",
        bundled_template().to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
        "--max-security-calls",
        "2",
    ])
    .unwrap();
    let err = cli.execute().unwrap_err();

    assert!(format!("{err:#}").contains("exceeded maximum security() calls (2)"));
    assert!(!out.exists());
}

#[test]
fn test_generate_reports_bad_json() {
    let dir = TempDir::new().unwrap();
    let ast = dir.path().join("program.json");
    fs::write(&ast, "{ not json").unwrap();

    let cli = Cli::try_parse_from([
        "tsl-gen",
        "generate",
        "--ast",
        ast.to_str().unwrap(),
        "--out",
        dir.path().join("main.go").to_str().unwrap(),
    ])
    .unwrap();
    let err = cli.execute().unwrap_err();
    assert!(err.to_string().contains("Failed to parse AST JSON"));
}

#[test]
fn test_inspect_runs() {
    let dir = TempDir::new().unwrap();
    let ast = write_program(dir.path(), &security_program(1));

    let cli = Cli::try_parse_from(["tsl-gen", "inspect", "--ast", ast.to_str().unwrap()]).unwrap();
    cli.execute().unwrap();
}
