pub mod ast;
pub mod cli;
pub mod codegen;
pub mod config;
pub mod security;

pub use codegen::{
    generate_strategy_code_from_ast, generate_strategy_code_with_config, inject_strategy,
    CodegenError, StrategyCode,
};
pub use config::GeneratorConfig;
