pub mod emitter;
pub mod error;
pub mod generator;
pub mod indicators;
pub mod limits;
pub mod lower;
pub mod security;
pub mod template;
pub mod variables;

pub use emitter::CodeBuffer;
pub use error::{CodegenError, LowerError, Result};
pub use generator::{
    generate_strategy_code_from_ast, generate_strategy_code_with_config, StrategyGenerator,
};
pub use limits::{CodeGenerationLimits, RuntimeSafetyGuard, SecurityCallValidator, StatementCounter};
pub use lower::{serialize_ast, ExprLowerer, LowerMode, Lowered};
pub use security::{SecurityInjection, SecurityInjector};
pub use template::{inject_strategy, render_strategy, StrategyCode};
pub use variables::{go_ident, VariableTable};
