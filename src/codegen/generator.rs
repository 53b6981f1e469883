use tracing::{debug, info};

use crate::ast::{find_argument, Expr, LiteralValue, Program, Statement, VariableDeclarator};
use crate::codegen::emitter::CodeBuffer;
use crate::codegen::error::{CodegenError, Result};
use crate::codegen::limits::StatementCounter;
use crate::codegen::lower::{format_float, go_quote, ExprLowerer, Lowered};
use crate::codegen::security::{
    emit_security_lookup, SecurityInjection, SecurityInjector, AST_IMPORT,
};
use crate::codegen::template::StrategyCode;
use crate::codegen::variables::{go_ident, is_input_function, zero_value, VariableTable};
use crate::config::GeneratorConfig;
use crate::security::{analyze_program, is_security_call, parse_security_call};

/// Translates a program using the default configuration.
pub fn generate_strategy_code_from_ast(program: &Program) -> Result<StrategyCode> {
    generate_strategy_code_with_config(program, &GeneratorConfig::default())
}

pub fn generate_strategy_code_with_config(
    program: &Program,
    config: &GeneratorConfig,
) -> Result<StrategyCode> {
    StrategyGenerator::new(config).generate(program)
}

/// Single-use generator: one instance per program.
pub struct StrategyGenerator<'a> {
    config: &'a GeneratorConfig,
    counter: StatementCounter,
    variables: VariableTable,
    hoisted: Vec<String>,
    strategy_name: Option<String>,
    initial_capital: Option<String>,
    injection: SecurityInjection,
}

impl<'a> StrategyGenerator<'a> {
    pub fn new(config: &'a GeneratorConfig) -> Self {
        Self {
            config,
            counter: StatementCounter::new(config.limits),
            variables: VariableTable::default(),
            hoisted: Vec::new(),
            strategy_name: None,
            initial_capital: None,
            injection: SecurityInjection::default(),
        }
    }

    pub fn generate(mut self, program: &Program) -> Result<StrategyCode> {
        let config = self.config;
        self.variables = VariableTable::from_program(program);
        let calls: Vec<_> = analyze_program(program)?
            .into_iter()
            .map(|mut call| {
                call.expression = self.variables.resolve_constants(&call.expression);
                call
            })
            .collect();
        self.injection = SecurityInjector::new(config.limits, config.min_security_warmup)
            .generate_prefetch(&calls)?;
        self.counter.reset();

        let mut body = CodeBuffer::with_depth(2);
        for (position, statement) in program.body.iter().enumerate() {
            self.statement(statement, position, &mut body)?;
        }

        let strategy_name = self
            .strategy_name
            .take()
            .unwrap_or_else(|| config.default_strategy_name.clone());
        let capital = self
            .initial_capital
            .take()
            .unwrap_or_else(|| format_number(config.default_initial_capital));
        let guard = &config.safety;
        let i = guard.iteration_variable();

        let mut main = CodeBuffer::with_depth(1);
        main.line(&format!("strat.Call({}, {capital})", go_quote(&strategy_name)));
        main.blank();
        main.lines(&guard.bar_count_validation());
        main.blank();
        let declarations = self.variables.declarations();
        if !declarations.is_empty() {
            main.lines(&declarations);
            main.blank();
        }
        if !self.hoisted.is_empty() {
            main.lines(&self.hoisted);
            main.blank();
        }
        main.open(&format!("for {i} := 0; {i} < len(ctx.Data); {i}++ {{"));
        main.line(&format!("ctx.BarIndex = {i}"));
        main.line(&format!(
            "strat.OnBarUpdate({i}, ctx.Data[{i}].Open, ctx.Data[{i}].Time)"
        ));
        main.append(&body);
        let end_of_bar = self.variables.end_of_bar();
        if !end_of_bar.is_empty() {
            main.blank();
            main.lines(&end_of_bar);
        }
        main.close("}");

        let mut function_body = std::mem::take(&mut self.injection.prefetch_code);
        function_body.push_str(main.as_str());

        let mut additional_imports = std::mem::take(&mut self.injection.import_paths);
        if function_body.contains("&ast.") {
            additional_imports.insert(AST_IMPORT.to_string());
        }
        let needs_series_precalc = !self.injection.plans.is_empty();

        info!(
            strategy = %strategy_name,
            statements = self.counter.count(),
            variables = self.variables.names().len(),
            security_keys = self.injection.plans.len(),
            "generated strategy code"
        );

        Ok(StrategyCode {
            function_body,
            strategy_name,
            needs_series_precalc,
            additional_imports,
        })
    }

    fn statement(&mut self, statement: &Statement, position: usize, out: &mut CodeBuffer) -> Result<()> {
        self.counter.increment()?;
        match statement {
            Statement::ExpressionStatement { expression } => {
                self.expression_statement(expression, position, out)
            }
            Statement::VariableDeclaration { declarations, .. } => {
                for declarator in declarations {
                    self.declarator(declarator, position, out)?;
                }
                Ok(())
            }
            Statement::IfStatement {
                test,
                consequent,
                alternate,
            } => {
                let test = self.lower(test, position)?;
                out.lines(&test.setup);
                out.open(&format!("if {} {{", test.value));
                for statement in consequent {
                    self.statement(statement, position, out)?;
                }
                if !alternate.is_empty() {
                    out.else_branch("} else {");
                    for statement in alternate {
                        self.statement(statement, position, out)?;
                    }
                }
                out.close("}");
                Ok(())
            }
        }
    }

    fn expression_statement(&mut self, expression: &Expr, position: usize, out: &mut CodeBuffer) -> Result<()> {
        let callee = expression.callee_name();
        if let Some("strategy" | "indicator") = callee.as_deref() {
            self.record_header(expression);
            return Ok(());
        }

        let lowered = self.lower(expression, position)?;
        out.lines(&lowered.setup);
        match callee {
            Some(name) if has_side_effects(&name) => out.line(&lowered.value),
            _ => out.line(&format!("_ = {}", lowered.value)),
        }
        Ok(())
    }

    /// Every name is declared before the loop; a declarator assigns the current bar's value.
    fn declarator(&mut self, declarator: &VariableDeclarator, position: usize, out: &mut CodeBuffer) -> Result<()> {
        let name = declarator.id.name.as_str();
        let target = go_ident(name);
        let Some(init) = &declarator.init else {
            let go_type = self.variables.type_of(name).unwrap_or("float64");
            out.line(&format!("{target} = {}", zero_value(go_type)));
            return Ok(());
        };

        if is_security_call(init) {
            return self.security_declarator(name, &target, init, position, out);
        }

        let lowered = self.lower(init, position)?;
        out.lines(&lowered.setup);
        out.line(&format!("{target} = {}", lowered.value));
        Ok(())
    }

    fn security_declarator(
        &mut self,
        name: &str,
        target: &str,
        init: &Expr,
        position: usize,
        out: &mut CodeBuffer,
    ) -> Result<()> {
        let mut call = parse_security_call(init, Some(name), position)?;
        call.expression = self.variables.resolve_constants(&call.expression);
        let plan = self
            .injection
            .plan_for(&call.key())
            .ok_or_else(|| CodegenError::InvalidInput {
                node: "CallExpression".to_string(),
                position,
                reason: format!("no prefetch planned for {}", call.key()),
            })?;

        out.line(&format!("{target} = math.NaN()"));
        let scope = self.scope();
        let hoisted = emit_security_lookup(&call, plan, target, &scope, out).map_err(|e| e.at(position))?;
        self.hoisted.extend(hoisted);
        debug!(name, key = %call.key(), "emitted security lookup");
        Ok(())
    }

    fn record_header(&mut self, expression: &Expr) {
        let arguments = expression.call_arguments();
        if let Some(title) = find_argument(arguments, 0, "title").and_then(Expr::as_string_literal) {
            self.strategy_name = Some(title.to_string());
        }
        let capital = arguments
            .last()
            .and_then(|last| last.property("initial_capital"))
            .and_then(Expr::as_literal);
        match capital {
            Some(LiteralValue::Int(v)) => self.initial_capital = Some(v.to_string()),
            Some(LiteralValue::Float(v)) => self.initial_capital = Some(format_number(*v)),
            _ => {}
        }
    }

    /// Temporaries of each statement live under their own prefix.
    fn scope(&self) -> String {
        format!("s{}", self.counter.count())
    }

    fn lower(&mut self, expr: &Expr, position: usize) -> Result<Lowered> {
        let mut lowered = ExprLowerer::source(&self.scope())
            .with_variables(&self.variables)
            .lower(expr)
            .map_err(|e| e.at(position))?;
        self.hoisted.append(&mut lowered.hoisted);
        Ok(lowered)
    }
}

/// Calls emitted as statements; everything else is a pure value and is discarded with `_ =`.
fn has_side_effects(callee: &str) -> bool {
    !(callee.starts_with("ta.")
        || callee.starts_with("math.")
        || callee == "na"
        || is_input_function(callee))
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format_float(value)
    }
}
