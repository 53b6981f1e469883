//! Expression lowering.
//!
//! One traversal serves both output regimes:
//! - [`LowerMode::Source`]: executable Go against the bar-indexed context (`ctx`),
//! - [`LowerMode::AstLiteral`]: an `&ast.*` constructor literal of the same tree, re-evaluated
//!   by the runtime at an arbitrary bar index.

use crate::ast::{find_argument, Expr, LiteralValue, Property};
use crate::codegen::emitter::CodeBuffer;
use crate::codegen::error::LowerError;
use crate::codegen::indicators::{
    create_inline_indicator_with, ta_function_name, BarField, CrossDirection, CrossIndicator,
    IndicatorRegistry, Source,
};
use crate::codegen::variables::{go_ident, infer_go_type, is_input_function, zero_value, VariableTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowerMode {
    Source,
    AstLiteral,
}

/// Result of lowering one expression.
///
/// `setup` lines must run (in the current block) before `value` is read. `hoisted` lines
/// declare indicator state and belong before the bar loop. Both are empty for AST literals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lowered {
    pub setup: Vec<String>,
    pub hoisted: Vec<String>,
    pub value: String,
}

pub struct ExprLowerer<'a> {
    mode: LowerMode,
    scope: String,
    temps: usize,
    registry: IndicatorRegistry,
    variables: Option<&'a VariableTable>,
}

impl<'a> ExprLowerer<'a> {
    pub fn new(mode: LowerMode, scope: &str) -> Self {
        Self {
            mode,
            scope: scope.to_string(),
            temps: 0,
            registry: IndicatorRegistry::new(),
            variables: None,
        }
    }

    /// Resolves user variables: their types, constant values and recorded history.
    pub fn with_variables(mut self, variables: &'a VariableTable) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Direct lowering; temporaries are named `<scope>_<kind><k>`.
    pub fn source(scope: &str) -> Self {
        Self::new(LowerMode::Source, scope)
    }

    pub fn ast_literal() -> Self {
        Self::new(LowerMode::AstLiteral, "")
    }

    pub fn mode(&self) -> LowerMode {
        self.mode
    }

    pub fn lower(&mut self, expr: &Expr) -> Result<Lowered, LowerError> {
        let mut setup = CodeBuffer::new();
        let mut hoisted = Vec::new();
        let value = self.expr(expr, &mut setup, &mut hoisted)?;
        Ok(Lowered {
            setup: setup.as_str().lines().map(str::to_string).collect(),
            hoisted,
            value,
        })
    }

    fn next_temp(&mut self, kind: &str) -> String {
        let name = format!("{}_{kind}{}", self.scope, self.temps);
        self.temps += 1;
        name
    }

    fn is_ast(&self) -> bool {
        self.mode == LowerMode::AstLiteral
    }

    fn infer(&self, expr: &Expr) -> &'static str {
        let variables = self.variables;
        infer_go_type(expr, &|name| variables.and_then(|v| v.type_of(name)))
    }

    fn resolve(&self, expr: &Expr) -> Expr {
        match self.variables {
            Some(variables) => variables.resolve_constants(expr),
            None => expr.clone(),
        }
    }

    fn expr(
        &mut self,
        expr: &Expr,
        setup: &mut CodeBuffer,
        hoisted: &mut Vec<String>,
    ) -> Result<String, LowerError> {
        match expr {
            Expr::Identifier { name } => Ok(if self.is_ast() {
                format!("&ast.Identifier{{Name: {}}}", go_quote(name))
            } else {
                self.lower_identifier(name)
            }),

            Expr::Literal { value, .. } => Ok(if self.is_ast() {
                format!("&ast.Literal{{Value: {}}}", ast_literal_value(value))
            } else {
                source_literal_value(value)
            }),

            Expr::BinaryExpression {
                operator,
                left,
                right,
            }
            | Expr::LogicalExpression {
                operator,
                left,
                right,
            } => {
                let l = self.expr(left, setup, hoisted)?;
                let r = self.expr(right, setup, hoisted)?;
                if self.is_ast() {
                    return Ok(format!(
                        "&ast.{}{{Operator: {}, Left: {l}, Right: {r}}}",
                        expr.variant_name(),
                        go_quote(operator)
                    ));
                }
                if operator == "%" {
                    return Ok(format!("math.Mod({l}, {r})"));
                }
                let op = map_binary_operator(operator).ok_or_else(|| {
                    LowerError::new(
                        expr.variant_name(),
                        format!("unknown operator {operator:?}"),
                    )
                })?;
                Ok(format!("({l} {op} {r})"))
            }

            Expr::UnaryExpression { operator, argument } => {
                let arg = self.expr(argument, setup, hoisted)?;
                if self.is_ast() {
                    return Ok(format!(
                        "&ast.UnaryExpression{{Operator: {}, Argument: {arg}}}",
                        go_quote(operator)
                    ));
                }
                match operator.as_str() {
                    "-" => Ok(format!("(-{arg})")),
                    "+" => Ok(arg),
                    "!" | "not" => Ok(format!("(!{arg})")),
                    other => Err(LowerError::new(
                        "UnaryExpression",
                        format!("unknown operator {other:?}"),
                    )),
                }
            }

            Expr::ConditionalExpression {
                test,
                consequent,
                alternate,
            } => {
                if self.is_ast() {
                    let t = self.expr(test, setup, hoisted)?;
                    let c = self.expr(consequent, setup, hoisted)?;
                    let a = self.expr(alternate, setup, hoisted)?;
                    return Ok(format!(
                        "&ast.ConditionalExpression{{Test: {t}, Consequent: {c}, Alternate: {a}}}"
                    ));
                }
                let temp = self.next_temp("tern");
                let test = self.expr(test, setup, hoisted)?;
                setup.line(&format!("var {temp} {}", self.infer(expr)));
                setup.open(&format!("if {test} {{"));
                let c = self.expr(consequent, setup, hoisted)?;
                setup.line(&format!("{temp} = {c}"));
                setup.else_branch("} else {");
                let a = self.expr(alternate, setup, hoisted)?;
                setup.line(&format!("{temp} = {a}"));
                setup.close("}");
                Ok(temp)
            }

            Expr::CallExpression { callee, arguments } => {
                if self.is_ast() {
                    let callee = self.expr(callee, setup, hoisted)?;
                    let args = arguments
                        .iter()
                        .map(|arg| self.expr(arg, setup, hoisted))
                        .collect::<Result<Vec<_>, _>>()?;
                    return Ok(format!(
                        "&ast.CallExpression{{Callee: {callee}, Arguments: []ast.Expression{{{}}}}}",
                        args.join(", ")
                    ));
                }
                let name = callee.dotted_name().ok_or_else(|| {
                    LowerError::new("CallExpression", "callee must be a name or dotted name")
                })?;
                self.call(&name, arguments, setup, hoisted)
            }

            Expr::MemberExpression {
                object,
                property,
                computed,
            } => {
                if self.is_ast() {
                    let o = self.expr(object, setup, hoisted)?;
                    let p = self.expr(property, setup, hoisted)?;
                    let computed = if *computed { ", Computed: true" } else { "" };
                    return Ok(format!(
                        "&ast.MemberExpression{{Object: {o}, Property: {p}{computed}}}"
                    ));
                }
                if *computed {
                    return self.history_access(object, property, setup, hoisted);
                }
                let name = expr.dotted_name().ok_or_else(|| {
                    LowerError::new("MemberExpression", "member chain must be dotted names")
                })?;
                Ok(lower_member(&name))
            }

            Expr::ObjectExpression { properties } => {
                if self.is_ast() {
                    let props = properties
                        .iter()
                        .map(|Property { key, value }| {
                            let k = self.expr(key, setup, hoisted)?;
                            let v = self.expr(value, setup, hoisted)?;
                            Ok(format!("{{Key: {k}, Value: {v}}}"))
                        })
                        .collect::<Result<Vec<_>, LowerError>>()?;
                    return Ok(format!(
                        "&ast.ObjectExpression{{Properties: []ast.Property{{{}}}}}",
                        props.join(", ")
                    ));
                }
                Err(LowerError::new(
                    "ObjectExpression",
                    "object literals are only valid as named call arguments",
                ))
            }
        }
    }

    fn call(
        &mut self,
        name: &str,
        arguments: &[Expr],
        setup: &mut CodeBuffer,
        hoisted: &mut Vec<String>,
    ) -> Result<String, LowerError> {
        match name {
            "strategy.entry" => {
                let id = self.required(arguments, 0, "id", name, setup, hoisted)?;
                let direction = self.required(arguments, 1, "direction", name, setup, hoisted)?;
                let qty = match find_argument(arguments, 2, "qty") {
                    Some(qty) => self.expr(qty, setup, hoisted)?,
                    None => "1".to_string(),
                };
                Ok(format!("strat.Entry({id}, {direction}, {qty})"))
            }
            "strategy.close" => {
                let id = self.required(arguments, 0, "id", name, setup, hoisted)?;
                Ok(format!("strat.Close({id})"))
            }
            "strategy.close_all" => Ok("strat.CloseAll()".to_string()),
            "strategy.exit" => {
                let id = self.required(arguments, 0, "id", name, setup, hoisted)?;
                let from = match find_argument(arguments, 1, "from_entry") {
                    Some(from) => self.expr(from, setup, hoisted)?,
                    None => "\"\"".to_string(),
                };
                Ok(format!("strat.Exit({id}, {from})"))
            }
            "plot" => {
                let series = find_argument(arguments, 0, "series").ok_or_else(|| {
                    LowerError::new("CallExpression", "plot needs a series argument")
                })?;
                let title = find_argument(arguments, 1, "title")
                    .and_then(Expr::as_string_literal)
                    .or_else(|| series.as_identifier())
                    .unwrap_or("plot")
                    .to_string();
                let value = self.expr(series, setup, hoisted)?;
                Ok(format!(
                    "collector.Add({}, {}, {value}, nil)",
                    go_quote(&title),
                    BarField::Time.at("ctx.BarIndex")
                ))
            }
            "na" => {
                let value = self.required(arguments, 0, "x", name, setup, hoisted)?;
                Ok(format!("math.IsNaN({value})"))
            }
            "security" | "request.security" => Err(LowerError::new(
                "CallExpression",
                format!("{name}() is only supported as a variable initializer"),
            )),
            // Go has no math.Sign; NaN and zero pass through unchanged
            "math.sign" => {
                let value = self.required(arguments, 0, "number", name, setup, hoisted)?;
                let temp = self.next_temp("sign");
                setup.line(&format!("{temp} := float64({value})"));
                setup.open(&format!("if {temp} > 0 {{"));
                setup.line(&format!("{temp} = 1"));
                setup.else_branch(&format!("}} else if {temp} < 0 {{"));
                setup.line(&format!("{temp} = -1"));
                setup.close("}");
                Ok(temp)
            }
            _ if name.starts_with("math.") => {
                let args = self.positional(arguments, setup, hoisted)?;
                Ok(format!(
                    "math.{}({})",
                    capitalize(&name["math.".len()..]),
                    args.join(", ")
                ))
            }
            "ta.crossover" | "ta.crossunder" => {
                let a = self.required(arguments, 0, "source1", name, setup, hoisted)?;
                let b = self.required(arguments, 1, "source2", name, setup, hoisted)?;
                let direction = if name == "ta.crossover" {
                    CrossDirection::Over
                } else {
                    CrossDirection::Under
                };
                let cross = CrossIndicator::new(direction);
                let temp = self.next_temp("cross");
                cross.emit(&temp, &a, &b, setup);
                hoisted.extend(cross.state(&temp));
                Ok(temp)
            }
            _ if name.starts_with("ta.") => self.inline_indicator(name, arguments, setup, hoisted),
            // inputs are fixed at generation time; the default is the value
            _ if is_input_function(name) => {
                self.required(arguments, 0, "defval", name, setup, hoisted)
            }
            _ => {
                let args = self.positional(arguments, setup, hoisted)?;
                Ok(format!("{name}({})", args.join(", ")))
            }
        }
    }

    fn inline_indicator(
        &mut self,
        name: &str,
        arguments: &[Expr],
        setup: &mut CodeBuffer,
        hoisted: &mut Vec<String>,
    ) -> Result<String, LowerError> {
        if !self.registry.is_inlinable(name) {
            return Err(LowerError::new(
                "CallExpression",
                format!("{name} has no inline implementation"),
            ));
        }
        let arguments: Vec<Expr> = arguments.iter().map(|arg| self.resolve(arg)).collect();
        let variables = self.variables;
        let series = |expr: &Expr| {
            let name = expr.as_identifier()?;
            let variables = variables?;
            (variables.needs_history(name) && variables.type_of(name) == Some("float64"))
                .then(|| Source::Series(go_ident(name)))
        };
        let indicator = create_inline_indicator_with(name, &arguments, &series)?;
        let target = self.next_temp(ta_function_name(name));
        setup.line(&format!("var {target} float64"));
        indicator.emit(&target, setup);
        hoisted.extend(indicator.state(&target));
        Ok(target)
    }

    /// `close[n]` or `x[n]`: the zero value (NaN for floats) before bar `n`.
    fn history_access(
        &mut self,
        object: &Expr,
        offset: &Expr,
        setup: &mut CodeBuffer,
        hoisted: &mut Vec<String>,
    ) -> Result<String, LowerError> {
        let (source, go_type) = self.history_source(object)?;
        let offset = self.resolve(offset);
        match offset.as_literal() {
            Some(LiteralValue::Int(0)) => Ok(source.at("ctx.BarIndex")),
            Some(LiteralValue::Int(n)) if *n > 0 => {
                let temp = self.next_temp("hist");
                setup.line(&format!("{temp} := {}", zero_value(go_type)));
                setup.open(&format!("if ctx.BarIndex >= {n} {{"));
                setup.line(&format!("{temp} = {}", source.at(&format!("ctx.BarIndex-{n}"))));
                setup.close("}");
                Ok(temp)
            }
            Some(_) => Err(LowerError::new(
                "MemberExpression",
                "history offset must be a non-negative integer",
            )),
            None => {
                let k = self.expr(&offset, setup, hoisted)?;
                let temp = self.next_temp("hist");
                setup.line(&format!("{temp} := {}", zero_value(go_type)));
                setup.open(&format!(
                    "if {temp}_k := int({k}); {temp}_k >= 0 && ctx.BarIndex >= {temp}_k {{"
                ));
                setup.line(&format!(
                    "{temp} = {}",
                    source.at(&format!("ctx.BarIndex-{temp}_k"))
                ));
                setup.close("}");
                Ok(temp)
            }
        }
    }

    /// Series behind a history access and the Go type of its values.
    fn history_source(&self, object: &Expr) -> Result<(Source, &'static str), LowerError> {
        if let Some(source) = Source::from_expr(object) {
            return Ok((source, "float64"));
        }
        let recorded = object.as_identifier().and_then(|name| {
            let variables = self.variables?;
            variables
                .needs_history(name)
                .then(|| (Source::Series(go_ident(name)), variables.type_of(name).unwrap_or("float64")))
        });
        recorded.ok_or_else(|| {
            LowerError::new(
                "MemberExpression",
                "history access is only supported on bar fields and declared variables",
            )
        })
    }

    fn lower_identifier(&self, name: &str) -> String {
        if self.variables.is_some_and(|v| v.is_declared(name)) {
            return go_ident(name);
        }
        match name {
            "bar_index" => "ctx.BarIndex".to_string(),
            "na" => "math.NaN()".to_string(),
            "tickerid" => "ctx.Symbol".to_string(),
            _ => match (BarField::from_name(name), Source::from_name(name)) {
                (Some(field), _) => field.at("ctx.BarIndex"),
                (None, Some(source)) => source.at("ctx.BarIndex"),
                (None, None) => go_ident(name),
            },
        }
    }

    fn required(
        &mut self,
        arguments: &[Expr],
        index: usize,
        key: &str,
        function: &str,
        setup: &mut CodeBuffer,
        hoisted: &mut Vec<String>,
    ) -> Result<String, LowerError> {
        let arg = find_argument(arguments, index, key).ok_or_else(|| {
            LowerError::new(
                "CallExpression",
                format!("{function} is missing argument {key:?}"),
            )
        })?;
        self.expr(arg, setup, hoisted)
    }

    fn positional(
        &mut self,
        arguments: &[Expr],
        setup: &mut CodeBuffer,
        hoisted: &mut Vec<String>,
    ) -> Result<Vec<String>, LowerError> {
        arguments
            .iter()
            .filter(|arg| !matches!(arg, Expr::ObjectExpression { .. }))
            .map(|arg| self.expr(arg, setup, hoisted))
            .collect()
    }
}

/// `&ast.*` literal of `expr`.
pub fn serialize_ast(expr: &Expr) -> Result<String, LowerError> {
    ExprLowerer::ast_literal().lower(expr).map(|lowered| lowered.value)
}


fn lower_member(dotted: &str) -> String {
    match dotted {
        "syminfo.tickerid" | "syminfo.ticker" => "ctx.Symbol".to_string(),
        "timeframe.period" => "ctx.Timeframe".to_string(),
        "strategy.long" => "strategy.Long".to_string(),
        "strategy.short" => "strategy.Short".to_string(),
        "strategy.position_size" => "strat.GetPositionSize()".to_string(),
        "math.pi" => "math.Pi".to_string(),
        "math.e" => "math.E".to_string(),
        other => other.to_string(),
    }
}

fn map_binary_operator(operator: &str) -> Option<&'static str> {
    Some(match operator {
        "and" | "&&" => "&&",
        "or" | "||" => "||",
        "=" | "==" => "==",
        "!=" => "!=",
        "+" => "+",
        "-" => "-",
        "*" => "*",
        "/" => "/",
        "<" => "<",
        ">" => ">",
        "<=" => "<=",
        ">=" => ">=",
        _ => return None,
    })
}

fn source_literal_value(value: &LiteralValue) -> String {
    match value {
        LiteralValue::Null => "math.NaN()".to_string(),
        other => ast_literal_value(other),
    }
}

fn ast_literal_value(value: &LiteralValue) -> String {
    match value {
        LiteralValue::Null => "nil".to_string(),
        LiteralValue::Bool(b) => b.to_string(),
        LiteralValue::Int(i) => i.to_string(),
        LiteralValue::Float(f) => format_float(*f),
        LiteralValue::Str(s) => go_quote(s),
    }
}

/// Floats always carry a decimal point or exponent so Go keeps them floating point.
pub fn format_float(value: f64) -> String {
    format!("{value:?}")
}

/// Go interpreted string literal.
pub fn go_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
