use std::fmt;

use tracing::{debug, info};

use crate::ast::{find_argument, Expr, LiteralValue, Program, Statement};
use crate::codegen::error::{LowerError, Result};
use crate::codegen::indicators::IndicatorRegistry;

/// Symbol requested by a security call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SymbolRef {
    /// The symbol the emitted program runs on (`syminfo.tickerid`), resolved at runtime.
    Runtime,
    Literal(String),
}

/// Deduplication key of a prefetch: `"SYMBOL:TF"`, with `%s` standing in for the runtime symbol
/// and for the base timeframe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecurityKey {
    pub symbol: SymbolRef,
    /// Canonical timeframe, empty for the base timeframe.
    pub timeframe: String,
}

impl SecurityKey {
    pub fn template(&self) -> String {
        let symbol = match &self.symbol {
            SymbolRef::Runtime => "%s",
            SymbolRef::Literal(s) => s.as_str(),
        };
        let timeframe = if self.timeframe.is_empty() {
            "%s"
        } else {
            self.timeframe.as_str()
        };
        format!("{symbol}:{timeframe}")
    }

    pub fn is_runtime_bound(&self) -> bool {
        self.symbol == SymbolRef::Runtime || self.timeframe.is_empty()
    }

    /// Local-variable stem for this key: `sec_<symbol|cur>_<tf|base>`, lowercased.
    pub fn var_stem(&self) -> String {
        let symbol = match &self.symbol {
            SymbolRef::Runtime => "cur".to_string(),
            SymbolRef::Literal(s) => sanitize(s),
        };
        let timeframe = if self.timeframe.is_empty() {
            "base".to_string()
        } else {
            sanitize(&self.timeframe)
        };
        format!("sec_{symbol}_{timeframe}")
    }
}

impl fmt::Display for SecurityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template())
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// One `security(symbol, timeframe, expression)` call found in the program.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityCall {
    pub symbol: SymbolRef,
    pub timeframe: String,
    pub expression: Expr,
    /// Declarator bound to the call, `"unnamed"` when nested or discarded.
    pub name: String,
    pub lookahead: bool,
    /// Top-level statement index the call appears in.
    pub position: usize,
}

impl SecurityCall {
    pub fn key(&self) -> SecurityKey {
        SecurityKey {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.clone(),
        }
    }

    pub fn max_period(&self) -> usize {
        extract_max_period(&self.expression)
    }
}

pub fn is_security_call(expr: &Expr) -> bool {
    matches!(
        expr.callee_name().as_deref(),
        Some("security") | Some("request.security")
    )
}

/// `D`, `W`, `M` become `1D`, `1W`, `1M`; quotes are trimmed.
pub fn canonical_timeframe(raw: &str) -> String {
    let trimmed = raw.trim_matches(|c| c == '"' || c == '\'');
    match trimmed {
        "D" => "1D".to_string(),
        "W" => "1W".to_string(),
        "M" => "1M".to_string(),
        other => other.to_string(),
    }
}

/// Collects every security call in pre-order, descending into if-bodies and call arguments.
pub fn analyze_program(program: &Program) -> Result<Vec<SecurityCall>> {
    let mut calls = Vec::new();
    for (position, statement) in program.body.iter().enumerate() {
        walk_statement(statement, position, &mut calls)?;
    }
    info!(count = calls.len(), "security analysis complete");
    Ok(calls)
}

fn walk_statement(
    statement: &Statement,
    position: usize,
    calls: &mut Vec<SecurityCall>,
) -> Result<()> {
    match statement {
        Statement::ExpressionStatement { expression } => {
            walk_expr(expression, None, position, calls)
        }
        Statement::VariableDeclaration { declarations, .. } => {
            for declarator in declarations {
                if let Some(init) = &declarator.init {
                    walk_expr(init, Some(&declarator.id.name), position, calls)?;
                }
            }
            Ok(())
        }
        Statement::IfStatement {
            test,
            consequent,
            alternate,
        } => {
            walk_expr(test, None, position, calls)?;
            for statement in consequent.iter().chain(alternate) {
                walk_statement(statement, position, calls)?;
            }
            Ok(())
        }
    }
}

fn walk_expr(
    expr: &Expr,
    name: Option<&str>,
    position: usize,
    calls: &mut Vec<SecurityCall>,
) -> Result<()> {
    if is_security_call(expr) {
        let call = parse_security_call(expr, name, position)?;
        debug!(
            key = %call.key(),
            name = %call.name,
            lookahead = call.lookahead,
            "found security call"
        );
        calls.push(call);
    }
    for child in expr.children() {
        walk_expr(child, None, position, calls)?;
    }
    Ok(())
}

/// Parses one `security(...)` call expression found at top-level statement `position`.
pub fn parse_security_call(expr: &Expr, name: Option<&str>, position: usize) -> Result<SecurityCall> {
    extract_security_call(expr, name, position).map_err(|e| e.at(position))
}

fn extract_security_call(
    expr: &Expr,
    name: Option<&str>,
    position: usize,
) -> std::result::Result<SecurityCall, LowerError> {
    let arguments = expr.call_arguments();
    if arguments.len() < 3 {
        return Err(LowerError::new(
            "CallExpression",
            format!(
                "security() needs symbol, timeframe and expression, got {} argument(s)",
                arguments.len()
            ),
        ));
    }

    Ok(SecurityCall {
        symbol: extract_symbol(&arguments[0])?,
        timeframe: extract_timeframe(&arguments[1])?,
        expression: arguments[2].clone(),
        name: name.unwrap_or("unnamed").to_string(),
        lookahead: extract_lookahead(arguments),
        position,
    })
}

fn extract_symbol(expr: &Expr) -> std::result::Result<SymbolRef, LowerError> {
    if let Some(literal) = expr.as_string_literal() {
        let symbol = literal.trim_matches(|c| c == '"' || c == '\'');
        return Ok(if symbol.is_empty() {
            SymbolRef::Runtime
        } else {
            SymbolRef::Literal(symbol.to_string())
        });
    }
    match expr.dotted_name().as_deref() {
        Some("tickerid") | Some("syminfo.tickerid") | Some("syminfo.ticker") => {
            Ok(SymbolRef::Runtime)
        }
        Some(other) => Ok(SymbolRef::Literal(other.to_string())),
        None => Err(LowerError::new(
            expr.variant_name(),
            "security() symbol must be a string, identifier or syminfo.tickerid",
        )),
    }
}

fn extract_timeframe(expr: &Expr) -> std::result::Result<String, LowerError> {
    if let Some(literal) = expr.as_string_literal() {
        return Ok(canonical_timeframe(literal));
    }
    match expr.dotted_name().as_deref() {
        Some("timeframe") | Some("timeframe.period") => Ok(String::new()),
        _ => Err(LowerError::new(
            expr.variant_name(),
            "security() timeframe must be a string literal or timeframe.period",
        )),
    }
}

fn extract_lookahead(arguments: &[Expr]) -> bool {
    match find_argument(arguments, 3, "lookahead") {
        Some(Expr::Literal {
            value: LiteralValue::Bool(on),
            ..
        }) => *on,
        Some(other) => other.dotted_name().as_deref() == Some("barmerge.lookahead_on"),
        None => false,
    }
}

/// Largest literal period of any TA call inside `expr`, 0 when there is none.
pub fn extract_max_period(expr: &Expr) -> usize {
    let registry = IndicatorRegistry::new();
    max_period_with(&registry, expr)
}

fn max_period_with(registry: &IndicatorRegistry, expr: &Expr) -> usize {
    let own = match expr {
        Expr::CallExpression { arguments, .. } => expr
            .callee_name()
            .map(|name| registry.get_lookback(&name, arguments))
            .unwrap_or(0),
        _ => 0,
    };
    expr.children()
        .into_iter()
        .map(|child| max_period_with(registry, child))
        .fold(own, usize::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
    use crate::codegen::error::CodegenError;

    #[test]
    fn test_finds_named_security_call() {
        let prog = program(vec![
            strategy_header("Test"),
            var_decl("dailyClose", security("BTCUSDT", "1D", ident("close"))),
        ]);
        let calls = analyze_program(&prog).unwrap();

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].symbol, SymbolRef::Literal("BTCUSDT".to_string()));
        assert_eq!(calls[0].timeframe, "1D");
        assert_eq!(calls[0].name, "dailyClose");
        assert_eq!(calls[0].position, 1);
        assert_eq!(calls[0].expression, ident("close"));
        assert_eq!(calls[0].key().template(), "BTCUSDT:1D");
        assert!(!calls[0].lookahead);
    }

    #[test]
    fn test_runtime_symbol_and_base_timeframe() {
        let prog = program(vec![
            var_decl("a", request_security_current("D", ident("close"))),
            var_decl(
                "b",
                call_named(
                    "security",
                    vec![ident("tickerid"), member("timeframe", "period"), ident("open")],
                ),
            ),
            var_decl("c", security("", "W", ident("high"))),
        ]);
        let calls = analyze_program(&prog).unwrap();

        assert_eq!(calls[0].symbol, SymbolRef::Runtime);
        assert_eq!(calls[0].timeframe, "1D");
        assert_eq!(calls[0].key().template(), "%s:1D");
        assert_eq!(calls[1].timeframe, "");
        assert_eq!(calls[1].key().template(), "%s:%s");
        assert_eq!(calls[1].key().var_stem(), "sec_cur_base");
        assert_eq!(calls[2].symbol, SymbolRef::Runtime);
        assert_eq!(calls[2].timeframe, "1W");
    }

    #[test]
    fn test_nested_and_conditional_calls_are_found() {
        let inner = security("ETHUSDT", "1h", ident("close"));
        let prog = program(vec![
            expr_stmt(call_named(
                "plot",
                vec![binary("+", security("BTCUSDT", "1D", inner), int(1))],
            )),
            if_stmt(
                binary(">", ident("close"), int(0)),
                vec![var_decl("w", security("BTCUSDT", "1W", ident("low")))],
                vec![],
            ),
        ]);
        let calls = analyze_program(&prog).unwrap();

        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].timeframe, "1D");
        assert_eq!(calls[0].name, "unnamed");
        assert_eq!(calls[1].symbol, SymbolRef::Literal("ETHUSDT".to_string()));
        assert_eq!(calls[2].name, "w");
        assert_eq!(calls[2].position, 1);
    }

    #[test]
    fn test_too_few_arguments_is_an_error() {
        let prog = program(vec![
            strategy_header("x"),
            var_decl("bad", call_named("security", vec![string("BTC"), string("1D")])),
        ]);
        let err = analyze_program(&prog).unwrap_err();
        match err {
            CodegenError::InvalidInput { position, .. } => assert_eq!(position, 1),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_invalid_timeframe_is_an_error() {
        let prog = program(vec![var_decl(
            "bad",
            call_named("security", vec![string("BTC"), int(60), ident("close")]),
        )]);
        assert!(analyze_program(&prog).is_err());
    }

    #[test]
    fn test_lookahead_argument() {
        let positional = call_named(
            "security",
            vec![string("BTC"), string("1D"), ident("close"), boolean(true)],
        );
        let named = call_named(
            "security",
            vec![
                string("BTC"),
                string("1D"),
                ident("close"),
                object(vec![("lookahead", member("barmerge", "lookahead_on"))]),
            ],
        );
        let prog = program(vec![var_decl("a", positional), var_decl("b", named)]);
        let calls = analyze_program(&prog).unwrap();

        assert!(calls[0].lookahead);
        assert!(calls[1].lookahead);
    }

    #[test]
    fn test_max_period() {
        let expr = binary(
            "+",
            ta("sma", vec![ident("close"), int(20)]),
            ta("ema", vec![ident("close"), int(10)]),
        );
        assert_eq!(extract_max_period(&expr), 20);
        assert_eq!(extract_max_period(&ta("atr", vec![int(14)])), 14);
        assert_eq!(extract_max_period(&ident("close")), 0);
        assert_eq!(
            extract_max_period(&ta("sma", vec![ta("rsi", vec![ident("close"), int(100)]), float(5.5)])),
            100
        );
        assert_eq!(
            extract_max_period(&ta("sma", vec![ident("close"), ident("len")])),
            0
        );
    }

    #[test]
    fn test_canonical_timeframe_and_var_stem() {
        assert_eq!(canonical_timeframe("D"), "1D");
        assert_eq!(canonical_timeframe("'W'"), "1W");
        assert_eq!(canonical_timeframe("240"), "240");

        let key = SecurityKey {
            symbol: SymbolRef::Literal("BTC-USD.P".to_string()),
            timeframe: "1D".to_string(),
        };
        assert_eq!(key.var_stem(), "sec_btc_usd_p_1d");
        assert!(!key.is_runtime_bound());
    }
}
