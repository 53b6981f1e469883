//! Program-wide variable table.
//!
//! Every declared name becomes one Go local declared before the bar loop, so values persist
//! across bars and reassignments inside `if` bodies are visible afterwards. Names whose past
//! values are read (`x[1]`, `ta.sma(x, 10)`) also record one entry per completed bar.

use std::collections::{BTreeSet, HashMap};

use crate::ast::{find_argument, Expr, LiteralValue, Program, Property, Statement};
use crate::codegen::indicators::{series_accessor, series_history, ta_function_name, Source};

#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    /// Names in order of first declaration.
    order: Vec<String>,
    types: HashMap<String, &'static str>,
    /// Names declared once with a literal or an `input.*` default.
    constants: HashMap<String, Expr>,
    history: BTreeSet<String>,
}

impl VariableTable {
    pub fn from_program(program: &Program) -> Self {
        let mut table = Self::default();
        let mut declarations: HashMap<String, usize> = HashMap::new();
        let mut candidates: HashMap<String, Expr> = HashMap::new();
        table.collect(&program.body, &mut declarations, &mut candidates);

        table.constants = candidates
            .into_iter()
            .filter(|(name, _)| declarations.get(name) == Some(&1))
            .collect();

        let mut history = BTreeSet::new();
        for statement in &program.body {
            table.mark_history(statement, &mut history);
        }
        table.history = history;
        table
    }

    fn collect(
        &mut self,
        statements: &[Statement],
        declarations: &mut HashMap<String, usize>,
        candidates: &mut HashMap<String, Expr>,
    ) {
        for statement in statements {
            match statement {
                Statement::VariableDeclaration { declarations: list, .. } => {
                    for declarator in list {
                        let name = declarator.id.name.clone();
                        *declarations.entry(name.clone()).or_default() += 1;
                        if let Some(constant) = declarator.init.as_ref().and_then(constant_value) {
                            candidates.entry(name.clone()).or_insert(constant);
                        }
                        if self.types.contains_key(&name) {
                            continue;
                        }
                        let go_type = match &declarator.init {
                            Some(init) => self.infer(init),
                            None => "float64",
                        };
                        self.types.insert(name.clone(), go_type);
                        self.order.push(name);
                    }
                }
                Statement::IfStatement {
                    consequent,
                    alternate,
                    ..
                } => {
                    self.collect(consequent, declarations, candidates);
                    self.collect(alternate, declarations, candidates);
                }
                Statement::ExpressionStatement { .. } => {}
            }
        }
    }

    fn mark_history(&self, statement: &Statement, history: &mut BTreeSet<String>) {
        match statement {
            Statement::ExpressionStatement { expression } => self.mark_expr(expression, history),
            Statement::VariableDeclaration { declarations, .. } => {
                for init in declarations.iter().filter_map(|d| d.init.as_ref()) {
                    self.mark_expr(init, history);
                }
            }
            Statement::IfStatement {
                test,
                consequent,
                alternate,
            } => {
                self.mark_expr(test, history);
                for statement in consequent.iter().chain(alternate) {
                    self.mark_history(statement, history);
                }
            }
        }
    }

    fn mark_expr(&self, expr: &Expr, history: &mut BTreeSet<String>) {
        match expr {
            Expr::MemberExpression {
                object,
                computed: true,
                ..
            } => {
                if let Some(name) = object.as_identifier() {
                    self.mark_name(name, history);
                }
            }
            Expr::CallExpression { arguments, .. } => {
                let function = expr.callee_name().unwrap_or_default();
                if function.starts_with("ta.") && takes_series_source(ta_function_name(&function)) {
                    if let Some(name) =
                        find_argument(arguments, 0, "source").and_then(Expr::as_identifier)
                    {
                        self.mark_name(name, history);
                    }
                }
            }
            _ => {}
        }
        for child in expr.children() {
            self.mark_expr(child, history);
        }
    }

    fn mark_name(&self, name: &str, history: &mut BTreeSet<String>) {
        if self.types.contains_key(name) && !self.constants.contains_key(name) {
            history.insert(name.to_string());
        }
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn type_of(&self, name: &str) -> Option<&'static str> {
        self.types.get(name).copied()
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn needs_history(&self, name: &str) -> bool {
        self.history.contains(name)
    }

    pub fn constant(&self, name: &str) -> Option<&Expr> {
        self.constants.get(name)
    }

    /// Go type of `expr` given the declared names.
    pub fn infer(&self, expr: &Expr) -> &'static str {
        infer_go_type(expr, &|name| self.type_of(name))
    }

    /// Copy of `expr` with constant names replaced by their values.
    pub fn resolve_constants(&self, expr: &Expr) -> Expr {
        if self.constants.is_empty() {
            return expr.clone();
        }
        match expr {
            Expr::Identifier { name } => self
                .constants
                .get(name)
                .cloned()
                .unwrap_or_else(|| expr.clone()),
            Expr::Literal { .. } => expr.clone(),
            Expr::BinaryExpression {
                operator,
                left,
                right,
            } => Expr::BinaryExpression {
                operator: operator.clone(),
                left: Box::new(self.resolve_constants(left)),
                right: Box::new(self.resolve_constants(right)),
            },
            Expr::LogicalExpression {
                operator,
                left,
                right,
            } => Expr::LogicalExpression {
                operator: operator.clone(),
                left: Box::new(self.resolve_constants(left)),
                right: Box::new(self.resolve_constants(right)),
            },
            Expr::UnaryExpression { operator, argument } => Expr::UnaryExpression {
                operator: operator.clone(),
                argument: Box::new(self.resolve_constants(argument)),
            },
            Expr::ConditionalExpression {
                test,
                consequent,
                alternate,
            } => Expr::ConditionalExpression {
                test: Box::new(self.resolve_constants(test)),
                consequent: Box::new(self.resolve_constants(consequent)),
                alternate: Box::new(self.resolve_constants(alternate)),
            },
            Expr::CallExpression { callee, arguments } => Expr::CallExpression {
                callee: callee.clone(),
                arguments: arguments.iter().map(|a| self.resolve_constants(a)).collect(),
            },
            Expr::MemberExpression {
                object,
                property,
                computed,
            } => Expr::MemberExpression {
                object: Box::new(self.resolve_constants(object)),
                property: if *computed {
                    Box::new(self.resolve_constants(property))
                } else {
                    property.clone()
                },
                computed: *computed,
            },
            Expr::ObjectExpression { properties } => Expr::ObjectExpression {
                properties: properties
                    .iter()
                    .map(|Property { key, value }| Property {
                        key: key.clone(),
                        value: self.resolve_constants(value),
                    })
                    .collect(),
            },
        }
    }

    /// Locals declared once before the bar loop.
    pub fn declarations(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for name in &self.order {
            let go_type = self.types.get(name).copied().unwrap_or("float64");
            let ident = go_ident(name);
            lines.push(format!("{ident} := {}", zero_value(go_type)));
            if self.history.contains(name) {
                let hist = series_history(&ident);
                let at = series_accessor(&ident);
                lines.push(format!("{hist} := make([]{go_type}, 0, len(ctx.Data))"));
                lines.push(format!("{at} := func(k int) {go_type} {{"));
                lines.push(format!("\tif k < len({hist}) {{"));
                lines.push(format!("\t\treturn {hist}[k]"));
                lines.push("\t}".to_string());
                lines.push(format!("\treturn {ident}"));
                lines.push("}".to_string());
                lines.push(format!("_ = {at}"));
            }
        }
        for name in &self.order {
            lines.push(format!("_ = {}", go_ident(name)));
        }
        lines
    }

    /// Statements closing each bar: the value every recorded name held at that bar.
    pub fn end_of_bar(&self) -> Vec<String> {
        self.history
            .iter()
            .map(|name| {
                let ident = go_ident(name);
                let hist = series_history(&ident);
                format!("{hist} = append({hist}, {ident})")
            })
            .collect()
    }
}

/// Inline generators whose first argument is read at past bars.
fn takes_series_source(function: &str) -> bool {
    matches!(
        function,
        "sma" | "ema" | "rma" | "wma" | "stdev" | "change" | "mom"
    )
}

/// Compile-time value of an initializer: a literal, or the default of an `input.*` call.
fn constant_value(init: &Expr) -> Option<Expr> {
    match init {
        Expr::Literal {
            value: LiteralValue::Null,
            ..
        } => None,
        Expr::Literal { .. } => Some(init.clone()),
        Expr::UnaryExpression { operator, argument }
            if operator == "-" && argument.as_number().is_some() =>
        {
            Some(init.clone())
        }
        Expr::CallExpression { arguments, .. } => {
            let function = init.callee_name()?;
            if !is_input_function(&function) {
                return None;
            }
            let defval = find_argument(arguments, 0, "defval")?;
            match defval {
                Expr::Literal { .. } => constant_value(defval),
                Expr::Identifier { name }
                    if function == "input.source" && Source::from_name(name).is_some() =>
                {
                    Some(defval.clone())
                }
                _ => None,
            }
        }
        _ => None,
    }
}

pub fn is_input_function(function: &str) -> bool {
    function == "input" || function.starts_with("input.")
}

pub fn zero_value(go_type: &str) -> &'static str {
    match go_type {
        "bool" => "false",
        "string" => "\"\"",
        _ => "math.NaN()",
    }
}

/// Go type of an expression. `declared` resolves user variables; unknown names are floats.
pub fn infer_go_type(expr: &Expr, declared: &dyn Fn(&str) -> Option<&'static str>) -> &'static str {
    match expr {
        Expr::Literal { value, .. } => match value {
            LiteralValue::Bool(_) => "bool",
            LiteralValue::Str(_) => "string",
            _ => "float64",
        },
        Expr::Identifier { name } => match name.as_str() {
            "true" | "false" => "bool",
            other => declared(other).unwrap_or("float64"),
        },
        Expr::BinaryExpression {
            operator,
            left,
            right,
        } => match operator.as_str() {
            "==" | "=" | "!=" | "<" | ">" | "<=" | ">=" | "and" | "or" | "&&" | "||" => "bool",
            "+" if infer_go_type(left, declared) == "string"
                || infer_go_type(right, declared) == "string" =>
            {
                "string"
            }
            _ => "float64",
        },
        Expr::LogicalExpression { .. } => "bool",
        Expr::UnaryExpression { operator, .. } if operator == "!" || operator == "not" => "bool",
        Expr::UnaryExpression { .. } => "float64",
        Expr::ConditionalExpression {
            consequent,
            alternate,
            ..
        } => {
            if is_na(consequent) {
                infer_go_type(alternate, declared)
            } else {
                infer_go_type(consequent, declared)
            }
        }
        Expr::CallExpression { arguments, .. } => {
            let function = expr.callee_name().unwrap_or_default();
            match function.as_str() {
                "na" | "ta.crossover" | "ta.crossunder" | "input.bool" => "bool",
                "input.string" | "input.timeframe" | "input.symbol" => "string",
                "input" => find_argument(arguments, 0, "defval")
                    .map(|defval| infer_go_type(defval, declared))
                    .unwrap_or("float64"),
                _ => "float64",
            }
        }
        Expr::MemberExpression {
            object,
            computed: true,
            ..
        } => infer_go_type(object, declared),
        Expr::MemberExpression { .. } => match expr.dotted_name().as_deref() {
            Some(
                "strategy.long" | "strategy.short" | "syminfo.tickerid" | "syminfo.ticker"
                | "timeframe.period",
            ) => "string",
            _ => "float64",
        },
        Expr::ObjectExpression { .. } => "float64",
    }
}

fn is_na(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Literal {
            value: LiteralValue::Null,
            ..
        }
    ) || expr.as_identifier() == Some("na")
}

/// Names a user variable cannot take in the emitted function: Go keywords, predeclared
/// identifiers, imported packages and the locals of the generated program.
const RESERVED: &[&str] = &[
    // keywords
    "break", "case", "chan", "const", "continue", "default", "defer", "else", "fallthrough",
    "for", "func", "go", "goto", "if", "import", "interface", "map", "package", "range",
    "return", "select", "struct", "switch", "type", "var",
    // predeclared
    "any", "append", "bool", "byte", "cap", "clear", "close", "complex", "copy", "delete",
    "error", "false", "float32", "float64", "imag", "int", "int64", "iota", "len", "make",
    "max", "min", "new", "nil", "panic", "print", "println", "real", "recover", "rune",
    "string", "true",
    // packages
    "ast", "context", "datafetcher", "fmt", "json", "math", "os", "output", "security",
    "strategy",
    // generated locals
    "bar", "barCount", "baseTimeframeSeconds", "collector", "ctx", "dataDir", "fetcher", "i",
    "j", "k", "maxBars", "secBarEvaluator", "secBarIdx", "secCtx", "secTimeframeSeconds",
    "securityContexts", "strat", "timeframeRatio",
];

/// Go identifier for a user variable; reserved names get a `_` suffix.
pub fn go_ident(name: &str) -> String {
    if RESERVED.contains(&name) {
        format!("{name}_")
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;

    #[test]
    fn test_declarations_follow_first_use_order_and_type() {
        let prog = program(vec![
            var_decl("up", binary(">", ident("close"), ident("open"))),
            if_stmt(ident("up"), vec![var_decl("label", string("up"))], vec![]),
            var_decl("up", boolean(false)),
            var_decl("total", binary("+", ident("total"), int(1))),
        ]);
        let table = VariableTable::from_program(&prog);

        assert_eq!(table.names(), ["up", "label", "total"]);
        assert_eq!(table.type_of("up"), Some("bool"));
        assert_eq!(table.type_of("label"), Some("string"));
        assert_eq!(table.type_of("total"), Some("float64"));
        assert_eq!(
            table.declarations(),
            vec![
                "up := false",
                "label := \"\"",
                "total := math.NaN()",
                "_ = up",
                "_ = label",
                "_ = total",
            ]
        );
        assert!(table.end_of_bar().is_empty());
    }

    #[test]
    fn test_conditional_type_uses_declared_names() {
        let prog = program(vec![
            var_decl("up", binary(">", ident("close"), ident("open"))),
            var_decl("sig", conditional(ident("up"), ident("up"), boolean(false))),
            var_decl("level", conditional(ident("up"), null(), ident("close"))),
        ]);
        let table = VariableTable::from_program(&prog);
        assert_eq!(table.type_of("sig"), Some("bool"));
        assert_eq!(table.type_of("level"), Some("float64"));
    }

    #[test]
    fn test_inputs_and_single_literals_are_constants() {
        let prog = program(vec![
            var_decl("len", call_named("input.int", vec![int(14)])),
            var_decl("mult", call_named("input.float", vec![object(vec![("defval", float(2.5))])])),
            var_decl("src", call_named("input.source", vec![ident("hl2")])),
            var_decl("useLong", call_named("input.bool", vec![boolean(true)])),
            var_decl("counter", int(0)),
            var_decl("counter", binary("+", ident("counter"), int(1))),
        ]);
        let table = VariableTable::from_program(&prog);

        assert_eq!(table.constant("len"), Some(&int(14)));
        assert_eq!(table.constant("mult"), Some(&float(2.5)));
        assert_eq!(table.constant("src"), Some(&ident("hl2")));
        assert_eq!(table.type_of("useLong"), Some("bool"));
        assert_eq!(table.constant("counter"), None);

        let resolved = table.resolve_constants(&ta("sma", vec![ident("src"), ident("len")]));
        assert_eq!(resolved, ta("sma", vec![ident("hl2"), int(14)]));
        // callee names are never substituted
        assert_eq!(
            table.resolve_constants(&call_named("len", vec![ident("len")])),
            call_named("len", vec![int(14)])
        );
    }

    #[test]
    fn test_history_is_recorded_for_indexed_and_source_names() {
        let prog = program(vec![
            var_decl("basis", binary("/", binary("+", ident("high"), ident("low")), int(2))),
            var_decl("smooth", ta("sma", vec![ident("basis"), int(5)])),
            var_decl("up", binary(">", ident("close"), ident("open"))),
            var_decl("flip", logical("and", ident("up"), unary("not", index(ident("up"), int(1))))),
            var_decl("len", int(10)),
            var_decl("unused", ta("ema", vec![ident("close"), ident("len")])),
        ]);
        let table = VariableTable::from_program(&prog);

        assert!(table.needs_history("basis"));
        assert!(table.needs_history("up"));
        assert!(!table.needs_history("smooth"));
        assert!(!table.needs_history("len"));

        let declarations = table.declarations();
        assert!(declarations.contains(&"basis_hist := make([]float64, 0, len(ctx.Data))".to_string()));
        assert!(declarations.contains(&"basis_at := func(k int) float64 {".to_string()));
        assert!(declarations.contains(&"up_hist := make([]bool, 0, len(ctx.Data))".to_string()));
        assert!(declarations.contains(&"\t\treturn basis_hist[k]".to_string()));
        assert!(declarations.contains(&"len_ := math.NaN()".to_string()));
        assert_eq!(
            table.end_of_bar(),
            vec!["basis_hist = append(basis_hist, basis)", "up_hist = append(up_hist, up)"]
        );
    }

    #[test]
    fn test_go_ident_renames_reserved_names() {
        assert_eq!(go_ident("len"), "len_");
        assert_eq!(go_ident("range"), "range_");
        assert_eq!(go_ident("type"), "type_");
        assert_eq!(go_ident("i"), "i_");
        assert_eq!(go_ident("ctx"), "ctx_");
        assert_eq!(go_ident("fastLen"), "fastLen");
    }

    #[test]
    fn test_infer_go_type_without_declarations() {
        let none = |_: &str| None;
        assert_eq!(infer_go_type(&binary("+", string("a"), ident("x")), &none), "string");
        assert_eq!(infer_go_type(&ta("crossover", vec![ident("a"), ident("b")]), &none), "bool");
        assert_eq!(infer_go_type(&call_named("input", vec![boolean(true)]), &none), "bool");
        assert_eq!(infer_go_type(&member("syminfo", "tickerid"), &none), "string");
        assert_eq!(infer_go_type(&index(ident("close"), int(1)), &none), "float64");
    }
}
