//! Programmatic AST construction, used by fixtures, benches and callers that build
//! programs without going through the parser.

use crate::ast::types::*;

pub fn ident(name: &str) -> Expr {
    Expr::Identifier {
        name: name.to_string(),
    }
}

pub fn int(value: i64) -> Expr {
    Expr::Literal {
        value: LiteralValue::Int(value),
        raw: None,
    }
}

pub fn float(value: f64) -> Expr {
    Expr::Literal {
        value: LiteralValue::Float(value),
        raw: None,
    }
}

pub fn string(value: &str) -> Expr {
    Expr::Literal {
        value: LiteralValue::Str(value.to_string()),
        raw: None,
    }
}

pub fn boolean(value: bool) -> Expr {
    Expr::Literal {
        value: LiteralValue::Bool(value),
        raw: None,
    }
}

pub fn null() -> Expr {
    Expr::Literal {
        value: LiteralValue::Null,
        raw: None,
    }
}

pub fn binary(operator: &str, left: Expr, right: Expr) -> Expr {
    Expr::BinaryExpression {
        operator: operator.to_string(),
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn logical(operator: &str, left: Expr, right: Expr) -> Expr {
    Expr::LogicalExpression {
        operator: operator.to_string(),
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn unary(operator: &str, argument: Expr) -> Expr {
    Expr::UnaryExpression {
        operator: operator.to_string(),
        argument: Box::new(argument),
    }
}

pub fn conditional(test: Expr, consequent: Expr, alternate: Expr) -> Expr {
    Expr::ConditionalExpression {
        test: Box::new(test),
        consequent: Box::new(consequent),
        alternate: Box::new(alternate),
    }
}

pub fn member(object: &str, property: &str) -> Expr {
    Expr::MemberExpression {
        object: Box::new(ident(object)),
        property: Box::new(ident(property)),
        computed: false,
    }
}

/// History access `object[offset]`.
pub fn index(object: Expr, offset: Expr) -> Expr {
    Expr::MemberExpression {
        object: Box::new(object),
        property: Box::new(offset),
        computed: true,
    }
}

pub fn call(callee: Expr, arguments: Vec<Expr>) -> Expr {
    Expr::CallExpression {
        callee: Box::new(callee),
        arguments,
    }
}

/// Call by dotted name: `"plot"` becomes an identifier callee, `"ta.sma"` a member callee.
pub fn call_named(name: &str, arguments: Vec<Expr>) -> Expr {
    let callee = match name.split_once('.') {
        Some((object, property)) => member(object, property),
        None => ident(name),
    };
    call(callee, arguments)
}

/// `ta.<function>(arguments...)`
pub fn ta(function: &str, arguments: Vec<Expr>) -> Expr {
    call(member("ta", function), arguments)
}

/// `security(symbol, timeframe, expression)` with a string-literal symbol.
pub fn security(symbol: &str, timeframe: &str, expression: Expr) -> Expr {
    call(
        ident("security"),
        vec![string(symbol), string(timeframe), expression],
    )
}

/// `request.security(syminfo.tickerid, timeframe, expression)`
pub fn request_security_current(timeframe: &str, expression: Expr) -> Expr {
    call(
        member("request", "security"),
        vec![member("syminfo", "tickerid"), string(timeframe), expression],
    )
}

pub fn object(properties: Vec<(&str, Expr)>) -> Expr {
    Expr::ObjectExpression {
        properties: properties
            .into_iter()
            .map(|(key, value)| Property {
                key: ident(key),
                value,
            })
            .collect(),
    }
}

pub fn var_decl(name: &str, init: Expr) -> Statement {
    Statement::VariableDeclaration {
        declarations: vec![VariableDeclarator {
            id: Identifier {
                name: name.to_string(),
            },
            init: Some(init),
        }],
        kind: "var".to_string(),
    }
}

pub fn expr_stmt(expression: Expr) -> Statement {
    Statement::ExpressionStatement { expression }
}

pub fn if_stmt(test: Expr, consequent: Vec<Statement>, alternate: Vec<Statement>) -> Statement {
    Statement::IfStatement {
        test,
        consequent,
        alternate,
    }
}

/// `strategy("name")` header statement.
pub fn strategy_header(name: &str) -> Statement {
    expr_stmt(call(ident("strategy"), vec![string(name)]))
}

pub fn program(body: Vec<Statement>) -> Program {
    Program { body }
}
