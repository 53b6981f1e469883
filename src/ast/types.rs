use serde::{Deserialize, Serialize};

/// Parsed strategy program in ESTree shape.
/// Nodes are plain values: children are owned, never shared, and equality is structural.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Statement {
    ExpressionStatement {
        expression: Expr,
    },
    VariableDeclaration {
        declarations: Vec<VariableDeclarator>,
        #[serde(default = "default_kind")]
        kind: String,
    },
    IfStatement {
        test: Expr,
        #[serde(default)]
        consequent: Vec<Statement>,
        #[serde(default)]
        alternate: Vec<Statement>,
    },
}

fn default_kind() -> String {
    "var".to_string()
}

impl Statement {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Statement::ExpressionStatement { .. } => "ExpressionStatement",
            Statement::VariableDeclaration { .. } => "VariableDeclaration",
            Statement::IfStatement { .. } => "IfStatement",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDeclarator {
    pub id: Identifier,
    #[serde(default)]
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub key: Expr,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expr {
    Identifier {
        name: String,
    },
    Literal {
        #[serde(default)]
        value: LiteralValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
    BinaryExpression {
        operator: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    LogicalExpression {
        operator: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryExpression {
        operator: String,
        argument: Box<Expr>,
    },
    ConditionalExpression {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    CallExpression {
        callee: Box<Expr>,
        #[serde(default)]
        arguments: Vec<Expr>,
    },
    MemberExpression {
        object: Box<Expr>,
        property: Box<Expr>,
        #[serde(default)]
        computed: bool,
    },
    ObjectExpression {
        #[serde(default)]
        properties: Vec<Property>,
    },
}

/// Literal payload. Integers and floats stay distinct so emitted code keeps the source form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiteralValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl LiteralValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LiteralValue::Int(v) => Some(*v as f64),
            LiteralValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LiteralValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl Expr {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Expr::Identifier { .. } => "Identifier",
            Expr::Literal { .. } => "Literal",
            Expr::BinaryExpression { .. } => "BinaryExpression",
            Expr::LogicalExpression { .. } => "LogicalExpression",
            Expr::UnaryExpression { .. } => "UnaryExpression",
            Expr::ConditionalExpression { .. } => "ConditionalExpression",
            Expr::CallExpression { .. } => "CallExpression",
            Expr::MemberExpression { .. } => "MemberExpression",
            Expr::ObjectExpression { .. } => "ObjectExpression",
        }
    }

    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            Expr::Identifier { name } => Some(name),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&LiteralValue> {
        match self {
            Expr::Literal { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        self.as_literal().and_then(LiteralValue::as_f64)
    }

    pub fn as_string_literal(&self) -> Option<&str> {
        self.as_literal().and_then(LiteralValue::as_str)
    }

    /// Dotted name of an identifier or a non-computed member chain (`ta.sma`, `syminfo.tickerid`).
    pub fn dotted_name(&self) -> Option<String> {
        match self {
            Expr::Identifier { name } => Some(name.clone()),
            Expr::MemberExpression {
                object,
                property,
                computed: false,
            } => {
                let object = object.dotted_name()?;
                let property = property.as_identifier()?;
                Some(format!("{object}.{property}"))
            }
            _ => None,
        }
    }

    /// Function name of a call expression, e.g. `ta.atr` or `plot`.
    pub fn callee_name(&self) -> Option<String> {
        match self {
            Expr::CallExpression { callee, .. } => callee.dotted_name(),
            _ => None,
        }
    }

    pub fn call_arguments(&self) -> &[Expr] {
        match self {
            Expr::CallExpression { arguments, .. } => arguments,
            _ => &[],
        }
    }

    /// Direct child expressions in source order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Identifier { .. } | Expr::Literal { .. } => Vec::new(),
            Expr::BinaryExpression { left, right, .. }
            | Expr::LogicalExpression { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::UnaryExpression { argument, .. } => vec![argument.as_ref()],
            Expr::ConditionalExpression {
                test,
                consequent,
                alternate,
            } => vec![test.as_ref(), consequent.as_ref(), alternate.as_ref()],
            Expr::CallExpression { callee, arguments } => {
                let mut out: Vec<&Expr> = vec![callee.as_ref()];
                out.extend(arguments.iter());
                out
            }
            Expr::MemberExpression {
                object, property, ..
            } => vec![object.as_ref(), property.as_ref()],
            Expr::ObjectExpression { properties } => properties
                .iter()
                .flat_map(|p| [&p.key, &p.value])
                .collect(),
        }
    }

    /// Value of a named property when this is an object expression (`{title: "x"}`).
    pub fn property(&self, key: &str) -> Option<&Expr> {
        match self {
            Expr::ObjectExpression { properties } => properties
                .iter()
                .find(|p| p.key.as_identifier() == Some(key) || p.key.as_string_literal() == Some(key))
                .map(|p| &p.value),
            _ => None,
        }
    }
}

/// Positional argument `index`, or the named argument `name` from a trailing object expression.
pub fn find_argument<'a>(arguments: &'a [Expr], index: usize, name: &str) -> Option<&'a Expr> {
    if let Some(named) = arguments.last().and_then(|last| last.property(name)) {
        return Some(named);
    }
    arguments
        .get(index)
        .filter(|arg| !matches!(arg, Expr::ObjectExpression { .. }))
}
