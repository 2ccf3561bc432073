//! Tree walking evaluator for parsed templates.
//!
//! Evaluation is confined to the values reachable from the [`Context`]: there
//! is no access to the file system, the environment or Ruby's object model.

use std::iter;

use indexmap::IndexMap;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    manifest::{JobLink, PropertyValue, property},
    template::{
        context::{Context, instance_value},
        parser::{BinaryOp, Expr, Node},
    },
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("failed to evaluate line {line}"))]
    Evaluate { source: EvalError, line: usize },
}

#[derive(Debug, PartialEq, Snafu)]
pub enum EvalError {
    #[snafu(display("can't find property {name:?}"))]
    UnknownProperty { name: String },

    #[snafu(display("can't find link {name:?}"))]
    UnknownLink { name: String },

    #[snafu(display("undefined local variable or method {name:?}"))]
    UnknownVariable { name: String },

    #[snafu(display("undefined function {name:?}"))]
    UnknownFunction { name: String },

    #[snafu(display("undefined method {method:?} for {receiver}"))]
    UnknownMethod {
        method: String,
        receiver: &'static str,
    },

    #[snafu(display("{name:?} requires a block"))]
    BlockRequired { name: String },

    #[snafu(display("{call} does not take a block"))]
    UnsupportedBlock { call: String },

    #[snafu(display("wrong number of arguments for {name:?}, expected {expected}"))]
    WrongArguments { name: String, expected: &'static str },

    #[snafu(display("expected {expected}, got {found}"))]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[snafu(display("{lhs} {op} {rhs} is not supported"))]
    UnsupportedOperands {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[snafu(display("integer overflow"))]
    Overflow,

    #[snafu(display("a {value} can't be rendered as text"))]
    NotRenderable { value: &'static str },
}

/// Runtime values. Property trees are copied in, links are borrowed.
#[derive(Clone, Debug, PartialEq)]
pub enum Value<'a> {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value<'a>>),
    Map(IndexMap<String, Value<'a>>),
    Link(&'a JobLink),
}

impl Value<'_> {
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "array",
            Self::Map(_) => "hash",
            Self::Link(_) => "link",
        }
    }

    /// Renders the value into template output. Collections are rendered as
    /// JSON.
    pub fn to_text(&self) -> Result<String, EvalError> {
        match self {
            Self::Nil => Ok(String::new()),
            Self::Bool(value) => Ok(value.to_string()),
            Self::Int(value) => Ok(value.to_string()),
            Self::Float(value) => Ok(format!("{value:?}")),
            Self::Str(value) => Ok(value.clone()),
            Self::List(_) | Self::Map(_) => Ok(self.to_json()?.to_string()),
            Self::Link(_) => NotRenderableSnafu { value: "link" }.fail(),
        }
    }

    fn to_json(&self) -> Result<serde_json::Value, EvalError> {
        Ok(match self {
            Self::Nil => serde_json::Value::Null,
            Self::Bool(value) => (*value).into(),
            Self::Int(value) => (*value).into(),
            Self::Float(value) => (*value).into(),
            Self::Str(value) => value.clone().into(),
            Self::List(items) => items
                .iter()
                .map(Self::to_json)
                .collect::<Result<Vec<_>, _>>()?
                .into(),
            Self::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), value.to_json()?)))
                    .collect::<Result<_, EvalError>>()?,
            ),
            Self::Link(_) => return NotRenderableSnafu { value: "link" }.fail(),
        })
    }

    fn as_str(&self) -> Result<&str, EvalError> {
        match self {
            Self::Str(value) => Ok(value),
            other => TypeMismatchSnafu {
                expected: "string",
                found: other.type_name(),
            }
            .fail(),
        }
    }
}

impl From<&PropertyValue> for Value<'_> {
    fn from(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::Null => Self::Nil,
            PropertyValue::Bool(value) => Self::Bool(*value),
            PropertyValue::Int(value) => Self::Int(*value),
            PropertyValue::Float(value) => Self::Float(*value),
            PropertyValue::String(value) => Self::Str(value.clone()),
            PropertyValue::Sequence(items) => Self::List(items.iter().map(Self::from).collect()),
            PropertyValue::Mapping(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), Self::from(value)))
                    .collect(),
            ),
        }
    }
}

fn values_equal(lhs: &Value<'_>, rhs: &Value<'_>) -> bool {
    match (lhs, rhs) {
        (Value::Int(int), Value::Float(float)) | (Value::Float(float), Value::Int(int)) => {
            *int as f64 == *float
        }
        _ => lhs == rhs,
    }
}

/// Renders `nodes` against `context`.
pub fn render(nodes: &[Node], context: &Context<'_>) -> Result<String> {
    let mut evaluator = Evaluator {
        context,
        scopes: vec![IndexMap::new()],
    };
    let mut output = String::new();
    evaluator.render_nodes(nodes, &mut output)?;
    Ok(output)
}

struct Evaluator<'c, 'a> {
    context: &'c Context<'a>,

    /// Local variables, innermost block last.
    scopes: Vec<IndexMap<String, Value<'a>>>,
}

impl<'a> Evaluator<'_, 'a> {
    fn render_nodes(&mut self, nodes: &[Node], output: &mut String) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(text) => output.push_str(text),
                Node::Output { expr, line } => {
                    let text = self
                        .eval(expr)
                        .and_then(|value| value.to_text())
                        .context(EvaluateSnafu { line: *line })?;
                    output.push_str(&text);
                }
                Node::Assign { name, value, line } => {
                    let value = self.eval(value).context(EvaluateSnafu { line: *line })?;
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.insert(name.clone(), value);
                    }
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = None;
                    for branch in branches {
                        let condition = self
                            .eval(&branch.condition)
                            .context(EvaluateSnafu { line: branch.line })?;
                        if condition.is_truthy() {
                            taken = Some(&branch.body);
                            break;
                        }
                    }
                    self.render_nodes(taken.unwrap_or(otherwise), output)?;
                }
                Node::Block {
                    call,
                    params,
                    body,
                    line,
                } => {
                    let iterations = self
                        .block_bindings(call, params.len())
                        .context(EvaluateSnafu { line: *line })?;

                    for values in iterations {
                        let scope = params
                            .iter()
                            .cloned()
                            .zip(values.into_iter().chain(iter::repeat(Value::Nil)))
                            .collect();
                        self.scopes.push(scope);
                        let result = self.render_nodes(body, output);
                        self.scopes.pop();
                        result?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Evaluates a block call into the block arguments of each iteration.
    fn block_bindings(
        &mut self,
        call: &Expr,
        arity: usize,
    ) -> Result<Vec<Vec<Value<'a>>>, EvalError> {
        match call {
            Expr::Call { name, args } if name == "if_p" => {
                let names = self.eval_args(args)?;
                let mut values = Vec::with_capacity(names.len());
                for name in &names {
                    match self.context.property(name.as_str()?) {
                        Some(value) => values.push(value.into()),
                        None => return Ok(Vec::new()),
                    }
                }
                Ok(vec![values])
            }
            Expr::Call { name, args } if name == "if_link" => {
                let name = single_arg(name, self.eval_args(args)?)?;
                Ok(self
                    .context
                    .link(name.as_str()?)
                    .map(|link| vec![vec![Value::Link(link)]])
                    .unwrap_or_default())
            }
            Expr::Method {
                receiver,
                name,
                args,
            } => {
                let receiver = self.eval(receiver)?;
                let args = self.eval_args(args)?;
                match (name.as_str(), receiver) {
                    ("each", Value::List(items)) => {
                        Ok(items.into_iter().map(|item| vec![item]).collect())
                    }
                    ("each_with_index", Value::List(items)) => Ok(items
                        .into_iter()
                        .enumerate()
                        .map(|(index, item)| vec![item, Value::Int(index as i64)])
                        .collect()),
                    ("each" | "each_pair", Value::Map(entries)) => Ok(entries
                        .into_iter()
                        .map(|(key, value)| {
                            if arity == 1 {
                                vec![Value::List(vec![Value::Str(key), value])]
                            } else {
                                vec![Value::Str(key), value]
                            }
                        })
                        .collect()),
                    ("if_p", Value::Link(link)) => {
                        let mut values = Vec::with_capacity(args.len());
                        for name in &args {
                            match property::lookup(&link.properties, name.as_str()?) {
                                Some(value) => values.push(value.into()),
                                None => return Ok(Vec::new()),
                            }
                        }
                        Ok(vec![values])
                    }
                    (name, receiver) => UnsupportedBlockSnafu {
                        call: format!("{}#{name}", receiver.type_name()),
                    }
                    .fail(),
                }
            }
            Expr::Call { name, .. } => UnsupportedBlockSnafu { call: name.clone() }.fail(),
            _ => UnsupportedBlockSnafu {
                call: "expression",
            }
            .fail(),
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value<'a>>, EvalError> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value<'a>, EvalError> {
        match expr {
            Expr::Nil => Ok(Value::Nil),
            Expr::Bool(value) => Ok(Value::Bool(*value)),
            Expr::Int(value) => Ok(Value::Int(*value)),
            Expr::Float(value) => Ok(Value::Float(*value)),
            Expr::Str(value) => Ok(Value::Str(value.clone())),
            Expr::Interpolated(parts) => {
                let mut text = String::new();
                for part in parts {
                    text.push_str(&self.eval(part)?.to_text()?);
                }
                Ok(Value::Str(text))
            }
            Expr::Array(items) => Ok(Value::List(self.eval_args(items)?)),
            Expr::Var(name) => self.variable(name),
            Expr::Call { name, args } => {
                let args = self.eval_args(args)?;
                self.call(name, args)
            }
            Expr::Method {
                receiver,
                name,
                args,
            } => {
                let receiver = self.eval(receiver)?;
                let args = self.eval_args(args)?;
                call_method(receiver, name, args)
            }
            Expr::Index { receiver, index } => {
                let receiver = self.eval(receiver)?;
                let index = self.eval(index)?;
                index_value(receiver, &index)
            }
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.is_truthy())),
            Expr::Neg(inner) => match self.eval(inner)? {
                Value::Int(value) => value.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
                Value::Float(value) => Ok(Value::Float(-value)),
                other => TypeMismatchSnafu {
                    expected: "number",
                    found: other.type_name(),
                }
                .fail(),
            },
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                match op {
                    BinaryOp::And if !lhs.is_truthy() => Ok(lhs),
                    BinaryOp::Or if lhs.is_truthy() => Ok(lhs),
                    BinaryOp::And | BinaryOp::Or => self.eval(rhs),
                    BinaryOp::Eq => Ok(Value::Bool(values_equal(&lhs, &self.eval(rhs)?))),
                    BinaryOp::Ne => Ok(Value::Bool(!values_equal(&lhs, &self.eval(rhs)?))),
                    BinaryOp::Add => add(lhs, self.eval(rhs)?),
                    BinaryOp::Sub => subtract(lhs, self.eval(rhs)?),
                }
            }
        }
    }

    fn variable(&self, name: &str) -> Result<Value<'a>, EvalError> {
        if let Some(value) = self.scopes.iter().rev().find_map(|scope| scope.get(name)) {
            return Ok(value.clone());
        }

        match name {
            "spec" => Ok(self.context.spec_value()),
            _ => UnknownVariableSnafu { name }.fail(),
        }
    }

    fn call(&self, name: &str, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
        match name {
            "p" => {
                let (names, default) = property_args(name, args)?;
                for candidate in &names {
                    if let Some(value) = self.context.property(candidate) {
                        return Ok(value.into());
                    }
                }
                default.context(UnknownPropertySnafu {
                    name: names.join(", "),
                })
            }
            "link" => {
                let link_name = single_arg(name, args)?;
                let link_name = link_name.as_str()?;
                self.context
                    .link(link_name)
                    .map(Value::Link)
                    .context(UnknownLinkSnafu { name: link_name })
            }
            "if_p" | "if_link" => BlockRequiredSnafu { name }.fail(),
            _ => UnknownFunctionSnafu { name }.fail(),
        }
    }
}

fn single_arg<'a>(name: &str, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(arg), None) => Ok(arg),
        _ => WrongArgumentsSnafu {
            name,
            expected: "1",
        }
        .fail(),
    }
}

/// Splits `p` style arguments into the candidate names and the default.
fn property_args<'a>(
    name: &str,
    args: Vec<Value<'a>>,
) -> Result<(Vec<String>, Option<Value<'a>>), EvalError> {
    let mut args = args.into_iter();
    let names = match args.next() {
        Some(Value::Str(name)) => vec![name],
        Some(Value::List(names)) => names
            .iter()
            .map(|name| name.as_str().map(ToOwned::to_owned))
            .collect::<Result<_, _>>()?,
        Some(other) => {
            return TypeMismatchSnafu {
                expected: "property name",
                found: other.type_name(),
            }
            .fail();
        }
        None => {
            return WrongArgumentsSnafu {
                name,
                expected: "1..2",
            }
            .fail();
        }
    };

    let default = args.next();
    if args.next().is_some() {
        return WrongArgumentsSnafu {
            name,
            expected: "1..2",
        }
        .fail();
    }

    Ok((names, default))
}

fn call_method<'a>(receiver: Value<'a>, method: &str, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    if let Value::Map(entries) = &receiver {
        if args.is_empty() {
            if let Some(value) = entries.get(method) {
                return Ok(value.clone());
            }
        }
    }

    match (method, &receiver) {
        ("nil?", _) => Ok(Value::Bool(matches!(receiver, Value::Nil))),
        ("to_s", _) => Ok(Value::Str(receiver.to_text()?)),
        ("to_json", _) => Ok(Value::Str(receiver.to_json()?.to_string())),
        ("to_i", Value::Int(value)) => Ok(Value::Int(*value)),
        ("to_i", Value::Float(value)) => Ok(Value::Int(value.trunc() as i64)),
        ("to_i", Value::Nil) => Ok(Value::Int(0)),
        ("to_i", Value::Str(value)) => Ok(Value::Int(leading_integer(value))),
        ("size" | "length" | "count", Value::Str(value)) => {
            Ok(Value::Int(value.chars().count() as i64))
        }
        ("size" | "length" | "count", Value::List(items)) => Ok(Value::Int(items.len() as i64)),
        ("size" | "length" | "count", Value::Map(entries)) => {
            Ok(Value::Int(entries.len() as i64))
        }
        ("empty?", Value::Str(value)) => Ok(Value::Bool(value.is_empty())),
        ("empty?", Value::List(items)) => Ok(Value::Bool(items.is_empty())),
        ("empty?", Value::Map(entries)) => Ok(Value::Bool(entries.is_empty())),
        ("first", Value::List(items)) => Ok(items.first().cloned().unwrap_or(Value::Nil)),
        ("last", Value::List(items)) => Ok(items.last().cloned().unwrap_or(Value::Nil)),
        ("join", Value::List(items)) => {
            let separator = match args.first() {
                Some(separator) => separator.as_str()?.to_owned(),
                None => String::new(),
            };
            let parts = items
                .iter()
                .map(Value::to_text)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Str(parts.join(&separator)))
        }
        ("include?", Value::List(items)) => {
            let needle = single_arg(method, args)?;
            Ok(Value::Bool(items.iter().any(|item| values_equal(item, &needle))))
        }
        ("include?", Value::Str(value)) => {
            let needle = single_arg(method, args)?;
            Ok(Value::Bool(value.contains(needle.as_str()?)))
        }
        ("include?" | "key?" | "has_key?", Value::Map(entries)) => {
            let key = single_arg(method, args)?;
            Ok(Value::Bool(entries.contains_key(key.as_str()?)))
        }
        ("keys", Value::Map(entries)) => Ok(Value::List(
            entries.keys().cloned().map(Value::Str).collect(),
        )),
        ("values", Value::Map(entries)) => Ok(Value::List(entries.values().cloned().collect())),
        ("upcase", Value::Str(value)) => Ok(Value::Str(value.to_uppercase())),
        ("downcase", Value::Str(value)) => Ok(Value::Str(value.to_lowercase())),
        ("strip", Value::Str(value)) => Ok(Value::Str(value.trim().to_owned())),
        ("split", Value::Str(value)) => {
            let parts: Vec<Value<'_>> = match args.first() {
                Some(separator) => value
                    .split(separator.as_str()?)
                    .map(|part| Value::Str(part.to_owned()))
                    .collect(),
                None => value
                    .split_whitespace()
                    .map(|part| Value::Str(part.to_owned()))
                    .collect(),
            };
            Ok(Value::List(parts))
        }
        ("p", Value::Link(link)) => {
            let (names, default) = property_args(method, args)?;
            for candidate in &names {
                if let Some(value) = property::lookup(&link.properties, candidate) {
                    return Ok(value.into());
                }
            }
            default.context(UnknownPropertySnafu {
                name: names.join(", "),
            })
        }
        ("instances", Value::Link(link)) => Ok(Value::List(
            link.instances.iter().map(instance_value).collect(),
        )),
        ("address", Value::Link(link)) => Ok(link
            .instances
            .first()
            .map_or(Value::Nil, |instance| Value::Str(instance.address.clone()))),
        ("if_p", Value::Link(_)) => BlockRequiredSnafu { name: method }.fail(),
        _ => UnknownMethodSnafu {
            method,
            receiver: receiver.type_name(),
        }
        .fail(),
    }
}

/// Ruby's `String#to_i`: the leading integer, zero if there is none.
fn leading_integer(value: &str) -> i64 {
    let trimmed = value.trim_start();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());

    digits[..end].parse::<i64>().map_or(0, |value| sign * value)
}

fn index_value<'a>(receiver: Value<'a>, index: &Value<'_>) -> Result<Value<'a>, EvalError> {
    match (receiver, index) {
        (Value::List(mut items), Value::Int(index)) => {
            let position = if *index < 0 {
                items.len().checked_sub(index.unsigned_abs() as usize)
            } else {
                Some(*index as usize)
            };
            Ok(position
                .filter(|position| *position < items.len())
                .map_or(Value::Nil, |position| items.swap_remove(position)))
        }
        (Value::Map(mut entries), Value::Str(key)) => {
            Ok(entries.swap_remove(key.as_str()).unwrap_or(Value::Nil))
        }
        (Value::Str(value), Value::Int(index)) => Ok(usize::try_from(*index)
            .ok()
            .and_then(|index| value.chars().nth(index))
            .map_or(Value::Nil, |c| Value::Str(c.to_string()))),
        (receiver, index) => UnsupportedOperandsSnafu {
            op: "[]",
            lhs: receiver.type_name(),
            rhs: index.type_name(),
        }
        .fail(),
    }
}

fn add<'a>(lhs: Value<'a>, rhs: Value<'a>) -> Result<Value<'a>, EvalError> {
    match (lhs, rhs) {
        (Value::Int(lhs), Value::Int(rhs)) => {
            lhs.checked_add(rhs).map(Value::Int).ok_or(EvalError::Overflow)
        }
        (Value::Int(lhs), Value::Float(rhs)) => Ok(Value::Float(lhs as f64 + rhs)),
        (Value::Float(lhs), Value::Int(rhs)) => Ok(Value::Float(lhs + rhs as f64)),
        (Value::Float(lhs), Value::Float(rhs)) => Ok(Value::Float(lhs + rhs)),
        (Value::Str(lhs), Value::Str(rhs)) => Ok(Value::Str(lhs + &rhs)),
        (Value::List(mut lhs), Value::List(rhs)) => {
            lhs.extend(rhs);
            Ok(Value::List(lhs))
        }
        (lhs, rhs) => UnsupportedOperandsSnafu {
            op: "+",
            lhs: lhs.type_name(),
            rhs: rhs.type_name(),
        }
        .fail(),
    }
}

fn subtract<'a>(lhs: Value<'a>, rhs: Value<'a>) -> Result<Value<'a>, EvalError> {
    match (lhs, rhs) {
        (Value::Int(lhs), Value::Int(rhs)) => {
            lhs.checked_sub(rhs).map(Value::Int).ok_or(EvalError::Overflow)
        }
        (Value::Int(lhs), Value::Float(rhs)) => Ok(Value::Float(lhs as f64 - rhs)),
        (Value::Float(lhs), Value::Int(rhs)) => Ok(Value::Float(lhs - rhs as f64)),
        (Value::Float(lhs), Value::Float(rhs)) => Ok(Value::Float(lhs - rhs)),
        (lhs, rhs) => UnsupportedOperandsSnafu {
            op: "-",
            lhs: lhs.type_name(),
            rhs: rhs.type_name(),
        }
        .fail(),
    }
}
