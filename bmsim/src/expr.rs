/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! Expressions in the BM AST format.
//!
//! JSON expression trees are compiled once, when the program is loaded, into [`Expr`].  Compiling
//! checks operator arity and rejects node kinds and operators that the engine does not know.
//! Known but unimplemented kinds (header stacks, header unions, saturating casts) compile fine
//! and fail with [`Error::Unsupported`] only if they are evaluated.
//!
//! An expression is evaluated in one of three contexts:
//!
//! - As an rvalue ([`Expr::rval`]), yielding a [`Value`].
//!
//! - As an lvalue ([`Expr::lval`]), yielding a [`FieldRef`] that names the field to write.  Only
//!   field references and `expression` wrappers around them can be lvalues.
//!
//! - As an extern parameter ([`Expr::param`]), where each node decides for itself: field
//!   references are passed by reference, everything else by value.
//!
//! Arithmetic is on unbounded signed integers.  Values are only masked to a field's width when
//! they are assigned, and an out-of-range assignment is an error.

use itertools::Itertools;
use num::{BigInt, One, ToPrimitive, Zero};
use serde_json::Value as Json;
use std::fmt::{self, Display};

use crate::error::{Error, Result};
use crate::packet::{Bus, FieldRef};
use crate::value::parse_int;

/// An operator in an expression tree.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Shl,
    Shr,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
    Not,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    DataToBool,
    BoolToData,
    Ternary,
    Valid,
    ValidUnion,
    TwoCompMod,
    SatCast,
    UsatCast,
    DereferenceHeaderStack,
    LastStackIndex,
    SizeStack,
    AccessField,
    DereferenceUnionStack,
    AccessUnionHeader,
}

impl Operator {
    const ALL: [Operator; 32] = [
        Operator::Add, Operator::Sub, Operator::Mul, Operator::Shl, Operator::Shr,
        Operator::Eq, Operator::Ne, Operator::Gt, Operator::Ge, Operator::Lt, Operator::Le,
        Operator::And, Operator::Or, Operator::Not,
        Operator::BitAnd, Operator::BitOr, Operator::BitXor, Operator::BitNot,
        Operator::DataToBool, Operator::BoolToData, Operator::Ternary,
        Operator::Valid, Operator::ValidUnion, Operator::TwoCompMod,
        Operator::SatCast, Operator::UsatCast,
        Operator::DereferenceHeaderStack, Operator::LastStackIndex, Operator::SizeStack,
        Operator::AccessField, Operator::DereferenceUnionStack, Operator::AccessUnionHeader,
    ];

    /// The operator's spelling in BM JSON.
    pub fn symbol(self) -> &'static str {
        use Operator::*;
        match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Shl => "<<",
            Shr => ">>",
            Eq => "==",
            Ne => "!=",
            Gt => ">",
            Ge => ">=",
            Lt => "<",
            Le => "<=",
            And => "and",
            Or => "or",
            Not => "not",
            BitAnd => "&",
            BitOr => "|",
            BitXor => "^",
            BitNot => "~",
            DataToBool => "d2b",
            BoolToData => "b2d",
            Ternary => "?",
            Valid => "valid",
            ValidUnion => "valid_union",
            TwoCompMod => "two_comp_mod",
            SatCast => "sat_cast",
            UsatCast => "usat_cast",
            DereferenceHeaderStack => "dereference_header_stack",
            LastStackIndex => "last_stack_index",
            SizeStack => "size_stack",
            AccessField => "access_field",
            DereferenceUnionStack => "dereference_union_stack",
            AccessUnionHeader => "access_union_header",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Operator> {
        Operator::ALL.iter().copied().find(|op| op.symbol() == symbol)
    }

    /// Number of operands: `right`; `left` and `right`; or `cond`, `left`, and `right`.
    pub fn arity(self) -> usize {
        use Operator::*;
        match self {
            Ternary => 3,
            Add | Sub | Mul | Shl | Shr | Eq | Ne | Gt | Ge | Lt | Le | And | Or | BitAnd
                | BitOr | BitXor | TwoCompMod => 2,
            _ => 1,
        }
    }

    /// True for operators that compile but cannot be evaluated.
    pub fn is_supported(self) -> bool {
        use Operator::*;
        !matches!(self, Valid | ValidUnion | TwoCompMod | SatCast | UsatCast
                  | DereferenceHeaderStack | LastStackIndex | SizeStack | AccessField
                  | DereferenceUnionStack | AccessUnionHeader)
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A compiled expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// `[header, field]`.  Field `$valid$` reads the header's validity bit.
    Field(FieldRef),
    Hexstr(BigInt),
    Bool(bool),
    String(String),
    Header(String),

    /// Index into the runtime data of the running action (`runtime_data` and `local` nodes).
    RuntimeData(usize),
    ParametersVector(Vec<Expr>),

    /// `expression` wrapper around a sub-expression.
    Expression(Box<Expr>),

    /// Named extern object: a register, counter, or meter array.
    Object { kind: String, name: String },

    /// Node kind that is recognized but not implemented.
    Unsupported(String),

    Unary(Operator, Box<Expr>),
    Binary(Operator, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// The result of evaluating an expression.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    Int(BigInt),
    Bool(bool),
    Str(String),
    /// A header, by name.
    Header(String),
    /// A field, passed by reference.
    Field(FieldRef),
    /// A named extern object.
    Object(String),
    Tuple(Vec<Value>),
}

impl Value {
    /// Interprets the value as an integer.  Booleans are 0 or 1.
    pub fn as_int(&self) -> Result<BigInt> {
        match self {
            Value::Int(value) => Ok(value.clone()),
            Value::Bool(value) => Ok(if *value { BigInt::one() } else { BigInt::zero() }),
            _ => Err(self.mismatch("integer")),
        }
    }

    /// Interprets the value as a boolean.  Integers must be exactly 0 or 1.
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(value) => Ok(*value),
            Value::Int(value) if value.is_zero() => Ok(false),
            Value::Int(value) if value.is_one() => Ok(true),
            Value::Int(value) => Err(Error::NotBoolean(value.clone())),
            _ => Err(self.mismatch("boolean")),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(s),
            _ => Err(self.mismatch("string")),
        }
    }

    pub fn as_header(&self) -> Result<&str> {
        match self {
            Value::Header(name) => Ok(name),
            _ => Err(self.mismatch("header")),
        }
    }

    pub fn as_field(&self) -> Result<&FieldRef> {
        match self {
            Value::Field(field) => Ok(field),
            _ => Err(self.mismatch("field")),
        }
    }

    pub fn as_object(&self) -> Result<&str> {
        match self {
            Value::Object(name) => Ok(name),
            _ => Err(self.mismatch("extern object")),
        }
    }

    pub fn as_tuple(&self) -> Result<&[Value]> {
        match self {
            Value::Tuple(values) => Ok(values),
            _ => Err(self.mismatch("tuple")),
        }
    }

    /// Like [`Value::as_int`], but reads fields passed by reference from `bus`.
    pub fn resolve_int(&self, bus: &Bus) -> Result<BigInt> {
        match self {
            Value::Field(field) => Ok(bus.field(field)?.val().clone().into()),
            _ => self.as_int(),
        }
    }

    fn mismatch(&self, expected: &'static str) -> Error {
        Error::TypeMismatch { expected, found: self.to_string() }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{}", value),
            Value::Bool(value) => write!(f, "{}", value),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Header(name) => write!(f, "header {}", name),
            Value::Field(field) => write!(f, "field {}", field),
            Value::Object(name) => write!(f, "object {}", name),
            Value::Tuple(values) => write!(f, "({})", values.iter().join(", ")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Context {
    Lval,
    Rval,
    Param,
}

impl Expr {
    /// Compiles a BM JSON expression node.
    pub fn compile(json: &Json) -> Result<Expr> {
        if let Some(op) = json.get("op") {
            return Expr::compile_op(json, op);
        }
        let kind = json
            .get("type")
            .and_then(Json::as_str)
            .ok_or_else(|| bad(json, "expression has neither \"op\" nor \"type\""))?;
        let value = json.get("value").unwrap_or(&Json::Null);
        Ok(match kind {
            "field" => {
                let (header, field) = value
                    .as_array()
                    .and_then(|pair| pair.iter().map(Json::as_str).collect_tuple())
                    .and_then(|(header, field)| Some((header?, field?)))
                    .ok_or_else(|| bad(json, "field value must be [header, field]"))?;
                Expr::Field(FieldRef::new(header, field))
            }
            "hexstr" => {
                let s = value.as_str().ok_or_else(|| bad(json, "hexstr value must be a string"))?;
                Expr::Hexstr(parse_int(s, 10).ok_or_else(|| bad(json, "bad integer literal"))?)
            }
            "bool" => Expr::Bool(match value {
                Json::Bool(b) => *b,
                Json::Number(n) if n.as_u64() == Some(0) => false,
                Json::Number(n) if n.as_u64() == Some(1) => true,
                _ => return Err(bad(json, "bool value must be true, false, 0, or 1")),
            }),
            "string" => Expr::String(
                value.as_str().ok_or_else(|| bad(json, "string value must be a string"))?.into()),
            "header" => Expr::Header(
                value.as_str().ok_or_else(|| bad(json, "header value must be a name"))?.into()),
            "runtime_data" | "local" => Expr::RuntimeData(
                value
                    .as_u64()
                    .and_then(|index| usize::try_from(index).ok())
                    .ok_or_else(|| bad(json, "runtime data index must be an integer"))?),
            "parameters_vector" => Expr::ParametersVector(
                value
                    .as_array()
                    .ok_or_else(|| bad(json, "parameters_vector value must be a list"))?
                    .iter()
                    .map(Expr::compile)
                    .collect::<Result<_>>()?),
            "expression" => Expr::Expression(Box::new(Expr::compile(value)?)),
            "register_array" | "counter_array" | "meter_array" => Expr::Object {
                kind: kind.into(),
                name: value.as_str().ok_or_else(|| bad(json, "object value must be a name"))?.into(),
            },
            "header_stack" | "stack_field" | "union" | "union_stack" => {
                Expr::Unsupported(kind.into())
            }
            _ => return Err(Error::Unsupported(format!("expression type \"{}\"", kind))),
        })
    }

    fn compile_op(json: &Json, op: &Json) -> Result<Expr> {
        let symbol = op.as_str().ok_or_else(|| bad(json, "op must be a string"))?;
        let op = Operator::from_symbol(symbol)
            .ok_or_else(|| Error::Unsupported(format!("operator \"{}\"", symbol)))?;
        let arity = op.arity();
        let operand = |name: &str| json.get(name).filter(|x| !x.is_null());
        let bad_arity = || Error::BadArity { op: symbol.into(), expected: arity };

        let right = operand("right").ok_or_else(bad_arity)?;
        let left = operand("left");
        let cond = operand("cond");
        if left.is_some() != (arity >= 2) || cond.is_some() != (arity == 3) {
            return Err(bad_arity());
        }
        let compile = |x: &Json| Expr::compile(x).map(Box::new);
        Ok(match (cond, left) {
            (Some(cond), Some(left)) => Expr::Ternary(compile(cond)?, compile(left)?,
                                                      compile(right)?),
            (None, Some(left)) => Expr::Binary(op, compile(left)?, compile(right)?),
            _ => Expr::Unary(op, compile(right)?),
        })
    }

    /// Short name of the node kind, for messages.
    pub fn kind(&self) -> &str {
        match self {
            Expr::Field(_) => "field",
            Expr::Hexstr(_) => "hexstr",
            Expr::Bool(_) => "bool",
            Expr::String(_) => "string",
            Expr::Header(_) => "header",
            Expr::RuntimeData(_) => "runtime_data",
            Expr::ParametersVector(_) => "parameters_vector",
            Expr::Expression(_) => "expression",
            Expr::Object { kind, .. } => kind,
            Expr::Unsupported(kind) => kind,
            Expr::Unary(op, _) | Expr::Binary(op, _, _) => op.symbol(),
            Expr::Ternary(..) => "?",
        }
    }

    /// Evaluates the expression as an assignment target.
    pub fn lval(&self, bus: &Bus, runtime_data: &[String]) -> Result<FieldRef> {
        match self.evaluate(bus, runtime_data, Context::Lval)? {
            Value::Field(field) => Ok(field),
            _ => Err(Error::NotLvalue(self.kind().into())),
        }
    }

    /// Evaluates the expression for its value.
    pub fn rval(&self, bus: &Bus, runtime_data: &[String]) -> Result<Value> {
        self.evaluate(bus, runtime_data, Context::Rval)
    }

    /// Evaluates the expression as an extern parameter.
    pub fn param(&self, bus: &Bus, runtime_data: &[String]) -> Result<Value> {
        self.evaluate(bus, runtime_data, Context::Param)
    }

    fn can_be_lval(&self) -> bool {
        matches!(self, Expr::Field(_) | Expr::Expression(_))
    }

    fn evaluate(&self, bus: &Bus, runtime_data: &[String], context: Context) -> Result<Value> {
        if context == Context::Lval && !self.can_be_lval() {
            return Err(Error::NotLvalue(self.kind().into()));
        }
        let by_ref = match context {
            Context::Lval => true,
            Context::Rval => false,
            Context::Param => self.can_be_lval(),
        };
        match self {
            Expr::Field(field) if by_ref => Ok(Value::Field(field.clone())),
            Expr::Field(field) if field.field == "$valid$" => {
                Ok(Value::Bool(bus.packet().is_valid(&field.header)))
            }
            Expr::Field(field) => Ok(Value::Int(bus.field(field)?.val().clone().into())),
            Expr::Hexstr(value) => Ok(Value::Int(value.clone())),
            Expr::Bool(value) => Ok(Value::Bool(*value)),
            Expr::String(s) => Ok(Value::Str(s.clone())),
            Expr::Header(name) => {
                bus.header(name)?;
                Ok(Value::Header(name.clone()))
            }
            Expr::RuntimeData(index) => {
                let data = runtime_data
                    .get(*index)
                    .ok_or_else(|| Error::BadRuntimeData(format!("index {}", index)))?;
                let value = parse_int(data, 16)
                    .ok_or_else(|| Error::BadRuntimeData(format!("value {:?}", data)))?;
                Ok(Value::Int(value))
            }
            Expr::ParametersVector(exprs) => Ok(Value::Tuple(
                exprs
                    .iter()
                    .map(|expr| expr.evaluate(bus, runtime_data, context))
                    .collect::<Result<_>>()?)),
            Expr::Expression(inner) => {
                inner.evaluate(bus, runtime_data, if by_ref { Context::Param } else { context })
            }
            Expr::Object { name, .. } => Ok(Value::Object(name.clone())),
            Expr::Unsupported(kind) => Err(Error::Unsupported(format!("expression type \"{}\"", kind))),
            Expr::Unary(op, _) | Expr::Binary(op, _, _) if !op.is_supported() => {
                Err(unsupported(*op))
            }
            Expr::Unary(op, right) => unary(*op, right.rval(bus, runtime_data)?),
            Expr::Binary(op, left, right) => {
                binary(*op, left.rval(bus, runtime_data)?, right.rval(bus, runtime_data)?)
            }
            Expr::Ternary(cond, left, right) => {
                let cond = cond.rval(bus, runtime_data)?.as_bool()?;
                let left = left.rval(bus, runtime_data)?.as_int()?;
                let right = right.rval(bus, runtime_data)?.as_int()?;
                Ok(Value::Int(if cond { left } else { right }))
            }
        }
    }
}

fn unary(op: Operator, value: Value) -> Result<Value> {
    use Operator::*;
    match op {
        Not => Ok(Value::Bool(!value.as_bool()?)),
        BitNot => Ok(Value::Int(-value.as_int()? - 1)),
        DataToBool => Ok(Value::Bool(!value.as_int()?.is_zero())),
        BoolToData => Ok(Value::Int(if value.as_bool()? { BigInt::one() } else { BigInt::zero() })),
        _ => Err(unsupported(op)),
    }
}

fn binary(op: Operator, left: Value, right: Value) -> Result<Value> {
    use Operator::*;
    if let And | Or = op {
        let (left, right) = (left.as_bool()?, right.as_bool()?);
        return Ok(Value::Bool(if op == And { left && right } else { left || right }));
    }
    let (left, right) = (left.as_int()?, right.as_int()?);
    Ok(match op {
        Add => Value::Int(left + right),
        Sub => Value::Int(left - right),
        Mul => Value::Int(left * right),
        Shl => Value::Int(left << shift_amount(&right)?),
        Shr => Value::Int(left >> shift_amount(&right)?),
        BitAnd => Value::Int(left & right),
        BitOr => Value::Int(left | right),
        BitXor => Value::Int(left ^ right),
        Eq => Value::Bool(left == right),
        Ne => Value::Bool(left != right),
        Gt => Value::Bool(left > right),
        Ge => Value::Bool(left >= right),
        Lt => Value::Bool(left < right),
        Le => Value::Bool(left <= right),
        _ => return Err(unsupported(op)),
    })
}

fn shift_amount(value: &BigInt) -> Result<usize> {
    value.to_usize().ok_or_else(|| Error::TypeMismatch {
        expected: "non-negative shift amount",
        found: value.to_string(),
    })
}

fn unsupported(op: Operator) -> Error {
    Error::Unsupported(format!("operator \"{}\"", op))
}

fn bad(json: &Json, reason: &str) -> Error {
    Error::BadProgram(format!("{}: {}", reason, json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Header, Packet};
    use crate::program::FieldSpec;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn bus() -> Bus {
        let spec = |name: &str, bitwidth| FieldSpec { name: name.into(), bitwidth, signed: false };
        let mut layouts = BTreeMap::new();
        layouts.insert("ping".to_string(), vec![spec("count", 32)].into());
        let mut packet = Packet::new(Arc::new(layouts));
        packet.add_header("ping").unwrap();
        packet.header_mut("ping").unwrap().set("count", 7u32).unwrap();

        let mut metadata = BTreeMap::new();
        metadata.insert("meta".to_string(), Header::new("meta", &[spec("flag", 1)]));
        Bus::new(metadata, packet)
    }

    fn eval(json: Json) -> Result<Value> {
        Expr::compile(&json)?.rval(&bus(), &["0a".to_string(), "0x1F".to_string()])
    }

    fn int(x: i64) -> Value {
        Value::Int(BigInt::from(x))
    }

    fn field(header: &str, field: &str) -> Json {
        json!({"type": "field", "value": [header, field]})
    }

    fn hex(s: &str) -> Json {
        json!({"type": "hexstr", "value": s})
    }

    fn op(op: &str, left: Json, right: Json) -> Json {
        json!({"type": "expression", "value": {"op": op, "left": left, "right": right}})
    }

    fn unop(op: &str, right: Json) -> Json {
        json!({"type": "expression", "value": {"op": op, "left": null, "right": right}})
    }

    #[test]
    fn values() {
        assert_eq!(eval(field("ping", "count")).unwrap(), int(7));
        assert_eq!(eval(field("ping", "$valid$")).unwrap(), Value::Bool(true));
        assert_eq!(eval(field("meta", "flag")).unwrap(), int(0));
        assert_eq!(eval(hex("0x0800")).unwrap(), int(0x800));
        assert_eq!(eval(hex("-5")).unwrap(), int(-5));
        assert_eq!(eval(json!({"type": "bool", "value": 1})).unwrap(), Value::Bool(true));
        assert_eq!(eval(json!({"type": "runtime_data", "value": 0})).unwrap(), int(10));
        assert_eq!(eval(json!({"type": "local", "value": 1})).unwrap(), int(31));
        assert_eq!(eval(json!({"type": "string", "value": "hi"})).unwrap(),
                   Value::Str("hi".into()));
        assert_eq!(eval(json!({"type": "register_array", "value": "r"})).unwrap(),
                   Value::Object("r".into()));
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval(op("+", field("ping", "count"), hex("1"))).unwrap(), int(8));
        assert_eq!(eval(op("-", hex("1"), hex("3"))).unwrap(), int(-2));
        assert_eq!(eval(op("*", hex("6"), hex("7"))).unwrap(), int(42));
        assert_eq!(eval(op("<<", hex("1"), hex("40"))).unwrap(),
                   Value::Int(BigInt::from(1u64 << 40)));
        assert_eq!(eval(op(">>", hex("0x100"), hex("4"))).unwrap(), int(0x10));
        assert_eq!(eval(op("&", hex("0xff00"), hex("0x0ff0"))).unwrap(), int(0x0f00));
        assert_eq!(eval(op("|", hex("0xf0"), hex("0x0f"))).unwrap(), int(0xff));
        assert_eq!(eval(op("^", hex("0xff"), hex("0x0f"))).unwrap(), int(0xf0));
        assert_eq!(eval(unop("~", hex("0"))).unwrap(), int(-1));
        assert_eq!(eval(op("&", unop("~", hex("0x0f")), hex("0xff"))).unwrap(), int(0xf0));
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(eval(op("==", field("ping", "count"), hex("7"))).unwrap(), Value::Bool(true));
        assert_eq!(eval(op("!=", hex("1"), hex("1"))).unwrap(), Value::Bool(false));
        assert_eq!(eval(op("<", hex("1"), hex("2"))).unwrap(), Value::Bool(true));
        assert_eq!(eval(op(">=", hex("1"), hex("2"))).unwrap(), Value::Bool(false));
        assert_eq!(eval(op("and", hex("1"), json!({"type": "bool", "value": true}))).unwrap(),
                   Value::Bool(true));
        assert_eq!(eval(op("or", hex("0"), hex("0"))).unwrap(), Value::Bool(false));
        assert_eq!(eval(unop("not", hex("0"))).unwrap(), Value::Bool(true));
        assert_eq!(eval(unop("d2b", hex("5"))).unwrap(), Value::Bool(true));
        assert_eq!(eval(unop("b2d", json!({"type": "bool", "value": true}))).unwrap(), int(1));
    }

    #[test]
    fn strict_bool() {
        assert!(matches!(eval(op("and", hex("2"), hex("1"))), Err(Error::NotBoolean(_))));
        assert!(matches!(eval(unop("b2d", hex("3"))), Err(Error::NotBoolean(_))));
        assert!(Expr::compile(&json!({"type": "bool", "value": 2})).is_err());
    }

    #[test]
    fn ternary() {
        let expr = |cond: &str| json!({"type": "expression", "value": {
            "op": "?", "cond": hex(cond), "left": hex("10"), "right": hex("20")
        }});
        assert_eq!(eval(expr("1")).unwrap(), int(10));
        assert_eq!(eval(expr("0")).unwrap(), int(20));
    }

    #[test]
    fn arity() {
        let missing_left = json!({"op": "+", "left": null, "right": hex("1")});
        assert!(matches!(Expr::compile(&missing_left), Err(Error::BadArity { .. })));

        let extra_left = json!({"op": "~", "left": hex("1"), "right": hex("1")});
        assert!(matches!(Expr::compile(&extra_left), Err(Error::BadArity { .. })));

        let missing_cond = json!({"op": "?", "left": hex("1"), "right": hex("1")});
        assert!(matches!(Expr::compile(&missing_cond), Err(Error::BadArity { .. })));

        let missing_right = json!({"op": "not", "left": null, "right": null});
        assert!(matches!(Expr::compile(&missing_right), Err(Error::BadArity { .. })));
    }

    #[test]
    fn unsupported() {
        let sat = unop("sat_cast", hex("1"));
        assert!(Expr::compile(&sat).is_ok());
        assert!(matches!(eval(sat), Err(Error::Unsupported(_))));

        let two_comp = op("two_comp_mod", hex("1"), hex("8"));
        assert!(matches!(eval(two_comp), Err(Error::Unsupported(_))));

        let stack = json!({"type": "header_stack", "value": "vlans"});
        assert!(matches!(eval(stack), Err(Error::Unsupported(_))));

        let unknown = json!({"op": "**", "left": hex("1"), "right": hex("1")});
        assert!(matches!(Expr::compile(&unknown), Err(Error::Unsupported(_))));
    }

    #[test]
    fn contexts() {
        let bus = bus();
        let count = Expr::compile(&field("ping", "count")).unwrap();
        assert_eq!(count.lval(&bus, &[]).unwrap(), FieldRef::new("ping", "count"));
        assert_eq!(count.param(&bus, &[]).unwrap(),
                   Value::Field(FieldRef::new("ping", "count")));

        let wrapped = Expr::compile(&json!({"type": "expression", "value": field("ping", "count")}))
            .unwrap();
        assert_eq!(wrapped.lval(&bus, &[]).unwrap(), FieldRef::new("ping", "count"));

        let literal = Expr::compile(&hex("1")).unwrap();
        assert!(matches!(literal.lval(&bus, &[]), Err(Error::NotLvalue(_))));
        assert_eq!(literal.param(&bus, &[]).unwrap(), int(1));

        let sum = Expr::compile(&op("+", field("ping", "count"), hex("1"))).unwrap();
        assert!(matches!(sum.lval(&bus, &[]), Err(Error::NotLvalue(_))));
        assert_eq!(sum.param(&bus, &[]).unwrap(), int(8));

        let vector = Expr::compile(&json!({
            "type": "parameters_vector",
            "value": [field("ping", "count"), hex("2")]
        })).unwrap();
        assert_eq!(vector.param(&bus, &[]).unwrap(),
                   Value::Tuple(vec![Value::Field(FieldRef::new("ping", "count")), int(2)]));
        assert_eq!(vector.rval(&bus, &[]).unwrap(), Value::Tuple(vec![int(7), int(2)]));
    }

    #[test]
    fn bad_references() {
        assert!(matches!(eval(field("ping", "nope")), Err(Error::UnknownField { .. })));
        assert!(matches!(eval(field("nope", "count")), Err(Error::UnknownHeader(_))));
        assert!(matches!(eval(json!({"type": "runtime_data", "value": 5})),
                         Err(Error::BadRuntimeData(_))));
    }
}
