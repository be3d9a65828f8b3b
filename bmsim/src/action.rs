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

//! Actions and the primitives they are made of.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{event, Level};

use crate::error::{Error, Result};
use crate::expr::{Expr, Value};
use crate::packet::Bus;
use crate::program::{ActionDef, OpDef, RuntimeDataDef};

/// Handler for an extern primitive.  Receives the bus and the parameters evaluated as extern
/// parameters, so fields arrive as [`Value::Field`] references.
pub type ExternFn = Box<dyn FnMut(&mut Bus, &[Value]) -> Result<()>>;

/// Extern primitives by name.
///
/// The architecture supplies these; any primitive that is not `assign`, `add_header`, or
/// `remove_header` is looked up here.
#[derive(Default)]
pub struct ExternRegistry {
    handlers: HashMap<String, ExternFn>,
}

impl ExternRegistry {
    pub fn new() -> ExternRegistry {
        ExternRegistry::default()
    }

    /// Registers `handler` for primitive `name`, replacing any previous handler.
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: FnMut(&mut Bus, &[Value]) -> Result<()> + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn call(&mut self, name: &str, bus: &mut Bus, args: &[Value]) -> Result<()> {
        let handler = self.handlers.get_mut(name).ok_or_else(|| Error::UnknownExtern(name.into()))?;
        handler(bus, args)
    }
}

impl fmt::Debug for ExternRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// One step of an action.
#[derive(Clone, Debug)]
pub enum Primitive {
    Assign { lval: Expr, rval: Expr },
    AddHeader(String),
    RemoveHeader(String),
    Extern { name: String, params: Vec<Expr> },
}

impl Primitive {
    pub fn compile(def: &OpDef) -> Result<Primitive> {
        let arity = |n: usize| {
            if def.parameters.len() == n {
                Ok(())
            } else {
                Err(Error::BadArity { op: def.op.clone(), expected: n })
            }
        };
        let header = || match def.parameters[0].get("type").and_then(|t| t.as_str()) {
            Some("header") => def.parameters[0]
                .get("value")
                .and_then(|v| v.as_str())
                .map(String::from)
                .ok_or_else(|| Error::BadProgram(format!("{}: bad header operand", def.op))),
            _ => Err(Error::BadProgram(format!("{}: operand must be a header", def.op))),
        };
        Ok(match def.op.as_str() {
            "assign" => {
                arity(2)?;
                Primitive::Assign {
                    lval: Expr::compile(&def.parameters[0])?,
                    rval: Expr::compile(&def.parameters[1])?,
                }
            }
            "add_header" => {
                arity(1)?;
                Primitive::AddHeader(header()?)
            }
            "remove_header" => {
                arity(1)?;
                Primitive::RemoveHeader(header()?)
            }
            name => Primitive::Extern {
                name: name.into(),
                params: def.parameters.iter().map(Expr::compile).collect::<Result<_>>()?,
            },
        })
    }

    fn name(&self) -> &str {
        match self {
            Primitive::Assign { .. } => "assign",
            Primitive::AddHeader(_) => "add_header",
            Primitive::RemoveHeader(_) => "remove_header",
            Primitive::Extern { name, .. } => name,
        }
    }

    /// Executes the primitive against `bus`.
    pub fn execute(&self, bus: &mut Bus, runtime_data: &[String],
                   externs: Option<&mut ExternRegistry>) -> Result<()> {
        match self {
            Primitive::Assign { lval, rval } => {
                let field = lval.lval(bus, runtime_data)?;
                let value = rval.rval(bus, runtime_data)?.as_int()?;
                event!(Level::DEBUG, "{field} = {value}");
                bus.field_mut(&field)?.set_int(&value)
            }
            Primitive::AddHeader(header) => bus.packet_mut().add_header(header),
            Primitive::RemoveHeader(header) => {
                let packet = bus.packet_mut();
                if packet.contains(header) {
                    packet.remove_header(header)?;
                }
                Ok(())
            }
            Primitive::Extern { name, params } => {
                let externs = externs.ok_or_else(|| Error::NoExterns(name.clone()))?;
                let args = params
                    .iter()
                    .map(|param| param.param(bus, runtime_data))
                    .collect::<Result<Vec<_>>>()?;
                externs.call(name, bus, &args)
            }
        }
    }
}

/// A named sequence of primitives.
#[derive(Clone, Debug)]
pub struct Action {
    name: String,
    id: u32,
    params: Vec<RuntimeDataDef>,
    primitives: Vec<Primitive>,
}

impl Action {
    pub fn new(def: &ActionDef) -> Result<Action> {
        Ok(Action {
            name: def.name.clone(),
            id: def.id,
            params: def.runtime_data.clone(),
            primitives: def.primitives.iter().map(Primitive::compile).collect::<Result<_>>()?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// The parameters that table entries supply as action data, in order.
    pub fn params(&self) -> &[RuntimeDataDef] {
        &self.params
    }

    /// Runs the action's primitives in order with the given runtime data.
    pub fn process(&self, bus: &mut Bus, runtime_data: &[String],
                   mut externs: Option<&mut ExternRegistry>) -> Result<()> {
        event!(Level::DEBUG, "action {} {:?}", self.name, runtime_data);
        for primitive in &self.primitives {
            event!(Level::DEBUG, "{}: {}", self.name, primitive.name());
            primitive.execute(bus, runtime_data, externs.as_deref_mut())?;
        }
        Ok(())
    }
}

/// All of a program's actions, by id and by name.
#[derive(Clone, Debug, Default)]
pub struct Actions {
    by_id: BTreeMap<u32, Action>,
    by_name: HashMap<String, u32>,
}

impl Actions {
    pub fn new(defs: &[ActionDef]) -> Result<Actions> {
        let mut actions = Actions::default();
        for def in defs {
            let action = Action::new(def)?;
            actions.by_name.entry(action.name.clone()).or_insert(action.id);
            if actions.by_id.insert(action.id, action).is_some() {
                return Err(Error::BadProgram(format!("duplicate action id {}", def.id)));
            }
        }
        Ok(actions)
    }

    pub fn get(&self, id: u32) -> Result<&Action> {
        self.by_id.get(&id).ok_or_else(|| Error::unknown("action id", &id.to_string()))
    }

    /// Looks up an action id by name.  Names are not always unique in a program; the first
    /// action with a given name wins.
    pub fn id(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.by_id.values()
    }
}
