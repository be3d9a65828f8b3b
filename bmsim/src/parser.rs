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

//! Parser state machine.
//!
//! A parser walks a graph of named states starting from its initial state.  Each state extracts
//! zero or more headers from the input packet into the bus, then evaluates its transition key and
//! picks the first transition whose value matches.  A transition without a next state ends
//! parsing.
//!
//! Extraction is delegated to a [`Collector`], one per packet I/O encoding.  Whatever the parser
//! leaves unconsumed is stored in the packet's unparsed slot for the deparser to append.

use num::BigInt;
use std::collections::HashMap;
use tracing::{event, Level};

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::packet::{BinaryPacket, Bus, HeaderStack, PacketData};
use crate::program::{OpDef, ParseStateDef, ParserDef, TransitionDef};
use crate::value::parse_int;
use crate::PacketIo;

/// Extracts headers from one encoding of an input packet.
pub trait Collector {
    /// Extracts header `header` from the input into `bus`'s packet, marking it valid.
    fn extract(&mut self, bus: &mut Bus, header: &str) -> Result<()>;

    /// Returns what is left of the input.
    fn finalise(self) -> PacketData;
}

/// Collector for [`HeaderStack`] input: each extraction pops the top header.
pub struct StackCollector {
    stack: HeaderStack,
}

impl StackCollector {
    pub fn new(stack: HeaderStack) -> StackCollector {
        StackCollector { stack }
    }
}

impl Collector for StackCollector {
    fn extract(&mut self, bus: &mut Bus, header: &str) -> Result<()> {
        let top = self.stack.pop().ok_or_else(|| Error::StackExhausted(header.into()))?;
        bus.packet_mut().set_header(header, &top)
    }

    fn finalise(self) -> PacketData {
        PacketData::Stack(self.stack)
    }
}

/// Collector for [`BinaryPacket`] input: each extraction decodes the next header-length bytes.
pub struct BinaryCollector {
    binary: BinaryPacket,
}

impl BinaryCollector {
    pub fn new(binary: BinaryPacket) -> BinaryCollector {
        BinaryCollector { binary }
    }
}

impl Collector for BinaryCollector {
    fn extract(&mut self, bus: &mut Bus, header: &str) -> Result<()> {
        let packet = bus.packet_mut();
        packet.add_header(header)?;
        let header = packet.header_mut(header)?;
        let binary = self.binary.get_next(header.byte_len()?)?;
        header.from_bytes(binary)
    }

    fn finalise(self) -> PacketData {
        PacketData::Binary(self.binary)
    }
}

#[derive(Clone, Debug)]
enum ParserOp {
    Extract(String),
    Unsupported(String),
}

impl ParserOp {
    fn compile(def: &OpDef) -> Result<ParserOp> {
        if def.op != "extract" {
            return Ok(ParserOp::Unsupported(def.op.clone()));
        }
        match def.parameters.as_slice() {
            [param] if param.get("type").and_then(|t| t.as_str()) == Some("regular") => {
                let header = param.get("value").and_then(|v| v.as_str()).ok_or_else(|| {
                    Error::BadProgram(format!("extract operand must name a header: {}", param))
                })?;
                Ok(ParserOp::Extract(header.into()))
            }
            [param] => Ok(ParserOp::Unsupported(format!("extract from {}", param))),
            _ => Err(Error::BadProgram("extract takes exactly one operand".into())),
        }
    }
}

#[derive(Clone, Debug)]
enum Match {
    Default,
    Value { value: Expr, mask: Option<BigInt> },
}

#[derive(Clone, Debug)]
enum TransitionKey {
    None,
    Field(Expr),
    /// Keys of more than one field are not implemented; holds the field count.
    Unsupported(usize),
}

#[derive(Clone, Debug)]
struct Transition {
    matches: Match,
    next_state: Option<String>,
}

impl Transition {
    fn compile(def: &TransitionDef) -> Result<Transition> {
        let default = def.kind == "default" || def.value.as_str() == Some("default");
        let matches = if default {
            Match::Default
        } else {
            let node = serde_json::json!({"type": def.kind, "value": def.value});
            let mask = match def.mask.as_str() {
                Some(mask) => Some(parse_int(mask, 16).ok_or_else(|| {
                    Error::BadProgram(format!("bad transition mask {:?}", mask))
                })?),
                None if def.mask.is_null() => None,
                None => return Err(Error::BadProgram(format!("bad transition mask {}", def.mask))),
            };
            Match::Value { value: Expr::compile(&node)?, mask }
        };
        Ok(Transition { matches, next_state: def.next_state.clone() })
    }
}

/// One state of a parser.
#[derive(Clone, Debug)]
pub struct ParseState {
    name: String,
    ops: Vec<ParserOp>,
    key: TransitionKey,
    transitions: Vec<Transition>,
}

impl ParseState {
    pub fn new(def: &ParseStateDef) -> Result<ParseState> {
        let key = match def.transition_key.as_slice() {
            [] => TransitionKey::None,
            [key] => TransitionKey::Field(Expr::compile(key)?),
            keys => TransitionKey::Unsupported(keys.len()),
        };
        Ok(ParseState {
            name: def.name.clone(),
            ops: def.parser_ops.iter().map(ParserOp::compile).collect::<Result<_>>()?,
            key,
            transitions: def.transitions.iter().map(Transition::compile).collect::<Result<_>>()?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the state's operations and returns the name of the next state, if any.
    pub fn process<C: Collector>(&self, collector: &mut C, bus: &mut Bus)
                                 -> Result<Option<String>> {
        for op in &self.ops {
            match op {
                ParserOp::Extract(header) => {
                    collector.extract(bus, header)?;
                    event!(Level::DEBUG, "{}: extracted {header}", self.name);
                }
                ParserOp::Unsupported(op) => {
                    return Err(Error::Unsupported(format!("parser operation {op}")))
                }
            }
        }

        let key = match &self.key {
            TransitionKey::None => None,
            TransitionKey::Field(key) => Some(key.rval(bus, &[])?.as_int()?),
            TransitionKey::Unsupported(n) => {
                return Err(Error::Unsupported(format!(
                    "parser state {}: transition key with {n} fields", self.name)))
            }
        };
        for transition in &self.transitions {
            let matched = match (&transition.matches, &key) {
                (Match::Default, _) => true,
                (Match::Value { value, mask }, Some(key)) => {
                    let value = value.rval(bus, &[])?.as_int()?;
                    match mask {
                        Some(mask) => (key & mask) == (value & mask),
                        None => *key == value,
                    }
                }
                (Match::Value { .. }, None) => false,
            };
            if matched {
                return Ok(transition.next_state.clone());
            }
        }
        Err(Error::NoTransition { state: self.name.clone() })
    }
}

/// A parser: a named state machine that fills a bus from an input packet.
#[derive(Clone, Debug)]
pub struct Parser {
    name: String,
    io: PacketIo,
    init_state: Option<String>,
    states: HashMap<String, ParseState>,
}

impl Parser {
    pub fn new(def: &ParserDef, io: PacketIo) -> Result<Parser> {
        let states = def
            .parse_states
            .iter()
            .map(|state| Ok((state.name.clone(), ParseState::new(state)?)))
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Parser { name: def.name.clone(), io, init_state: def.init_state.clone(), states })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parses `packet_in` into `bus`.
    ///
    /// `bus` should be fresh, with every packet header invalid.  On success the unconsumed part
    /// of `packet_in` is stored as the packet's unparsed remainder.
    pub fn process(&self, bus: &mut Bus, packet_in: PacketData) -> Result<()> {
        match (self.io, packet_in) {
            (PacketIo::Stack, PacketData::Stack(stack)) => {
                self.run(bus, StackCollector::new(stack))
            }
            (PacketIo::Binary, PacketData::Binary(binary)) => {
                self.run(bus, BinaryCollector::new(binary))
            }
            (io, _) => Err(Error::EncodingMismatch(io)),
        }
    }

    fn run<C: Collector>(&self, bus: &mut Bus, mut collector: C) -> Result<()> {
        let mut state = self.init_state.clone();
        while let Some(name) = state {
            event!(Level::DEBUG, "{}: state {name}", self.name);
            state = self
                .states
                .get(&name)
                .ok_or_else(|| Error::unknown("parse state", &name))?
                .process(&mut collector, bus)?;
        }
        bus.packet_mut().set_unparsed(Some(collector.finalise()));
        Ok(())
    }
}
