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

//! The V1Model architecture.
//!
//! V1Model runs a program's `parser`, `ingress` block, `egress` block, and `deparser` in that
//! order, with a `standard_metadata` header carrying port and drop information between them.
//! Setting `egress_spec` to its maximum value drops the packet.

use num::{BigUint, ToPrimitive, Zero};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Deref;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{event, Level};

use crate::action::ExternRegistry;
use crate::error::{Error, Result};
use crate::expr::Value;
use crate::packet::{Bus, PacketData};
use crate::process::Process;
use crate::processor::Processor;
use crate::program::Program;
use crate::value::FixedInt;
use crate::PacketIo;

const STANDARD_METADATA: &str = "standard_metadata";

/// V1Model port metadata: `standard_metadata` field values by field name.
///
/// On input only `ingress_port` is required.  On output every field of `standard_metadata` is
/// present, including `egress_port`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct V1ModelPortMeta {
    pub standard_metadata: BTreeMap<String, BigUint>,
}

impl V1ModelPortMeta {
    /// Port metadata for a packet arriving on `port`.
    pub fn ingress(port: u64) -> V1ModelPortMeta {
        let mut standard_metadata = BTreeMap::new();
        standard_metadata.insert("ingress_port".to_string(), BigUint::from(port));
        V1ModelPortMeta { standard_metadata }
    }

    pub fn egress_port(&self) -> Option<&BigUint> {
        self.standard_metadata.get("egress_port")
    }
}

/// Services that a V1Model device provides to the processor.
pub trait V1ModelRuntime {
    /// Current time in microseconds since the device started.
    fn time(&self) -> u64;
}

/// Runtime backed by the system clock.
#[derive(Clone, Debug)]
pub struct SystemRuntime {
    start: Instant,
}

impl SystemRuntime {
    pub fn new() -> SystemRuntime {
        SystemRuntime { start: Instant::now() }
    }
}

impl Default for SystemRuntime {
    fn default() -> SystemRuntime {
        SystemRuntime::new()
    }
}

impl V1ModelRuntime for SystemRuntime {
    fn time(&self) -> u64 {
        micros(self.start.elapsed())
    }
}

/// Whole microseconds in `duration`, saturating at `u64::MAX`.
fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

#[derive(Debug, Default)]
struct ExternState {
    registers: BTreeMap<String, Vec<FixedInt>>,
    messages: Vec<String>,
}

/// State shared by the V1Model externs of one process: register arrays and `log_msg` output.
#[derive(Clone, Debug, Default)]
pub struct V1ModelExterns(Rc<RefCell<ExternState>>);

impl V1ModelExterns {
    fn new(program: &Program) -> V1ModelExterns {
        let registers = program
            .register_arrays
            .iter()
            .map(|r| (r.name.clone(), vec![FixedInt::zero(r.bitwidth); r.size]))
            .collect();
        V1ModelExterns(Rc::new(RefCell::new(ExternState { registers, messages: Vec::new() })))
    }

    /// Returns cell `index` of register array `name`.
    pub fn register(&self, name: &str, index: usize) -> Option<BigUint> {
        Some(self.0.borrow().registers.get(name)?.get(index)?.val().clone())
    }

    /// Returns the messages logged with `log_msg` so far.
    pub fn messages(&self) -> Vec<String> {
        self.0.borrow().messages.clone()
    }

    fn registry(&self) -> ExternRegistry {
        let mut registry = ExternRegistry::new();
        registry.register("assert", |bus, args| check("assert", bus, args));
        registry.register("assume", |bus, args| check("assume", bus, args));
        registry.register("mark_to_drop", mark_to_drop);

        let state = self.0.clone();
        registry.register("log_msg", move |bus, args| {
            let message = log_msg(bus, args)?;
            event!(Level::INFO, "{message}");
            state.borrow_mut().messages.push(message);
            Ok(())
        });

        let state = self.0.clone();
        registry.register("register_read", move |bus, args| {
            let [lval, name, index] = operands::<3>("register_read", args)?;
            let state = state.borrow();
            let cell = register_cell(&state.registers, name.as_object()?, index, bus)?;
            let value = cell.val().clone();
            bus.field_mut(lval.as_field()?)?.set(value)
        });

        let state = self.0.clone();
        registry.register("register_write", move |bus, args| {
            let [name, index, value] = operands::<3>("register_write", args)?;
            let value = value.resolve_int(bus)?;
            let mut state = state.borrow_mut();
            let name = name.as_object()?;
            let index = register_index(name, index, bus)?;
            state
                .registers
                .get_mut(name)
                .ok_or_else(|| Error::unknown("register", name))?
                .get_mut(index)
                .ok_or_else(|| Error::BadProgram(format!("register {name}: no index {index}")))?
                .set_int(&value)
        });

        registry
    }
}

fn operands<'a, const N: usize>(name: &str, args: &'a [Value]) -> Result<&'a [Value; N]> {
    args.try_into().map_err(|_| Error::BadArity { op: name.into(), expected: N })
}

fn check(name: &str, bus: &mut Bus, args: &[Value]) -> Result<()> {
    let [value] = operands::<1>(name, args)?;
    if value.resolve_int(bus)?.is_zero() {
        return Err(Error::ExternAssertion(name.into()));
    }
    Ok(())
}

fn mark_to_drop(bus: &mut Bus, args: &[Value]) -> Result<()> {
    let header = match args {
        [] => STANDARD_METADATA,
        [header] => header.as_header()?,
        _ => return Err(Error::BadArity { op: "mark_to_drop".into(), expected: 1 }),
    };
    bus.header_mut(header)?.field_mut("egress_spec")?.set_max_val();
    Ok(())
}

/// Formats a `log_msg` message.  Each `{}` is replaced by the next argument; fields print in
/// hexadecimal, other values as they are.
fn log_msg(bus: &Bus, args: &[Value]) -> Result<String> {
    let (format, data) = match args {
        [format] => (format.as_str()?, &[][..]),
        [format, data] => (format.as_str()?, data.as_tuple()?),
        _ => return Err(Error::BadArity { op: "log_msg".into(), expected: 2 }),
    };
    let mut data = data.iter();
    let mut message = String::new();
    let mut rest = format;
    while let Some(pos) = rest.find("{}") {
        message.push_str(&rest[..pos]);
        match data.next() {
            Some(Value::Field(field)) => message.push_str(&bus.field(field)?.to_string()),
            Some(value) => message.push_str(&value.to_string()),
            None => message.push_str("{}"),
        }
        rest = &rest[pos + 2..];
    }
    message.push_str(rest);
    Ok(message)
}

fn register_index(name: &str, index: &Value, bus: &Bus) -> Result<usize> {
    let index = index.resolve_int(bus)?;
    index
        .to_usize()
        .ok_or_else(|| Error::BadProgram(format!("register {name}: no index {index}")))
}

fn register_cell<'a>(registers: &'a BTreeMap<String, Vec<FixedInt>>, name: &str, index: &Value,
                     bus: &Bus) -> Result<&'a FixedInt> {
    let index = register_index(name, index, bus)?;
    registers
        .get(name)
        .ok_or_else(|| Error::unknown("register", name))?
        .get(index)
        .ok_or_else(|| Error::BadProgram(format!("register {name}: no index {index}")))
}

/// A process for the V1Model architecture, with the V1Model externs installed.
#[derive(Debug)]
pub struct V1ModelProcess {
    process: Process,
    externs: V1ModelExterns,
}

impl V1ModelProcess {
    /// Instantiates `program`, which must have exactly the parser `parser`, blocks `ingress`
    /// and `egress`, and deparser `deparser`.
    pub fn new(name: &str, program: &Program, io: PacketIo) -> Result<V1ModelProcess> {
        Process::validate_pipeline(program, &["parser"], &["ingress", "egress"], &["deparser"])?;
        let externs = V1ModelExterns::new(program);
        let process = Process::new(name, program, io, Some(externs.registry()))?;
        Ok(V1ModelProcess { process, externs })
    }

    pub fn externs(&self) -> &V1ModelExterns {
        &self.externs
    }

    pub fn into_process(self) -> Process {
        self.process
    }
}

impl Deref for V1ModelProcess {
    type Target = Process;

    fn deref(&self) -> &Process {
        &self.process
    }
}

impl From<V1ModelProcess> for Process {
    fn from(process: V1ModelProcess) -> Process {
        process.into_process()
    }
}

/// Processor for the V1Model architecture.
pub struct V1ModelProcessor<R: V1ModelRuntime> {
    runtime: R,
    process: Option<Process>,
}

impl<R: V1ModelRuntime> V1ModelProcessor<R> {
    pub fn new(runtime: R) -> V1ModelProcessor<R> {
        V1ModelProcessor { runtime, process: None }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }
}

fn standard_field<'a>(bus: &'a mut Bus, field: &str) -> Result<&'a mut FixedInt> {
    bus.header_mut(STANDARD_METADATA)?.field_mut(field)
}

fn dropped(bus: &mut Bus) -> Result<bool> {
    Ok(standard_field(bus, "egress_spec")?.is_max_val())
}

impl<R: V1ModelRuntime> Processor for V1ModelProcessor<R> {
    type PortMeta = V1ModelPortMeta;

    fn load(&mut self, process: Process) -> Option<Process> {
        event!(Level::DEBUG, "loading process {}", process.name());
        self.process.replace(process)
    }

    fn unload(&mut self) -> Option<Process> {
        self.process.take()
    }

    fn process(&self) -> Option<&Process> {
        self.process.as_ref()
    }

    fn process_mut(&mut self) -> Option<&mut Process> {
        self.process.as_mut()
    }

    fn input(&mut self, port_meta: V1ModelPortMeta, packet_in: PacketData)
             -> Result<Vec<(V1ModelPortMeta, PacketData)>> {
        let process = self.process.as_mut().ok_or(Error::NotLoaded)?;
        let mut bus = process.bus();

        if !port_meta.standard_metadata.contains_key("ingress_port") {
            return Err(Error::MissingMetadata("ingress_port".into()));
        }
        for (field, value) in port_meta.standard_metadata {
            standard_field(&mut bus, &field)?.set(value)?;
        }
        standard_field(&mut bus, "egress_spec")?.set_max_val();

        process.run_parser("parser", &mut bus, packet_in)?;

        standard_field(&mut bus, "ingress_global_timestamp")?.set(self.runtime.time())?;
        process.run_block("ingress", &mut bus)?;
        if dropped(&mut bus)? {
            event!(Level::DEBUG, "packet dropped in ingress");
            return Ok(Vec::new());
        }

        let egress_spec = standard_field(&mut bus, "egress_spec")?.val().clone();
        standard_field(&mut bus, "egress_port")?.set(egress_spec)?;
        standard_field(&mut bus, "egress_global_timestamp")?.set(self.runtime.time())?;
        process.run_block("egress", &mut bus)?;
        if dropped(&mut bus)? {
            event!(Level::DEBUG, "packet dropped in egress");
            return Ok(Vec::new());
        }

        let packet_out = process.run_deparser("deparser", bus.packet())?;
        let standard_metadata = bus.header(STANDARD_METADATA)?.values().into_iter().collect();
        Ok(vec![(V1ModelPortMeta { standard_metadata }, packet_out)])
    }
}
