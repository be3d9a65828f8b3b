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

//! End-to-end tests of the V1Model processor on a small program.
//!
//! `tests/p4/ping.json` takes a packet that is just a 32-bit `count`.  The ingress pipeline
//! increments `count`, sends the packet back out its ingress port, logs the new count, and counts
//! packets in register `hits`.  Table `filter`, empty by default, then matches on the new count.

use anyhow::Result;
use num::{BigUint, ToPrimitive};
use tracing_test::traced_test;

use bmsim::v1model::V1ModelExterns;
use bmsim::{BinaryPacket, Error, HeaderStack, PacketData, PacketIo, Processor, Program};
use bmsim::{V1ModelPortMeta, V1ModelProcess, V1ModelProcessor, V1ModelRuntime};

/// Runtime whose clock stands still.
struct FixedClock(u64);

impl V1ModelRuntime for FixedClock {
    fn time(&self) -> u64 {
        self.0
    }
}

fn ping_program() -> Result<Program> {
    Ok(Program::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/p4/ping.json"))?)
}

fn start(io: PacketIo) -> Result<(V1ModelProcessor<FixedClock>, V1ModelExterns)> {
    let process = V1ModelProcess::new("ping", &ping_program()?, io)?;
    let externs = process.externs().clone();
    let mut processor = V1ModelProcessor::new(FixedClock(42));
    assert!(processor.load(process.into()).is_none());
    Ok((processor, externs))
}

/// Sends a binary ping with `count` in on `port` and returns the output packets as
/// (egress port, bytes).
fn ping<P>(processor: &mut P, port: u64, count: u32) -> Result<Vec<(u64, Vec<u8>)>>
where
    P: Processor<PortMeta = V1ModelPortMeta>,
{
    let packet = BinaryPacket::from(count.to_be_bytes().to_vec());
    let outputs = processor.input(V1ModelPortMeta::ingress(port), packet.into())?;
    Ok(outputs
        .into_iter()
        .map(|(meta, packet)| {
            let port = meta.egress_port().and_then(ToPrimitive::to_u64).unwrap_or(u64::MAX);
            let bytes = packet.into_binary().map(BinaryPacket::into_bytes).unwrap_or_default();
            (port, bytes)
        })
        .collect())
}

#[test]
#[traced_test]
fn binary_ping() -> Result<()> {
    let (mut processor, externs) = start(PacketIo::Binary)?;

    assert_eq!(ping(&mut processor, 3, 0x7d)?, vec![(3, vec![0, 0, 0, 0x7e])]);
    assert_eq!(externs.messages(), vec!["hdr.ping.count = 0x7E".to_string()]);

    // The count wraps around instead of overflowing the field.
    assert_eq!(ping(&mut processor, 1, u32::MAX)?, vec![(1, vec![0, 0, 0, 0])]);
    Ok(())
}

#[test]
fn payload_is_preserved() -> Result<()> {
    let (mut processor, _) = start(PacketIo::Binary)?;
    let packet = BinaryPacket::from(vec![0, 0, 0, 1, 0xaa, 0xbb]);
    let outputs = processor.input(V1ModelPortMeta::ingress(2), packet.into())?;
    assert_eq!(outputs.len(), 1);
    let bytes = outputs[0].1.as_binary().map(|b| b.as_bytes().to_vec());
    assert_eq!(bytes, Some(vec![0, 0, 0, 2, 0xaa, 0xbb]));
    Ok(())
}

#[test]
fn stack_ping() -> Result<()> {
    let process = V1ModelProcess::new("ping", &ping_program()?, PacketIo::Stack)?;
    let mut header = process.header("ping")?;
    header.set("count", 9u32)?;
    let mut stack = HeaderStack::with_payload(vec![1, 2, 3]);
    stack.push(header);

    let mut processor = V1ModelProcessor::new(FixedClock(0));
    processor.load(process.into());
    let mut outputs = processor.input(V1ModelPortMeta::ingress(5), stack.into())?;
    assert_eq!(outputs.len(), 1);

    let (meta, packet) = outputs.remove(0);
    assert_eq!(meta.egress_port(), Some(&BigUint::from(5u32)));
    let mut stack = packet.into_stack().ok_or_else(|| anyhow::anyhow!("expected a stack"))?;
    assert_eq!(stack.payload(), &[1, 2, 3]);
    let ping = stack.pop().ok_or_else(|| anyhow::anyhow!("ping header missing"))?;
    assert_eq!(ping.name(), "ping");
    assert_eq!(ping.field("count")?.val(), &BigUint::from(10u32));
    assert!(stack.is_empty());
    Ok(())
}

#[test]
fn output_metadata() -> Result<()> {
    let (mut processor, _) = start(PacketIo::Binary)?;
    let packet = BinaryPacket::from(vec![0, 0, 0, 0]);
    let outputs = processor.input(V1ModelPortMeta::ingress(4), packet.into())?;
    let meta = &outputs[0].0.standard_metadata;
    assert_eq!(meta["ingress_port"], BigUint::from(4u32));
    assert_eq!(meta["egress_spec"], BigUint::from(4u32));
    assert_eq!(meta["ingress_global_timestamp"], BigUint::from(42u32));
    assert_eq!(meta["egress_global_timestamp"], BigUint::from(42u32));
    assert!(meta.contains_key("mcast_grp"));
    Ok(())
}

#[test]
fn table_entries() -> Result<()> {
    let (mut processor, _) = start(PacketIo::Binary)?;

    let filter = processor.table_mut("ingress", "filter")?;
    let drop = filter.insert_entry(vec![5u64.into()], "drop_", &[])?;
    filter.insert_entry(vec![8u64.into()], "forward", &[BigUint::from(7u32)])?;

    assert!(ping(&mut processor, 1, 4)?.is_empty());
    assert_eq!(ping(&mut processor, 1, 7)?, vec![(7, vec![0, 0, 0, 8])]);
    assert_eq!(ping(&mut processor, 1, 8)?, vec![(1, vec![0, 0, 0, 9])]);

    processor.table_mut("ingress", "filter")?.remove_entry(drop);
    assert_eq!(ping(&mut processor, 1, 4)?, vec![(1, vec![0, 0, 0, 5])]);

    let unknown = processor.table_mut("ingress", "filter")?.insert_entry(
        vec![1u64.into()], "no_such_action", &[]);
    assert!(matches!(unknown, Err(Error::UnknownAction { .. })));
    assert!(matches!(processor.table_mut("ingress", "nope"), Err(Error::UnknownElement { .. })));
    assert!(matches!(processor.table_mut("nope", "filter"), Err(Error::UnknownElement { .. })));
    Ok(())
}

#[test]
fn registers() -> Result<()> {
    let (mut processor, externs) = start(PacketIo::Binary)?;
    assert_eq!(externs.register("hits", 0), Some(BigUint::from(0u32)));
    ping(&mut processor, 1, 0)?;
    ping(&mut processor, 1, 0)?;
    assert_eq!(externs.register("hits", 0), Some(BigUint::from(2u32)));
    assert_eq!(externs.register("hits", 1), Some(BigUint::from(0u32)));
    assert_eq!(externs.register("hits", 4), None);
    assert_eq!(externs.register("misses", 0), None);
    Ok(())
}

#[test]
fn bad_input() -> Result<()> {
    let (mut processor, _) = start(PacketIo::Binary)?;

    let packet = PacketData::from(BinaryPacket::from(vec![0, 0, 0, 0]));
    let result = processor.input(V1ModelPortMeta::default(), packet);
    assert!(matches!(result, Err(Error::MissingMetadata(_))));

    let short = BinaryPacket::from(vec![0, 0]);
    let result = processor.input(V1ModelPortMeta::ingress(1), short.into());
    assert!(matches!(result, Err(Error::PacketTooShort { .. })));

    let stack = HeaderStack::new();
    let result = processor.input(V1ModelPortMeta::ingress(1), stack.into());
    assert!(matches!(result, Err(Error::EncodingMismatch(PacketIo::Binary))));
    Ok(())
}

#[test]
fn not_loaded() -> Result<()> {
    let mut processor = V1ModelProcessor::new(FixedClock(0));
    let packet = BinaryPacket::from(vec![0, 0, 0, 0]);
    let result = processor.input(V1ModelPortMeta::ingress(1), packet.into());
    assert!(matches!(result, Err(Error::NotLoaded)));
    assert!(matches!(processor.table_mut("ingress", "filter"), Err(Error::NotLoaded)));

    let process = V1ModelProcess::new("ping", &ping_program()?, PacketIo::Binary)?;
    processor.load(process.into());
    assert_eq!(processor.process().map(|p| p.name()), Some("ping"));
    assert_eq!(processor.unload().map(|p| p.io()), Some(PacketIo::Binary));
    assert!(processor.process().is_none());
    Ok(())
}

#[test]
fn program_checks() -> Result<()> {
    let mut program = ping_program()?;
    program.header_types[2].fields[0].bitwidth = 12;
    let result = V1ModelProcess::new("ping", &program, PacketIo::Binary);
    assert!(matches!(result, Err(Error::UnalignedHeader { bitwidth: 12, .. })));
    assert!(V1ModelProcess::new("ping", &program, PacketIo::Stack).is_ok());

    let mut program = ping_program()?;
    program.pipelines[1].name = "egress_0".into();
    let result = V1ModelProcess::new("ping", &program, PacketIo::Binary);
    assert!(matches!(result, Err(Error::BadProgram(_))));

    let process = V1ModelProcess::new("ping", &ping_program()?, PacketIo::Binary)?;
    assert_eq!(process.enum_value("MeterColor", "RED"), Some(2));
    Ok(())
}
