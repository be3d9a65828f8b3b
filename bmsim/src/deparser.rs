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

//! Deparser: serializes the valid headers of a packet back into an external encoding.

use tracing::{event, Level};

use crate::error::{Error, Result};
use crate::packet::{BinaryPacket, Header, HeaderStack, Packet, PacketData};
use crate::program::DeparserDef;
use crate::PacketIo;

/// Accumulates emitted headers in one packet encoding.
pub trait Emitter {
    fn emit(&mut self, header: &Header) -> Result<()>;

    /// Appends the unparsed remainder of the input, if any, and returns the output packet.
    fn finalise(self, unparsed: Option<&PacketData>) -> Result<PacketData>;
}

/// Emitter for [`HeaderStack`] output.
#[derive(Default)]
pub struct StackEmitter {
    headers: Vec<Header>,
}

impl Emitter for StackEmitter {
    fn emit(&mut self, header: &Header) -> Result<()> {
        self.headers.push(header.clone());
        Ok(())
    }

    fn finalise(mut self, unparsed: Option<&PacketData>) -> Result<PacketData> {
        let mut stack = match unparsed {
            Some(PacketData::Stack(stack)) => stack.clone(),
            Some(PacketData::Binary(_)) => return Err(Error::EncodingMismatch(PacketIo::Stack)),
            None => HeaderStack::new(),
        };
        // The first header emitted ends up on top.
        while let Some(header) = self.headers.pop() {
            stack.push(header);
        }
        Ok(PacketData::Stack(stack))
    }
}

/// Emitter for [`BinaryPacket`] output.
#[derive(Default)]
pub struct BinaryEmitter {
    binary: Vec<u8>,
}

impl Emitter for BinaryEmitter {
    fn emit(&mut self, header: &Header) -> Result<()> {
        self.binary.extend(header.to_bytes()?);
        Ok(())
    }

    fn finalise(mut self, unparsed: Option<&PacketData>) -> Result<PacketData> {
        match unparsed {
            Some(PacketData::Binary(rest)) => self.binary.extend_from_slice(rest.remaining()),
            Some(PacketData::Stack(_)) => return Err(Error::EncodingMismatch(PacketIo::Binary)),
            None => (),
        }
        Ok(PacketData::Binary(BinaryPacket::from(self.binary)))
    }
}

/// A deparser: the order in which headers go back on the wire.
#[derive(Clone, Debug)]
pub struct Deparser {
    name: String,
    io: PacketIo,
    order: Vec<String>,
}

impl Deparser {
    pub fn new(def: &DeparserDef, io: PacketIo) -> Deparser {
        Deparser { name: def.name.clone(), io, order: def.order.clone() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Emits the valid headers of `packet` in order, followed by its unparsed remainder.
    pub fn process(&self, packet: &Packet) -> Result<PacketData> {
        match self.io {
            PacketIo::Stack => self.run(packet, StackEmitter::default()),
            PacketIo::Binary => self.run(packet, BinaryEmitter::default()),
        }
    }

    fn run<E: Emitter>(&self, packet: &Packet, mut emitter: E) -> Result<PacketData> {
        for name in &self.order {
            if packet.is_valid(name) {
                emitter.emit(packet.header(name)?)?;
                event!(Level::DEBUG, "{}: emitted {name}", self.name);
            }
        }
        emitter.finalise(packet.unparsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::FieldSpec;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn packet() -> Packet {
        let spec = |name: &str, bitwidth| FieldSpec { name: name.into(), bitwidth, signed: false };
        let mut layouts = BTreeMap::new();
        layouts.insert("a".to_string(), vec![spec("x", 8)].into());
        layouts.insert("b".to_string(), vec![spec("y", 16)].into());
        layouts.insert("c".to_string(), vec![spec("z", 8)].into());
        let mut packet = Packet::new(Arc::new(layouts));
        packet.add_header("a").unwrap();
        packet.add_header("b").unwrap();
        packet.header_mut("a").unwrap().set("x", 1u32).unwrap();
        packet.header_mut("b").unwrap().set("y", 0x0203u32).unwrap();
        packet
    }

    fn deparser(io: PacketIo) -> Deparser {
        Deparser::new(&DeparserDef { name: "deparser".into(),
                                     order: vec!["b".into(), "c".into(), "a".into()] }, io)
    }

    #[test]
    fn binary() {
        let mut packet = packet();
        let mut rest = BinaryPacket::from(vec![0xff, 9, 9]);
        rest.get_next(1).unwrap();
        packet.set_unparsed(Some(rest.into()));

        let out = deparser(PacketIo::Binary).process(&packet).unwrap();
        assert_eq!(out.as_binary().unwrap().as_bytes(), &[2, 3, 1, 9, 9]);
    }

    #[test]
    fn stack() {
        let mut packet = packet();
        let mut rest = HeaderStack::with_payload(b"data".to_vec());
        rest.push(packet.header("c").unwrap().clone());
        packet.set_unparsed(Some(rest.into()));

        let mut out = deparser(PacketIo::Stack).process(&packet).unwrap().into_stack().unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.pop().unwrap().name(), "b");
        assert_eq!(out.pop().unwrap().name(), "a");
        assert_eq!(out.pop().unwrap().name(), "c");
        assert_eq!(out.payload(), b"data");
    }

    #[test]
    fn nothing_parsed() {
        let out = deparser(PacketIo::Stack).process(&packet()).unwrap();
        assert_eq!(out.as_stack().unwrap().len(), 2);
    }

    #[test]
    fn encoding_mismatch() {
        let mut packet = packet();
        packet.set_unparsed(Some(HeaderStack::new().into()));
        assert!(matches!(deparser(PacketIo::Binary).process(&packet),
                         Err(Error::EncodingMismatch(_))));
    }
}
