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

//! A process: a program instantiated for one packet I/O encoding.
//!
//! Building a process compiles every parser, block, and deparser of the program and checks that
//! the program can be used with the requested encoding.  After that, a process hands out fresh
//! buses for packets and runs its elements over them.  How the elements are chained together is
//! up to the architecture, see [`Processor`](crate::Processor).

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{event, Level};

use crate::action::{Actions, ExternRegistry};
use crate::block::Block;
use crate::deparser::Deparser;
use crate::error::{Error, Result};
use crate::packet::{Bus, Header, Layouts, Packet, PacketData};
use crate::parser::Parser;
use crate::program::{FieldSpec, Program};
use crate::PacketIo;

/// An instance of a P4 program.
#[derive(Debug)]
pub struct Process {
    name: String,
    io: PacketIo,
    headers: Layouts,
    metadata: Layouts,
    parsers: BTreeMap<String, Parser>,
    blocks: BTreeMap<String, Block>,
    deparsers: BTreeMap<String, Deparser>,
    enums: BTreeMap<String, BTreeMap<String, i64>>,
    externs: Option<ExternRegistry>,
}

impl Process {
    /// Instantiates `program` for packet I/O `io`.
    ///
    /// Primitives other than `assign`, `add_header`, and `remove_header` are dispatched to
    /// `externs`.  With binary I/O, every field of every packet header must be a whole number of
    /// bytes wide.
    pub fn new(name: &str, program: &Program, io: PacketIo, externs: Option<ExternRegistry>)
               -> Result<Process> {
        let types = program
            .header_types
            .iter()
            .map(|t| (t.name.as_str(), t))
            .collect::<BTreeMap<_, _>>();

        let mut headers = BTreeMap::new();
        let mut metadata = BTreeMap::new();
        for instance in &program.headers {
            let header_type = types
                .get(instance.header_type.as_str())
                .ok_or_else(|| Error::unknown("header type", &instance.header_type))?;
            if io == PacketIo::Binary && !instance.metadata {
                if let Some(field) = header_type.fields.iter().find(|f| f.bitwidth % 8 != 0) {
                    return Err(Error::UnalignedHeader {
                        header_type: header_type.name.clone(),
                        field: field.name.clone(),
                        bitwidth: field.bitwidth,
                    });
                }
            }
            let layout: Arc<[FieldSpec]> = header_type.fields.clone().into();
            let layouts = if instance.metadata { &mut metadata } else { &mut headers };
            layouts.insert(instance.name.clone(), layout);
        }

        let mut all = headers.clone();
        all.extend(metadata.iter().map(|(name, layout)| (name.clone(), layout.clone())));

        let actions = Arc::new(Actions::new(&program.actions)?);
        let parsers = program
            .parsers
            .iter()
            .map(|def| Ok((def.name.clone(), Parser::new(def, io)?)))
            .collect::<Result<_>>()?;
        let blocks = program
            .pipelines
            .iter()
            .map(|def| Ok((def.name.clone(), Block::new(def, actions.clone(), &all)?)))
            .collect::<Result<_>>()?;
        let deparsers = program
            .deparsers
            .iter()
            .map(|def| (def.name.clone(), Deparser::new(def, io)))
            .collect();
        let enums = program
            .enums
            .iter()
            .map(|def| (def.name.clone(), def.entries.iter().cloned().collect()))
            .collect();

        event!(Level::DEBUG, "{name}: loaded {} headers, {} metadata", headers.len(),
               metadata.len());
        Ok(Process {
            name: name.into(),
            io,
            headers: Arc::new(headers),
            metadata: Arc::new(metadata),
            parsers,
            blocks,
            deparsers,
            enums,
            externs,
        })
    }

    /// Checks that `program` has exactly the parsers, blocks, and deparsers named.
    ///
    /// Architectures use this to check that a program was written for them.
    pub fn validate_pipeline(program: &Program, parsers: &[&str], blocks: &[&str],
                             deparsers: &[&str]) -> Result<()> {
        let (provided_parsers, provided_blocks, provided_deparsers) = program.pipeline_names();
        validate_elements("parser", parsers, &provided_parsers)?;
        validate_elements("pipeline", blocks, &provided_blocks)?;
        validate_elements("deparser", deparsers, &provided_deparsers)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn io(&self) -> PacketIo {
        self.io
    }

    /// Returns a new, valid, zeroed instance of packet header `name`.
    pub fn header(&self, name: &str) -> Result<Header> {
        let layout = self.headers.get(name).ok_or_else(|| Error::UnknownHeader(name.into()))?;
        Ok(Header::new(name, layout))
    }

    /// Returns a new, zeroed instance of metadata header `name`.
    pub fn metadata_header(&self, name: &str) -> Result<Header> {
        let layout = self.metadata.get(name).ok_or_else(|| Error::UnknownHeader(name.into()))?;
        Ok(Header::new(name, layout))
    }

    /// Returns a new set of zeroed metadata headers.
    pub fn metadata(&self) -> BTreeMap<String, Header> {
        self.metadata
            .iter()
            .map(|(name, layout)| (name.clone(), Header::new(name, layout)))
            .collect()
    }

    /// Returns a new packet with every header invalid.
    pub fn packet(&self) -> Packet {
        Packet::new(self.headers.clone())
    }

    /// Returns a new bus for one packet.
    pub fn bus(&self) -> Bus {
        Bus::new(self.metadata(), self.packet())
    }

    pub fn parser(&self, name: &str) -> Option<&Parser> {
        self.parsers.get(name)
    }

    pub fn block(&self, name: &str) -> Option<&Block> {
        self.blocks.get(name)
    }

    pub fn block_mut(&mut self, name: &str) -> Option<&mut Block> {
        self.blocks.get_mut(name)
    }

    pub fn deparser(&self, name: &str) -> Option<&Deparser> {
        self.deparsers.get(name)
    }

    pub fn enums(&self) -> &BTreeMap<String, BTreeMap<String, i64>> {
        &self.enums
    }

    /// Looks up member `member` of enum `name`.
    pub fn enum_value(&self, name: &str, member: &str) -> Option<i64> {
        self.enums.get(name)?.get(member).copied()
    }

    pub fn run_parser(&self, name: &str, bus: &mut Bus, packet_in: PacketData) -> Result<()> {
        self.parser(name)
            .ok_or_else(|| Error::unknown("parser", name))?
            .process(bus, packet_in)
    }

    pub fn run_block(&mut self, name: &str, bus: &mut Bus) -> Result<()> {
        self.blocks
            .get(name)
            .ok_or_else(|| Error::unknown("block", name))?
            .process(bus, self.externs.as_mut())
    }

    pub fn run_deparser(&self, name: &str, packet: &Packet) -> Result<PacketData> {
        self.deparser(name)
            .ok_or_else(|| Error::unknown("deparser", name))?
            .process(packet)
    }
}

fn validate_elements(kind: &str, required: &[&str], provided: &[&str]) -> Result<()> {
    if required.len() != provided.len() {
        return Err(Error::BadProgram(format!(
            "program must have {} {kind}(s), it has {}", required.len(), provided.len())));
    }
    match required.iter().find(|name| !provided.contains(*name)) {
        Some(name) => Err(Error::BadProgram(format!(
            "program must have a {kind} called \"{name}\", it has {provided:?}"))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn program(width: usize) -> Program {
        serde_json::from_value(json!({
            "header_types": [
                {"name": "h_t", "fields": [["a", width, false], ["b", 8, false]]},
                {"name": "m_t", "fields": [["flag", 1, false]]}
            ],
            "headers": [
                {"name": "h", "header_type": "h_t", "metadata": false},
                {"name": "m", "header_type": "m_t", "metadata": true}
            ],
            "parsers": [{"name": "parser", "init_state": null, "parse_states": []}],
            "pipelines": [{"name": "ingress", "init_table": null, "tables": [], "conditionals": []}],
            "deparsers": [{"name": "deparser", "order": ["h"]}],
            "enums": [{"name": "E", "entries": [["A", 0], ["B", 7]]}]
        })).unwrap()
    }

    #[test]
    fn alignment_gate() {
        assert!(Process::new("p", &program(8), PacketIo::Binary, None).is_ok());
        assert!(Process::new("p", &program(4), PacketIo::Stack, None).is_ok());
        let error = Process::new("p", &program(4), PacketIo::Binary, None).unwrap_err();
        assert!(matches!(error, Error::UnalignedHeader { bitwidth: 4, .. }));
        assert_eq!(error.class(), crate::ErrorClass::Input);
    }

    #[test]
    fn fresh_instances() {
        let process = Process::new("p", &program(8), PacketIo::Binary, None).unwrap();
        assert!(process.header("h").unwrap().is_valid());
        assert!(process.header("m").is_err());
        assert!(process.metadata_header("m").is_ok());
        assert!(!process.packet().is_valid("h"));

        let bus = process.bus();
        assert!(bus.metadata().contains_key("m"));
        assert!(!bus.packet().contains("m"));
    }

    #[test]
    fn enums() {
        let process = Process::new("p", &program(8), PacketIo::Binary, None).unwrap();
        assert_eq!(process.enum_value("E", "B"), Some(7));
        assert_eq!(process.enum_value("E", "C"), None);
        assert_eq!(process.enums()["E"].len(), 2);
    }

    #[test]
    fn pipeline_validation() {
        let program = program(8);
        assert!(Process::validate_pipeline(&program, &["parser"], &["ingress"], &["deparser"])
            .is_ok());
        assert!(Process::validate_pipeline(&program, &["parser"], &["ingress", "egress"],
                                           &["deparser"]).is_err());
        assert!(Process::validate_pipeline(&program, &["p"], &["ingress"], &["deparser"])
            .is_err());
    }

    #[test]
    fn round_trip() {
        let process = Process::new("p", &program(8), PacketIo::Binary, None).unwrap();
        let mut bus = process.bus();
        let input = crate::BinaryPacket::from(vec![1, 2, 3]);
        process.run_parser("parser", &mut bus, input.into()).unwrap();
        let out = process.run_deparser("deparser", bus.packet()).unwrap();
        assert_eq!(out.as_binary().unwrap().as_bytes(), &[1, 2, 3]);
    }
}
