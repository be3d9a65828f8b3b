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

//! Runs packets through a P4 program compiled to Behavioral Model JSON, using the V1Model
//! architecture.
//!
//! Each packet is given on the command line in hexadecimal.  Output packets are printed to
//! stdout, one per line, as the egress port followed by the packet bytes in hexadecimal.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use itertools::Itertools;
use num::BigUint;
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{event, Level};

use bmsim::v1model::SystemRuntime;
use bmsim::{BinaryPacket, KeyParam, PacketData, PacketIo, Processor, Program};
use bmsim::{V1ModelPortMeta, V1ModelProcess, V1ModelProcessor};

#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    /// BM JSON program, as produced by `p4c-bm2-ss`.
    program: PathBuf,

    /// Ingress port for the input packets.
    #[clap(long, default_value_t = 0)]
    port: u64,

    /// JSON file with table entries to install before processing.
    #[clap(long)]
    entries: Option<PathBuf>,

    /// Log each step of packet processing.
    #[clap(long, short)]
    verbose: bool,

    /// Input packets in hexadecimal.
    packets: Vec<String>,
}

/// Key element of an entry: a scalar for exact fields, or a pair for lpm (value, prefix
/// length) and range (start, end) fields.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum KeyDef {
    Scalar(String),
    Pair(String, String),
}

#[derive(Deserialize, Debug)]
struct EntryDef {
    block: String,
    table: String,
    key: Vec<KeyDef>,
    action: String,
    #[serde(default)]
    data: Vec<String>,
    priority: Option<i64>,
}

fn parse_uint(s: &str) -> Result<BigUint> {
    let digits = s.trim_start_matches("0x");
    BigUint::parse_bytes(digits.as_bytes(), 16).ok_or_else(|| anyhow!("{s}: not a hex number"))
}

fn parse_packet(s: &str) -> Result<Vec<u8>> {
    let digits: Vec<char> = s.chars().filter(|c| !c.is_whitespace() && *c != ':').collect();
    if digits.len() % 2 != 0 {
        return Err(anyhow!("{s}: odd number of hex digits"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let byte: String = pair.iter().collect();
            u8::from_str_radix(&byte, 16).with_context(|| format!("{s}: not a hex packet"))
        })
        .collect()
}

impl KeyDef {
    fn to_param(&self) -> Result<KeyParam> {
        Ok(match self {
            KeyDef::Scalar(x) => KeyParam::Scalar(parse_uint(x)?),
            KeyDef::Pair(a, b) => KeyParam::Pair(parse_uint(a)?, parse_uint(b)?),
        })
    }
}

fn install_entries<P: Processor>(processor: &mut P, path: &Path) -> Result<()> {
    let file = File::open(path).with_context(|| format!("could not open {}", path.display()))?;
    let entries: Vec<EntryDef> = serde_json::from_reader(file)
        .with_context(|| format!("could not parse {}", path.display()))?;
    for entry in entries {
        let key = entry.key.iter().map(KeyDef::to_param).collect::<Result<Vec<_>>>()?;
        let data = entry.data.iter().map(|x| parse_uint(x)).collect::<Result<Vec<_>>>()?;
        let table = processor.table_mut(&entry.block, &entry.table)?;
        let handle = table.insert_entry_with_priority(key, &entry.action, &data,
                                                      entry.priority.unwrap_or(1))
            .with_context(|| format!("{}.{}: could not insert entry", entry.block, entry.table))?;
        event!(Level::INFO, "{}.{}: installed entry {handle}", entry.block, entry.table);
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    let program = Program::from_file(&args.program)
        .with_context(|| format!("could not load {}", args.program.display()))?;
    let name = args.program.file_stem().map_or("program".into(), |s| s.to_string_lossy());
    let process = V1ModelProcess::new(&name, &program, PacketIo::Binary)?;

    let mut processor = V1ModelProcessor::new(SystemRuntime::new());
    processor.load(process.into());
    if let Some(ref entries) = args.entries {
        install_entries(&mut processor, entries)?;
    }

    for hex in &args.packets {
        let packet = BinaryPacket::from(parse_packet(hex)?);
        let outputs = processor.input(V1ModelPortMeta::ingress(args.port), packet.into())?;
        if outputs.is_empty() {
            event!(Level::INFO, "{hex}: dropped");
        }
        for (meta, packet) in outputs {
            let port = meta.egress_port().cloned().unwrap_or_default();
            let bytes = match packet {
                PacketData::Binary(binary) => binary.into_bytes(),
                PacketData::Stack(_) => return Err(anyhow!("unexpected structured output")),
            };
            println!("{port} {}", bytes.iter().map(|b| format!("{b:02x}")).join(""));
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_max_level(level).init();

    if let Err(e) = run(&args) {
        event!(Level::ERROR, "{:#}", e);
        Err(e)?;
    }
    Ok(())
}
