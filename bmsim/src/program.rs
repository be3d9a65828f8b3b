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

//! The BM JSON program description.
//!
//! These types mirror the parts of the JSON that the engine uses; everything else in the file is
//! ignored.  Expressions stay as raw [`serde_json::Value`] trees here and are compiled into
//! [`Expr`](crate::expr::Expr) when the process is built.

use serde::Deserialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::Result;

/// A compiled P4 program.
#[derive(Clone, Debug, Deserialize)]
pub struct Program {
    pub header_types: Vec<HeaderType>,
    pub headers: Vec<HeaderInstance>,
    #[serde(default)]
    pub parsers: Vec<ParserDef>,
    #[serde(default)]
    pub deparsers: Vec<DeparserDef>,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
    #[serde(default)]
    pub pipelines: Vec<PipelineDef>,
    #[serde(default)]
    pub enums: Vec<EnumDef>,
    #[serde(default)]
    pub register_arrays: Vec<RegisterArrayDef>,
}

impl Program {
    pub fn from_json(json: &str) -> Result<Program> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Program> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Program> {
        Program::from_reader(BufReader::new(File::open(path)?))
    }

    /// Names of the parsers, pipelines, and deparsers, in that order.
    pub fn pipeline_names(&self) -> (Vec<&str>, Vec<&str>, Vec<&str>) {
        (self.parsers.iter().map(|p| p.name.as_str()).collect(),
         self.pipelines.iter().map(|p| p.name.as_str()).collect(),
         self.deparsers.iter().map(|d| d.name.as_str()).collect())
    }
}

/// One field of a header type: `[name, bitwidth, signed]` in the JSON.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(from = "(String, usize, bool)")]
pub struct FieldSpec {
    pub name: String,
    pub bitwidth: usize,
    pub signed: bool,
}

impl From<(String, usize, bool)> for FieldSpec {
    fn from((name, bitwidth, signed): (String, usize, bool)) -> FieldSpec {
        FieldSpec { name, bitwidth, signed }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct HeaderType {
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

/// A header instance.  Metadata instances are not part of the packet.
#[derive(Clone, Debug, Deserialize)]
pub struct HeaderInstance {
    pub name: String,
    pub header_type: String,
    #[serde(default)]
    pub metadata: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ParserDef {
    pub name: String,
    pub init_state: Option<String>,
    pub parse_states: Vec<ParseStateDef>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ParseStateDef {
    pub name: String,
    #[serde(default)]
    pub parser_ops: Vec<OpDef>,
    #[serde(default)]
    pub transition_key: Vec<Json>,
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,
}

/// A parser operation or an action primitive: an operation name and its operands.
#[derive(Clone, Debug, Deserialize)]
pub struct OpDef {
    pub op: String,
    #[serde(default)]
    pub parameters: Vec<Json>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TransitionDef {
    #[serde(rename = "type", default = "default_transition")]
    pub kind: String,
    #[serde(default)]
    pub value: Json,
    #[serde(default)]
    pub mask: Json,
    pub next_state: Option<String>,
}

fn default_transition() -> String {
    "default".into()
}

/// A control block, called a pipeline in the JSON.
#[derive(Clone, Debug, Deserialize)]
pub struct PipelineDef {
    pub name: String,
    pub init_table: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableDef>,
    #[serde(default)]
    pub conditionals: Vec<ConditionalDef>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TableDef {
    pub name: String,
    #[serde(default)]
    pub key: Vec<KeyDef>,
    #[serde(default)]
    pub action_ids: Vec<u32>,
    #[serde(default)]
    pub actions: Vec<String>,
    pub base_default_next: Option<String>,
    #[serde(default)]
    pub next_tables: BTreeMap<String, Option<String>>,
    pub default_entry: Option<ActionEntryDef>,
    #[serde(default)]
    pub entries: Vec<EntryDef>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct KeyDef {
    pub match_type: String,
    /// `[header, field]` for field matches, a bare header name for `valid` matches.
    pub target: Json,
    #[serde(default)]
    pub name: Option<String>,
}

/// A const table entry.
#[derive(Clone, Debug, Deserialize)]
pub struct EntryDef {
    pub match_key: Vec<MatchKeyDef>,
    pub action_entry: ActionEntryDef,
    #[serde(default = "default_priority")]
    pub priority: i64,
}

fn default_priority() -> i64 {
    1
}

#[derive(Clone, Debug, Deserialize)]
pub struct MatchKeyDef {
    pub match_type: String,
    pub key: Option<String>,
    pub prefix_length: Option<usize>,
    pub mask: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ActionEntryDef {
    pub action_id: u32,
    #[serde(default)]
    pub action_data: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ConditionalDef {
    pub name: String,
    pub expression: Json,
    pub true_next: Option<String>,
    pub false_next: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ActionDef {
    pub name: String,
    pub id: u32,
    #[serde(default)]
    pub runtime_data: Vec<RuntimeDataDef>,
    #[serde(default)]
    pub primitives: Vec<OpDef>,
}

/// One action parameter.
#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeDataDef {
    pub name: String,
    pub bitwidth: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DeparserDef {
    pub name: String,
    #[serde(default)]
    pub order: Vec<String>,
}

/// A named set of `(member, value)` pairs.
#[derive(Clone, Debug, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub entries: Vec<(String, i64)>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RegisterArrayDef {
    pub name: String,
    pub size: usize,
    pub bitwidth: usize,
}
