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

//! Control blocks, the table and conditional graphs that the JSON calls pipelines.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{event, Level};

use crate::action::{Actions, ExternRegistry};
use crate::error::{Error, Result};
use crate::packet::Bus;
use crate::program::{FieldSpec, PipelineDef};
use crate::table::{Conditional, Table};

/// A control block.
#[derive(Clone, Debug)]
pub struct Block {
    name: String,
    init_table: Option<String>,
    tables: BTreeMap<String, Table>,
    conditionals: BTreeMap<String, Conditional>,
    actions: Arc<Actions>,
}

impl Block {
    pub fn new(def: &PipelineDef, actions: Arc<Actions>,
               layouts: &BTreeMap<String, Arc<[FieldSpec]>>) -> Result<Block> {
        let tables = def
            .tables
            .iter()
            .map(|table| Ok((table.name.clone(), Table::new(table, actions.clone(), layouts)?)))
            .collect::<Result<_>>()?;
        let conditionals = def
            .conditionals
            .iter()
            .map(|cond| Ok((cond.name.clone(), Conditional::new(cond)?)))
            .collect::<Result<_>>()?;
        Ok(Block { name: def.name.clone(), init_table: def.init_table.clone(), tables, conditionals,
                   actions })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Tables are the only part of a block that the control plane can change.
    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Runs the block on `bus`, from the initial table until a table or conditional has no
    /// successor.
    pub fn process(&self, bus: &mut Bus, mut externs: Option<&mut ExternRegistry>) -> Result<()> {
        event!(Level::DEBUG, "{}: {bus}", self.name);
        let mut next = self.init_table.clone();
        while let Some(name) = next {
            event!(Level::DEBUG, "{}: next {name}", self.name);
            next = if let Some(table) = self.tables.get(&name) {
                let result = table.apply(bus)?;
                self.actions
                    .get(result.action_run.id)?
                    .process(bus, &result.action_run.data, externs.as_deref_mut())?;
                table.next_table(&result)
            } else if let Some(conditional) = self.conditionals.get(&name) {
                conditional.apply(bus)?
            } else {
                return Err(Error::unknown("table or conditional", &name));
            };
        }
        Ok(())
    }
}
