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

//! Match-action tables and conditionals.
//!
//! A table matches a key built from bus fields against its entries and picks an action to run:
//! the action of the matching entry with the lowest priority number, or the default action if
//! no entry matches.  Entries are scanned in handle order, so among matching entries of equal
//! priority the oldest wins.
//!
//! Supported match kinds are `exact`, `lpm`, and `range`.  Other kinds (notably `ternary`) can
//! appear in a table's key, but inserting an entry into such a table fails as unsupported.

use itertools::Itertools;
use num::{BigUint, ToPrimitive};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display};
use std::sync::Arc;
use tracing::{event, Level};

use crate::action::{Action, Actions};
use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::packet::{Bus, FieldRef};
use crate::program::{ConditionalDef, EntryDef, FieldSpec, MatchKeyDef, TableDef};
use crate::value::{parse_int, prefix_mask};

/// Opaque table entry identifier.  Handles are never reused until the table is reset.
pub type EntryHandle = u64;

/// Per-field match kind of a table key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MatchKind {
    Exact,
    Lpm,
    Range,
    Unsupported(String),
}

impl MatchKind {
    fn from_name(name: &str) -> MatchKind {
        match name {
            "exact" => MatchKind::Exact,
            "lpm" => MatchKind::Lpm,
            "range" => MatchKind::Range,
            _ => MatchKind::Unsupported(name.into()),
        }
    }
}

impl Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchKind::Exact => write!(f, "exact"),
            MatchKind::Lpm => write!(f, "lpm"),
            MatchKind::Range => write!(f, "range"),
            MatchKind::Unsupported(name) => write!(f, "{name}"),
        }
    }
}

/// One element of an entry's key as supplied by the control plane.
///
/// Exact matches take a scalar.  LPM takes `(value, prefix_length)` and range takes
/// `(start, end)`, both inclusive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyParam {
    Scalar(BigUint),
    Pair(BigUint, BigUint),
}

impl From<u64> for KeyParam {
    fn from(value: u64) -> KeyParam {
        KeyParam::Scalar(value.into())
    }
}

impl From<BigUint> for KeyParam {
    fn from(value: BigUint) -> KeyParam {
        KeyParam::Scalar(value)
    }
}

impl From<(u64, u64)> for KeyParam {
    fn from((a, b): (u64, u64)) -> KeyParam {
        KeyParam::Pair(a.into(), b.into())
    }
}

impl From<(BigUint, BigUint)> for KeyParam {
    fn from((a, b): (BigUint, BigUint)) -> KeyParam {
        KeyParam::Pair(a, b)
    }
}

/// How one key field of an entry matches.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MatchSpec {
    Exact(BigUint),
    /// `value` has all bits past the prefix cleared.
    Lpm { value: BigUint, prefix_len: usize },
    Range { start: BigUint, end: BigUint },
    /// Const entry of a match kind that lookups do not implement.
    Unsupported(String),
}

impl MatchSpec {
    fn matches(&self, key: &BigUint, bitwidth: usize) -> Result<bool> {
        Ok(match self {
            MatchSpec::Exact(value) => key == value,
            MatchSpec::Lpm { value, prefix_len } => &(key & prefix_mask(bitwidth, *prefix_len)) == value,
            MatchSpec::Range { start, end } => start <= key && key <= end,
            MatchSpec::Unsupported(kind) => return Err(Error::Unsupported(format!("{kind} match"))),
        })
    }
}

impl Display for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchSpec::Exact(value) => write!(f, "{value:#x}"),
            MatchSpec::Lpm { value, prefix_len } => write!(f, "{value:#x}/{prefix_len}"),
            MatchSpec::Range { start, end } => write!(f, "{start:#x}..={end:#x}"),
            MatchSpec::Unsupported(kind) => write!(f, "<{kind}>"),
        }
    }
}

/// A table entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    pub match_key: Vec<MatchSpec>,
    pub action_id: u32,
    /// Action parameters as hexadecimal strings.
    pub action_data: Vec<String>,
    /// Lower numbers take precedence.
    pub priority: i64,
    /// Const entries come from the program and cannot be removed.
    pub is_const: bool,
}

/// The action selected by a lookup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActionRun {
    pub id: u32,
    pub name: String,
    pub data: Vec<String>,
}

/// The result of [`Table::apply`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApplyResult {
    pub hit: bool,
    pub action_run: ActionRun,
}

#[derive(Clone, Debug)]
struct KeyField {
    kind: MatchKind,
    target: Option<FieldRef>,
    bitwidth: usize,
}

#[derive(Clone, Debug)]
enum NextTables {
    HitMiss { hit: Option<String>, miss: Option<String> },
    ByAction(BTreeMap<String, Option<String>>),
}

/// A match-action table.
#[derive(Clone, Debug)]
pub struct Table {
    name: String,
    key: Vec<KeyField>,
    actions: Arc<Actions>,
    action_ids: HashMap<String, u32>,
    default_entry: Option<(u32, Vec<String>)>,
    const_entries: Vec<Entry>,
    entries: BTreeMap<EntryHandle, Entry>,
    next_handle: EntryHandle,
    next_tables: NextTables,
    base_default_next: Option<String>,
}

impl Table {
    /// Builds a table.  `layouts` gives the field layout of every header and metadata instance,
    /// which is where key widths come from.
    pub fn new(def: &TableDef, actions: Arc<Actions>,
               layouts: &BTreeMap<String, Arc<[FieldSpec]>>) -> Result<Table> {
        let key = def
            .key
            .iter()
            .map(|key| {
                let kind = MatchKind::from_name(&key.match_type);
                let target = key
                    .target
                    .as_array()
                    .and_then(|pair| pair.iter().map(|x| x.as_str()).collect_tuple())
                    .and_then(|(header, field)| Some(FieldRef::new(header?, field?)));
                let bitwidth = match (&kind, &target) {
                    (MatchKind::Unsupported(_), _) => 0,
                    (_, Some(target)) => field_width(layouts, target)?,
                    (_, None) => {
                        return Err(Error::BadProgram(format!(
                            "table {}: {} key must target a field", def.name, kind)))
                    }
                };
                Ok(KeyField { kind, target, bitwidth })
            })
            .collect::<Result<Vec<_>>>()?;

        let action_ids = if def.actions.len() == def.action_ids.len() {
            def.actions.iter().cloned().zip(def.action_ids.iter().copied()).collect()
        } else {
            return Err(Error::BadProgram(format!(
                "table {}: {} action names for {} action ids",
                def.name, def.actions.len(), def.action_ids.len())));
        };

        let next_tables = if def.next_tables.contains_key("__HIT__")
            || def.next_tables.contains_key("__MISS__")
        {
            match (def.next_tables.get("__HIT__"), def.next_tables.get("__MISS__")) {
                (Some(hit), Some(miss)) if def.next_tables.len() == 2 => {
                    NextTables::HitMiss { hit: hit.clone(), miss: miss.clone() }
                }
                _ => {
                    return Err(Error::BadProgram(format!(
                        "table {}: next tables must have exactly __HIT__ and __MISS__", def.name)))
                }
            }
        } else {
            NextTables::ByAction(def.next_tables.clone())
        };

        let mut table = Table {
            name: def.name.clone(),
            key,
            actions,
            action_ids,
            default_entry: def
                .default_entry
                .as_ref()
                .map(|entry| (entry.action_id, entry.action_data.clone())),
            const_entries: Vec::new(),
            entries: BTreeMap::new(),
            next_handle: 0,
            next_tables,
            base_default_next: def.base_default_next.clone(),
        };
        if let Some((id, _)) = &table.default_entry {
            table.actions.get(*id)?;
        }
        table.const_entries = def
            .entries
            .iter()
            .map(|entry| table.const_entry(entry))
            .collect::<Result<_>>()?;
        table.reset();
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of entries, const entries included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries in handle order.
    pub fn entries(&self) -> impl Iterator<Item = (EntryHandle, &Entry)> {
        self.entries.iter().map(|(handle, entry)| (*handle, entry))
    }

    /// Removes every entry, puts back the const entries, and restarts handle numbering.
    pub fn reset(&mut self) {
        event!(Level::DEBUG, "{}: reset", self.name);
        self.entries.clear();
        self.next_handle = 0;
        for entry in self.const_entries.clone() {
            self.add(entry);
        }
    }

    /// Inserts an entry with priority 1 and returns its handle.
    ///
    /// `key` has one element per key field, a scalar for `exact` fields and a pair for `lpm`
    /// and `range` fields.
    pub fn insert_entry(&mut self, key: Vec<KeyParam>, action_name: &str,
                        action_data: &[BigUint]) -> Result<EntryHandle> {
        self.insert_entry_with_priority(key, action_name, action_data, 1)
    }

    pub fn insert_entry_with_priority(&mut self, key: Vec<KeyParam>, action_name: &str,
                                      action_data: &[BigUint], priority: i64)
                                      -> Result<EntryHandle> {
        let action_id = self.action_id(action_name)?;
        self.check_action_data(self.actions.get(action_id)?, action_data)?;
        let entry = Entry {
            match_key: self.match_key(key)?,
            action_id,
            action_data: action_data.iter().map(|x| format!("{x:#x}")).collect(),
            priority,
            is_const: false,
        };
        if self.entries.values().any(|other| other.match_key == entry.match_key) {
            return Err(Error::DuplicateEntry(self.name.clone()));
        }
        let handle = self.add(entry);
        event!(Level::DEBUG, "{}: inserted entry {handle} ({action_name})", self.name);
        Ok(handle)
    }

    /// Removes an entry.  Unknown handles and const entries are left alone.
    pub fn remove_entry(&mut self, handle: EntryHandle) {
        match self.entries.get(&handle) {
            Some(entry) if entry.is_const => {
                event!(Level::DEBUG, "{}: entry {handle} is const, not removed", self.name);
            }
            Some(_) => {
                self.entries.remove(&handle);
                event!(Level::DEBUG, "{}: removed entry {handle}", self.name);
            }
            None => (),
        }
    }

    /// Looks up the bus in the table.
    pub fn apply(&self, bus: &Bus) -> Result<ApplyResult> {
        let key = if self.entries.is_empty() { Vec::new() } else { self.key_values(bus)? };

        let mut best: Option<&Entry> = None;
        for entry in self.entries.values() {
            let mut matched = true;
            for ((spec, value), field) in entry.match_key.iter().zip(&key).zip(&self.key) {
                if !spec.matches(value, field.bitwidth)? {
                    matched = false;
                    break;
                }
            }
            if matched && best.map_or(true, |best| entry.priority < best.priority) {
                best = Some(entry);
            }
        }

        let (action_id, data) = match best {
            Some(entry) => (entry.action_id, entry.action_data.clone()),
            None => self
                .default_entry
                .clone()
                .ok_or_else(|| Error::BadProgram(format!("table {} has no default entry",
                                                         self.name)))?,
        };
        let name = self.actions.get(action_id)?.name().to_string();
        event!(Level::DEBUG, "{}: key=[{}] hit={} action={name} data={:?}",
               self.name, key.iter().map(|x| format!("{x:#x}")).join(", "), best.is_some(), data);
        Ok(ApplyResult { hit: best.is_some(), action_run: ActionRun { id: action_id, name, data } })
    }

    /// Returns the name of the table or conditional to go to after `result`.
    pub fn next_table(&self, result: &ApplyResult) -> Option<String> {
        match &self.next_tables {
            NextTables::HitMiss { hit, miss } => (if result.hit { hit } else { miss }).clone(),
            NextTables::ByAction(next) => match next.get(&result.action_run.name) {
                Some(next) => next.clone(),
                None => self.base_default_next.clone(),
            },
        }
    }

    fn add(&mut self, entry: Entry) -> EntryHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.entries.insert(handle, entry);
        handle
    }

    fn action_id(&self, name: &str) -> Result<u32> {
        let id = if self.action_ids.is_empty() {
            self.actions.id(name)
        } else {
            self.action_ids.get(name).copied()
        };
        id.ok_or_else(|| Error::UnknownAction { table: self.name.clone(), action: name.into() })
    }

    fn key_values(&self, bus: &Bus) -> Result<Vec<BigUint>> {
        self.key
            .iter()
            .map(|field| match (&field.kind, &field.target) {
                (MatchKind::Unsupported(kind), _) => {
                    Err(Error::Unsupported(format!("{kind} match in table {}", self.name)))
                }
                (_, Some(target)) => Ok(bus.field(target)?.val().clone()),
                (_, None) => Err(Error::BadProgram(format!("table {}: untargeted key",
                                                           self.name))),
            })
            .collect()
    }

    fn match_key(&self, key: Vec<KeyParam>) -> Result<Vec<MatchSpec>> {
        if key.len() != self.key.len() {
            return Err(Error::BadKey {
                table: self.name.clone(),
                reason: format!("{} key fields provided, {} expected", key.len(), self.key.len()),
            });
        }
        self.key.iter().zip(key).map(|(field, param)| self.match_spec(field, param)).collect()
    }

    fn match_spec(&self, field: &KeyField, param: KeyParam) -> Result<MatchSpec> {
        let bad_key = |reason: String| Error::BadKey { table: self.name.clone(), reason };
        let fits = |value: &BigUint| {
            if value.bits() <= field.bitwidth as u64 {
                Ok(())
            } else {
                Err(bad_key(format!("{value:#x} does not fit in {} bits", field.bitwidth)))
            }
        };
        match (&field.kind, param) {
            (MatchKind::Exact, KeyParam::Scalar(value)) => {
                fits(&value)?;
                Ok(MatchSpec::Exact(value))
            }
            (MatchKind::Lpm, KeyParam::Pair(value, prefix_len)) => {
                fits(&value)?;
                let prefix_len = prefix_len
                    .to_usize()
                    .filter(|len| *len <= field.bitwidth)
                    .ok_or_else(|| bad_key(format!("prefix length {prefix_len} exceeds {} bits",
                                                   field.bitwidth)))?;
                Ok(MatchSpec::Lpm { value: value & prefix_mask(field.bitwidth, prefix_len),
                                    prefix_len })
            }
            (MatchKind::Range, KeyParam::Pair(start, end)) => {
                fits(&start)?;
                fits(&end)?;
                if start > end {
                    return Err(bad_key(format!("range {start:#x}..={end:#x} is empty")));
                }
                Ok(MatchSpec::Range { start, end })
            }
            (MatchKind::Unsupported(kind), _) => {
                Err(Error::Unsupported(format!("{kind} match in table {}", self.name)))
            }
            (kind, param) => Err(bad_key(format!("{param:?} is not a valid {kind} key"))),
        }
    }

    fn check_action_data(&self, action: &Action, data: &[BigUint]) -> Result<()> {
        let bad_data = |reason: String| Error::BadActionData {
            table: self.name.clone(),
            action: action.name().into(),
            reason,
        };
        let params = action.params();
        if data.len() != params.len() {
            return Err(bad_data(format!("{} values provided, {} expected",
                                        data.len(), params.len())));
        }
        match data.iter().zip(params).find(|(value, param)| value.bits() > param.bitwidth as u64) {
            Some((value, param)) => Err(bad_data(format!(
                "{value:#x} does not fit in {} ({} bits)", param.name, param.bitwidth))),
            None => Ok(()),
        }
    }

    /// Builds an entry from the program.  Entries for match kinds that lookups do not support are
    /// kept, and the table fails when it is applied.
    fn const_entry(&self, def: &EntryDef) -> Result<Entry> {
        let bad_entry = |reason: String| {
            Error::BadProgram(format!("table {}: const entry {reason}", self.name))
        };
        if def.match_key.len() != self.key.len() {
            return Err(bad_entry(format!("has {} key fields, {} expected",
                                         def.match_key.len(), self.key.len())));
        }
        if let Some(field) = self.key.iter().zip(&def.match_key).find_map(|(field, key)| {
            (MatchKind::from_name(&key.match_type) != field.kind).then(|| &field.kind)
        }) {
            return Err(bad_entry(format!("does not match {field} key")));
        }
        let match_key = self
            .key
            .iter()
            .zip(&def.match_key)
            .map(|(field, key)| match &field.kind {
                MatchKind::Unsupported(kind) => Ok(MatchSpec::Unsupported(kind.clone())),
                _ => self.match_spec(field, self.const_key_param(key)?),
            })
            .collect::<Result<Vec<_>>>()?;
        self.actions.get(def.action_entry.action_id)?;
        Ok(Entry {
            match_key,
            action_id: def.action_entry.action_id,
            action_data: def.action_entry.action_data.clone(),
            priority: def.priority,
            is_const: true,
        })
    }

    fn const_key_param(&self, def: &MatchKeyDef) -> Result<KeyParam> {
        let hex = |s: &Option<String>| -> Result<BigUint> {
            s.as_deref()
                .and_then(|s| parse_int(s, 16))
                .and_then(|x| x.to_biguint())
                .ok_or_else(|| Error::BadProgram(format!("table {}: bad const entry key {:?}",
                                                         self.name, def)))
        };
        Ok(match MatchKind::from_name(&def.match_type) {
            MatchKind::Exact => KeyParam::Scalar(hex(&def.key)?),
            MatchKind::Lpm => {
                let prefix_len = def.prefix_length.ok_or_else(|| {
                    Error::BadProgram(format!("table {}: lpm entry without prefix", self.name))
                })?;
                KeyParam::Pair(hex(&def.key)?, prefix_len.into())
            }
            MatchKind::Range => KeyParam::Pair(hex(&def.start)?, hex(&def.end)?),
            MatchKind::Unsupported(kind) => {
                return Err(Error::Unsupported(format!("{kind} match in table {}", self.name)))
            }
        })
    }
}

fn field_width(layouts: &BTreeMap<String, Arc<[FieldSpec]>>, target: &FieldRef) -> Result<usize> {
    layouts
        .get(&target.header)
        .ok_or_else(|| Error::UnknownHeader(target.header.clone()))?
        .iter()
        .find(|spec| spec.name == target.field)
        .map(|spec| spec.bitwidth)
        .ok_or_else(|| Error::UnknownField {
            header: target.header.clone(),
            field: target.field.clone(),
        })
}

/// A conditional: a boolean expression that picks one of two successors.
#[derive(Clone, Debug)]
pub struct Conditional {
    name: String,
    expression: Expr,
    true_next: Option<String>,
    false_next: Option<String>,
}

impl Conditional {
    pub fn new(def: &ConditionalDef) -> Result<Conditional> {
        Ok(Conditional {
            name: def.name.clone(),
            expression: Expr::compile(&def.expression)?,
            true_next: def.true_next.clone(),
            false_next: def.false_next.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluates the condition and returns the name of the next table or conditional.
    pub fn apply(&self, bus: &Bus) -> Result<Option<String>> {
        let result = self.expression.rval(bus, &[])?.as_bool()?;
        event!(Level::DEBUG, "{}: {result}", self.name);
        Ok(if result { self.true_next.clone() } else { self.false_next.clone() })
    }
}
