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

//! Errors raised while loading and running a program.

use num::{BigInt, BigUint};
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad category of an [`Error`].
///
/// Callers usually only care whether a failure is the program's fault, their own, or a feature
/// that simply has not been implemented.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorClass {
    /// The compiled program is malformed or internally inconsistent.  Retrying will not help.
    Program,

    /// The caller passed something invalid (a bad table key, a short packet, missing port
    /// metadata, ...).  The caller may correct it and retry.
    Input,

    /// The process was not given a collaborator it needs, such as an extern handler.
    Config,

    /// The program uses a feature that this engine does not implement.
    Unsupported,
}

/// Error that can arise loading or running a program.
#[derive(Error, Debug)]
pub enum Error {
    /// Value does not fit into a field of the given width.
    #[error("value {value} does not fit in {bitwidth} bits")]
    OutOfRange { value: BigInt, bitwidth: usize },

    /// Byte encoding requested for a value or header that is not a whole number of bytes.
    #[error("{0} is not a multiple of 8 bits wide")]
    NotByteAligned(String),

    /// Header name that the program does not declare.
    #[error("unknown header {0}")]
    UnknownHeader(String),

    /// Field name that the header does not have.
    #[error("header {header} has no field {field}")]
    UnknownField { header: String, field: String },

    /// Header assigned into a packet that does not have the declared layout.
    #[error("header {header} does not match its declared layout ({reason})")]
    HeaderMismatch { header: String, reason: String },

    /// Operator node with the wrong sub-expressions for its arity.
    #[error("operator \"{op}\" takes {expected} argument(s)")]
    BadArity { op: String, expected: usize },

    /// Expression used as an assignment target that cannot be one.
    #[error("{0} expression cannot be used as an lvalue")]
    NotLvalue(String),

    /// Integer used where a boolean was required but it was neither 0 nor 1.
    #[error("{0} cannot be coerced to a boolean")]
    NotBoolean(BigInt),

    /// Expression evaluated to the wrong kind of value.
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: String },

    /// Runtime data index out of range, or runtime data that is not hexadecimal.
    #[error("bad runtime data reference {0}")]
    BadRuntimeData(String),

    /// Parser state whose transitions do not cover the transition key.
    #[error("parser state {state}: no transition matched")]
    NoTransition { state: String },

    /// Reference to a parser state, table, conditional, action or other program element that
    /// does not exist.
    #[error("unknown {kind} {name}")]
    UnknownElement { kind: &'static str, name: String },

    /// Any other inconsistency in the program description.
    #[error("malformed program: {0}")]
    BadProgram(String),

    /// JSON that does not describe a program.
    #[error("could not parse program ({0})")]
    Json(#[from] serde_json::Error),

    /// Program file could not be read.
    #[error("could not read program ({0})")]
    Io(#[from] std::io::Error),

    /// Table entry key that does not have the shape the table requires.
    #[error("table {table}: bad key ({reason})")]
    BadKey { table: String, reason: String },

    /// Table entry whose match key duplicates an existing entry.
    #[error("table {0}: an entry with the same match key already exists")]
    DuplicateEntry(String),

    /// Action name that the table does not know.
    #[error("table {table}: unknown action {action}")]
    UnknownAction { table: String, action: String },

    /// Table entry whose action data does not fit the action's parameters.
    #[error("table {table}: bad action data for {action} ({reason})")]
    BadActionData { table: String, action: String, reason: String },

    /// Required port metadata was not supplied.
    #[error("field {0} was not provided in the port metadata")]
    MissingMetadata(String),

    /// Binary I/O requested for a program whose packet headers are not byte-aligned.
    #[error("header type {header_type}: field {field} is {bitwidth} bits wide, \
             only multiples of 8 are supported with binary packet I/O")]
    UnalignedHeader { header_type: String, field: String, bitwidth: usize },

    /// Input packet ran out before the parser finished extracting.
    #[error("packet too short: needed {needed} bytes, {available} available")]
    PacketTooShort { needed: usize, available: usize },

    /// Structured input packet had no header left to extract.
    #[error("header stack is empty, cannot extract {0}")]
    StackExhausted(String),

    /// Packet handed to a parser using a different encoding.
    #[error("packet encoding does not match the process packet I/O ({0:?} expected)")]
    EncodingMismatch(crate::PacketIo),

    /// Processor asked to run without a loaded process.
    #[error("no process is loaded")]
    NotLoaded,

    /// Primitive that needs an extern handler when none was registered.
    #[error("no extern handlers available for primitive {0}")]
    NoExterns(String),

    /// Primitive with no registered extern handler.
    #[error("no extern handler registered for primitive {0}")]
    UnknownExtern(String),

    /// `assert` or `assume` extern evaluated to false.
    #[error("{0} failed")]
    ExternAssertion(String),

    /// Feature that the program uses but that is not implemented.
    #[error("{0} is not supported")]
    Unsupported(String),
}

impl Error {
    /// Returns the broad category of this error.
    pub fn class(&self) -> ErrorClass {
        use Error::*;
        match self {
            OutOfRange { .. }
            | NotByteAligned(_)
            | UnknownHeader(_)
            | UnknownField { .. }
            | BadArity { .. }
            | NotLvalue(_)
            | NotBoolean(_)
            | TypeMismatch { .. }
            | BadRuntimeData(_)
            | NoTransition { .. }
            | UnknownElement { .. }
            | BadProgram(_)
            | Json(_)
            | ExternAssertion(_) => ErrorClass::Program,
            HeaderMismatch { .. }
            | BadKey { .. }
            | DuplicateEntry(_)
            | UnknownAction { .. }
            | BadActionData { .. }
            | MissingMetadata(_)
            | UnalignedHeader { .. }
            | PacketTooShort { .. }
            | StackExhausted(_)
            | EncodingMismatch(_)
            | Io(_) => ErrorClass::Input,
            NotLoaded | NoExterns(_) | UnknownExtern(_) => ErrorClass::Config,
            Unsupported(_) => ErrorClass::Unsupported,
        }
    }

    pub(crate) fn out_of_range(value: &BigUint, bitwidth: usize) -> Error {
        Error::OutOfRange { value: value.clone().into(), bitwidth }
    }

    pub(crate) fn unknown(kind: &'static str, name: &str) -> Error {
        Error::UnknownElement { kind, name: name.into() }
    }
}
