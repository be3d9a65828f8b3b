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

//! An interpreter for P4 programs compiled to the Behavioral Model (BM) JSON format.
//!
//! A [`Program`] is the deserialized JSON.  A [`Process`] instantiates a program: it compiles the
//! program's parsers, control blocks, and deparsers, and creates a fresh [`Bus`] of metadata and
//! packet headers for every packet.  A [`Processor`] implements an architecture on top of a
//! process by chaining those elements together; [`V1ModelProcessor`] implements V1Model.
//!
//! Packets enter and leave in one of two encodings, chosen per process with [`PacketIo`]: raw
//! bytes ([`BinaryPacket`]) or a stack of already-delimited headers ([`HeaderStack`]).
//!
//! The control plane populates tables through [`Processor::table_mut`].
//!
//! Everything runs single-threaded and synchronously.  All failures are reported as [`Error`]
//! values; [`Error::class`] tells apart malformed programs, bad caller input, missing
//! configuration, and unsupported features.

pub mod action;
pub mod block;
pub mod deparser;
pub mod error;
pub mod expr;
pub mod packet;
pub mod parser;
pub mod process;
pub mod processor;
pub mod program;
pub mod table;
pub mod v1model;
pub mod value;

pub use action::{Action, ExternRegistry};
pub use error::{Error, ErrorClass, Result};
pub use packet::{BinaryPacket, Bus, FieldRef, Header, HeaderStack, Packet, PacketData};
pub use process::Process;
pub use processor::Processor;
pub use program::Program;
pub use table::{ApplyResult, EntryHandle, KeyParam, Table};
pub use v1model::{V1ModelPortMeta, V1ModelProcess, V1ModelProcessor, V1ModelRuntime};
pub use value::FixedInt;

/// External packet encoding of a process.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PacketIo {
    /// Packets are [`BinaryPacket`]s.  Every packet header field must be a multiple of 8 bits.
    Binary,

    /// Packets are [`HeaderStack`]s.
    Stack,
}
