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

//! Processors: architectures that connect the parts of a process into a packet path.

use crate::error::{Error, Result};
use crate::packet::PacketData;
use crate::process::Process;
use crate::table::Table;

/// A P4 architecture.
///
/// A processor runs one [`Process`] at a time.  It decides how the program's parsers, blocks,
/// and deparsers are chained, what port metadata packets carry in and out, and which externs
/// exist.
pub trait Processor {
    /// Port metadata that accompanies each input and output packet.
    type PortMeta;

    /// Loads `process`, returning the process it replaces.
    fn load(&mut self, process: Process) -> Option<Process>;

    /// Unloads the running process and returns it.
    fn unload(&mut self) -> Option<Process>;

    fn process(&self) -> Option<&Process>;

    fn process_mut(&mut self) -> Option<&mut Process>;

    /// Returns table `name` of block `block`, for the control plane to modify.
    ///
    /// Block names are the architecture's (e.g. V1Model's `ingress`), while table names are the
    /// program's.
    fn table_mut(&mut self, block: &str, name: &str) -> Result<&mut Table> {
        self.process_mut()
            .ok_or(Error::NotLoaded)?
            .block_mut(block)
            .ok_or_else(|| Error::unknown("block", block))?
            .table_mut(name)
            .ok_or_else(|| Error::unknown("table", name))
    }

    /// Processes one input packet and returns zero or more output packets.
    fn input(&mut self, port_meta: Self::PortMeta, packet_in: PacketData)
             -> Result<Vec<(Self::PortMeta, PacketData)>>;
}
