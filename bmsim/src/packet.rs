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

//! Headers, packets, and the metadata + headers bus.
//!
//! A program declares every header it can ever use, so a [`Packet`] is created with all of them
//! already allocated and marked invalid.  Parsing and `add_header` mark headers valid; the wire
//! order lives only in the parser and deparser, never in the packet itself.
//!
//! The external representation of a packet is a [`PacketData`], which is either raw bytes
//! ([`BinaryPacket`]) or a stack of already-delimited headers ([`HeaderStack`]).

use itertools::Itertools;
use num::BigUint;
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::program::FieldSpec;
use crate::value::FixedInt;

/// Field layouts keyed on header instance name, shared by every packet of a process.
pub type Layouts = Arc<BTreeMap<String, Arc<[FieldSpec]>>>;

/// Names one field of one header (or metadata header) on the bus.
///
/// Evaluating an expression as an lvalue yields one of these rather than a reference into the
/// bus, so that the bus is only borrowed mutably at the moment of the write.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FieldRef {
    pub header: String,
    pub field: String,
}

impl FieldRef {
    pub fn new(header: &str, field: &str) -> FieldRef {
        FieldRef { header: header.into(), field: field.into() }
    }
}

impl Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.header, self.field)
    }
}

/// A packet header: an ordered, fixed set of named fields plus a validity bit.
///
/// Fields cannot be added or removed after construction, and while a field's value can change
/// its width cannot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Header {
    name: String,
    fields: Vec<(String, FixedInt)>,
    valid: bool,
}

impl Header {
    /// Creates a zeroed, valid header named `name` with the given layout.
    pub fn new(name: &str, layout: &[FieldSpec]) -> Header {
        Header {
            name: name.into(),
            fields: layout
                .iter()
                .map(|spec| (spec.name.clone(), FixedInt::zero(spec.bitwidth)))
                .collect(),
            valid: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn get(&self, field: &str) -> Option<&FixedInt> {
        self.fields.iter().find(|(name, _)| name == field).map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut FixedInt> {
        self.fields.iter_mut().find(|(name, _)| name == field).map(|(_, value)| value)
    }

    /// Returns field `field`, or an error naming this header if there is none.
    pub fn field(&self, field: &str) -> Result<&FixedInt> {
        let header = &self.name;
        self.get(field)
            .ok_or_else(|| Error::UnknownField { header: header.clone(), field: field.into() })
    }

    pub fn field_mut(&mut self, field: &str) -> Result<&mut FixedInt> {
        let header = self.name.clone();
        self.get_mut(field).ok_or(Error::UnknownField { header, field: field.into() })
    }

    /// Sets field `field` to `value`.
    pub fn set<V: Into<BigUint>>(&mut self, field: &str, value: V) -> Result<()> {
        self.field_mut(field)?.set(value)
    }

    /// Iterates over `(name, value)` in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FixedInt)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Copies out the field values in declaration order.
    pub fn values(&self) -> Vec<(String, BigUint)> {
        self.fields.iter().map(|(name, value)| (name.clone(), value.val().clone())).collect()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn set_valid(&mut self) {
        self.valid = true;
    }

    pub fn set_invalid(&mut self) {
        self.valid = false;
    }

    /// Length of the encoded header in bytes.  Every field must be byte-aligned.
    pub fn byte_len(&self) -> Result<usize> {
        self.check_byte_aligned()?;
        Ok(self.fields.iter().map(|(_, value)| value.bytewidth()).sum())
    }

    /// Sets the fields from the big-endian encoding in `binary`, in declaration order.
    pub fn from_bytes(&mut self, binary: &[u8]) -> Result<()> {
        let needed = self.byte_len()?;
        if binary.len() < needed {
            return Err(Error::PacketTooShort { needed, available: binary.len() });
        }
        let mut start = 0;
        for (_, value) in self.fields.iter_mut() {
            let end = start + value.bytewidth();
            value.from_bytes(&binary[start..end])?;
            start = end;
        }
        Ok(())
    }

    /// Returns the big-endian encoding of the fields in declaration order.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.check_byte_aligned()?;
        let mut binary = Vec::with_capacity(self.byte_len()?);
        for (_, value) in &self.fields {
            binary.extend(value.to_bytes()?);
        }
        Ok(binary)
    }

    fn check_byte_aligned(&self) -> Result<()> {
        match self.fields.iter().find(|(_, value)| !value.is_byte_aligned()) {
            Some((field, _)) => Err(Error::NotByteAligned(format!("{}.{}", self.name, field))),
            None => Ok(()),
        }
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.name)?;
        for (name, value) in &self.fields {
            write!(f, "{}={}, ", name, value)?;
        }
        write!(f, "valid={}}}", self.valid)
    }
}

/// A packet represented as a stack of pre-delimited headers on top of an opaque payload.
///
/// The top of the stack is the outermost header, i.e. the first one on the wire.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HeaderStack {
    stack: Vec<Header>,
    payload: Vec<u8>,
}

impl HeaderStack {
    pub fn new() -> HeaderStack {
        HeaderStack::default()
    }

    pub fn with_payload(payload: Vec<u8>) -> HeaderStack {
        HeaderStack { stack: Vec::new(), payload }
    }

    /// Number of headers on the stack.
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
    }

    /// Pushes `header` on top of the packet.
    pub fn push(&mut self, header: Header) {
        self.stack.push(header);
    }

    /// Pops the top header of the packet.
    pub fn pop(&mut self) -> Option<Header> {
        self.stack.pop()
    }

    /// Returns the top header without removing it.
    pub fn top(&self) -> Option<&Header> {
        self.stack.last()
    }
}

impl Display for HeaderStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers = self.stack.iter().rev().join(", ");
        write!(f, "{{ {}{}payload: {:02x?} }}",
               headers, if headers.is_empty() { "" } else { ", " }, self.payload)
    }
}

/// A packet in binary, with a read cursor used by the parser.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BinaryPacket {
    bytes: Vec<u8>,
    ptr: usize,
}

impl BinaryPacket {
    pub fn new() -> BinaryPacket {
        BinaryPacket::default()
    }

    /// Appends `binary` to the end of the packet.
    pub fn extend(&mut self, binary: &[u8]) {
        self.bytes.extend_from_slice(binary);
    }

    /// Moves the cursor back to the start of the packet.
    pub fn reset(&mut self) {
        self.ptr = 0;
    }

    /// Returns the next `n` bytes from the cursor and advances the cursor past them.
    pub fn get_next(&mut self, n: usize) -> Result<&[u8]> {
        let start = self.ptr;
        let end = start + n;
        if end > self.bytes.len() {
            return Err(Error::PacketTooShort { needed: n, available: self.bytes.len() - start });
        }
        self.ptr = end;
        Ok(&self.bytes[start..end])
    }

    /// Returns the bytes from the cursor to the end and moves the cursor to the end.
    pub fn get_remaining(&mut self) -> &[u8] {
        let start = self.ptr;
        self.ptr = self.bytes.len();
        &self.bytes[start..]
    }

    /// Returns the bytes from the cursor to the end without moving the cursor.
    pub fn remaining(&self) -> &[u8] {
        &self.bytes[self.ptr..]
    }

    /// All of the bytes, regardless of the cursor.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for BinaryPacket {
    fn from(bytes: Vec<u8>) -> BinaryPacket {
        BinaryPacket { bytes, ptr: 0 }
    }
}

impl From<&[u8]> for BinaryPacket {
    fn from(bytes: &[u8]) -> BinaryPacket {
        bytes.to_vec().into()
    }
}

/// A packet in one of the two external encodings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PacketData {
    Binary(BinaryPacket),
    Stack(HeaderStack),
}

impl PacketData {
    pub fn encoding(&self) -> crate::PacketIo {
        match self {
            PacketData::Binary(_) => crate::PacketIo::Binary,
            PacketData::Stack(_) => crate::PacketIo::Stack,
        }
    }

    pub fn as_binary(&self) -> Option<&BinaryPacket> {
        match self {
            PacketData::Binary(packet) => Some(packet),
            PacketData::Stack(_) => None,
        }
    }

    pub fn as_stack(&self) -> Option<&HeaderStack> {
        match self {
            PacketData::Stack(stack) => Some(stack),
            PacketData::Binary(_) => None,
        }
    }

    pub fn into_binary(self) -> Option<BinaryPacket> {
        match self {
            PacketData::Binary(packet) => Some(packet),
            PacketData::Stack(_) => None,
        }
    }

    pub fn into_stack(self) -> Option<HeaderStack> {
        match self {
            PacketData::Stack(stack) => Some(stack),
            PacketData::Binary(_) => None,
        }
    }
}

impl From<BinaryPacket> for PacketData {
    fn from(packet: BinaryPacket) -> PacketData {
        PacketData::Binary(packet)
    }
}

impl From<HeaderStack> for PacketData {
    fn from(stack: HeaderStack) -> PacketData {
        PacketData::Stack(stack)
    }
}

/// The internal representation of a packet.
///
/// Headers are stored by the name the program gives them, not in wire order.  Only headers the
/// program declares can be present, and all of them always are, valid or not.
#[derive(Clone, Debug)]
pub struct Packet {
    layouts: Layouts,
    headers: BTreeMap<String, Header>,
    unparsed: Option<PacketData>,
}

impl Packet {
    /// Creates a packet with every header in `layouts` allocated and invalid.
    pub fn new(layouts: Layouts) -> Packet {
        let headers = layouts
            .iter()
            .map(|(name, layout)| {
                let mut header = Header::new(name, layout);
                header.set_invalid();
                (name.clone(), header)
            })
            .collect();
        Packet { layouts, headers, unparsed: None }
    }

    /// True if the program declares header `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    pub fn header(&self, name: &str) -> Result<&Header> {
        self.headers.get(name).ok_or_else(|| Error::UnknownHeader(name.into()))
    }

    pub fn header_mut(&mut self, name: &str) -> Result<&mut Header> {
        self.headers.get_mut(name).ok_or_else(|| Error::UnknownHeader(name.into()))
    }

    /// Iterates over all headers, valid or not, by name.
    pub fn headers(&self) -> impl Iterator<Item = &Header> {
        self.headers.values()
    }

    /// Stores a copy of `header` as header `name`, marked valid.
    ///
    /// `header` must have exactly the fields, in number, name, and width, that the program
    /// declares for `name`.  The packet never keeps a reference to the caller's header.
    pub fn set_header(&mut self, name: &str, header: &Header) -> Result<()> {
        let layout = self.layouts.get(name).ok_or_else(|| Error::UnknownHeader(name.into()))?;
        let mismatch = |reason: String| Error::HeaderMismatch { header: name.into(), reason };

        if header.len() != layout.len() {
            return Err(mismatch(format!("{} fields provided, {} declared",
                                        header.len(), layout.len())));
        }
        let mut copy = Header::new(name, layout);
        for spec in layout.iter() {
            let value = header
                .get(&spec.name)
                .ok_or_else(|| mismatch(format!("missing field {}", spec.name)))?;
            if value.bitwidth() != spec.bitwidth {
                return Err(mismatch(format!("field {} is {} bits wide, {} declared",
                                            spec.name, value.bitwidth(), spec.bitwidth)));
            }
            copy.set(&spec.name, value.val().clone())?;
        }
        self.headers.insert(name.into(), copy);
        Ok(())
    }

    /// Marks header `name` valid.  A header that was never valid before reads as all zeros.
    pub fn add_header(&mut self, name: &str) -> Result<()> {
        if let Some(header) = self.headers.get_mut(name) {
            header.set_valid();
            return Ok(());
        }
        let layout = self.layouts.get(name).ok_or_else(|| Error::UnknownHeader(name.into()))?;
        self.headers.insert(name.into(), Header::new(name, layout));
        Ok(())
    }

    /// Marks header `name` invalid.  Its storage stays allocated.
    pub fn remove_header(&mut self, name: &str) -> Result<()> {
        self.header_mut(name)?.set_invalid();
        Ok(())
    }

    /// True if header `name` exists and is valid.
    pub fn is_valid(&self, name: &str) -> bool {
        self.headers.get(name).map_or(false, Header::is_valid)
    }

    /// The part of the input packet that the parser did not consume.
    pub fn unparsed(&self) -> Option<&PacketData> {
        self.unparsed.as_ref()
    }

    pub fn set_unparsed(&mut self, unparsed: Option<PacketData>) {
        self.unparsed = unparsed;
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let valid = self.headers.values().filter(|h| h.is_valid()).join(", ");
        write!(f, "[{}]", valid)
    }
}

/// The metadata + headers bus that expressions read and write.
///
/// Lookups by name check the architecture's metadata first and then the packet's headers.
/// Cloning a bus copies everything, which is what replication to several outputs needs.
#[derive(Clone, Debug)]
pub struct Bus {
    metadata: BTreeMap<String, Header>,
    packet: Packet,
}

impl Bus {
    pub fn new(metadata: BTreeMap<String, Header>, packet: Packet) -> Bus {
        Bus { metadata, packet }
    }

    pub fn metadata(&self) -> &BTreeMap<String, Header> {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut BTreeMap<String, Header> {
        &mut self.metadata
    }

    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    pub fn packet_mut(&mut self) -> &mut Packet {
        &mut self.packet
    }

    pub fn into_packet(self) -> Packet {
        self.packet
    }

    /// Looks up a metadata header, falling back to a packet header.
    pub fn header(&self, name: &str) -> Result<&Header> {
        match self.metadata.get(name) {
            Some(header) => Ok(header),
            None => self.packet.header(name),
        }
    }

    pub fn header_mut(&mut self, name: &str) -> Result<&mut Header> {
        match self.metadata.get_mut(name) {
            Some(header) => Ok(header),
            None => self.packet.header_mut(name),
        }
    }

    pub fn field(&self, field: &FieldRef) -> Result<&FixedInt> {
        self.header(&field.header)?.field(&field.field)
    }

    pub fn field_mut(&mut self, field: &FieldRef) -> Result<&mut FixedInt> {
        self.header_mut(&field.header)?.field_mut(&field.field)
    }
}

impl Display for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "metadata=[{}] packet={}", self.metadata.values().join(", "), self.packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(fields: &[(&str, usize)]) -> Arc<[FieldSpec]> {
        fields
            .iter()
            .map(|&(name, bitwidth)| FieldSpec { name: name.into(), bitwidth, signed: false })
            .collect::<Vec<_>>()
            .into()
    }

    fn layouts() -> Layouts {
        let mut layouts = BTreeMap::new();
        layouts.insert("ethernet".to_string(),
                       layout(&[("dst_addr", 48), ("src_addr", 48), ("ethertype", 16)]));
        layouts.insert("vlan".to_string(), layout(&[("pcp", 3), ("dei", 1), ("vid", 12)]));
        Arc::new(layouts)
    }

    #[test]
    fn header_round_trip() {
        let mut header = Header::new("ethernet", &layouts()["ethernet"]);
        header.set("dst_addr", 0x001122334455u64).unwrap();
        header.set("src_addr", 0x66778899aabbu64).unwrap();
        header.set("ethertype", 0x0800u32).unwrap();
        assert_eq!(header.byte_len().unwrap(), 14);

        let binary = header.to_bytes().unwrap();
        assert_eq!(binary[..6], [0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(binary[12..], [0x08, 0x00]);

        let mut decoded = Header::new("ethernet", &layouts()["ethernet"]);
        decoded.from_bytes(&binary).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn unaligned_header() {
        let header = Header::new("vlan", &layouts()["vlan"]);
        assert!(header.byte_len().is_err());
        assert!(header.to_bytes().is_err());
    }

    #[test]
    fn unknown_field() {
        let mut header = Header::new("vlan", &layouts()["vlan"]);
        assert!(matches!(header.set("tpid", 1u32), Err(Error::UnknownField { .. })));
        assert!(header.set("vid", 4096u32).is_err());
    }

    #[test]
    fn packet_headers_start_invalid() {
        let packet = Packet::new(layouts());
        assert!(packet.contains("ethernet"));
        assert!(!packet.is_valid("ethernet"));
        assert!(!packet.is_valid("ipv4"));
        assert!(packet.header("ipv4").is_err());
    }

    #[test]
    fn add_and_remove_header() {
        let mut packet = Packet::new(layouts());
        packet.add_header("vlan").unwrap();
        assert!(packet.is_valid("vlan"));
        packet.header_mut("vlan").unwrap().set("vid", 10u32).unwrap();

        packet.remove_header("vlan").unwrap();
        assert!(!packet.is_valid("vlan"));

        // Storage survives invalidation.
        packet.add_header("vlan").unwrap();
        assert_eq!(packet.header("vlan").unwrap().field("vid").unwrap().val(),
                   &BigUint::from(10u32));

        assert!(packet.add_header("ipv4").is_err());
    }

    #[test]
    fn set_header_copies() {
        let mut packet = Packet::new(layouts());
        let mut vlan = Header::new("vlan", &layouts()["vlan"]);
        vlan.set("vid", 7u32).unwrap();
        packet.set_header("vlan", &vlan).unwrap();

        vlan.set("vid", 8u32).unwrap();
        assert_eq!(packet.header("vlan").unwrap().field("vid").unwrap().val(),
                   &BigUint::from(7u32));
        assert!(packet.is_valid("vlan"));
    }

    #[test]
    fn set_header_checks_layout() {
        let mut packet = Packet::new(layouts());
        let ethernet = Header::new("ethernet", &layouts()["ethernet"]);
        assert!(matches!(packet.set_header("vlan", &ethernet),
                         Err(Error::HeaderMismatch { .. })));

        let narrow = Header::new("vlan", &layout(&[("pcp", 3), ("dei", 1), ("vid", 8)]));
        assert!(matches!(packet.set_header("vlan", &narrow), Err(Error::HeaderMismatch { .. })));

        assert!(matches!(packet.set_header("ipv4", &ethernet), Err(Error::UnknownHeader(_))));
    }

    #[test]
    fn bus_prefers_metadata() {
        let mut metadata = BTreeMap::new();
        metadata.insert("ethernet".to_string(), Header::new("ethernet", &layout(&[("x", 8)])));
        let bus = Bus::new(metadata, Packet::new(layouts()));
        assert!(bus.field(&FieldRef::new("ethernet", "x")).is_ok());
        assert!(bus.field(&FieldRef::new("ethernet", "ethertype")).is_err());
        assert!(bus.field(&FieldRef::new("vlan", "vid")).is_ok());
    }

    #[test]
    fn bus_clone_is_deep() {
        let mut bus = Bus::new(BTreeMap::new(), Packet::new(layouts()));
        bus.packet_mut().add_header("vlan").unwrap();
        let copy = bus.clone();
        bus.field_mut(&FieldRef::new("vlan", "vid")).unwrap().set(5u32).unwrap();
        assert_eq!(copy.field(&FieldRef::new("vlan", "vid")).unwrap().val(), &BigUint::from(0u32));
    }

    #[test]
    fn binary_packet_cursor() {
        let mut packet = BinaryPacket::from(vec![1, 2, 3, 4, 5]);
        assert_eq!(packet.get_next(2).unwrap(), &[1, 2]);
        assert!(packet.get_next(4).is_err());
        assert_eq!(packet.remaining(), &[3, 4, 5]);
        assert_eq!(packet.get_remaining(), &[3, 4, 5]);
        assert!(packet.get_remaining().is_empty());
        packet.reset();
        assert_eq!(packet.get_next(1).unwrap(), &[1]);
    }

    #[test]
    fn header_stack_order() {
        let mut stack = HeaderStack::with_payload(b"payload".to_vec());
        stack.push(Header::new("vlan", &layouts()["vlan"]));
        stack.push(Header::new("ethernet", &layouts()["ethernet"]));
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.top().unwrap().name(), "ethernet");
        assert_eq!(stack.pop().unwrap().name(), "ethernet");
        assert_eq!(stack.pop().unwrap().name(), "vlan");
        assert!(stack.pop().is_none());
        assert_eq!(stack.payload(), b"payload");
    }
}
