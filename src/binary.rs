//! Compact binary form.
//!
//! A node is its type tag as NUL-terminated UTF-8, a compressed property count, each property as
//! a NUL-terminated name followed by a value record, a compressed child count and then each child
//! in order. A value record is a compressed byte length followed by that many bytes: a one-byte
//! type marker and the payload. A zero-length record is `Void`.
//!
//! Compressed integers are one header byte holding the number of little-endian magnitude bytes
//! that follow, with `0x80` set for negative values.

use crate::error::{Result, TreeError};
use crate::statics::{self, FORMAT_BINARY, MAX_TREE_DEPTH};
use crate::{DynamicValue, Identifier, TreeNode};
use flate2::{Compression, GzBuilder, read::GzDecoder};
use std::io::{self, Read, Write};

impl TreeNode {
    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_binary(&mut out);
        out
    }

    pub fn write_binary<W: Write>(&self, out: &mut W) -> io::Result<()> {
        write_node(self, out)
    }

    /// The binary form wrapped in gzip. The header carries no timestamp so the output is
    /// reproducible.
    pub fn to_gzip_binary(&self) -> io::Result<Vec<u8>> {
        let mut encoder = GzBuilder::new()
            .mtime(0)
            .write(Vec::new(), Compression::default());
        self.write_binary(&mut encoder)?;
        encoder.finish()
    }

    /// Reads the binary form, transparently inflating gzip input.
    pub fn from_binary(bytes: &[u8]) -> Result<TreeNode> {
        if bytes.starts_with(&statics::GZIP_MAGIC) {
            let mut inflated = Vec::new();
            match GzDecoder::new(bytes).read_to_end(&mut inflated) {
                Ok(_) => return parse(&inflated),
                Err(e) => tracing::debug!(error = %e, "not gzip after all; reading raw"),
            }
        }
        parse(bytes)
    }
}

fn parse(bytes: &[u8]) -> Result<TreeNode> {
    let mut reader = BinaryReader { bytes, pos: 0 };
    reader.read_node(0)
}

fn write_node<W: Write>(node: &TreeNode, out: &mut W) -> io::Result<()> {
    write_cstring(out, &node.tag())?;

    let properties = node.properties();
    write_compressed_int(out, properties.len() as i64)?;
    for (name, value) in &properties {
        write_cstring(out, name)?;
        write_value(out, value)?;
    }

    let children = node.children();
    write_compressed_int(out, children.len() as i64)?;
    for child in &children {
        write_node(child, out)?;
    }
    Ok(())
}

fn write_cstring<W: Write>(out: &mut W, text: &str) -> io::Result<()> {
    out.write_all(text.as_bytes())?;
    out.write_all(&[0])
}

fn write_value<W: Write>(out: &mut W, value: &DynamicValue) -> io::Result<()> {
    let mut record = Vec::new();
    match value {
        DynamicValue::Void => {}
        DynamicValue::Int(v) => {
            record.push(statics::MARKER_INT);
            record.extend_from_slice(&v.to_le_bytes());
        }
        DynamicValue::Bool(true) => record.push(statics::MARKER_BOOL_TRUE),
        DynamicValue::Bool(false) => record.push(statics::MARKER_BOOL_FALSE),
        DynamicValue::Double(v) => {
            record.push(statics::MARKER_DOUBLE);
            record.extend_from_slice(&v.to_le_bytes());
        }
        DynamicValue::String(s) => {
            record.push(statics::MARKER_STRING);
            record.extend_from_slice(s.as_bytes());
            record.push(0);
        }
        DynamicValue::Int64(v) => {
            record.push(statics::MARKER_INT64);
            record.extend_from_slice(&v.to_le_bytes());
        }
        DynamicValue::Blob(b) => {
            record.push(statics::MARKER_BLOB);
            record.extend_from_slice(b);
        }
    }
    write_compressed_int(out, record.len() as i64)?;
    out.write_all(&record)
}

fn write_compressed_int<W: Write>(out: &mut W, value: i64) -> io::Result<()> {
    let magnitude = value.unsigned_abs().to_le_bytes();
    let len = magnitude.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let mut header = len as u8;
    if value < 0 {
        header |= 0x80;
    }
    out.write_all(&[header])?;
    out.write_all(&magnitude[..len])
}

struct BinaryReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    fn error(&self, message: impl Into<String>) -> TreeError {
        TreeError::malformed(
            FORMAT_BINARY,
            format!("{} (at byte {})", message.into(), self.pos),
        )
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| self.error("unexpected end of input"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_compressed_int(&mut self) -> Result<i64> {
        let header = self.take(1)?[0];
        let len = usize::from(header & 0x7F);
        if len > 8 {
            return Err(self.error(format!("compressed integer of {len} bytes")));
        }
        let mut magnitude = [0_u8; 8];
        magnitude[..len].copy_from_slice(self.take(len)?);
        let magnitude = u64::from_le_bytes(magnitude);
        let value = i64::try_from(magnitude).map_err(|_| self.error("compressed integer overflows"))?;
        Ok(if header & 0x80 != 0 { -value } else { value })
    }

    /// A count or length; never larger than what is left to read.
    fn read_len(&mut self) -> Result<usize> {
        let value = self.read_compressed_int()?;
        usize::try_from(value)
            .ok()
            .filter(|&len| len <= self.bytes.len() - self.pos)
            .ok_or_else(|| self.error(format!("invalid length {value}")))
    }

    fn read_cstring(&mut self) -> Result<String> {
        let rest = &self.bytes[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| self.error("unterminated string"))?;
        let text = std::str::from_utf8(&rest[..nul])
            .map_err(|e| self.error(e.to_string()))?
            .to_owned();
        self.pos += nul + 1;
        Ok(text)
    }

    fn read_identifier(&mut self, what: &str) -> Result<Identifier> {
        let name = Identifier::new(self.read_cstring()?);
        if name.is_empty() {
            return Err(self.error(format!("empty {what}")));
        }
        if !name.is_valid() {
            return Err(self.error(format!("invalid {what} {:?}", &*name)));
        }
        Ok(name)
    }

    fn read_value(&mut self) -> Result<DynamicValue> {
        let len = self.read_len()?;
        if len == 0 {
            return Ok(DynamicValue::Void);
        }
        let record = self.take(len)?;
        let (marker, payload) = (record[0], &record[1..]);

        let value = match marker {
            statics::MARKER_INT => DynamicValue::Int(i32::from_le_bytes(self.fixed(payload)?)),
            statics::MARKER_BOOL_TRUE => DynamicValue::Bool(true),
            statics::MARKER_BOOL_FALSE => DynamicValue::Bool(false),
            statics::MARKER_DOUBLE => DynamicValue::Double(f64::from_le_bytes(self.fixed(payload)?)),
            statics::MARKER_INT64 => DynamicValue::Int64(i64::from_le_bytes(self.fixed(payload)?)),
            statics::MARKER_STRING => {
                let text = payload.strip_suffix(&[0_u8]).unwrap_or(payload);
                DynamicValue::String(
                    std::str::from_utf8(text)
                        .map_err(|e| self.error(e.to_string()))?
                        .to_owned(),
                )
            }
            statics::MARKER_BLOB => DynamicValue::Blob(payload.to_vec()),
            other => return Err(self.error(format!("unknown value marker {other}"))),
        };
        Ok(value)
    }

    fn fixed<const N: usize>(&self, payload: &[u8]) -> Result<[u8; N]> {
        payload
            .get(..N)
            .and_then(|bytes| <[u8; N]>::try_from(bytes).ok())
            .ok_or_else(|| self.error(format!("value payload shorter than {N} bytes")))
    }

    fn read_node(&mut self, depth: usize) -> Result<TreeNode> {
        if depth >= MAX_TREE_DEPTH {
            return Err(self.error("tree is nested too deeply"));
        }

        let node = TreeNode::new(self.read_identifier("type tag")?);

        let num_properties = self.read_len()?;
        for _ in 0..num_properties {
            let name = self.read_identifier("property name")?;
            let value = self.read_value()?;
            node.insert_property_unchecked(name, value);
        }

        let num_children = self.read_len()?;
        for _ in 0..num_children {
            node.push_child_unchecked(self.read_node(depth + 1)?);
        }
        Ok(node)
    }
}
