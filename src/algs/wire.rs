//! Fixed, versioned, little-endian wire types for redistribution messages.
//!
//! Fixed-width records are `bytemuck::Pod` structs. Variable-length records
//! (meshes, fields, particles) go through [`WireWriter`] / [`WireReader`],
//! which prefix every array with its count and check that count against the
//! bytes actually left in the payload before touching them.

use bytemuck::{Pod, Zeroable};
use bytes::{Buf, BufMut, BytesMut};
use static_assertions::const_assert_eq;
use std::mem::size_of;

use crate::mesh_error::MeshError;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Record kinds carried in [`WireHdr::kind`].
pub mod kind {
    pub const MESH_PIECE: u16 = 1;
    pub const FIELDS: u16 = 2;
    pub const CLOUD: u16 = 3;
    pub const FIELD_VALUES: u16 = 4;
    /// Mesh piece, fields and clouds bound for one destination.
    pub const PARCEL: u16 = 5;
    /// Construct indices returned to the sender after stitching.
    pub const CONSTRUCT: u16 = 6;
    pub const PATCH_TABLE: u16 = 7;
    pub const FIELD_NAMES: u16 = 8;
    pub const PATCH_VALUES: u16 = 9;
}

// ===== Common records ======================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,  // = WIRE_VERSION.to_le()
    pub kind_le: u16,     // see `kind`
    pub reserved_le: u32, // future use; keep zero
}

impl WireHdr {
    pub fn new(kind: u16) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            reserved_le: 0,
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
}

/// Byte length of a message, exchanged before the payload itself.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireLen {
    pub n_le: u64,
}

impl WireLen {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

const_assert_eq!(size_of::<WireHdr>(), 8);
const_assert_eq!(size_of::<WireLen>(), 8);

// ===== Variable-length records =============================================

/// Append-only little-endian encoder.
#[derive(Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new(kind: u16) -> Self {
        let mut w = Self::default();
        w.put_pod(&WireHdr::new(kind));
        w
    }

    pub fn put_pod<T: Pod>(&mut self, v: &T) {
        self.buf.put_slice(bytemuck::bytes_of(v));
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn put_usize(&mut self, v: usize) {
        self.buf.put_u64_le(v as u64);
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    /// `None` travels as `-1`.
    pub fn put_opt(&mut self, v: Option<usize>) {
        self.put_i64(v.map_or(-1, |x| x as i64));
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_usize(s.len());
        self.buf.put_slice(s.as_bytes());
    }

    pub fn put_usizes(&mut self, v: &[usize]) {
        self.put_usize(v.len());
        for &x in v {
            self.put_usize(x);
        }
    }

    pub fn put_bools(&mut self, v: &[bool]) {
        self.put_usize(v.len());
        for &x in v {
            self.put_bool(x);
        }
    }

    /// Length-prefixed array of plain-old-data values (little-endian hosts).
    pub fn put_pods<T: Pod>(&mut self, v: &[T]) {
        self.put_usize(v.len());
        self.buf.put_slice(bytemuck::cast_slice(v));
    }

    /// Length-prefixed opaque blob.
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.put_usize(v.len());
        self.buf.put_slice(v);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Checked little-endian decoder over a received payload.
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Open a record and verify its header.
    pub fn open(buf: &'a [u8], expected_kind: u16) -> Result<Self, MeshError> {
        let mut r = Self::new(buf);
        let hdr: WireHdr = r.get_pod()?;
        if hdr.version() != WIRE_VERSION {
            return Err(MeshError::Wire(format!(
                "wire version {} (expected {WIRE_VERSION})",
                hdr.version()
            )));
        }
        if hdr.kind() != expected_kind {
            return Err(MeshError::Wire(format!(
                "record kind {} (expected {expected_kind})",
                hdr.kind()
            )));
        }
        Ok(r)
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize, what: &str) -> Result<(), MeshError> {
        if self.buf.remaining() < n {
            Err(MeshError::Wire(format!(
                "truncated record: {what} needs {n} bytes, {} left",
                self.buf.remaining()
            )))
        } else {
            Ok(())
        }
    }

    pub fn get_pod<T: Pod>(&mut self) -> Result<T, MeshError> {
        let n = size_of::<T>();
        self.need(n, "fixed record")?;
        let v = bytemuck::pod_read_unaligned(&self.buf[..n]);
        self.buf.advance(n);
        Ok(v)
    }

    pub fn get_u8(&mut self) -> Result<u8, MeshError> {
        self.need(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    pub fn get_bool(&mut self) -> Result<bool, MeshError> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(MeshError::Wire(format!("invalid bool byte {other}"))),
        }
    }

    pub fn get_u64(&mut self) -> Result<u64, MeshError> {
        self.need(8, "u64")?;
        Ok(self.buf.get_u64_le())
    }

    pub fn get_usize(&mut self) -> Result<usize, MeshError> {
        Ok(self.get_u64()? as usize)
    }

    pub fn get_i64(&mut self) -> Result<i64, MeshError> {
        self.need(8, "i64")?;
        Ok(self.buf.get_i64_le())
    }

    pub fn get_opt(&mut self) -> Result<Option<usize>, MeshError> {
        match self.get_i64()? {
            -1 => Ok(None),
            v if v >= 0 => Ok(Some(v as usize)),
            v => Err(MeshError::Wire(format!("invalid optional index {v}"))),
        }
    }

    /// Read an element count and check that `count * elem_size` bytes remain.
    pub fn get_count(&mut self, elem_size: usize, what: &str) -> Result<usize, MeshError> {
        let n = self.get_usize()?;
        let bytes = n
            .checked_mul(elem_size)
            .ok_or_else(|| MeshError::Wire(format!("{what}: count {n} overflows")))?;
        self.need(bytes, what)?;
        Ok(n)
    }

    pub fn get_str(&mut self) -> Result<String, MeshError> {
        let n = self.get_count(1, "string")?;
        let s = std::str::from_utf8(&self.buf[..n])
            .map_err(|e| MeshError::Wire(format!("invalid utf-8 name: {e}")))?
            .to_owned();
        self.buf.advance(n);
        Ok(s)
    }

    pub fn get_usizes(&mut self) -> Result<Vec<usize>, MeshError> {
        let n = self.get_count(8, "index list")?;
        (0..n).map(|_| self.get_usize()).collect()
    }

    pub fn get_bools(&mut self) -> Result<Vec<bool>, MeshError> {
        let n = self.get_count(1, "flag list")?;
        (0..n).map(|_| self.get_bool()).collect()
    }

    pub fn get_pods<T: Pod>(&mut self) -> Result<Vec<T>, MeshError> {
        let elem = size_of::<T>();
        let n = self.get_count(elem, "value array")?;
        let out = self.buf[..n * elem]
            .chunks_exact(elem)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        self.buf.advance(n * elem);
        Ok(out)
    }

    pub fn get_bytes(&mut self) -> Result<&'a [u8], MeshError> {
        let n = self.get_count(1, "blob")?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Fail unless the whole payload was consumed.
    pub fn finish(self) -> Result<(), MeshError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(MeshError::Wire(format!(
                "{} trailing bytes after record",
                self.buf.len()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_guard() {
        let hdr = WireHdr::new(kind::MESH_PIECE);
        assert_eq!(hdr.version(), WIRE_VERSION);
        assert_eq!(hdr.kind(), kind::MESH_PIECE);
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let bytes = WireWriter::new(kind::CLOUD).finish();
        assert!(matches!(
            WireReader::open(&bytes, kind::MESH_PIECE),
            Err(MeshError::Wire(_))
        ));
    }

    #[test]
    fn declared_count_larger_than_payload_fails() {
        let mut w = WireWriter::new(kind::FIELDS);
        w.put_usize(1000); // claims 1000 indices
        w.put_usize(1);
        let bytes = w.finish();
        let mut r = WireReader::open(&bytes, kind::FIELDS).unwrap();
        assert!(matches!(r.get_usizes(), Err(MeshError::Wire(_))));
    }

    #[test]
    fn mixed_record_decodes_in_order() {
        let mut w = WireWriter::new(kind::FIELDS);
        w.put_str("U");
        w.put_opt(None);
        w.put_opt(Some(4));
        w.put_pods(&[[1.0f64, 2.0, 3.0]]);
        let bytes = w.finish();

        let mut r = WireReader::open(&bytes, kind::FIELDS).unwrap();
        assert_eq!(r.get_str().unwrap(), "U");
        assert_eq!(r.get_opt().unwrap(), None);
        assert_eq!(r.get_opt().unwrap(), Some(4));
        assert_eq!(r.get_pods::<[f64; 3]>().unwrap(), vec![[1.0, 2.0, 3.0]]);
        r.finish().unwrap();
    }

    #[test]
    fn trailing_bytes_are_an_error() {
        let mut w = WireWriter::new(kind::FIELDS);
        w.put_u8(1);
        let bytes = w.finish();
        let r = WireReader::open(&bytes, kind::FIELDS).unwrap();
        assert!(r.finish().is_err());
    }
}
