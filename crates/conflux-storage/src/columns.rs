//! Raw-column format: a metadata prelude followed by concatenated column
//! bodies, plus the typed column helpers built on it.
//!
//! The prelude is `ULEB128 count`, then per column `ULEB128 id`, `u8 type`,
//! `ULEB128 data-len`. Bodies follow in declaration order with no framing of
//! their own.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ColumnError {
    #[error("bad column metadata")]
    BadMeta,
    #[error("bad column data")]
    BadData,
    #[error("bad column data: trailing={0}")]
    TrailingData(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ColumnValueType {
    Uint = 0,
    Int = 1,
    Bool = 2,
    Bytes = 3,
}

impl ColumnValueType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ColumnValueType::Uint),
            1 => Some(ColumnValueType::Int),
            2 => Some(ColumnValueType::Bool),
            3 => Some(ColumnValueType::Bytes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub id: u64,
    pub ty: ColumnValueType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    pub spec: ColumnSpec,
    pub data: Vec<u8>,
}

pub fn write_uleb(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let b = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            out.push(b | 0x80);
        } else {
            out.push(b);
            break;
        }
    }
}

/// Reads one ULEB128 value, returning it with the number of bytes consumed.
pub fn read_uleb(data: &[u8]) -> Option<(u64, usize)> {
    let mut out: u64 = 0;
    let mut shift: u32 = 0;
    for (i, b) in data.iter().enumerate() {
        out |= ((b & 0x7f) as u64).checked_shl(shift)?;
        if b & 0x80 == 0 {
            return Some((out, i + 1));
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
    None
}

pub fn encode_column_metadata(cols: &[RawColumn]) -> Vec<u8> {
    let mut out = Vec::new();
    write_uleb(&mut out, cols.len() as u64);
    for c in cols {
        write_uleb(&mut out, c.spec.id);
        out.push(c.spec.ty as u8);
        write_uleb(&mut out, c.data.len() as u64);
    }
    out
}

/// Decodes the metadata prelude into (spec, body length) pairs; the second
/// value is the prelude size in bytes.
pub fn decode_column_metadata(data: &[u8]) -> Result<(Vec<(ColumnSpec, usize)>, usize), ColumnError> {
    let mut offset = 0usize;
    let (count, n) = read_uleb(&data[offset..]).ok_or(ColumnError::BadMeta)?;
    offset += n;
    let mut cols = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (id, n) = read_uleb(&data[offset..]).ok_or(ColumnError::BadMeta)?;
        offset += n;
        let ty = data
            .get(offset)
            .copied()
            .and_then(ColumnValueType::from_u8)
            .ok_or(ColumnError::BadMeta)?;
        offset += 1;
        let (len, n) = read_uleb(&data[offset..]).ok_or(ColumnError::BadMeta)?;
        offset += n;
        cols.push((ColumnSpec { id, ty }, len as usize));
    }
    Ok((cols, offset))
}

pub fn encode_raw_columns(cols: &[RawColumn]) -> Vec<u8> {
    let mut out = encode_column_metadata(cols);
    for c in cols {
        out.extend_from_slice(&c.data);
    }
    out
}

pub fn decode_raw_columns(data: &[u8]) -> Result<Vec<RawColumn>, ColumnError> {
    let (specs, mut offset) = decode_column_metadata(data)?;
    let mut cols = Vec::with_capacity(specs.len());
    for (spec, len) in specs {
        if data.len() - offset < len {
            return Err(ColumnError::BadData);
        }
        cols.push(RawColumn {
            spec,
            data: data[offset..offset + len].to_vec(),
        });
        offset += len;
    }
    if offset != data.len() {
        return Err(ColumnError::TrailingData(data.len() - offset));
    }
    Ok(cols)
}

pub fn encode_uint_column(vals: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vals.len());
    for &v in vals {
        write_uleb(&mut out, v);
    }
    out
}

pub fn decode_uint_column(mut data: &[u8]) -> Result<Vec<u64>, ColumnError> {
    let mut out = Vec::new();
    while !data.is_empty() {
        let (v, n) = read_uleb(data).ok_or(ColumnError::BadData)?;
        data = &data[n..];
        out.push(v);
    }
    Ok(out)
}

/// Booleans are bit-packed LSB-first.
pub fn encode_bool_column(vals: &[bool]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vals.len().div_ceil(8));
    let mut cur = 0u8;
    let mut bit = 0u32;
    for &v in vals {
        if v {
            cur |= 1 << bit;
        }
        bit += 1;
        if bit == 8 {
            out.push(cur);
            cur = 0;
            bit = 0;
        }
    }
    if bit > 0 {
        out.push(cur);
    }
    out
}

pub fn decode_bool_column(data: &[u8], count: usize) -> Result<Vec<bool>, ColumnError> {
    let mut out = Vec::with_capacity(count);
    for &b in data {
        for bit in 0..8 {
            if out.len() == count {
                break;
            }
            out.push(b & (1 << bit) != 0);
        }
    }
    if out.len() != count {
        return Err(ColumnError::BadData);
    }
    Ok(out)
}

pub fn encode_bytes_column(vals: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    write_uleb(&mut out, vals.len() as u64);
    for v in vals {
        write_uleb(&mut out, v.len() as u64);
        out.extend_from_slice(v);
    }
    out
}

pub fn decode_bytes_column(mut data: &[u8]) -> Result<Vec<Vec<u8>>, ColumnError> {
    let (count, n) = read_uleb(data).ok_or(ColumnError::BadData)?;
    data = &data[n..];
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (len, n) = read_uleb(data).ok_or(ColumnError::BadData)?;
        data = &data[n..];
        let len = len as usize;
        if data.len() < len {
            return Err(ColumnError::BadData);
        }
        out.push(data[..len].to_vec());
        data = &data[len..];
    }
    if !data.is_empty() {
        return Err(ColumnError::BadData);
    }
    Ok(out)
}

pub fn encode_i64(v: i64) -> [u8; 8] {
    (v as u64).to_be_bytes()
}

pub fn decode_i64(b: &[u8]) -> Result<i64, ColumnError> {
    let arr: [u8; 8] = b.try_into().map_err(|_| ColumnError::BadData)?;
    Ok(u64::from_be_bytes(arr) as i64)
}
