//! Tagged symbol streams.
//!
//! For every compiled shader the compiler emits one stream per symbol class
//! (uniforms, attributes, varyings). A stream is a table-start chunk
//! followed by one chunk per symbol; each symbol chunk nests a name string,
//! a fixed 20-byte descriptor record, optional extension chunks we skip,
//! and (for uniforms) an optional constant initializer.

use half::f16;

use crate::error::{MbsError, Tag};

pub(crate) const TAG_UNIFORM_TABLE: Tag = Tag(*b"SUNI");
pub(crate) const TAG_VARYING_TABLE: Tag = Tag(*b"SVAR");
pub(crate) const TAG_ATTRIBUTE_TABLE: Tag = Tag(*b"SATT");
const TAG_UNIFORM_ENTRY: Tag = Tag(*b"VUNI");
const TAG_VARYING_ENTRY: Tag = Tag(*b"VVAR");
const TAG_ATTRIBUTE_ENTRY: Tag = Tag(*b"VATT");
const TAG_STRING: Tag = Tag(*b"STRI");
const TAG_INITIALIZER: Tag = Tag(*b"VINI");

// Extension chunks carrying data this driver has no use for. `VIDX` is a
// fixed 8 bytes, the other three are a fixed 12.
const TAG_EXT_VIDX: Tag = Tag(*b"VIDX");
const TAG_EXT_ITDR: Tag = Tag(*b"ITDR");
const TAG_EXT_IYUV: Tag = Tag(*b"IYUV");
const TAG_EXT_IGRD: Tag = Tag(*b"IGRD");

const DESCRIPTOR_LEN: usize = 20;

/// A varying the compiler allocated no memory for (referenced in the source
/// but optimized out). Such entries are dropped during parsing.
const VARYING_OFFSET_UNUSED: u16 = 0xFFFF;

/// Which table a symbol belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Uniform,
    Attribute,
    Varying,
}

impl SymbolKind {
    fn table_tag(self) -> Tag {
        match self {
            SymbolKind::Uniform => TAG_UNIFORM_TABLE,
            SymbolKind::Attribute => TAG_ATTRIBUTE_TABLE,
            SymbolKind::Varying => TAG_VARYING_TABLE,
        }
    }

    fn entry_tag(self) -> Tag {
        match self {
            SymbolKind::Uniform => TAG_UNIFORM_ENTRY,
            SymbolKind::Attribute => TAG_ATTRIBUTE_ENTRY,
            SymbolKind::Varying => TAG_VARYING_ENTRY,
        }
    }
}

/// The value class stored in the descriptor's type byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    Float,
    Matrix,
    Sampler,
    SamplerCube,
}

impl ValueType {
    fn from_wire(raw: u8) -> Result<Self, MbsError> {
        match raw {
            1 => Ok(ValueType::Float),
            4 => Ok(ValueType::Matrix),
            5 => Ok(ValueType::Sampler),
            6 => Ok(ValueType::SamplerCube),
            other => Err(MbsError::UnknownValueType(other)),
        }
    }
}

/// Backing for a symbol's value.
#[derive(Clone, Debug, PartialEq)]
pub enum SymbolValue {
    /// No value bound yet.
    None,
    /// Bytes owned by the symbol, already in wire layout (initializers,
    /// staged uniform data).
    Data(Vec<u8>),
    /// Reference to externally-owned storage (an attribute buffer or
    /// texture slot registered with the driver).
    Handle(u32),
}

/// One named shader uniform, attribute or varying.
#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub value_type: ValueType,
    /// Byte-size exponent; `component_size == 1 << (precision - 1)`.
    pub precision: u8,
    /// Components per entry. Matrices arrive as the column count and are
    /// squared during parsing, so a mat4 reads back as 16.
    pub component_count: u16,
    /// Array length; at least 1.
    pub entry_count: u16,
    pub src_stride: u16,
    pub dst_stride: u8,
    /// Descriptor flag word, carried verbatim.
    pub flags: u32,
    /// Position within the owning table, in components.
    pub offset: u16,
    pub index: u16,
    pub value: SymbolValue,
}

impl Symbol {
    /// Bytes per component, derived from `precision`.
    pub fn component_size(&self) -> u32 {
        1 << (self.precision - 1)
    }

    /// Total byte size. Always derived, never stored: it follows
    /// `component_size`, `component_count` and `entry_count` wherever they
    /// go.
    pub fn size(&self) -> u32 {
        self.component_size() * u32::from(self.component_count) * u32::from(self.entry_count)
    }

    /// Stage `values` into wire layout: f32 is narrowed to f16 for
    /// half-precision symbols, and matrix columns are re-strided from
    /// `src_stride` to `dst_stride`.
    pub fn store_f32(&mut self, values: &[f32]) -> Result<(), MbsError> {
        let expected = u32::from(self.component_count) * u32::from(self.entry_count);
        if values.len() != expected as usize {
            return Err(MbsError::Corrupt(format!(
                "symbol {}: {} values supplied, wire layout holds {}",
                self.name,
                values.len(),
                expected
            )));
        }

        let mut out = vec![0u8; self.size() as usize];
        if self.value_type == ValueType::Matrix {
            // component_count was squared at parse time.
            let dim = (u32::from(self.component_count) as f64).sqrt() as usize;
            let dst_stride = if self.dst_stride != 0 {
                usize::from(self.dst_stride)
            } else {
                dim * self.component_size() as usize
            };
            for entry in 0..usize::from(self.entry_count) {
                for col in 0..dim {
                    let src = &values[(entry * dim + col) * dim..][..dim];
                    let dst_off = (entry * dim + col) * dst_stride;
                    self.store_components(&mut out[dst_off..], src);
                }
            }
        } else {
            self.store_components(&mut out, values);
        }
        self.value = SymbolValue::Data(out);
        Ok(())
    }

    fn store_components(&self, dst: &mut [u8], src: &[f32]) {
        match self.component_size() {
            2 => {
                for (i, v) in src.iter().enumerate() {
                    dst[i * 2..i * 2 + 2].copy_from_slice(&f16::from_f32(*v).to_le_bytes());
                }
            }
            _ => {
                for (i, v) in src.iter().enumerate() {
                    dst[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
                }
            }
        }
    }
}

/// An ordered symbol table plus the staging-space requirement the compiler
/// declared for it.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    pub symbols: Vec<Symbol>,
    /// Total byte size the table's values need when gathered for the
    /// hardware, straight from the table-start chunk.
    pub space_needed: u32,
}

impl SymbolTable {
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.symbols.iter_mut().find(|s| s.name == name)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    /// Offset of `bytes[0]` in the outermost stream, for error reporting.
    base: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            base: 0,
        }
    }

    fn at(&self) -> usize {
        self.base + self.pos
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MbsError> {
        if self.remaining() < n {
            return Err(MbsError::Truncated {
                at: self.at(),
                need: n,
                have: self.remaining(),
            });
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn sub(&mut self, n: usize) -> Result<Reader<'a>, MbsError> {
        let base = self.at();
        let bytes = self.take(n)?;
        Ok(Reader {
            bytes,
            pos: 0,
            base,
        })
    }

    fn u8(&mut self) -> Result<u8, MbsError> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> Result<u16, MbsError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_le(&mut self) -> Result<u32, MbsError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn tag(&mut self) -> Result<Tag, MbsError> {
        let b = self.take(4)?;
        Ok(Tag([b[0], b[1], b[2], b[3]]))
    }

    fn peek_tag(&self) -> Option<Tag> {
        let b = self.bytes.get(self.pos..self.pos + 4)?;
        Some(Tag([b[0], b[1], b[2], b[3]]))
    }

    fn expect_tag(&mut self, expected: Tag) -> Result<(), MbsError> {
        let at = self.at();
        let found = self.tag()?;
        if found != expected {
            return Err(MbsError::UnexpectedTag {
                at,
                expected,
                found,
            });
        }
        Ok(())
    }
}

/// Parse one symbol stream of the given kind.
///
/// On any error the whole table is discarded; no partially-parsed entries
/// are adopted. Varyings without an assigned offset (`0xFFFF`) are dropped
/// and do not count toward the returned table's length.
pub fn parse_symbol_stream(bytes: &[u8], kind: SymbolKind) -> Result<SymbolTable, MbsError> {
    let mut r = Reader::new(bytes);
    r.expect_tag(kind.table_tag())?;
    let body_len = r.u32_le()? as usize;
    let mut body = r.sub(body_len)?;

    let declared_count = body.u32_le()?;
    let space_needed = body.u32_le()?;

    let mut symbols = Vec::with_capacity(declared_count as usize);
    for _ in 0..declared_count {
        let symbol = parse_symbol(&mut body, kind)?;
        if kind == SymbolKind::Varying && symbol.offset == VARYING_OFFSET_UNUSED {
            continue;
        }
        symbols.push(symbol);
    }

    if body.remaining() != 0 {
        return Err(MbsError::Corrupt(format!(
            "{} trailing bytes after the last symbol",
            body.remaining()
        )));
    }

    Ok(SymbolTable {
        symbols,
        space_needed,
    })
}

fn parse_symbol(r: &mut Reader<'_>, kind: SymbolKind) -> Result<Symbol, MbsError> {
    r.expect_tag(kind.entry_tag())?;
    let entry_len = r.u32_le()? as usize;
    let mut entry = r.sub(entry_len)?;

    // Name.
    entry.expect_tag(TAG_STRING)?;
    let name_len = entry.u32_le()? as usize;
    let name_bytes = entry.take(name_len)?;
    let nul = name_bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| MbsError::Corrupt("symbol name missing NUL terminator".into()))?;
    let name = core::str::from_utf8(&name_bytes[..nul])
        .map_err(|_| MbsError::BadName)?
        .to_owned();

    // Fixed descriptor record.
    let mut d = entry.sub(DESCRIPTOR_LEN)?;
    let value_type = ValueType::from_wire(d.u8()?)?;
    let _reserved = d.u8()?;
    let mut component_count = d.u16_le()?;
    let _wire_component_size = d.u16_le()?;
    let mut entry_count = d.u16_le()?;
    let src_stride = d.u16_le()?;
    let dst_stride = d.u8()?;
    let precision = d.u8()?;
    let flags = d.u32_le()?;
    let offset = d.u16_le()?;
    let index = d.u16_le()?;

    if precision == 0 || precision > 4 {
        return Err(MbsError::BadPrecision(precision));
    }
    if entry_count == 0 {
        entry_count = 1;
    }
    if value_type == ValueType::Matrix {
        component_count = component_count
            .checked_mul(component_count)
            .ok_or_else(|| MbsError::Corrupt("matrix dimension overflow".into()))?;
    }

    let mut value = SymbolValue::None;

    // Extension and initializer chunks, in any order, until the entry is
    // exhausted.
    while entry.remaining() > 0 {
        let at = entry.at();
        let tag = entry.tag()?;
        match tag {
            TAG_EXT_VIDX => {
                entry.take(4)?;
            }
            TAG_EXT_ITDR | TAG_EXT_IYUV | TAG_EXT_IGRD => {
                entry.take(8)?;
            }
            TAG_INITIALIZER if kind == SymbolKind::Uniform => {
                let init_len = entry.u32_le()? as usize;
                let mut init = entry.sub(init_len)?;
                let count = init.u32_le()? as usize;
                let data = init.take(count * 4)?;
                value = SymbolValue::Data(data.to_vec());
            }
            found => {
                return Err(MbsError::UnexpectedTag {
                    at,
                    expected: TAG_INITIALIZER,
                    found,
                })
            }
        }
    }

    Ok(Symbol {
        name,
        kind,
        value_type,
        precision,
        component_count,
        entry_count,
        src_stride,
        dst_stride,
        flags,
        offset,
        index,
        value,
    })
}
