//! Builders for synthetic compiler output, shared by the integration
//! tests. The layouts mirror what the binary compiler emits; see the
//! `mali-mbs` parsers for the format.

pub fn chunk(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(tag);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

pub struct SymbolSpec {
    pub name: &'static str,
    pub value_type: u8,
    pub components: u16,
    pub entries: u16,
    pub precision: u8,
    pub offset: u16,
}

impl SymbolSpec {
    pub fn vec4(name: &'static str, offset: u16) -> Self {
        Self {
            name,
            value_type: 1,
            components: 4,
            entries: 1,
            precision: 3,
            offset,
        }
    }

    pub fn sampler(name: &'static str) -> Self {
        Self {
            name,
            value_type: 5,
            components: 1,
            entries: 1,
            precision: 3,
            offset: 0,
        }
    }
}

pub fn symbol_entry(entry_tag: &[u8; 4], spec: &SymbolSpec) -> Vec<u8> {
    let mut name_payload = spec.name.as_bytes().to_vec();
    name_payload.push(0);
    let mut payload = chunk(b"STRI", &name_payload);
    payload.push(spec.value_type);
    payload.push(0);
    payload.extend_from_slice(&spec.components.to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes()); // wire component size
    payload.extend_from_slice(&spec.entries.to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes()); // src stride
    payload.push(0); // dst stride
    payload.push(spec.precision);
    payload.extend_from_slice(&0u32.to_le_bytes()); // flags
    payload.extend_from_slice(&spec.offset.to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes()); // index
    chunk(entry_tag, &payload)
}

pub fn symbol_table(table_tag: &[u8; 4], entry_tag: &[u8; 4], specs: &[SymbolSpec]) -> Vec<u8> {
    let space: u32 = specs
        .iter()
        .map(|s| {
            let component_size = 1u32 << (s.precision - 1);
            component_size * u32::from(s.components) * u32::from(s.entries)
        })
        .sum();
    let mut payload = Vec::new();
    payload.extend_from_slice(&(specs.len() as u32).to_le_bytes());
    payload.extend_from_slice(&space.to_le_bytes());
    for spec in specs {
        payload.extend_from_slice(&symbol_entry(entry_tag, spec));
    }
    chunk(table_tag, &payload)
}

/// A 16-byte vertex instruction; `store` is the varying index written by
/// the instruction's store operand, if any.
pub fn vs_instruction(store: Option<u32>) -> [u8; 16] {
    let index = store.unwrap_or(0x1F);
    let mut out = [0u8; 16];
    let w2 = (index << 26) | (1 << 31); // operand B low bit...
    let w3: u32 = 0x1E; // ...plus high bits: B stays 0x1F (unused)
    out[8..12].copy_from_slice(&w2.to_le_bytes());
    out[12..16].copy_from_slice(&w3.to_le_bytes());
    out
}

pub fn vertex_mbs(
    attributes: &[SymbolSpec],
    varyings: &[SymbolSpec],
    code: &[u8],
) -> Vec<u8> {
    let mut stage = Vec::new();
    let mut params = Vec::new();
    for word in [attributes.len() as u32, varyings.len() as u32, 0, 1] {
        params.extend_from_slice(&word.to_le_bytes());
    }
    stage.extend_from_slice(&chunk(b"VSTA", &params));
    stage.extend_from_slice(&symbol_table(b"SATT", b"VATT", attributes));
    stage.extend_from_slice(&symbol_table(b"SVAR", b"VVAR", varyings));
    stage.extend_from_slice(&chunk(b"DBIN", code));
    chunk(b"MBS1", &chunk(b"CVER", &stage))
}

pub fn fragment_mbs(uniforms: &[SymbolSpec], varyings: &[SymbolSpec], code: &[u8]) -> Vec<u8> {
    let mut stage = Vec::new();
    let mut params = vec![0u8; 44];
    params[0] = 4; // first_instruction_size
    stage.extend_from_slice(&chunk(b"FSTA", &params));
    stage.extend_from_slice(&symbol_table(b"SUNI", b"VUNI", uniforms));
    stage.extend_from_slice(&symbol_table(b"SVAR", b"VVAR", varyings));
    stage.extend_from_slice(&chunk(b"DBIN", code));
    chunk(b"MBS1", &chunk(b"CFRA", &stage))
}
