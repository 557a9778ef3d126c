//! AVIF container header reader.
//!
//! AVIF is an ISO-BMFF file: a tree of length-prefixed boxes. Everything
//! metadata needs is in the `meta` box, so the AV1 payload is never touched:
//!
//! ```text
//! ftyp
//! meta (full box)
//! ├── pitm   primary item id
//! └── iprp
//!     ├── ipco   property list: ispe (size), pixi (channels), colr, auxC
//!     └── ipma   item id -> property indices (1-based)
//! mdat
//! ```

use crate::error::TransformError;

/// Auxiliary image types that carry an alpha plane.
const ALPHA_URNS: &[&[u8]] = &[
    b"urn:mpeg:mpegB:cicp:systems:auxiliary:alpha",
    b"urn:mpeg:hevc:2015:auxid:1",
];

/// Facts read from the container of an AVIF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvifHeader {
    pub width: u32,
    pub height: u32,
    /// Color planes of the primary image (1 for monochrome, 3 otherwise).
    pub color_channels: u8,
    pub has_alpha: bool,
    pub has_profile: bool,
}

impl AvifHeader {
    pub fn channels(&self) -> u8 {
        self.color_channels + u8::from(self.has_alpha)
    }
}

// =============================================================================
// Box walking
// =============================================================================

struct BmffBox<'a> {
    kind: [u8; 4],
    body: &'a [u8],
}

/// Iterator over the boxes directly inside `data`.
struct Boxes<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Boxes<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for Boxes<'a> {
    type Item = Result<BmffBox<'a>, TransformError>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.data.get(self.pos..)?;
        if rest.is_empty() {
            return None;
        }
        Some(self.read_box(rest))
    }
}

impl<'a> Boxes<'a> {
    fn read_box(&mut self, rest: &'a [u8]) -> Result<BmffBox<'a>, TransformError> {
        let size32 = be_u32(rest, 0)?;
        let kind: [u8; 4] = slice(rest, 4, 4)?
            .try_into()
            .map_err(|_| malformed("short box type"))?;

        let (header_len, size) = match size32 {
            // Box runs to the end of its parent
            0 => (8, rest.len() as u64),
            1 => (16, be_u64(rest, 8)?),
            n => (8, u64::from(n)),
        };
        let size = usize::try_from(size).map_err(|_| malformed("box too large"))?;
        if size < header_len || size > rest.len() {
            self.pos = self.data.len();
            return Err(malformed(&format!(
                "box {} has invalid size {}",
                String::from_utf8_lossy(&kind),
                size
            )));
        }

        self.pos += size;
        Ok(BmffBox {
            kind,
            body: &rest[header_len..size],
        })
    }
}

fn find<'a>(data: &'a [u8], kind: &[u8; 4]) -> Result<Option<&'a [u8]>, TransformError> {
    for item in Boxes::new(data) {
        let b = item?;
        if &b.kind == kind {
            return Ok(Some(b.body));
        }
    }
    Ok(None)
}

// =============================================================================
// Parsing
// =============================================================================

/// Read the primary image's header facts.
pub fn read_header(data: &[u8]) -> Result<AvifHeader, TransformError> {
    let meta = find(data, b"meta")?.ok_or_else(|| malformed("missing meta box"))?;
    // meta is a full box: version and flags precede the children
    let meta = slice(meta, 4, meta.len().saturating_sub(4))?;

    let primary = find(meta, b"pitm")?.map(read_item_id).transpose()?;
    let iprp = find(meta, b"iprp")?.ok_or_else(|| malformed("missing iprp box"))?;
    let ipco = find(iprp, b"ipco")?.ok_or_else(|| malformed("missing ipco box"))?;

    let properties: Vec<BmffBox<'_>> = Boxes::new(ipco).collect::<Result<_, _>>()?;
    let associated = match (primary, find(iprp, b"ipma")?) {
        (Some(id), Some(ipma)) => associations(ipma, id)?,
        _ => Vec::new(),
    };

    // Primary item's properties, or every property when there is no mapping
    let primary_props: Vec<&BmffBox<'_>> = if associated.is_empty() {
        properties.iter().collect()
    } else {
        associated
            .iter()
            .filter_map(|&index| properties.get(index.checked_sub(1)?))
            .collect()
    };

    let (width, height) = primary_props
        .iter()
        .find(|p| &p.kind == b"ispe")
        .map(|p| Ok::<_, TransformError>((be_u32(p.body, 4)?, be_u32(p.body, 8)?)))
        .transpose()?
        .ok_or_else(|| malformed("missing ispe property"))?;
    if width == 0 || height == 0 {
        return Err(malformed("zero image extent"));
    }

    let color_channels = primary_props
        .iter()
        .find(|p| &p.kind == b"pixi")
        .and_then(|p| p.body.get(4).copied())
        .map(|n| if n == 1 { 1 } else { 3 })
        .unwrap_or(3);

    let has_profile = primary_props
        .iter()
        .filter(|p| &p.kind == b"colr")
        .any(|p| matches!(p.body.get(0..4), Some(b"rICC") | Some(b"prof")));

    let has_alpha = properties
        .iter()
        .filter(|p| &p.kind == b"auxC")
        .any(|p| {
            let urn = p.body.get(4..).unwrap_or_default();
            let urn = urn.split(|&b| b == 0).next().unwrap_or_default();
            ALPHA_URNS.iter().any(|known| *known == urn)
        });

    Ok(AvifHeader {
        width,
        height,
        color_channels,
        has_alpha,
        has_profile,
    })
}

/// `pitm`: version 0 stores a 16-bit id, later versions 32-bit.
fn read_item_id(pitm: &[u8]) -> Result<u32, TransformError> {
    match pitm.first() {
        Some(0) => Ok(u32::from(be_u16(pitm, 4)?)),
        Some(_) => be_u32(pitm, 4),
        None => Err(malformed("empty pitm box")),
    }
}

/// Property indices (1-based) that `ipma` associates with `item`.
fn associations(ipma: &[u8], item: u32) -> Result<Vec<usize>, TransformError> {
    let version = *ipma.first().ok_or_else(|| malformed("empty ipma box"))?;
    let wide_index = slice(ipma, 3, 1)?[0] & 1 == 1;
    let entries = be_u32(ipma, 4)?;

    let mut pos = 8;
    for _ in 0..entries {
        let id = if version < 1 {
            let id = u32::from(be_u16(ipma, pos)?);
            pos += 2;
            id
        } else {
            let id = be_u32(ipma, pos)?;
            pos += 4;
            id
        };
        let count = usize::from(slice(ipma, pos, 1)?[0]);
        pos += 1;

        let mut indices = Vec::with_capacity(count);
        for _ in 0..count {
            // Top bit is the "essential" flag
            let index = if wide_index {
                let raw = be_u16(ipma, pos)?;
                pos += 2;
                usize::from(raw & 0x7FFF)
            } else {
                let raw = slice(ipma, pos, 1)?[0];
                pos += 1;
                usize::from(raw & 0x7F)
            };
            indices.push(index);
        }

        if id == item {
            return Ok(indices);
        }
    }
    Ok(Vec::new())
}

// =============================================================================
// Byte helpers
// =============================================================================

fn malformed(reason: &str) -> TransformError {
    TransformError::InvalidImageData {
        message: format!("avif: {}", reason),
    }
}

fn slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], TransformError> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| malformed("truncated header"))
}

fn be_u16(data: &[u8], offset: usize) -> Result<u16, TransformError> {
    let bytes = slice(data, offset, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn be_u32(data: &[u8], offset: usize) -> Result<u32, TransformError> {
    let bytes = slice(data, offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn be_u64(data: &[u8], offset: usize) -> Result<u64, TransformError> {
    let bytes = slice(data, offset, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(buf))
}

// =============================================================================
// Tests
// =============================================================================
