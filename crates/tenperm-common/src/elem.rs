/// Width of one tensor element.
///
/// The planner moves opaque elements; only the two supported widths
/// matter for addressing and shared-memory sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ElemSize {
    /// 4-byte elements.
    Bytes4,
    /// 8-byte elements.
    Bytes8,
}

impl ElemSize {
    /// Width in bytes.
    pub const fn bytes(&self) -> usize {
        match self {
            ElemSize::Bytes4 => 4,
            ElemSize::Bytes8 => 8,
        }
    }

    /// Parse a width in bytes; only 4 and 8 are supported.
    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            4 => Some(ElemSize::Bytes4),
            8 => Some(ElemSize::Bytes8),
            _ => None,
        }
    }
}

impl core::fmt::Display for ElemSize {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}B", self.bytes())
    }
}
