use core::fmt;

use thiserror::Error;

/// A four-byte chunk tag, printed as ASCII where possible.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag(pub [u8; 4]);

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(|b| b.is_ascii_graphic()) {
            write!(
                f,
                "\"{}{}{}{}\"",
                self.0[0] as char, self.0[1] as char, self.0[2] as char, self.0[3] as char
            )
        } else {
            write!(
                f,
                "{:02x}{:02x}{:02x}{:02x}",
                self.0[0], self.0[1], self.0[2], self.0[3]
            )
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors produced while parsing compiler output.
///
/// Any of these is fatal to the shader being parsed but leaves no partial
/// state behind; other shaders and the rest of the driver are unaffected.
#[derive(Debug, Error)]
pub enum MbsError {
    #[error("truncated stream: need {need} bytes at offset {at}, have {have}")]
    Truncated { at: usize, need: usize, have: usize },

    #[error("unexpected tag {found} at offset {at}, expected {expected}")]
    UnexpectedTag {
        at: usize,
        expected: Tag,
        found: Tag,
    },

    #[error("bad container magic {0}")]
    BadMagic(Tag),

    #[error("corrupt symbol stream: {0}")]
    Corrupt(String),

    #[error("unknown symbol value type {0:#x}")]
    UnknownValueType(u8),

    #[error("unsupported symbol precision {0}")]
    BadPrecision(u8),

    #[error("symbol name is not valid UTF-8")]
    BadName,
}
