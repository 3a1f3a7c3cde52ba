//! Opaque forward-only pagination cursor.
//!
//! A cursor encodes nothing but a row offset. It is not a consistency token:
//! rows inserted between page fetches shift later pages.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::errors::{Result, StoreError};

const PREFIX: &str = "offset:";

/// Resume position for a paginated search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    offset: u64,
}

impl Cursor {
    /// Cursor pointing at `offset`.
    #[must_use]
    pub fn at(offset: u64) -> Self {
        Self { offset }
    }

    /// Row offset this cursor resumes from.
    #[must_use]
    pub fn offset(self) -> u64 {
        self.offset
    }

    /// Encode to the opaque wire form.
    #[must_use]
    pub fn encode(self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{PREFIX}{}", self.offset))
    }

    /// Decode an opaque token. Any failure is [`StoreError::MalformedCursor`].
    pub fn decode(token: &str) -> Result<Self> {
        let malformed = || StoreError::MalformedCursor(token.to_owned());
        let bytes = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|_| malformed())?;
        let text = String::from_utf8(bytes).map_err(|_| malformed())?;
        let digits = text.strip_prefix(PREFIX).ok_or_else(malformed)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let offset = digits.parse::<u64>().map_err(|_| malformed())?;
        Ok(Self { offset })
    }

    /// Decode an optional token; absent or empty means "first page".
    pub fn decode_opt(token: Option<&str>) -> Result<Self> {
        match token {
            Some(t) if !t.trim().is_empty() => Self::decode(t),
            _ => Ok(Self::default()),
        }
    }
}
