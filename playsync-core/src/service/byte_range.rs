//! `Range: bytes=...` parsing for the delivery gate

use crate::{Error, Result};

/// Inclusive byte range within a resource of known size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered; never zero
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for a 206 response
    #[must_use]
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{total}", self.start, self.end)
    }

    /// `Content-Range` value for a 416 response
    #[must_use]
    pub fn unsatisfiable_content_range(total: u64) -> String {
        format!("bytes */{total}")
    }

    /// Resolve a `Range` header against a resource of `total` bytes.
    ///
    /// `Ok(None)` means serve the whole resource. Only the first range of a
    /// multi-range request is honored. An end past EOF is clamped; anything
    /// else that cannot be served yields `RangeNotSatisfiable`.
    pub fn parse(header: Option<&str>, total: u64) -> Result<Option<Self>> {
        let Some(header) = header else {
            return Ok(None);
        };
        let unsatisfiable = || Error::RangeNotSatisfiable { total };

        let header = header.trim();
        let ranges = header
            .get(..6)
            .filter(|unit| unit.eq_ignore_ascii_case("bytes="))
            .map(|_| &header[6..])
            .ok_or_else(unsatisfiable)?;
        let first = ranges.split(',').next().unwrap_or_default().trim();
        let (start, end) = first.split_once('-').ok_or_else(unsatisfiable)?;
        let (start, end) = (start.trim(), end.trim());

        if total == 0 {
            return Err(unsatisfiable());
        }
        let last = total - 1;

        let range = if start.is_empty() {
            let suffix: u64 = end.parse().map_err(|_| unsatisfiable())?;
            if suffix == 0 {
                return Err(unsatisfiable());
            }
            Self {
                start: total.saturating_sub(suffix),
                end: last,
            }
        } else {
            let start: u64 = start.parse().map_err(|_| unsatisfiable())?;
            let end = if end.is_empty() {
                last
            } else {
                let end: u64 = end.parse().map_err(|_| unsatisfiable())?;
                if start > end {
                    return Err(unsatisfiable());
                }
                end.min(last)
            };
            if start >= total {
                return Err(unsatisfiable());
            }
            Self { start, end }
        };

        Ok(Some(range))
    }
}
