//! List query types: sort specification, keyset cursor, pagination.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use relais_error::{ListError, Result};

/// Sort direction of a list query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub const fn is_desc(self) -> bool {
        matches!(self, Self::Desc)
    }

    pub const fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Sort column (by descriptor index) plus direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortSpec {
    pub field: usize,
    pub direction: SortDirection,
}

impl SortSpec {
    pub const fn asc(field: usize) -> Self {
        Self { field, direction: SortDirection::Asc }
    }

    pub const fn desc(field: usize) -> Self {
        Self { field, direction: SortDirection::Desc }
    }
}

/// Opaque keyset-pagination cursor: the last item's sort value and
/// primary key. `WHERE (sort_col, pk) > (cursor_sort, cursor_pk)`
/// (direction-dependent) resumes after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cursor {
    pub sort_value: i64,
    pub primary_key: i64,
}

impl Cursor {
    /// Wire encoding: 16 little-endian bytes, URL-safe base64.
    pub fn encode(&self) -> String {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&self.sort_value.to_le_bytes());
        buf[8..].copy_from_slice(&self.primary_key.to_le_bytes());
        URL_SAFE_NO_PAD.encode(buf)
    }

    /// # Errors
    ///
    /// Returns `ListError::InvalidCursor` on malformed input.
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| ListError::InvalidCursor)?;
        if bytes.len() != 16 {
            return Err(ListError::InvalidCursor.into());
        }
        let mut sort = [0u8; 8];
        let mut pk = [0u8; 8];
        sort.copy_from_slice(&bytes[..8]);
        pk.copy_from_slice(&bytes[8..]);
        Ok(Self {
            sort_value: i64::from_le_bytes(sort),
            primary_key: i64::from_le_bytes(pk),
        })
    }
}

/// Offset or cursor pagination. A cursor, when present, wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pagination {
    Offset(u32),
    Cursor(Cursor),
}

impl Pagination {
    pub const fn is_first_page(&self) -> bool {
        matches!(self, Self::Offset(0))
    }

    pub const fn is_cursor(&self) -> bool {
        matches!(self, Self::Cursor(_))
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::Offset(0)
    }
}

/// A fully resolved list query. `group_key` identifies the filter set;
/// `cache_key` additionally pins sort + pagination + limit. Both are
/// derived deterministically by the descriptor helpers.
#[derive(Debug, Clone)]
pub struct ListQuery<F> {
    pub filters: F,
    pub sort: SortSpec,
    pub limit: u16,
    pub pagination: Pagination,
    pub group_key: String,
    pub cache_key: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn cursor_roundtrip() {
        let c = Cursor { sort_value: -55, primary_key: 123_456 };
        let decoded = Cursor::decode(&c.encode()).unwrap();
        assert_eq!(decoded, c);
    }

    #[test]
    fn cursor_rejects_garbage() {
        assert!(Cursor::decode("!!!").is_err());
        assert!(Cursor::decode("AAAA").is_err());
        assert!(Cursor::decode("").is_err());
    }

    #[test]
    fn pagination_first_page() {
        assert!(Pagination::Offset(0).is_first_page());
        assert!(!Pagination::Offset(10).is_first_page());
        assert!(!Pagination::Cursor(Cursor { sort_value: 0, primary_key: 0 }).is_first_page());
    }
}
