//! Opaque cursor pagination for list methods.
//!
//! A cursor is the base64 encoding of a decimal offset into the filtered list.
//! Clients must treat it as opaque. Each offset has exactly one cursor: a
//! cursor decodes only if re-encoding its offset reproduces it.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use crate::error::McpError;

/// Page size used when the server options do not configure one.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Encodes an offset as a cursor.
#[must_use]
pub fn encode_cursor(offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(offset.to_string())
}

/// Decodes a cursor back into an offset.
///
/// # Errors
///
/// Returns [`McpError::InvalidCursor`] if the cursor is not one this engine produced.
pub fn decode_cursor(cursor: &str) -> Result<usize, McpError> {
    let invalid = || McpError::InvalidCursor(cursor.to_string());

    let bytes = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| invalid())?;
    let text = std::str::from_utf8(&bytes).map_err(|_| invalid())?;
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let offset = text.parse().map_err(|_| invalid())?;
    if encode_cursor(offset) != cursor {
        return Err(invalid());
    }
    Ok(offset)
}

/// One page of a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Cursor for the next page, present iff more items remain.
    pub next_cursor: Option<String>,
}

/// Slices `items` into the page starting at `cursor`.
///
/// # Errors
///
/// Returns [`McpError::InvalidCursor`] if the cursor is malformed or points
/// past the end of the list.
pub fn paginate<T>(items: Vec<T>, cursor: Option<&str>, page_size: usize) -> Result<Page<T>, McpError> {
    let offset = cursor.map(decode_cursor).transpose()?.unwrap_or(0);
    if offset > items.len() {
        return Err(McpError::InvalidCursor(cursor.unwrap_or_default().to_string()));
    }

    let end = offset.saturating_add(page_size).min(items.len());
    let next_cursor = (end < items.len()).then(|| encode_cursor(end));
    let items = items.into_iter().skip(offset).take(end - offset).collect();

    Ok(Page { items, next_cursor })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trip() {
        for n in [0, 1, 2, 49, 50, 51, 1_000, 123_456_789, usize::MAX] {
            assert_eq!(decode_cursor(&encode_cursor(n)).unwrap(), n);
        }
    }

    #[test]
    fn malformed_cursors_are_rejected() {
        for bad in ["", "!!!", "not base64 at all", &URL_SAFE_NO_PAD.encode("-1"), &URL_SAFE_NO_PAD.encode("12a")] {
            assert!(
                matches!(decode_cursor(bad), Err(McpError::InvalidCursor(_))),
                "cursor {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn non_canonical_cursors_are_rejected() {
        for text in ["007", "00", "+5"] {
            let cursor = URL_SAFE_NO_PAD.encode(text);
            assert!(
                matches!(decode_cursor(&cursor), Err(McpError::InvalidCursor(_))),
                "cursor for {text:?} should be rejected"
            );
        }
        assert!(decode_cursor(&format!("{}=", encode_cursor(7))).is_err());
        assert_eq!(decode_cursor(&URL_SAFE_NO_PAD.encode("7")).unwrap(), 7);
    }

    #[test]
    fn overflowing_offset_is_rejected() {
        let cursor = URL_SAFE_NO_PAD.encode("99999999999999999999999999");
        assert!(decode_cursor(&cursor).is_err());
    }

    #[test]
    fn pages_through_a_list() {
        let items = vec!["a", "b", "c"];
        let first = paginate(items.clone(), None, 2).unwrap();
        assert_eq!(first.items, vec!["a", "b"]);
        let cursor = first.next_cursor.unwrap();

        let second = paginate(items, Some(&cursor), 2).unwrap();
        assert_eq!(second.items, vec!["c"]);
        assert!(second.next_cursor.is_none());
    }

    #[test]
    fn exact_fit_has_no_next_cursor() {
        let page = paginate(vec![1, 2], None, 2).unwrap();
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn cursor_past_the_end_is_rejected() {
        let err = paginate(vec![1], Some(&encode_cursor(5)), 10).unwrap_err();
        assert!(matches!(err, McpError::InvalidCursor(_)));
    }
}
