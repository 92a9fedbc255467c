use base64::{Engine as _, engine::general_purpose};

use crate::error::{AppError, Result};

/// Default page size when a caller does not ask for one.
pub const DEFAULT_LIMIT: usize = 20;
/// Upper bound on a single page.
pub const MAX_LIMIT: usize = 100;

/// A position in a keyed listing.
///
/// Cursors carry the key of the boundary item, never an offset, so pages stay
/// stable while records are inserted and revoked between requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// Items strictly after this key.
    After(String),
    /// Items strictly before this key.
    Before(String),
}

impl Cursor {
    /// Opaque, URL-safe form handed to clients.
    pub fn encode(&self) -> String {
        let raw = match self {
            Cursor::After(key) => format!("a:{key}"),
            Cursor::Before(key) => format!("b:{key}"),
        };
        general_purpose::URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let invalid = || AppError::validation("cursor", "Invalid paging cursor");

        let bytes = general_purpose::URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| invalid())?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid())?;

        match raw.split_once(':') {
            Some(("a", key)) if !key.is_empty() => Ok(Cursor::After(key.to_string())),
            Some(("b", key)) if !key.is_empty() => Ok(Cursor::Before(key.to_string())),
            _ => Err(invalid()),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Cursor::After(key) | Cursor::Before(key) => key,
        }
    }
}

/// What page of a listing to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: Option<Cursor>,
    pub limit: usize,
}

impl PageRequest {
    /// Builds a request from the raw (client supplied) cursor and limit.
    pub fn from_raw(cursor: Option<&str>, limit: Option<usize>) -> Result<Self> {
        let cursor = match cursor.map(str::trim).filter(|c| !c.is_empty()) {
            Some(encoded) => Some(Cursor::decode(encoded)?),
            None => None,
        };

        Ok(Self {
            cursor,
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        })
    }

    pub fn first(limit: usize) -> Self {
        Self {
            cursor: None,
            limit: limit.clamp(1, MAX_LIMIT),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(DEFAULT_LIMIT)
    }
}

/// Raw result of a keyed store listing, in ascending key order.
///
/// `has_more` reports whether further items exist in the direction the
/// cursor was walking.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

/// A page of items with opaque cursors to its neighbours.
#[derive(Debug, Clone, PartialEq)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub current: Option<String>,
    /// Display only.
    pub total: Option<u64>,
    pub limit: usize,
}

impl<T> Paginated<T> {
    /// Derives neighbour cursors for `slice`, fetched with `request`.
    pub fn from_slice<F>(request: &PageRequest, slice: Slice<T>, total: Option<u64>, key: F) -> Self
    where
        F: Fn(&T) -> String,
    {
        let Slice { items, has_more } = slice;
        let first = items.first().map(&key);
        let last = items.last().map(&key);

        let (next, previous) = match &request.cursor {
            None => (if has_more { last.map(Cursor::After) } else { None }, None),
            Some(Cursor::After(_)) => (
                if has_more { last.map(Cursor::After) } else { None },
                first.map(Cursor::Before),
            ),
            Some(Cursor::Before(_)) => (
                last.map(Cursor::After),
                if has_more { first.map(Cursor::Before) } else { None },
            ),
        };

        Self {
            items,
            next: next.map(|c| c.encode()),
            previous: previous.map(|c| c.encode()),
            current: request.cursor.as_ref().map(Cursor::encode),
            total,
            limit: request.limit,
        }
    }
}

/// Applies a cursor to an ascending, already-sorted sequence of keyed items.
///
/// In-memory stores use this; the Redis and Postgres stores do the same walk
/// server side.
pub fn slice_sorted<T: Clone, F>(sorted: &[T], request: &PageRequest, key: F) -> Slice<T>
where
    F: Fn(&T) -> String,
{
    match &request.cursor {
        None => {
            let items: Vec<T> = sorted.iter().take(request.limit).cloned().collect();
            Slice {
                has_more: sorted.len() > items.len(),
                items,
            }
        }
        Some(Cursor::After(boundary)) => {
            let rest: Vec<&T> = sorted.iter().filter(|t| key(t).as_str() > boundary.as_str()).collect();
            Slice {
                has_more: rest.len() > request.limit,
                items: rest.into_iter().take(request.limit).cloned().collect(),
            }
        }
        Some(Cursor::Before(boundary)) => {
            let rest: Vec<&T> = sorted.iter().filter(|t| key(t).as_str() < boundary.as_str()).collect();
            let skip = rest.len().saturating_sub(request.limit);
            Slice {
                has_more: skip > 0,
                items: rest.into_iter().skip(skip).cloned().collect(),
            }
        }
    }
}
