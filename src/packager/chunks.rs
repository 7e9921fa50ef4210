use std::collections::BTreeMap;

use super::PackError;

/// Maximum characters of token per chunk
pub const CHUNK_SIZE: usize = 2000;

const MARKER_PREFIX: &str = "\n\n======== PART ";
const MARKER_SUFFIX: &str = " ========";

/// Split `token` into slices of at most `chunk_size` characters.
/// An empty token yields no chunks.
pub fn split(token: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = token.chars().collect();
    chars
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// The human-readable part marker, e.g. `\n\n======== PART 1 OF 3 ========`
pub fn marker(index: usize, total: usize) -> String {
    format!("{}{} OF {}{}", MARKER_PREFIX, index, total, MARKER_SUFFIX)
}

/// Split and append the 1-based part marker to every chunk.
pub fn split_marked(token: &str, chunk_size: usize) -> Vec<String> {
    let pieces = split(token, chunk_size);
    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| piece + &marker(i + 1, total))
        .collect()
}

/// A marked chunk taken apart again
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part<'a> {
    pub index: usize,
    pub total: usize,
    pub payload: &'a str,
}

/// Strip the trailing marker from a chunk.
pub fn parse_part(chunk: &str) -> Result<Part<'_>, PackError> {
    let chunk = chunk.trim_end_matches(['\n', '\r', ' ']);
    let (payload, tail) = chunk
        .rsplit_once(MARKER_PREFIX)
        .ok_or(PackError::MalformedMarker)?;
    let numbers = tail
        .strip_suffix(MARKER_SUFFIX)
        .ok_or(PackError::MalformedMarker)?;
    let (index, total) = numbers
        .split_once(" OF ")
        .ok_or(PackError::MalformedMarker)?;
    let index: usize = index.trim().parse().map_err(|_| PackError::MalformedMarker)?;
    let total: usize = total.trim().parse().map_err(|_| PackError::MalformedMarker)?;
    if index == 0 || index > total {
        return Err(PackError::MalformedMarker);
    }
    Ok(Part {
        index,
        total,
        payload,
    })
}

/// Rebuild the token from marked chunks given in any order.
/// Memory use is bounded by the chunks supplied, not by the claimed total.
pub fn reassemble<S: AsRef<str>>(chunks: &[S]) -> Result<String, PackError> {
    let mut parts: BTreeMap<usize, &str> = BTreeMap::new();
    let mut expected_total = None;

    for chunk in chunks {
        let part = parse_part(chunk.as_ref())?;
        match expected_total {
            None => expected_total = Some(part.total),
            Some(total) if total != part.total => return Err(PackError::MalformedMarker),
            Some(_) => {}
        }
        if parts.insert(part.index, part.payload).is_some() {
            return Err(PackError::DuplicatePart(part.index));
        }
    }

    let total = expected_total.unwrap_or(0);
    if let Some(missing) = (1..=total).find(|index| !parts.contains_key(index)) {
        return Err(PackError::MissingPart(missing));
    }
    Ok(parts.into_values().collect())
}
