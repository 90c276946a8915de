//! Field Paths
//!
//! Component data is addressed by field paths such as `list[2].title` or
//! `user.profile.name`. Patches sent to a render backend are keyed by these
//! paths, and the render-diff engine reasons about how two paths relate
//! (equal, ancestor, descendant, unrelated).
//!
//! # Syntax
//!
//! - `.key` descends into an object member
//! - `[n]` descends into an array element
//! - the first segment is always an object key (`list`, not `[0]`)

use std::fmt;

use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::error::PathError;

/// A single step of a field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// An object member.
    Key(String),
    /// An array element.
    Index(usize),
}

/// A parsed field path.
///
/// Most paths in practice are one to three segments deep, so segments live
/// inline until the fourth.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    segments: SmallVec<[Segment; 4]>,
}

impl Path {
    /// Parse a path string like `a.b[0].c`.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }

        let mut segments = SmallVec::new();
        let mut chars = raw.char_indices().peekable();
        let mut key = String::new();
        // True right after a `]`, where a bare key is not allowed.
        let mut after_index = false;

        while let Some((pos, ch)) = chars.next() {
            match ch {
                '.' => {
                    if key.is_empty() && !after_index {
                        return Err(PathError::EmptySegment(pos));
                    }
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    }
                    after_index = false;
                    if chars.peek().is_none() {
                        return Err(PathError::EmptySegment(pos + 1));
                    }
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    } else if segments.is_empty() {
                        return Err(PathError::EmptySegment(pos));
                    }
                    let mut digits = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        digits.push(c);
                    }
                    if !closed {
                        return Err(PathError::Unterminated(pos));
                    }
                    let index = digits
                        .parse::<usize>()
                        .map_err(|_| PathError::InvalidIndex(digits.clone()))?;
                    segments.push(Segment::Index(index));
                    after_index = true;
                }
                _ => {
                    if after_index {
                        return Err(PathError::EmptySegment(pos));
                    }
                    key.push(ch);
                }
            }
        }

        if !key.is_empty() {
            segments.push(Segment::Key(key));
        }

        Ok(Self { segments })
    }

    /// A single-segment path naming a top-level key.
    pub fn key(key: impl Into<String>) -> Self {
        let mut segments = SmallVec::new();
        segments.push(Segment::Key(key.into()));
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The top-level key this path starts from.
    pub fn first_key(&self) -> Option<&str> {
        match self.segments.first() {
            Some(Segment::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// Normalized string forms of every prefix, shortest first, ending with
    /// the full path.
    pub fn prefixes(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.segments.len());
        let mut current = String::new();
        for segment in &self.segments {
            push_segment(&mut current, segment);
            out.push(current.clone());
        }
        out
    }
}

fn push_segment(buf: &mut String, segment: &Segment) {
    match segment {
        Segment::Key(key) => {
            if !buf.is_empty() {
                buf.push('.');
            }
            buf.push_str(key);
        }
        Segment::Index(index) => {
            buf.push('[');
            buf.push_str(&index.to_string());
            buf.push(']');
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = String::new();
        for segment in &self.segments {
            push_segment(&mut buf, segment);
        }
        f.write_str(&buf)
    }
}

/// The top-level key of a raw path string: everything before the first
/// `.` or `[`.
pub fn first_key(path: &str) -> &str {
    match path.find(['.', '[']) {
        Some(end) => &path[..end],
        None => path,
    }
}

/// If `a` is a strict descendant of `b`, return the remainder of `a`
/// relative to `b` (starting with `.` or `[`).
///
/// `sub_path_of("b.x", "b") == Some(".x")`, while `"bx"` is unrelated to
/// `"b"`.
pub fn sub_path_of<'a>(a: &'a str, b: &str) -> Option<&'a str> {
    if a.len() > b.len() && a.starts_with(b) {
        let rest = &a[b.len()..];
        if rest.starts_with('.') || rest.starts_with('[') {
            return Some(rest);
        }
    }
    None
}

/// Parse a relative path remainder such as `.x[1].y` into segments.
pub fn parse_relative(rest: &str) -> Result<Path, PathError> {
    let trimmed = rest.strip_prefix('.').unwrap_or(rest);
    if trimmed.starts_with('[') {
        // `[n]...` has no leading key; parse it behind a placeholder key.
        let mut placeholder = Path::parse(&format!("_{trimmed}"))?;
        placeholder.segments.remove(0);
        return Ok(placeholder);
    }
    Path::parse(trimmed)
}

/// Read the value at `path`, if every step exists.
pub fn get_by_path<'v>(root: &'v Value, path: &Path) -> Option<&'v Value> {
    let mut current = root;
    for segment in path.segments() {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(index), Value::Array(items)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Same as [`get_by_path`] but rooted at an object map.
pub fn get_in_map<'v>(root: &'v Map<String, Value>, path: &Path) -> Option<&'v Value> {
    let (first, rest) = path.segments().split_first()?;
    let Segment::Key(key) = first else {
        return None;
    };
    let mut current = root.get(key)?;
    for segment in rest {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(index), Value::Array(items)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Walk to `path`, creating intermediate containers as needed, and return
/// the slot at the end. A primitive sitting where a container is required
/// is replaced by an empty container of the right shape.
///
/// Arrays grow by at most one element per step: an index equal to the
/// length appends, anything further fails with
/// [`PathError::IndexOutOfRange`].
pub fn slot_mut<'v>(root: &'v mut Value, path: &Path) -> Result<&'v mut Value, PathError> {
    check_growth(Some(&*root), path.segments())?;
    let mut current = root;
    for segment in path.segments() {
        current = step_mut(current, segment)?;
    }
    Ok(current)
}

/// [`slot_mut`] rooted at an object map. Returns `Ok(None)` for an empty
/// path or one that starts with an index.
pub fn slot_in_map<'v>(
    root: &'v mut Map<String, Value>,
    path: &Path,
) -> Result<Option<&'v mut Value>, PathError> {
    let Some((Segment::Key(key), rest)) = path.segments().split_first() else {
        return Ok(None);
    };
    check_growth(root.get(key), rest)?;
    let mut current = root.entry(key.clone()).or_insert(Value::Null);
    for segment in rest {
        current = step_mut(current, segment)?;
    }
    Ok(Some(current))
}

/// Read-only pass over the walk [`step_mut`] would make, so a failing
/// write leaves the tree untouched.
fn check_growth(mut current: Option<&Value>, segments: &[Segment]) -> Result<(), PathError> {
    for segment in segments {
        current = match segment {
            Segment::Key(key) => current.and_then(|value| value.get(key)),
            Segment::Index(index) => {
                let len = current.and_then(Value::as_array).map_or(0, Vec::len);
                if *index > len {
                    return Err(PathError::IndexOutOfRange { index: *index, len });
                }
                current.and_then(|value| value.get(*index))
            }
        };
    }
    Ok(())
}

fn step_mut<'v>(current: &'v mut Value, segment: &Segment) -> Result<&'v mut Value, PathError> {
    match segment {
        Segment::Key(key) => {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            match current {
                Value::Object(map) => Ok(map.entry(key.clone()).or_insert(Value::Null)),
                _ => unreachable!("slot was just made an object"),
            }
        }
        Segment::Index(index) => {
            if !current.is_array() {
                *current = Value::Array(Vec::new());
            }
            match current {
                Value::Array(items) => {
                    let len = items.len();
                    if *index > len {
                        return Err(PathError::IndexOutOfRange { index: *index, len });
                    }
                    if *index == len {
                        items.push(Value::Null);
                    }
                    Ok(&mut items[*index])
                }
                _ => unreachable!("slot was just made an array"),
            }
        }
    }
}
