use crate::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn slice<'a>(&self, input: &'a str) -> &'a str {
        &input[self.start..self.end]
    }
}

pub fn find_from(input: &str, marker: &str, from: usize) -> Option<Span> {
    let tail = input.get(from..)?;
    tail.find(marker).map(|pos| Span {
        start: from + pos,
        end: from + pos + marker.len(),
    })
}

pub fn after<'a>(input: &'a str, marker: &str, field: &'static str) -> Result<&'a str, ParseError> {
    find_from(input, marker, 0)
        .map(|span| &input[span.end..])
        .ok_or_else(|| ParseError::field(field, format!("marker {marker:?} not found")))
}

/// Text between `start` and the first `end` after it, plus the span of `end`.
pub fn between<'a>(
    input: &'a str,
    start: &str,
    end: &str,
    field: &'static str,
) -> Result<(&'a str, Span), ParseError> {
    let open = find_from(input, start, 0)
        .ok_or_else(|| ParseError::field(field, format!("marker {start:?} not found")))?;
    let close = find_from(input, end, open.end)
        .ok_or_else(|| ParseError::field(field, format!("marker {end:?} not found")))?;
    let inner = Span {
        start: open.end,
        end: close.start,
    };
    Ok((inner.slice(input), close))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Group<'a> {
    pub inner: &'a str,
    /// Byte offset of the opening parenthesis.
    pub open: usize,
}

/// Every balanced top-level `( ... )` group in `line`, ordered from the end
/// of the line. Nested groups stay inside their parent; unmatched
/// parentheses are ignored.
pub fn groups_from_end(line: &str) -> Vec<Group<'_>> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut open = 0usize;

    for (idx, ch) in line.char_indices() {
        match ch {
            '(' => {
                if depth == 0 {
                    open = idx;
                }
                depth += 1;
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    groups.push(Group {
                        inner: line[open + 1..idx].trim(),
                        open,
                    });
                }
            }
            _ => {}
        }
    }

    groups.reverse();
    groups
}

pub fn nth_from_end<'a>(groups: &[Group<'a>], n: usize) -> Option<Group<'a>> {
    groups.get(n).copied()
}
