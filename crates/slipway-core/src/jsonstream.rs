//! Incremental decoding of concatenated top-level JSON values.
//!
//! Build tools that emit one JSON object per unit (`go list -json`, for
//! example) concatenate top-level values with no framing between them. The
//! decoder scans the text once, tracking string/escape state and bracket
//! depth, and yields each value as soon as its closing bracket is seen.

use serde_json::Value;

use crate::error::Result;

/// Lazy iterator over concatenated top-level JSON objects/arrays.
///
/// Bracket characters inside string literals (including ones behind escaped
/// quotes) never affect nesting depth. A trailing incomplete value yields
/// nothing. Parse failures on a completed value propagate to the caller.
pub struct JsonStream<'a> {
    input: &'a str,
    cursor: usize,
}

impl<'a> JsonStream<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, cursor: 0 }
    }
}

impl Iterator for JsonStream<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut depth: u32 = 0;
        let mut in_string = false;
        let mut escaped = false;
        let mut start: Option<usize> = None;

        let remaining = &self.input[self.cursor..];

        for (offset, ch) in remaining.char_indices() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == '"' {
                    in_string = false;
                }
                continue;
            }

            match ch {
                '"' => in_string = true,
                '{' | '[' => {
                    if depth == 0 {
                        start = Some(offset);
                    }
                    depth += 1;
                }
                '}' | ']' => {
                    // Stray closers before any opener are ignored, like any
                    // other inter-value noise.
                    if depth == 0 {
                        continue;
                    }
                    depth -= 1;

                    if depth == 0 {
                        let begin = start?;
                        let end = offset + ch.len_utf8();
                        let fragment = &remaining[begin..end];
                        self.cursor += end;
                        return Some(serde_json::from_str(fragment).map_err(Into::into));
                    }
                }
                _ => {}
            }
        }

        // No complete value left; the iterator is finite and non-restartable.
        self.cursor = self.input.len();
        None
    }
}

/// Decode every complete top-level JSON value in `input`, in stream order.
pub fn decode_all(input: &str) -> Result<Vec<Value>> {
    JsonStream::new(input).collect()
}
