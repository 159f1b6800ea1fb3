use serde_json::{Map, Value};
use tracing::debug;

/// Buffer size that triggers overflow recovery.
const MAX_BUFFER_SIZE: usize = 2000;
/// A trailing `{` within this many bytes of the end is kept as a possible partial object.
const STALL_THRESHOLD: usize = 500;
const TAIL_KEEP: usize = 200;

pub type JsonObject = Map<String, Value>;

/// Reassembles JSON objects from a fragmented, possibly corrupted text stream.
///
/// A single object may span several chunks, several objects may arrive in one
/// chunk, and transmission garbage between objects is skipped. Only objects are
/// emitted; top-level arrays or scalars are dropped as malformed.
#[derive(Debug, Default)]
pub struct JsonObjectStream {
    buffer: String,
}

impl JsonObjectStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every object that is now complete, in stream order.
    pub fn feed(&mut self, chunk: &str) -> Vec<JsonObject> {
        if chunk.is_empty() {
            return Vec::new();
        }

        self.buffer.push_str(chunk);
        let mut objects = Vec::new();
        while let Some(obj) = self.try_extract() {
            objects.push(obj);
        }

        if self.buffer.len() > MAX_BUFFER_SIZE {
            self.recover();
        }

        objects
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    fn try_extract(&mut self) -> Option<JsonObject> {
        let Some(start) = self.buffer.find('{') else {
            // nothing before an opening brace is recoverable
            self.buffer.clear();
            return None;
        };
        if start > 0 {
            self.buffer.drain(..start);
        }

        let end = find_object_end(self.buffer.as_bytes())?;
        match decode_object(&self.buffer[..=end]) {
            Some(obj) => {
                self.buffer.drain(..=end);
                Some(obj)
            }
            None => {
                debug!(
                    candidate = %preview(&self.buffer[..=end]),
                    "malformed JSON, skipping opening brace"
                );
                // Only the brace goes; a later `{` inside the span gets its chance next pass.
                self.buffer.remove(0);
                None
            }
        }
    }

    fn recover(&mut self) {
        debug!(size = self.buffer.len(), "stream buffer overflow, attempting recovery");

        if let Some(pos) = find_object_boundary(&self.buffer) {
            debug!(at = pos, "recovery: keeping from back-to-back object boundary");
            self.buffer.drain(..pos);
            return;
        }

        let len = self.buffer.len();
        if let Some(last) = self.buffer.rfind('{')
            && last > 0
            && last > len.saturating_sub(STALL_THRESHOLD)
        {
            debug!(at = last, "recovery: keeping from last opening brace");
            self.buffer.drain(..last);
            return;
        }

        if len > TAIL_KEEP {
            let mut cut = len - TAIL_KEEP;
            while !self.buffer.is_char_boundary(cut) {
                cut += 1;
            }
            debug!(keep = len - cut, "recovery: keeping buffer tail");
            self.buffer.drain(..cut);
            return;
        }

        debug!("recovery: clearing buffer");
        self.buffer.clear();
    }
}

/// Index of the `}` closing the object that opens at `bytes[0]`, if the buffer holds it yet.
/// Braces inside string literals do not count; `\"` does not end a string.
fn find_object_end(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Position of the second `{` in the first `}{` pair (whitespace allowed between).
fn find_object_boundary(buffer: &str) -> Option<usize> {
    let bytes = buffer.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'}' {
            continue;
        }
        let mut j = i + 1;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if j < bytes.len() && bytes[j] == b'{' {
            return Some(j);
        }
    }
    None
}

fn decode_object(candidate: &str) -> Option<JsonObject> {
    match serde_json::from_str(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn preview(text: &str) -> String {
    text.chars().take(100).collect()
}
