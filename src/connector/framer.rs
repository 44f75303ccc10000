//! Newline framing for the server's stdout.

/// Reassembles newline-delimited messages from arbitrarily sized chunks.
///
/// The buffer always holds exactly the unterminated tail of the input seen
/// so far. Lines are only decoded once complete, so a multi-byte UTF-8
/// character split across two reads comes out intact.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every message it completes, in arrival order.
    ///
    /// Messages are trimmed; lines that trim to nothing are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let Some(last_newline) = self.buffer.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        complete
            .split(|&b| b == b'\n')
            .filter_map(|segment| {
                let line = String::from_utf8_lossy(segment);
                let trimmed = line.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .collect()
    }

    /// Convenience wrapper around [`push`](Self::push) for text input.
    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.push(chunk.as_bytes())
    }

    /// The unterminated fragment currently buffered.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Take the leftover fragment at end of stream, if it has any content.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        let trimmed = line.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}
