//! Newline framing for streamed response bodies.

/// Accumulates raw body chunks and hands out complete lines.
///
/// Bytes are only decoded once a whole line is buffered, so a multi-byte
/// character split across network chunks survives intact.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// The next complete line without its terminator, if one is buffered.
    pub(crate) fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        Some(decode(&line[..pos]))
    }

    /// Whatever is left after the body ends, when it is not blank.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        let text = decode(&rest);
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

fn decode(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_suffix('\r').unwrap_or(&text).to_string()
}
