//! Incremental Server-Sent Events decoder.
//!
//! Bytes arrive in arbitrary chunks; [`SseDecoder::push`] buffers partial
//! lines (including split UTF-8 sequences) and returns every event
//! completed by the chunk. Supports `data:` (multi-line data is joined with
//! `\n`), `event:` and `id:` fields, comment lines, and LF or CRLF line
//! endings. `retry:` and unknown fields are ignored.

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    pub data: String,
    /// Value of the last `id:` field, if any.
    pub id: Option<String>,
}

/// Streaming SSE parser.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of the current, not yet terminated line.
    line: Vec<u8>,
    data: Vec<String>,
    event: Option<String>,
    last_id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect the events it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let raw = std::mem::take(&mut self.line);
                let line = String::from_utf8_lossy(&raw);
                let line = line.strip_suffix('\r').unwrap_or(&line);
                if let Some(event) = self.process_line(line) {
                    events.push(event);
                }
            } else {
                self.line.push(byte);
            }
        }
        events
    }

    /// Flush at end of stream.
    ///
    /// An event whose terminating blank line never arrived is still
    /// dispatched, so a server that closes right after its final `data:`
    /// line does not lose the terminal event.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.line.is_empty() {
            let raw = std::mem::take(&mut self.line);
            let line = String::from_utf8_lossy(&raw).into_owned();
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.process_line(line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.last_id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event,
            data,
            id: self.last_id.clone(),
        })
    }
}
