/// Sentinel that terminates every frame on the wire.
pub const DELIMITER: &[u8] = b"<EOF>";

/// Incremental frame decoder.
///
/// Bytes from successive socket reads are appended with [`Framer::push`],
/// which yields every payload completed so far with the delimiter stripped.
/// An undelimited suffix stays buffered until a later read supplies the rest,
/// so a delimiter split across two reads is reassembled transparently.
///
/// Payloads must not contain the delimiter sequence themselves; there is no
/// escaping, and a payload that does contain it is split at the first
/// occurrence.
#[derive(Debug, Default)]
pub struct Framer {
    buffer: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` to the inbound buffer and drains every complete frame,
    /// in arrival order. Two back-to-back delimiters yield an empty payload.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(at) = find_delimiter(&self.buffer) {
            let mut frame: Vec<u8> = self.buffer.drain(..at + DELIMITER.len()).collect();
            frame.truncate(at);
            payloads.push(frame);
        }
        payloads
    }

    /// Number of buffered bytes still awaiting a delimiter.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
}

/// Encodes one payload as a wire frame by appending the delimiter.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + DELIMITER.len());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(DELIMITER);
    frame
}
