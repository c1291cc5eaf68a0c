//! Frame reassembly for the Facemotion3D TCP stream
//!
//! The device sends text frames separated by a fixed marker. A TCP read can
//! end anywhere, including inside the marker or inside a multi-byte UTF-8
//! character, so bytes are accumulated raw and only decoded once a complete
//! frame (marker, payload, next marker) is buffered. The closing marker is
//! left in place as the opener of the following frame.

/// Separator between frames on the wire
pub const FRAME_MARKER: &[u8] = b"___FACEMOTION3D";

/// Upper bound on buffered bytes while waiting for a closing marker
pub const MAX_BUFFERED: usize = 64 * 1024;

/// Accumulates stream bytes and yields complete frames
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);

        if self.buf.len() > MAX_BUFFERED {
            // Keep just enough to finish a marker split across reads
            let keep_from = self.buf.len() - (FRAME_MARKER.len() - 1);
            tracing::warn!(
                "Facemotion3D frame exceeded {} bytes without a marker, discarding",
                MAX_BUFFERED
            );
            self.buf.drain(..keep_from);
        }
    }

    /// Pop the next complete, non-empty frame payload
    pub fn next_frame(&mut self) -> Option<String> {
        loop {
            let start = find(&self.buf, FRAME_MARKER)?;
            let payload_start = start + FRAME_MARKER.len();
            let end = payload_start + find(&self.buf[payload_start..], FRAME_MARKER)?;

            let frame = String::from_utf8_lossy(&self.buf[payload_start..end]).into_owned();
            self.buf.drain(..end);

            if !frame.is_empty() {
                return Some(frame);
            }
        }
    }

    /// Pop every complete frame currently buffered
    pub fn drain_frames(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Number of bytes waiting for a closing marker
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop everything buffered (new connection)
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
