//! Stream-to-message framing.
//!
//! The wire carries back-to-back JSON objects with no length prefix, so
//! object boundaries are found structurally: a frame starts at a `{` seen at
//! depth 0 and ends at the `}` that brings depth back to 0. Braces inside
//! string literals are ignored. Bytes between objects are discarded.
//!
//! Scan state survives across reads, so a partial object is never rescanned.
//! A partial object that outgrows the size bound is dropped, and the rest of
//! it is skipped without buffering until its closing brace.

use serde_json::Value;

use sealpost_shared::constants::MAX_FRAME_SIZE;

use crate::error::FrameError;

#[derive(Debug)]
pub struct JsonFrameDecoder {
    buffer: Vec<u8>,
    /// Offset in `buffer` of the object currently being scanned.
    start: usize,
    /// Bytes of `buffer` already scanned.
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// Skipping the tail of an object that exceeded `max_frame_size`.
    discarding: bool,
    max_frame_size: usize,
}

impl JsonFrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            start: 0,
            scanned: 0,
            depth: 0,
            in_string: false,
            escaped: false,
            discarding: false,
            max_frame_size,
        }
    }

    /// Feed newly read bytes. Returns every frame completed by them, in order.
    /// Partial data yields nothing and is kept for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Value, FrameError>> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        // Everything before `consumed` is either delivered or discarded.
        let mut consumed = 0;

        for i in self.scanned..self.buffer.len() {
            let byte = self.buffer[i];

            if self.depth == 0 {
                if byte == b'{' {
                    self.depth = 1;
                    self.start = i;
                } else {
                    consumed = i + 1;
                }
                continue;
            }

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        if self.discarding {
                            self.discarding = false;
                        } else {
                            let span = &self.buffer[self.start..=i];
                            frames.push(serde_json::from_slice(span).map_err(FrameError::from));
                        }
                        consumed = i + 1;
                    }
                }
                _ => {}
            }
        }

        if self.depth == 0 || self.discarding {
            self.buffer.clear();
            self.start = 0;
        } else {
            self.buffer.drain(..consumed);
            self.start -= consumed;
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_frame_size {
            frames.push(Err(FrameError::Oversized {
                size: self.buffer.len(),
                max: self.max_frame_size,
            }));
            // Scan state is kept so the rest of the object is recognised.
            self.buffer.clear();
            self.start = 0;
            self.scanned = 0;
            self.discarding = true;
        }

        frames
    }

    /// Number of bytes held for an incomplete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for JsonFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
