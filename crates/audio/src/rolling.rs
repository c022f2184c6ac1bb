use std::collections::VecDeque;
use std::sync::Arc;

/// A bit over 7 seconds of 44.1 kHz 8-bit mono audio. Found experimentally:
/// enough context for a stable reading without lagging far behind a tempo
/// change.
pub const DEFAULT_WINDOW_BYTES: usize = 350_000;

/// Immutable snapshot of the most recent stretch of captured audio. Cheap to
/// clone and safe to hand to another thread or process while capture keeps
/// writing.
#[derive(Clone, Debug)]
pub struct AudioWindow {
    bytes: Arc<[u8]>,
}

impl AudioWindow {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Samples as floats centered on zero, one per captured byte.
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.bytes.iter().map(|&b| (b as f32 - 128.0) / 128.0)
    }
}

/// Fixed-capacity byte window over the capture stream. Oldest bytes are
/// evicted first; the newest are never dropped. Single-writer: only the
/// capture path appends.
pub struct RollingAudioBuffer {
    window: VecDeque<u8>,
    capacity: usize,
}

impl RollingAudioBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends captured bytes, trims to capacity, and returns a snapshot of
    /// the post-trim window.
    pub fn append(&mut self, bytes: &[u8]) -> AudioWindow {
        self.window.extend(bytes.iter().copied());
        let excess = self.window.len().saturating_sub(self.capacity);
        if excess > 0 {
            self.window.drain(..excess);
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> AudioWindow {
        let bytes: Vec<u8> = self.window.iter().copied().collect();
        AudioWindow::from_bytes(bytes)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

impl Default for RollingAudioBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_BYTES)
    }
}
