use std::sync::{Arc, Mutex, PoisonError};

/// Appended to captured output that hit the byte ceiling.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Byte-capped accumulator for one output stream of a sandbox.
///
/// Writes past the ceiling are dropped and the buffer remembers that it
/// truncated. The cut never splits a UTF-8 sequence, so the kept prefix of
/// valid text stays valid. Clone is a cheap Arc refcount bump; the backend writes into
/// one clone while the lifecycle manager reads from another.
#[derive(Clone)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data: Vec::new(),
                limit,
                truncated: false,
            })),
        }
    }

    pub fn write(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.truncated {
            return;
        }
        let room = inner.limit.saturating_sub(inner.data.len());
        let take = bytes.len().min(room);
        if let Some(head) = bytes.get(..take) {
            inner.data.extend_from_slice(head);
        }
        if bytes.len() > room {
            inner.truncated = true;
            let keep = complete_len(&inner.data);
            inner.data.truncate(keep);
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .data
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_truncated(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .truncated
    }

    /// Captured text (lossy UTF-8), with [`TRUNCATION_MARKER`] appended if
    /// anything was dropped.
    pub fn contents(&self) -> String {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut text = String::from_utf8_lossy(&inner.data).into_owned();
        if inner.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

/// Length of `data` without a trailing incomplete UTF-8 sequence.
fn complete_len(data: &[u8]) -> usize {
    let len = data.len();
    for back in 1..=len.min(4) {
        let Some(&byte) = data.get(len - back) else {
            break;
        };
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { len - back } else { len };
    }
    len
}
