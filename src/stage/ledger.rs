use std::collections::VecDeque;

use crate::av::PacketMeta;

/// Ordered record of in-flight source metadata, used to recover output
/// timestamps from a reordering codec session.
///
/// Entries are appended in arrival order on submission and removed exactly
/// once, by key value, when a matching output unit is emitted. Anything
/// still outstanding at teardown is released without emission.
///
/// Lookup is a linear scan; in-flight depth is bounded by the codec
/// session's buffering (at most the hardware frame-pool size), so the scan
/// stays short.
#[derive(Debug, Default)]
pub struct CorrelationLedger {
    entries: VecDeque<Entry>,
}

#[derive(Debug)]
struct Entry {
    key: i64,
    meta: PacketMeta,
}

impl CorrelationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one in-flight source unit. The key is the value the session is
    /// expected to report back: the presentation timestamp for decode, the
    /// submission counter for encode.
    pub fn push(&mut self, key: i64, meta: PacketMeta) {
        self.entries.push_back(Entry { key, meta });
    }

    /// Remove and return the first entry (in arrival order) whose key equals
    /// `key`. Each entry matches at most once.
    pub fn take_matching(&mut self, key: i64) -> Option<PacketMeta> {
        let index = self.entries.iter().position(|e| e.key == key)?;
        self.entries.remove(index).map(|e| e.meta)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release all outstanding entries without emission.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
