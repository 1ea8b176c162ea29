use bytes::Bytes;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub stream_index: usize,
    pub is_key: bool,
    pub duration: Option<Duration>,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: None,
            dts: None,
            stream_index: 0,
            is_key: false,
            duration: None,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.stream_index = index;
        self
    }

    pub fn with_key_flag(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Snapshot of this packet's timing metadata, retained independently of
    /// the payload. The payload `Bytes` is released as soon as the packet is
    /// dropped; the metadata lives on in the correlation ledger.
    pub fn meta(&self) -> PacketMeta {
        PacketMeta {
            pts: self.pts,
            dts: self.dts,
            duration: self.duration,
            is_key: self.is_key,
        }
    }
}

/// Timing metadata of a source packet: decode/presentation time, duration
/// and the random-access flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketMeta {
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: Option<Duration>,
    pub is_key: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_snapshot() {
        let packet = Packet::new(vec![1u8, 2, 3])
            .with_pts(100)
            .with_dts(90)
            .with_key_flag(true)
            .with_duration(Duration::from_millis(40));

        let meta = packet.meta();
        drop(packet);

        assert_eq!(meta.pts, Some(100));
        assert_eq!(meta.dts, Some(90));
        assert_eq!(meta.duration, Some(Duration::from_millis(40)));
        assert!(meta.is_key);
    }
}
