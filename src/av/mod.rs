use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecType {
    H264,
    H265,
    /// Raw (uncompressed) video frames.
    Raw,
}

impl CodecType {
    pub fn name(&self) -> &'static str {
        match self {
            CodecType::H264 => "h264",
            CodecType::H265 => "h265",
            CodecType::Raw => "raw",
        }
    }
}

/// Upstream packet interface: a stage pulls at most one packet per
/// scheduling quantum. Packet ownership moves into the stage; dropping the
/// packet releases it back to the producer's pool.
#[async_trait]
pub trait PacketSource: Send {
    /// Pull the next packet, or `None` when no packet is currently queued.
    async fn pull_packet(&mut self) -> crate::Result<Option<Packet>>;

    /// Whether the upstream connection has signalled end-of-stream.
    fn end_of_stream(&self) -> bool;
}

/// Downstream packet interface: declared stream properties plus packet and
/// end-of-stream delivery.
#[async_trait]
pub trait PacketSink: Send {
    /// (Re)configure the output connection with derived stream properties.
    async fn declare_stream(&mut self, info: &VideoStreamInfo) -> crate::Result<()>;

    /// Send one output packet downstream.
    async fn send_packet(&mut self, packet: Packet) -> crate::Result<()>;

    /// Signal end-of-stream on the output connection.
    async fn end_of_stream(&mut self) -> crate::Result<()>;
}

mod packet;
pub mod stream;

pub use packet::*;
pub use stream::{Fraction, VideoStreamInfo};

pub mod tests {
    //! In-memory port implementations for driving stages in tests.

    use super::*;
    use std::collections::VecDeque;

    /// A packet source backed by a queue.
    #[derive(Debug, Default)]
    pub struct QueueSource {
        pub packets: VecDeque<Packet>,
        pub eos: bool,
    }

    impl QueueSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&mut self, packet: Packet) {
            self.packets.push_back(packet);
        }

        pub fn finish(&mut self) {
            self.eos = true;
        }
    }

    #[async_trait]
    impl PacketSource for QueueSource {
        async fn pull_packet(&mut self) -> crate::Result<Option<Packet>> {
            Ok(self.packets.pop_front())
        }

        fn end_of_stream(&self) -> bool {
            self.eos && self.packets.is_empty()
        }
    }

    /// Everything a sink observed, in arrival order.
    #[derive(Debug, Clone)]
    pub enum SinkEvent {
        Declared(VideoStreamInfo),
        Packet(Packet),
        EndOfStream,
    }

    /// A packet sink recording declarations, packets and end-of-stream.
    #[derive(Debug, Default)]
    pub struct CollectSink {
        pub events: Vec<SinkEvent>,
    }

    impl CollectSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn packets(&self) -> Vec<&Packet> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    SinkEvent::Packet(p) => Some(p),
                    _ => None,
                })
                .collect()
        }

        pub fn declared(&self) -> Vec<&VideoStreamInfo> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    SinkEvent::Declared(info) => Some(info),
                    _ => None,
                })
                .collect()
        }

        pub fn ended(&self) -> bool {
            self.events
                .iter()
                .any(|e| matches!(e, SinkEvent::EndOfStream))
        }
    }

    #[async_trait]
    impl PacketSink for CollectSink {
        async fn declare_stream(&mut self, info: &VideoStreamInfo) -> crate::Result<()> {
            self.events.push(SinkEvent::Declared(info.clone()));
            Ok(())
        }

        async fn send_packet(&mut self, packet: Packet) -> crate::Result<()> {
            self.events.push(SinkEvent::Packet(packet));
            Ok(())
        }

        async fn end_of_stream(&mut self) -> crate::Result<()> {
            self.events.push(SinkEvent::EndOfStream);
            Ok(())
        }
    }
}
