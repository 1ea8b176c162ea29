use bytes::Bytes;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use hwstage::av::tests::{CollectSink, QueueSource, SinkEvent};
use hwstage::av::{CodecType, Packet, VideoStreamInfo};
use hwstage::config::StageOptions;
use hwstage::hw::{self, PixelFormat};
use hwstage::session::tests::{
    event_count, event_index, host_frame, new_event_log, LifecycleEvent, ScriptedBackend,
    ScriptedDecodeSession, ScriptedProvider, ScriptedSurface,
};
use hwstage::stage::{DecodeStage, ProcessStatus};
use hwstage::StageError;

fn compressed(pts: i64) -> Packet {
    Packet::new(Bytes::from(vec![0x65u8, 0x88, 0x84, 0x00]))
        .with_pts(pts)
        .with_dts(pts)
        .with_key_flag(true)
        .with_duration(Duration::from_millis(40))
}

fn input_info(width: u32, height: u32) -> VideoStreamInfo {
    VideoStreamInfo::new(CodecType::H264)
        .with_dimensions(width, height)
        .with_fps(25, 1)
        .with_timescale(1000)
}

async fn run_to_eos(stage: &mut DecodeStage, source: &mut QueueSource, sink: &mut CollectSink) {
    for _ in 0..32 {
        if stage.process(source, sink).await.unwrap() == ProcessStatus::EndOfStream {
            return;
        }
    }
    panic!("stage did not reach end of stream");
}

#[tokio::test]
async fn reordered_frames_recover_source_timestamps() {
    let log = new_event_log();

    // The session buffers the first packet, then emits with one frame of
    // reordering delay: arrival {100, 200, 150} comes out as {100, 150, 200}.
    let mut session = ScriptedDecodeSession::new(log.clone());
    session.queue_frame(host_frame(640, 360, Some(100)));
    session.queue_frame(host_frame(640, 360, Some(150)));
    session.queue_frame(host_frame(640, 360, Some(200)));
    session.set_release_plan(&[0, 1, 2]);

    let provider = Arc::new(ScriptedProvider::new(log).with_decoder(session));
    let mut stage = DecodeStage::new(StageOptions::default(), provider);

    let mut sink = CollectSink::new();
    stage
        .configure(&input_info(640, 360), &mut sink)
        .await
        .unwrap();

    let mut source = QueueSource::new();
    for pts in [100, 200, 150] {
        source.push(compressed(pts));
    }
    source.finish();

    run_to_eos(&mut stage, &mut source, &mut sink).await;

    let packets = sink.packets();
    assert_eq!(
        packets.iter().map(|p| p.pts.unwrap()).collect::<Vec<_>>(),
        vec![100, 150, 200]
    );
    for packet in &packets {
        assert!(packet.is_key, "correlated metadata carries the random-access flag");
        assert_eq!(packet.duration, Some(Duration::from_millis(40)));
        assert_eq!(packet.dts, packet.pts);
    }
    assert_eq!(stage.in_flight(), 0, "ledger drained");
    assert!(sink.ended());

    // No further emissions once the stream has ended.
    let emitted = sink.packets().len();
    let status = stage.process(&mut source, &mut sink).await.unwrap();
    assert_eq!(status, ProcessStatus::EndOfStream);
    assert_eq!(sink.packets().len(), emitted);
}

#[tokio::test]
async fn unmatched_frames_get_monotonic_fallback_timestamps() {
    let log = new_event_log();

    // Frames come back without any timing metadata, as hardware surfaces do.
    let mut session = ScriptedDecodeSession::new(log.clone());
    session.queue_frame(host_frame(640, 360, None));
    session.queue_frame(host_frame(640, 360, None));

    let provider = Arc::new(ScriptedProvider::new(log).with_decoder(session));
    let mut stage = DecodeStage::new(StageOptions::default(), provider);

    let mut sink = CollectSink::new();
    stage
        .configure(&input_info(640, 360), &mut sink)
        .await
        .unwrap();

    let mut source = QueueSource::new();
    source.push(compressed(10));
    source.push(compressed(20));
    source.finish();

    run_to_eos(&mut stage, &mut source, &mut sink).await;

    let packets = sink.packets();
    assert_eq!(
        packets.iter().map(|p| p.pts.unwrap()).collect::<Vec<_>>(),
        vec![1, 2],
        "each fallback timestamp exceeds the previous emission by one"
    );
    for packet in &packets {
        assert!(packet.is_key, "unmatched output is a synthetic random-access point");
        assert!(packet.duration.is_none());
    }
    assert_eq!(stage.in_flight(), 0, "outstanding units released at end of stream");
}

#[tokio::test]
async fn geometry_change_redeclares_output_before_emission() {
    let log = new_event_log();

    let mut session = ScriptedDecodeSession::new(log.clone());
    session.queue_frame(host_frame(640, 360, Some(5)));
    session.queue_frame(host_frame(1280, 720, Some(6)));

    let provider = Arc::new(ScriptedProvider::new(log).with_decoder(session));
    let mut stage = DecodeStage::new(StageOptions::default(), provider);

    let mut sink = CollectSink::new();
    stage
        .configure(&input_info(640, 360), &mut sink)
        .await
        .unwrap();

    let mut source = QueueSource::new();
    source.push(compressed(5));
    source.push(compressed(6));
    source.finish();
    run_to_eos(&mut stage, &mut source, &mut sink).await;

    let declared: Vec<(u32, u32)> = sink
        .declared()
        .iter()
        .map(|info| (info.width, info.height))
        .collect();
    assert_eq!(declared, vec![(640, 360), (1280, 720)]);

    // The new declaration lands before the packet that carries it.
    let redeclare_at = sink
        .events
        .iter()
        .position(|e| matches!(e, SinkEvent::Declared(info) if info.width == 1280))
        .unwrap();
    let second_packet_at = sink
        .events
        .iter()
        .position(|e| matches!(e, SinkEvent::Packet(p) if p.pts == Some(6)))
        .unwrap();
    assert!(redeclare_at < second_packet_at);
}

#[tokio::test]
async fn explicit_unknown_backend_fails_configuration() {
    let log = new_event_log();
    let provider = Arc::new(ScriptedProvider::new(log));
    let options = StageOptions::default().with_hwaccel("nonexistent-backend");
    let mut stage = DecodeStage::new(options, provider);

    let mut sink = CollectSink::new();
    let err = stage
        .configure(&input_info(640, 360), &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::NotSupported(_)));
    assert!(!stage.hardware_enabled());

    // An unconfigured stage yields without touching its ports.
    let mut source = QueueSource::new();
    source.push(compressed(1));
    let status = stage.process(&mut source, &mut sink).await.unwrap();
    assert_eq!(status, ProcessStatus::Continue);
    assert!(sink.packets().is_empty());
}

#[tokio::test]
async fn auto_without_hardware_falls_back_to_software() {
    let log = new_event_log();
    let mut session = ScriptedDecodeSession::new(log.clone());
    session.queue_frame(host_frame(640, 360, Some(1)));

    let provider = Arc::new(ScriptedProvider::new(log).with_decoder(session));
    let mut stage = DecodeStage::new(StageOptions::default().with_hwaccel("auto"), provider);

    let mut sink = CollectSink::new();
    stage
        .configure(&input_info(640, 360), &mut sink)
        .await
        .unwrap();
    assert!(!stage.hardware_enabled());

    let mut source = QueueSource::new();
    source.push(compressed(1));
    source.finish();
    run_to_eos(&mut stage, &mut source, &mut sink).await;
    assert_eq!(sink.packets().len(), 1);
}

#[tokio::test]
async fn hardware_frames_transfer_to_host_exactly_once() {
    let log = new_event_log();
    let backend = Arc::new(ScriptedBackend::new("dec-hw", log.clone()));
    hw::register_backend(backend);

    let mut session = ScriptedDecodeSession::new(log.clone());
    session.queue_frame(ScriptedSurface::device_frame(
        PixelFormat::Nv12,
        320,
        240,
        Some(100),
    ));
    session.queue_frame(ScriptedSurface::device_frame(
        PixelFormat::Nv12,
        320,
        240,
        Some(200),
    ));

    let provider = Arc::new(
        ScriptedProvider::new(log.clone())
            .with_decoder(session)
            .with_hw_config("dec-hw", PixelFormat::Nv12)
            .with_candidate_formats(&[PixelFormat::Yuv420p, PixelFormat::Nv12]),
    );
    let options = StageOptions::default()
        .with_hwaccel("dec-hw")
        .with_device("test-node-0");
    let mut stage = DecodeStage::new(options, provider.clone());

    let mut sink = CollectSink::new();
    stage
        .configure(&input_info(320, 240), &mut sink)
        .await
        .unwrap();
    assert!(stage.hardware_enabled());

    // The session builder negotiated the resolved surface format.
    let opened = provider.opened.lock();
    assert_eq!(opened[0].hw_backend.as_deref(), Some("dec-hw"));
    assert_eq!(opened[0].negotiated_surface, Some(PixelFormat::Nv12));
    drop(opened);

    let mut source = QueueSource::new();
    source.push(compressed(100));
    source.push(compressed(200));
    source.finish();
    run_to_eos(&mut stage, &mut source, &mut sink).await;

    let packets = sink.packets();
    assert_eq!(
        packets.iter().map(|p| p.pts.unwrap()).collect::<Vec<_>>(),
        vec![100, 200]
    );
    assert_eq!(
        packets[0].data.len(),
        PixelFormat::Nv12.frame_size(320, 240),
        "output sized exactly for the plane layout"
    );
    assert_eq!(
        event_count(&log, LifecycleEvent::Download),
        2,
        "one transfer per hardware frame"
    );
}

#[tokio::test]
async fn teardown_releases_session_before_device_and_drops_ledger() {
    let log = new_event_log();
    let backend = Arc::new(ScriptedBackend::new("dec-hw2", log.clone()));
    hw::register_backend(backend);

    // A session that never produces output, leaving units in flight.
    let mut session = ScriptedDecodeSession::new(log.clone());
    session.set_release_plan(&[0, 0]);

    let provider = Arc::new(
        ScriptedProvider::new(log.clone())
            .with_decoder(session)
            .with_hw_config("dec-hw2", PixelFormat::Nv12),
    );
    let options = StageOptions::default().with_hwaccel("dec-hw2");
    let mut stage = DecodeStage::new(options, provider);

    let mut sink = CollectSink::new();
    stage
        .configure(&input_info(640, 360), &mut sink)
        .await
        .unwrap();

    let mut source = QueueSource::new();
    source.push(compressed(10));
    source.push(compressed(20));
    stage.process(&mut source, &mut sink).await.unwrap();
    stage.process(&mut source, &mut sink).await.unwrap();
    assert_eq!(stage.in_flight(), 2);

    drop(stage);

    assert_eq!(event_count(&log, LifecycleEvent::DeviceCreated), 1);
    assert_eq!(event_count(&log, LifecycleEvent::DeviceReleased), 1);
    assert_eq!(event_count(&log, LifecycleEvent::DecoderReleased), 1);
    assert!(
        event_index(&log, LifecycleEvent::DecoderReleased).unwrap()
            < event_index(&log, LifecycleEvent::DeviceReleased).unwrap(),
        "session released before the device it is bound to"
    );
    assert!(
        sink.packets().is_empty(),
        "outstanding ledger entries released without emission"
    );
}

#[tokio::test]
async fn zero_byte_payload_is_non_compliant() {
    let log = new_event_log();
    let session = ScriptedDecodeSession::new(log.clone());
    let provider = Arc::new(ScriptedProvider::new(log).with_decoder(session));
    let mut stage = DecodeStage::new(StageOptions::default(), provider);

    let mut sink = CollectSink::new();
    stage
        .configure(&input_info(640, 360), &mut sink)
        .await
        .unwrap();

    let mut source = QueueSource::new();
    source.push(Packet::new(Bytes::new()).with_pts(1));
    let err = stage.process(&mut source, &mut sink).await.unwrap_err();
    assert!(matches!(err, StageError::NonCompliant(_)));
}

#[tokio::test]
async fn decoder_config_record_is_forwarded_to_session() {
    let log = new_event_log();
    let session = ScriptedDecodeSession::new(log.clone());
    let provider = Arc::new(ScriptedProvider::new(log).with_decoder(session));
    let mut stage = DecodeStage::new(StageOptions::default(), provider.clone());

    let props = input_info(640, 360).with_decoder_config(&b"\x01\x64\x00\x1f\xff"[..]);
    let mut sink = CollectSink::new();
    stage.configure(&props, &mut sink).await.unwrap();

    let opened = provider.opened.lock();
    assert_eq!(
        opened[0].extradata.as_deref(),
        Some(&b"\x01\x64\x00\x1f\xff"[..])
    );
    assert_eq!(opened[0].codec, CodecType::H264);
}

#[tokio::test]
async fn session_open_failure_is_not_supported() {
    let log = new_event_log();
    let provider = Arc::new(ScriptedProvider::new(log).failing_open());
    let mut stage = DecodeStage::new(StageOptions::default(), provider);

    let mut sink = CollectSink::new();
    let err = stage
        .configure(&input_info(640, 360), &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::NotSupported(_)));
}

#[tokio::test]
async fn reconfiguring_a_live_stage_requires_a_new_instance() {
    let log = new_event_log();
    let session = ScriptedDecodeSession::new(log.clone());
    let provider = Arc::new(ScriptedProvider::new(log).with_decoder(session));
    let mut stage = DecodeStage::new(StageOptions::default(), provider);

    let mut sink = CollectSink::new();
    stage
        .configure(&input_info(640, 360), &mut sink)
        .await
        .unwrap();
    let err = stage
        .configure(&input_info(1280, 720), &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::RequiresNewInstance));
}
