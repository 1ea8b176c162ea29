use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use hwstage::av::tests::{CollectSink, QueueSource};
use hwstage::av::{CodecType, Packet, VideoStreamInfo};
use hwstage::config::StageOptions;
use hwstage::hw::{self, PixelFormat};
use hwstage::session::tests::{
    event_count, event_index, new_event_log, LifecycleEvent, ScriptedBackend,
    ScriptedEncodeSession, ScriptedProvider,
};
use hwstage::stage::{EncodeStage, ProcessStatus};
use hwstage::StageError;

fn raw_frame(pts: i64, width: u32, height: u32) -> Packet {
    let size = PixelFormat::Nv12.frame_size(width, height);
    Packet::new(vec![0x10u8; size])
        .with_pts(pts)
        .with_dts(pts)
        .with_duration(Duration::from_millis(40))
}

fn raw_info(width: u32, height: u32) -> VideoStreamInfo {
    VideoStreamInfo::new(CodecType::Raw)
        .with_dimensions(width, height)
        .with_fps(30, 1)
        .with_timescale(90_000)
        .with_pixel_format(PixelFormat::Nv12)
}

async fn run_to_eos(stage: &mut EncodeStage, source: &mut QueueSource, sink: &mut CollectSink) {
    for _ in 0..32 {
        if stage.process(source, sink).await.unwrap() == ProcessStatus::EndOfStream {
            return;
        }
    }
    panic!("stage did not reach end of stream");
}

fn scripted_stage(
    backend_name: &'static str,
    session: ScriptedEncodeSession,
) -> (EncodeStage, Arc<ScriptedProvider>, Arc<ScriptedBackend>) {
    let log = new_event_log();
    let backend = Arc::new(ScriptedBackend::new(backend_name, log.clone()));
    hw::register_backend(backend.clone());

    let provider = Arc::new(
        ScriptedProvider::new(log)
            .with_encoder(session)
            .with_hw_config(backend_name, PixelFormat::Nv12),
    );
    let options = StageOptions::default().with_hwaccel(backend_name);
    let stage = EncodeStage::new(options, provider.clone());
    (stage, provider, backend)
}

#[tokio::test]
async fn output_restamped_from_source_timing_with_keyframe_marks() {
    let log = new_event_log();
    let session = ScriptedEncodeSession::new(log).with_keyframe_interval(2);
    let (mut stage, provider, _backend) = scripted_stage("enc-hw-a", session);

    let mut sink = CollectSink::new();
    stage.configure(&raw_info(320, 240), &mut sink).await.unwrap();
    assert!(stage.hardware_enabled());

    // Derived output declaration: compressed identity, bitrate, unframed.
    let declared = sink.declared()[0].clone();
    assert_eq!(declared.codec, CodecType::H264);
    assert_eq!(declared.bitrate, Some(2_000_000));
    assert!(declared.unframed);

    // Encoder options reached the session builder.
    {
        let opened = provider.opened.lock();
        assert_eq!(opened[0].gop_size, Some(50));
        assert_eq!(opened[0].quality, Some(23));
        assert_eq!(opened[0].hw_backend.as_deref(), Some("enc-hw-a"));
    }

    let mut source = QueueSource::new();
    for pts in [1000, 2000, 3000] {
        source.push(raw_frame(pts, 320, 240));
    }
    source.finish();
    run_to_eos(&mut stage, &mut source, &mut sink).await;

    let packets = sink.packets();
    assert_eq!(
        packets.iter().map(|p| p.pts.unwrap()).collect::<Vec<_>>(),
        vec![1000, 2000, 3000],
        "chunks re-stamped from the source units, not the counter"
    );
    assert_eq!(
        packets.iter().map(|p| p.is_key).collect::<Vec<_>>(),
        vec![true, false, true],
        "keyframes marked per the session's report"
    );
    for packet in &packets {
        assert_eq!(packet.duration, Some(Duration::from_millis(40)));
    }
    assert!(sink.ended());
    assert_eq!(stage.in_flight(), 0);
}

#[tokio::test]
async fn buffering_session_correlates_chunks_through_counter_ledger() {
    let log = new_event_log();
    // Two frames of internal buffering: the chunk for the first input
    // appears while the third input is current.
    let session = ScriptedEncodeSession::new(log).with_delay(2);
    let (mut stage, _provider, _backend) = scripted_stage("enc-hw-b", session);

    let mut sink = CollectSink::new();
    stage.configure(&raw_info(320, 240), &mut sink).await.unwrap();

    let mut source = QueueSource::new();
    for pts in [10, 20, 30] {
        source.push(raw_frame(pts, 320, 240));
    }

    for _ in 0..3 {
        stage.process(&mut source, &mut sink).await.unwrap();
    }
    assert_eq!(
        sink.packets().iter().map(|p| p.pts.unwrap()).collect::<Vec<_>>(),
        vec![10],
        "delayed chunk recovers its own source timing, not the current input's"
    );

    source.finish();
    run_to_eos(&mut stage, &mut source, &mut sink).await;
    assert_eq!(
        sink.packets().iter().map(|p| p.pts.unwrap()).collect::<Vec<_>>(),
        vec![10, 20, 30],
        "flush drains the buffered frames with correct timing"
    );
    assert_eq!(stage.in_flight(), 0);
}

#[tokio::test]
async fn opaque_session_timestamps_fall_back_to_current_input() {
    let log = new_event_log();
    let session = ScriptedEncodeSession::new(log).without_pts_echo();
    let (mut stage, _provider, _backend) = scripted_stage("enc-hw-c", session);

    let mut sink = CollectSink::new();
    stage.configure(&raw_info(320, 240), &mut sink).await.unwrap();

    let mut source = QueueSource::new();
    source.push(raw_frame(7000, 320, 240));
    source.push(raw_frame(8000, 320, 240));
    source.finish();
    run_to_eos(&mut stage, &mut source, &mut sink).await;

    assert_eq!(
        sink.packets().iter().map(|p| p.pts.unwrap()).collect::<Vec<_>>(),
        vec![7000, 8000]
    );
}

#[tokio::test]
async fn transfer_failure_drops_the_unit_and_continues() {
    let log = new_event_log();
    let session = ScriptedEncodeSession::new(log);
    let (mut stage, _provider, backend) = scripted_stage("enc-hw-d", session);

    let mut sink = CollectSink::new();
    stage.configure(&raw_info(320, 240), &mut sink).await.unwrap();

    backend.fail_uploads(1);

    let mut source = QueueSource::new();
    source.push(raw_frame(10, 320, 240));
    source.push(raw_frame(20, 320, 240));
    source.finish();
    run_to_eos(&mut stage, &mut source, &mut sink).await;

    assert_eq!(
        sink.packets().iter().map(|p| p.pts.unwrap()).collect::<Vec<_>>(),
        vec![20],
        "the failed unit is dropped, subsequent units still encode"
    );
}

#[tokio::test]
async fn short_payload_is_dropped_per_unit() {
    let log = new_event_log();
    let session = ScriptedEncodeSession::new(log);
    let (mut stage, _provider, _backend) = scripted_stage("enc-hw-e", session);

    let mut sink = CollectSink::new();
    stage.configure(&raw_info(320, 240), &mut sink).await.unwrap();

    let mut source = QueueSource::new();
    source.push(Packet::new(vec![0u8; 16]).with_pts(10));
    source.push(raw_frame(20, 320, 240));
    source.finish();
    run_to_eos(&mut stage, &mut source, &mut sink).await;

    assert_eq!(
        sink.packets().iter().map(|p| p.pts.unwrap()).collect::<Vec<_>>(),
        vec![20]
    );
}

#[tokio::test]
async fn configure_fails_without_a_hardware_backend() {
    let log = new_event_log();
    let provider = Arc::new(
        ScriptedProvider::new(log.clone())
            .with_encoder(ScriptedEncodeSession::new(log))
            .with_hw_config("some-hw", PixelFormat::Nv12),
    );
    // "auto" finds no hardware backend and encode has no software path.
    let mut stage = EncodeStage::new(StageOptions::default(), provider);

    let mut sink = CollectSink::new();
    let err = stage
        .configure(&raw_info(320, 240), &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::NotSupported(_)));
}

#[tokio::test]
async fn configure_rejects_invalid_dimensions() {
    let log = new_event_log();
    let provider = Arc::new(ScriptedProvider::new(log));
    let mut stage = EncodeStage::new(StageOptions::default(), provider);

    let mut sink = CollectSink::new();
    let err = stage
        .configure(&raw_info(0, 240), &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::NotSupported(_)));
}

#[tokio::test]
async fn configure_rejects_mismatched_input_layout() {
    let log = new_event_log();
    let session = ScriptedEncodeSession::new(log.clone());
    let backend = Arc::new(ScriptedBackend::new("enc-hw-f", log.clone()));
    hw::register_backend(backend);
    let provider = Arc::new(
        ScriptedProvider::new(log)
            .with_encoder(session)
            .with_hw_config("enc-hw-f", PixelFormat::Nv12),
    );
    let options = StageOptions::default().with_hwaccel("enc-hw-f");
    let mut stage = EncodeStage::new(options, provider);

    let props = raw_info(320, 240).with_pixel_format(PixelFormat::Yuv420p);
    let mut sink = CollectSink::new();
    let err = stage.configure(&props, &mut sink).await.unwrap_err();
    assert!(matches!(err, StageError::NotSupported(_)));
}

#[tokio::test]
async fn teardown_releases_session_pool_device_in_order() {
    let log = new_event_log();
    let backend = Arc::new(ScriptedBackend::new("enc-hw-g", log.clone()));
    hw::register_backend(backend);
    let provider = Arc::new(
        ScriptedProvider::new(log.clone())
            .with_encoder(ScriptedEncodeSession::new(log.clone()))
            .with_hw_config("enc-hw-g", PixelFormat::Nv12),
    );
    let options = StageOptions::default().with_hwaccel("enc-hw-g");
    let mut stage = EncodeStage::new(options, provider);

    let mut sink = CollectSink::new();
    stage.configure(&raw_info(320, 240), &mut sink).await.unwrap();

    // Mid-flight teardown: one unit submitted, no end-of-stream.
    let mut source = QueueSource::new();
    source.push(raw_frame(10, 320, 240));
    stage.process(&mut source, &mut sink).await.unwrap();

    drop(stage);

    for event in [
        LifecycleEvent::DeviceCreated,
        LifecycleEvent::PoolCreated,
        LifecycleEvent::DeviceReleased,
        LifecycleEvent::PoolReleased,
        LifecycleEvent::EncoderReleased,
    ] {
        assert_eq!(event_count(&log, event), 1, "{:?}", event);
    }
    let session_at = event_index(&log, LifecycleEvent::EncoderReleased).unwrap();
    let pool_at = event_index(&log, LifecycleEvent::PoolReleased).unwrap();
    let device_at = event_index(&log, LifecycleEvent::DeviceReleased).unwrap();
    assert!(session_at < pool_at && pool_at < device_at);
}

#[tokio::test]
async fn empty_stream_flushes_cleanly() {
    let log = new_event_log();
    let session = ScriptedEncodeSession::new(log);
    let (mut stage, _provider, _backend) = scripted_stage("enc-hw-h", session);

    let mut sink = CollectSink::new();
    stage.configure(&raw_info(320, 240), &mut sink).await.unwrap();

    let mut source = QueueSource::new();
    source.finish();
    run_to_eos(&mut stage, &mut source, &mut sink).await;

    assert!(sink.packets().is_empty());
    assert!(sink.ended());
}
