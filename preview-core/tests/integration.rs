//! Integration tests: interface server and client over a real TCP
//! connection on localhost.
//!
//! The server runs on its own thread; the client side drives its
//! connection through a dedicated multi-threaded runtime so the blocking
//! decode path can be exercised from plain test threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use preview_core::preview::DisplaySink;
use preview_core::{
    BulkReassembler, ChannelSet, Connection, ConnectionInfo, DecodeLoop, HdrImage, InterfaceServer,
    PreviewError, RemoteControl, SampleRates, ServerConfig, SessionPhase, VideoClient, names,
    sync_with_peer,
};
use tokio::runtime::Runtime;

const TIMEOUT: Duration = Duration::from_secs(5);

// ── Helpers ──────────────────────────────────────────────────────

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn start_server(handshake_timeout: Duration) -> InterfaceServer {
    let mut server = InterfaceServer::new(ServerConfig {
        bind_address: "127.0.0.1".into(),
        port: 0,
        handshake_timeout,
        hdr_chunk_len: 1000,
        ..Default::default()
    });
    server.start().unwrap();
    server
}

/// Poll `cond` every 5 ms for up to two seconds.
fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn server_info(server: &InterfaceServer) -> ConnectionInfo {
    assert!(wait_for(|| server.local_addr().is_some()), "server never bound");
    let addr = server.local_addr().unwrap();
    ConnectionInfo::new(addr.ip().to_string(), addr.port())
}

fn connect(rt: &Runtime, server: &InterfaceServer) -> Connection {
    let info = server_info(server);
    rt.block_on(Connection::connect(&info, Arc::new(ChannelSet::default_set())))
        .unwrap()
}

fn sync(rt: &Runtime, conn: &Connection) {
    rt.block_on(sync_with_peer(conn.muxer(), conn.demuxer(), TIMEOUT))
        .unwrap();
}

fn gradient(width: u32, height: u32, shift: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            rgb.push(((x + shift) % 256) as u8);
            rgb.push((y % 256) as u8);
            rgb.push(128);
        }
    }
    rgb
}

// ── Handshake ────────────────────────────────────────────────────

#[test]
fn test_server_becomes_ready_after_handshake() {
    let rt = runtime();
    let server = start_server(TIMEOUT);
    let conn = connect(&rt, &server);

    assert!(!server.wait_until_ready(Duration::from_millis(50)));
    sync(&rt, &conn);
    assert!(server.wait_until_ready(TIMEOUT));
    assert!(server.phase().is_synced());
    assert!(server.phase().peer().is_some_and(|p| p.ip().is_loopback()));
    assert!(server.to_string().contains("ready=true"));
}

#[test]
fn test_no_state_callback_before_handshake() {
    let rt = runtime();
    let server = start_server(TIMEOUT);
    let conn = connect(&rt, &server);

    // Sent before this side's ready marker: the server must hold it.
    let control = RemoteControl::new(conn.muxer().clone());
    control.set_exposure(3.0).unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(!server.state_changed());
    assert_eq!(server.state().exposure, 0.0);

    sync(&rt, &conn);
    assert!(wait_for(|| server.state_changed()));
    assert_eq!(server.consume_state().exposure, 3.0);
}

#[test]
fn test_handshake_timeout_stops_server() {
    let rt = runtime();
    let server = start_server(Duration::from_millis(200));
    let _conn = connect(&rt, &server);

    assert!(wait_for(|| !server.is_running()));
    assert!(!server.is_ready());
    assert_eq!(server.phase(), SessionPhase::Stopped);
}

#[test]
fn test_stop_before_client_connects() {
    let mut server = start_server(TIMEOUT);
    let _ = server_info(&server);
    assert_eq!(server.phase(), SessionPhase::Waiting { peer: None });
    server.stop();
    assert!(!server.is_running());
    assert_eq!(server.phase(), SessionPhase::Stopped);
    assert!(!server.wait_until_ready(Duration::ZERO));
}

// ── Session state ────────────────────────────────────────────────

#[test]
fn test_controls_reach_server_state() {
    let rt = runtime();
    let server = start_server(TIMEOUT);
    let conn = connect(&rt, &server);
    sync(&rt, &conn);
    assert!(server.wait_until_ready(TIMEOUT));

    let control = RemoteControl::new(conn.muxer().clone());
    control.set_gamma(1.8).unwrap();
    control.set_fov_degrees(45.0).unwrap();
    control.set_prompt("studio lighting").unwrap();
    control.detach().unwrap();

    assert!(wait_for(|| server.state().detach));
    let state = server.consume_state();
    assert_eq!(state.gamma, 1.8);
    assert!((state.fov_radians - 45f32.to_radians()).abs() < 1e-6);
    assert_eq!(state.prompt, "studio lighting");
    assert!(!server.state_changed());
}

#[test]
fn test_telemetry_reaches_client() {
    let rt = runtime();
    let server = start_server(TIMEOUT);
    let conn = connect(&rt, &server);

    let progress = Arc::new(Mutex::new(None));
    let rates = Arc::new(Mutex::new(None));
    let _p = {
        let progress = Arc::clone(&progress);
        conn.demuxer()
            .subscribe_value::<f32, _>(names::PROGRESS, move |v| {
                *progress.lock().unwrap() = Some(v);
            })
            .unwrap()
    };
    let _r = {
        let rates = Arc::clone(&rates);
        conn.demuxer()
            .subscribe_value::<SampleRates, _>(names::SAMPLE_RATE, move |v| {
                *rates.lock().unwrap() = Some(v);
            })
            .unwrap()
    };
    sync(&rt, &conn);
    assert!(server.wait_until_ready(TIMEOUT));

    server.update_progress(3, 4).unwrap();
    server.update_sample_rate(1.5e6, 4.0e6).unwrap();
    assert!(wait_for(|| rates.lock().unwrap().is_some()));
    assert_eq!(*progress.lock().unwrap(), Some(0.75));
    assert_eq!(*rates.lock().unwrap(), Some(SampleRates::new(1.5e6, 4.0e6)));
}

#[test]
fn test_client_disconnect_ends_session() {
    let rt = runtime();
    let server = start_server(TIMEOUT);
    let conn = connect(&rt, &server);
    sync(&rt, &conn);
    assert!(server.wait_until_ready(TIMEOUT));

    drop(conn);
    assert!(wait_for(|| !server.is_running()));
    assert_eq!(server.phase(), SessionPhase::Stopped);
    assert!(matches!(
        server.update_progress(1, 2),
        Err(PreviewError::ProtocolViolation(_))
    ));
}

// ── Bulk transfer ────────────────────────────────────────────────

#[test]
fn test_hdr_image_over_the_wire() {
    let rt = runtime();
    let server = start_server(TIMEOUT);
    let conn = connect(&rt, &server);

    let display = DisplaySink::new();
    let reassembler = Arc::new(BulkReassembler::new(display.clone()).unwrap());
    let _subs = reassembler.subscribe(conn.demuxer()).unwrap();
    sync(&rt, &conn);
    assert!(server.wait_until_ready(TIMEOUT));

    let (w, h) = (40u32, 30u32);
    let samples: Vec<f32> = (0..w * h * 3).map(|i| i as f32 * 0.25).collect();
    let image = HdrImage::new(w, h, samples).unwrap();
    // 3600 samples in chunks of 1000.
    assert_eq!(server.send_hdr_image(&image).unwrap(), 4);

    assert!(wait_for(|| display.generation() == 1));
    assert_eq!(display.latest().unwrap(), image);
    assert_eq!(reassembler.current_image().unwrap(), image);
}

// ── Video ────────────────────────────────────────────────────────

#[test]
fn test_video_stream_decodes_with_nonzero_fps() {
    let rt = runtime();
    let server = start_server(TIMEOUT);
    let conn = connect(&rt, &server);
    let mut video = VideoClient::new(conn.demuxer(), names::RENDER_PREVIEW).unwrap();
    sync(&rt, &conn);
    assert!(server.wait_until_ready(TIMEOUT));

    let (w, h) = (32u32, 16u32);
    server.initialise_video_stream(w, h).unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            let mut shift = 0;
            while !done.load(Ordering::Acquire) {
                server.send_preview_frame(&gradient(w, h, shift), w, h).unwrap();
                shift += 1;
                thread::sleep(Duration::from_millis(10));
            }
        });

        video.initialise_video_stream(TIMEOUT).unwrap();
        assert_eq!(video.frame_size(), Some((w, h)));
        let mut decode = DecodeLoop::start(video, 3).unwrap();
        let bridge = decode.bridge();

        assert!(wait_for(|| bridge.frames_decoded() >= 5 && bridge.current_fps() > 0.0));
        assert!(bridge.current_bandwidth_mbps() > 0.0);
        assert!(decode.stream_ok());
        assert!(bridge.take_new_frame());

        // Blue channel is constant; the red channel is a ramp.
        let frame = bridge.snapshot();
        assert_eq!(frame.pixel(0, 0).unwrap()[2], 128);
        assert_eq!(frame.pixel(1, 3).unwrap()[1], 3);

        done.store(true, Ordering::Release);
        decode.stop();
    });
}

#[test]
fn test_frame_size_mismatch_rejected() {
    let rt = runtime();
    let server = start_server(TIMEOUT);
    let conn = connect(&rt, &server);
    sync(&rt, &conn);
    assert!(server.wait_until_ready(TIMEOUT));

    assert!(server.send_preview_frame(&[0; 12], 2, 2).is_err());
    server.initialise_video_stream(4, 4).unwrap();
    assert!(matches!(
        server.send_preview_frame(&[0; 12], 2, 2),
        Err(PreviewError::InvalidFrame(_))
    ));
}
