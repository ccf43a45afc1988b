//! Drives the bridge the way a C host does: handles in, handles out.

mod common;

use std::ffi::CStr;
use std::net::UdpSocket;
use std::os::raw::c_void;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use common::{RemotePeer, LOOPBACK_CONFIG_JSON};
use rtp2rtc::ffi::*;
use serial_test::serial;

extern "C" fn record_ports(video: u16, audio: u16, user_data: *mut c_void) {
    let tx = unsafe { &*(user_data as *const mpsc::Sender<(u16, u16)>) };
    let _ = tx.send((video, audio));
}

fn configure_loopback() {
    let json = LOOPBACK_CONFIG_JSON.as_bytes();
    assert!(unsafe { rtp2rtc_configure(json.as_ptr(), json.len()) });
}

fn build(raw: &[u8]) -> u64 {
    unsafe { rtp2rtc_build_offer(raw.as_ptr(), raw.len()) }
}

/// Runs `rtp2rtc_start` on its own thread, like a host's media thread.
/// Returns the reported ports and the thread to join after stopping.
fn start_in_background(session: u64) -> ((u16, u16), thread::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<(u16, u16)>();
    let runner = thread::spawn(move || {
        let user_data = &tx as *const mpsc::Sender<(u16, u16)> as *mut c_void;
        rtp2rtc_start(session, Some(record_ports), user_data, None);
    });
    let ports = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("ports callback never fired");
    (ports, runner)
}

#[test]
#[serial]
fn full_session_through_the_c_abi() {
    configure_loopback();
    let rt = tokio::runtime::Runtime::new().unwrap();
    let remote = rt.block_on(RemotePeer::new());
    let mut media_rx = remote.collect_media();
    let offer = rt.block_on(remote.offer_json());

    let session = rtp2rtc_init();
    assert_ne!(session, 0);

    // NUL-terminated, as a C string would arrive
    let mut raw = offer.into_bytes();
    raw.push(0);
    let desc = build(&raw);
    assert_ne!(desc, 0);

    let answer_ptr = rtp2rtc_signal_offer(session, desc);
    assert!(!answer_ptr.is_null());
    let answer = unsafe { CStr::from_ptr(answer_ptr) }
        .to_str()
        .unwrap()
        .to_owned();
    unsafe { rtp2rtc_free_cstring(answer_ptr) };
    rt.block_on(remote.accept_answer(&answer));

    // the description was consumed by signaling
    rtp2rtc_free_description(desc);

    let ((video, audio), runner) = start_in_background(session);
    assert_ne!(video, 0);
    assert_ne!(audio, 0);
    assert_ne!(video, audio);

    // the track drops writes until DTLS is up, so keep sending until one lands
    let producer = UdpSocket::bind("127.0.0.1:0").unwrap();
    for (port, kind, payload) in [
        (video, "video", [0xaa, 0xbb, 0xcc]),
        (audio, "audio", [0x11, 0x22, 0x33]),
    ] {
        let mut arrived = None;
        for seq in 1..=100u16 {
            let mut packet = vec![0x80, 0x60];
            packet.extend_from_slice(&seq.to_be_bytes());
            packet.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 2]);
            packet.extend_from_slice(&payload);
            producer.send_to(&packet, ("127.0.0.1", port)).unwrap();

            let got = rt.block_on(async {
                tokio::time::timeout(Duration::from_millis(100), async {
                    loop {
                        match media_rx.recv().await {
                            Some((k, p)) if k == kind => return Some(p),
                            Some(_) => continue,
                            None => return None,
                        }
                    }
                })
                .await
            });
            if let Ok(Some(p)) = got {
                arrived = Some(p);
                break;
            }
        }
        assert_eq!(arrived.as_deref(), Some(&payload[..]), "{kind} never arrived");
    }

    rtp2rtc_stop(session);
    rtp2rtc_stop(session);
    runner.join().unwrap();

    // both ports are free again once start has returned
    UdpSocket::bind(("127.0.0.1", video)).unwrap();
    UdpSocket::bind(("127.0.0.1", audio)).unwrap();

    rtp2rtc_free(session);
    rtp2rtc_free(session);
    rtp2rtc_stop(session);
    rt.block_on(remote.close());
}

#[test]
#[serial]
fn stale_and_zero_handles_are_harmless() {
    configure_loopback();
    rtp2rtc_stop(0);
    rtp2rtc_free(0);
    rtp2rtc_free_description(0);
    assert!(rtp2rtc_signal_offer(0, 0).is_null());

    let session = rtp2rtc_init();
    assert_ne!(session, 0);
    rtp2rtc_free(session);

    // stale after free: every call is a no-op or a sentinel
    rtp2rtc_stop(session);
    rtp2rtc_free(session);
    rtp2rtc_start(session, Some(record_ports), std::ptr::null_mut(), None);

    let raw = serde_json::json!({
        "type": "offer",
        "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n"
    })
    .to_string();
    let desc = build(raw.as_bytes());
    assert_ne!(desc, 0);
    assert!(rtp2rtc_signal_offer(session, desc).is_null());
    // a stale session leaves the description untouched
    rtp2rtc_free_description(desc);
}

#[test]
#[serial]
fn signaling_failure_still_allows_teardown() {
    configure_loopback();
    let session = rtp2rtc_init();
    assert_ne!(session, 0);

    let raw = serde_json::json!({
        "type": "offer",
        "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
                m=audio 9 UDP/TLS/RTP/SAVPF 111\r\nc=IN IP4 0.0.0.0\r\n\
                a=mid:0\r\na=recvonly\r\na=rtpmap:111 opus/48000/2\r\n"
    })
    .to_string();
    let desc = build(raw.as_bytes());
    assert_ne!(desc, 0);
    assert!(rtp2rtc_signal_offer(session, desc).is_null());

    // the failed attempt consumed the description
    assert!(rtp2rtc_signal_offer(session, desc).is_null());

    rtp2rtc_free(session);
}

#[test]
#[serial]
fn stop_before_start_ends_start_immediately() {
    configure_loopback();
    let session = rtp2rtc_init();
    assert_ne!(session, 0);
    rtp2rtc_stop(session);

    let (_, runner) = start_in_background(session);
    runner.join().unwrap();
    rtp2rtc_free(session);
}

#[test]
#[serial]
fn invalid_config_keeps_the_previous_one() {
    configure_loopback();
    let bad = br#"{"ice_servers":[{"id":"x","type":"turn","url":"turn:example.org"}]}"#;
    assert!(!unsafe { rtp2rtc_configure(bad.as_ptr(), bad.len()) });
    let session = rtp2rtc_init();
    assert_ne!(session, 0);
    rtp2rtc_free(session);
}
