//! Integration tests for the datagram image link on loopback.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rov_hub::config::{StateConfig, VideoConfig};
use rov_hub::protocol::ControlMessage;
use rov_hub::state::{Flag, Measurement, SharedState};
use rov_hub::video::DatagramImageLink;
use rov_hub::HubError;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

fn png() -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 6, Rgb([10, 120, 200])));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn video_config(photo_dir: &TempDir, refresh_interval_ms: u64) -> VideoConfig {
    VideoConfig {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        refresh_interval_ms,
        photo_dir: photo_dir.path().to_path_buf(),
        ..VideoConfig::default()
    }
}

async fn wait_for_sequence(state: &SharedState, at_least: u64) {
    timeout(Duration::from_secs(2), async {
        while state.image_sequence() < at_least {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("image never arrived");
}

async fn recv_text(socket: &UdpSocket) -> String {
    let mut buffer = [0u8; 256];
    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buffer))
        .await
        .expect("no control datagram")
        .unwrap();
    String::from_utf8_lossy(&buffer[..len]).into_owned()
}

#[tokio::test]
async fn test_control_goes_to_latest_sender() {
    let photos = TempDir::new().unwrap();
    let state = Arc::new(SharedState::new(&StateConfig::default()));
    let link = DatagramImageLink::bind(video_config(&photos, 60_000), state.clone())
        .await
        .unwrap();
    let receiver = tokio::spawn(link.clone().run());

    let err = link
        .send_control(&ControlMessage::ResetImageNumber)
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::NoReversePath));

    let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let payload = png();

    a.send_to(&payload, link.local_addr()).await.unwrap();
    wait_for_sequence(&state, 1).await;
    assert_eq!(link.reverse_path(), Some(a.local_addr().unwrap()));

    b.send_to(&payload, link.local_addr()).await.unwrap();
    wait_for_sequence(&state, 2).await;
    assert_eq!(link.reverse_path(), Some(b.local_addr().unwrap()));

    link.send_control(&ControlMessage::PhotoDelay(2.5))
        .await
        .unwrap();
    assert_eq!(recv_text(&b).await, "photoDelay:2.5");

    assert!(state.flag(Flag::Streaming));
    let image = state.image().expect("image published");
    assert_eq!((image.width(), image.height()), (8, 6));

    receiver.abort();
}

#[tokio::test]
async fn test_socket_is_rebound_periodically() {
    let photos = TempDir::new().unwrap();
    let state = Arc::new(SharedState::new(&StateConfig::default()));
    let link = DatagramImageLink::bind(video_config(&photos, 40), state.clone())
        .await
        .unwrap();
    let addr = link.local_addr();
    let receiver = tokio::spawn(link.clone().run());

    timeout(Duration::from_secs(2), async {
        while link.generation() < 3 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("socket was not rebound");
    assert_eq!(link.local_addr(), addr);

    // still receiving on the same address
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let payload = png();
    timeout(Duration::from_secs(2), async {
        while state.image_sequence() == 0 {
            sender.send_to(&payload, addr).await.unwrap();
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("nothing received after rebinding");

    receiver.abort();
}

#[tokio::test]
async fn test_undecodable_datagram_is_dropped() {
    let photos = TempDir::new().unwrap();
    let state = Arc::new(SharedState::new(&StateConfig::default()));
    let link = DatagramImageLink::bind(video_config(&photos, 60_000), state.clone())
        .await
        .unwrap();
    let from = "127.0.0.1:40000".parse().unwrap();

    link.handle_datagram(b"definitely not an image", from, Duration::from_millis(30));

    assert_eq!(state.image_sequence(), 0);
    assert!(state.image().is_none());
    assert!(!state.flag(Flag::Streaming));
    // the sender is still learned
    assert_eq!(link.reverse_path(), Some(from));
}

#[tokio::test]
async fn test_photo_mode_archives_and_announces() {
    let photos = TempDir::new().unwrap();
    let state = Arc::new(SharedState::new(&StateConfig::default()));
    let link = DatagramImageLink::bind(video_config(&photos, 60_000), state.clone())
        .await
        .unwrap();
    let streamer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let from = streamer.local_addr().unwrap();

    // no reverse path yet: the announcement waits for the first datagram
    state.set_flag(Flag::PhotoMode, true);

    let payload = png();
    link.handle_datagram(&payload, from, Duration::from_secs(2));
    assert_eq!(recv_text(&streamer).await, "photoMode:true");
    assert_eq!(state.measurement(Measurement::ImageNumber), 1.0);
    assert_eq!(state.measurement(Measurement::PhotoDelayFeedback), 2.0);

    // a quick follow-up frame is archived but is not a new photo
    link.handle_datagram(&payload, from, Duration::from_millis(10));
    assert_eq!(state.measurement(Measurement::ImageNumber), 1.0);

    timeout(Duration::from_secs(5), async {
        while link.photos().saved() < 2 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("photos were not saved");

    let day = std::fs::read_dir(photos.path())
        .unwrap()
        .next()
        .expect("dated directory")
        .unwrap()
        .path();
    let files: Vec<_> = std::fs::read_dir(day)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|name| name.starts_with("image_") && name.ends_with(".jpg")));

    // switching photo mode off is announced straight away through the observer
    state.set_flag(Flag::PhotoMode, false);
    assert_eq!(recv_text(&streamer).await, "photoMode:false");
}

#[tokio::test]
async fn test_outside_runtime_photos_are_saved_inline() {
    let photos = TempDir::new().unwrap();
    let state = Arc::new(SharedState::new(&StateConfig::default()));
    let link = DatagramImageLink::bind(video_config(&photos, 60_000), state.clone())
        .await
        .unwrap();
    state.set_flag(Flag::PhotoMode, true);

    let worker = link.clone();
    let from = "127.0.0.1:9".parse().unwrap();
    std::thread::spawn(move || worker.handle_datagram(&png(), from, Duration::from_secs(1)))
        .join()
        .unwrap();

    assert_eq!(link.photos().saved(), 1);
    assert_eq!(state.image_sequence(), 1);
}

#[tokio::test]
async fn test_pending_photo_writes_are_bounded() {
    let photos = TempDir::new().unwrap();
    let state = Arc::new(SharedState::new(&StateConfig::default()));
    let config = VideoConfig {
        max_pending_photos: 1,
        ..video_config(&photos, 60_000)
    };
    let link = DatagramImageLink::bind(config, state.clone()).await.unwrap();
    state.set_flag(Flag::PhotoMode, true);

    let payload = png();
    let from = "127.0.0.1:9".parse().unwrap();
    for _ in 0..20 {
        link.handle_datagram(&payload, from, Duration::from_millis(10));
    }

    // every frame is either written or counted as skipped
    timeout(Duration::from_secs(5), async {
        while link.photos().saved() + link.skipped_photos() < 20 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("photo writes never settled");
    assert!(link.photos().saved() >= 1);
    assert_eq!(state.image_sequence(), 20);
}
