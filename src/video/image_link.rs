//! Datagram image link.
//!
//! Every inbound datagram is one encoded image. The sender of the most recent
//! datagram is the reverse path: all outbound control datagrams go there. The
//! receive socket is closed and rebound on the same local address every
//! `refresh_interval`, whether or not anything went wrong.

use super::photo::PhotoArchive;
use crate::config::VideoConfig;
use crate::error::{AppResult, HubError};
use crate::protocol::ControlMessage;
use crate::state::{Flag, Measurement, SharedState, StateObserver};
use chrono::Local;
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

const REBIND_RETRY: Duration = Duration::from_secs(1);

/// Receives the image stream and sends control datagrams back.
pub struct DatagramImageLink {
    config: VideoConfig,
    state: Arc<SharedState>,
    local_addr: SocketAddr,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    generation: AtomicU64,
    reverse_path: Mutex<Option<SocketAddr>>,
    announced_photo_mode: Mutex<bool>,
    photos: PhotoArchive,
    pending_photos: Arc<Semaphore>,
    skipped_photos: AtomicU64,
    observer: OnceLock<Arc<dyn StateObserver>>,
}

impl DatagramImageLink {
    /// Bind the receive socket and start following the photo-mode flag.
    ///
    /// Binding to port 0 picks a free port; later rebinds reuse it.
    pub async fn bind(config: VideoConfig, state: Arc<SharedState>) -> AppResult<Arc<Self>> {
        let socket = UdpSocket::bind(config.address()).await?;
        let local_addr = socket.local_addr()?;
        info!(addr = %local_addr, "Image link bound");

        let announced = state.flag(Flag::PhotoMode);
        let link = Arc::new(Self {
            photos: PhotoArchive::new(config.photo_dir.clone()),
            pending_photos: Arc::new(Semaphore::new(config.max_pending_photos.max(1))),
            config,
            state,
            local_addr,
            socket: RwLock::new(Some(Arc::new(socket))),
            generation: AtomicU64::new(0),
            skipped_photos: AtomicU64::new(0),
            reverse_path: Mutex::new(None),
            announced_photo_mode: Mutex::new(announced),
            observer: OnceLock::new(),
        });

        let weak = Arc::downgrade(&link);
        let observer: Arc<dyn StateObserver> = Arc::new(move || {
            if let Some(link) = weak.upgrade() {
                link.sync_photo_mode();
            }
        });
        link.state.subscribe(&observer);
        // the store only holds it weakly
        let _ = link.observer.set(observer);

        Ok(link)
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sender of the most recent datagram.
    pub fn reverse_path(&self) -> Option<SocketAddr> {
        *self.reverse_path.lock()
    }

    /// Number of times the socket has been reopened.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// The photo archive.
    pub fn photos(&self) -> &PhotoArchive {
        &self.photos
    }

    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket.read().clone()
    }

    /// Send a control datagram to the reverse path.
    ///
    /// # Errors
    /// [`HubError::NoReversePath`] before the first datagram has arrived,
    /// [`HubError::NotConnected`] while the socket is being rebound.
    pub async fn send_control(&self, message: &ControlMessage) -> AppResult<()> {
        let target = self.reverse_path().ok_or(HubError::NoReversePath)?;
        let socket = self
            .socket()
            .ok_or_else(|| HubError::NotConnected("video".into()))?;
        socket
            .send_to(message.to_string().as_bytes(), target)
            .await
            .map_err(|e| HubError::connection("video", e))?;
        debug!(%target, %message, "Control datagram sent");
        Ok(())
    }

    /// Receive forever, rebinding every refresh interval. Spawn it.
    #[instrument(skip(self), fields(addr = %self.local_addr))]
    pub async fn run(self: Arc<Self>) {
        let mut buffer = vec![0u8; self.config.max_datagram_bytes.max(1)];
        loop {
            if let Some(socket) = self.socket() {
                self.receive_until_refresh(&socket, &mut buffer).await;
            }
            self.rebind().await;
        }
    }

    async fn receive_until_refresh(&self, socket: &UdpSocket, buffer: &mut [u8]) {
        let refresh = sleep(self.config.refresh_interval());
        tokio::pin!(refresh);
        let mut waiting_since = Instant::now();

        loop {
            tokio::select! {
                _ = &mut refresh => return,
                received = socket.recv_from(buffer) => match received {
                    Ok((len, from)) => {
                        let waited = waiting_since.elapsed();
                        self.handle_datagram(&buffer[..len], from, waited);
                        waiting_since = Instant::now();
                    }
                    Err(e) => {
                        // ICMP errors from earlier sends surface here on some platforms
                        warn!(error = %e, "Image socket receive failed");
                        self.state.set_flag(Flag::Streaming, false);
                        return;
                    }
                },
            }
        }
    }

    async fn rebind(&self) {
        loop {
            // the old socket must be gone before its port can be bound again
            self.socket.write().take();
            match UdpSocket::bind(self.local_addr).await {
                Ok(socket) => {
                    *self.socket.write() = Some(Arc::new(socket));
                    let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                    debug!(generation, "Image socket reopened");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Image socket rebind failed");
                    self.state.set_flag(Flag::Streaming, false);
                    sleep(REBIND_RETRY).await;
                }
            }
        }
    }

    /// Handle one received datagram: learn the sender, decode and publish the image.
    ///
    /// Inside a tokio runtime photo writes run on the blocking pool, at most
    /// `max_pending_photos` at a time; elsewhere they run inline.
    pub fn handle_datagram(&self, payload: &[u8], from: SocketAddr, waited: Duration) {
        *self.reverse_path.lock() = Some(from);
        self.state
            .set_measurement(Measurement::PhotoDelayFeedback, waited.as_secs_f64());

        let image = match image::load_from_memory(payload) {
            Ok(image) => image,
            Err(e) => {
                let fault = HubError::ImageDecodeFault(e.to_string());
                debug!(%from, bytes = payload.len(), error = %fault, "Dropping datagram");
                return;
            }
        };

        if self.state.flag(Flag::PhotoMode) {
            if waited > self.config.photo_wait_threshold() {
                let number = self.state.measurement(Measurement::ImageNumber);
                self.state
                    .set_measurement(Measurement::ImageNumber, number + 1.0);
            }
            self.archive(image.clone());
        }

        self.state.set_image(image);
        self.state.set_flag(Flag::Streaming, true);
        self.sync_photo_mode();
    }

    fn archive(&self, image: image::DynamicImage) {
        let Ok(runtime) = Handle::try_current() else {
            save_photo(&self.photos, &image);
            return;
        };
        let Ok(permit) = Arc::clone(&self.pending_photos).try_acquire_owned() else {
            self.skipped_photos.fetch_add(1, Ordering::AcqRel);
            debug!("Photo writes backed up, frame not archived");
            return;
        };
        let photos = self.photos.clone();
        runtime.spawn_blocking(move || {
            save_photo(&photos, &image);
            drop(permit);
        });
    }

    /// Frames not archived because too many photo writes were pending.
    pub fn skipped_photos(&self) -> u64 {
        self.skipped_photos.load(Ordering::Acquire)
    }

    /// Send `photoMode:<flag>` if the flag changed since it was last announced.
    /// Without a reverse path, or if the send would block, the announcement waits
    /// for the next call.
    fn sync_photo_mode(&self) {
        let current = self.state.flag(Flag::PhotoMode);
        let mut announced = self.announced_photo_mode.lock();
        if *announced == current {
            return;
        }
        let (Some(target), Some(socket)) = (self.reverse_path(), self.socket()) else {
            return;
        };
        let message = ControlMessage::PhotoMode(current).to_string();
        match socket.try_send_to(message.as_bytes(), target) {
            Ok(_) => {
                *announced = current;
                info!(%target, photo_mode = current, "Photo mode announced");
            }
            Err(e) => debug!(error = %e, "Photo mode announcement deferred"),
        }
    }
}

fn save_photo(photos: &PhotoArchive, image: &image::DynamicImage) {
    match photos.save(image, Local::now()) {
        Ok(path) => debug!(path = %path.display(), "Photo saved"),
        Err(e) => warn!(error = %e, "Could not save photo"),
    }
}

impl std::fmt::Debug for DatagramImageLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramImageLink")
            .field("local_addr", &self.local_addr)
            .field("reverse_path", &self.reverse_path())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}
