//! Frame fan-out to connected stream clients
//!
//! Holds the set of attached clients and the last published frame. Each
//! publish composes the multipart body part once and hands the same bytes
//! to every client queue; clients that have gone away or stopped reading
//! are dropped during that same publish.

use arc_swap::ArcSwap;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::frame::Frame;

/// Multipart boundary token
pub const BOUNDARY: &str = "mjpegstream";

/// Content-Type header value for the stream response
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=mjpegstream";

/// Parts queued per client before it counts as failed
///
/// At 30 fps this is roughly a quarter second of stalled reads.
pub const CLIENT_QUEUE_PARTS: usize = 8;

/// Opening delimiter written once when a stream response begins
pub fn opening_boundary() -> Bytes {
    Bytes::from_static(b"--mjpegstream\r\n")
}

/// Compose one body part: part headers, JPEG payload, trailing delimiter
fn compose_part(frame: &Frame) -> Bytes {
    let header = format!(
        "Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.len()
    );
    let trailer = b"\r\n--mjpegstream\r\n";
    let mut part = BytesMut::with_capacity(header.len() + frame.len() + trailer.len());
    part.put_slice(header.as_bytes());
    part.put_slice(frame.data());
    part.put_slice(trailer);
    part.freeze()
}

struct Client {
    id: u64,
    tx: mpsc::Sender<Bytes>,
}

/// Fan-out hub between the capture session and HTTP stream clients
pub struct Broadcaster {
    clients: Mutex<Vec<Client>>,
    /// Latest published frame - ArcSwap for lock-free snapshot reads
    last_frame: ArcSwap<Option<Frame>>,
    next_id: AtomicU64,
    lifetime_clients: AtomicU64,
    frames_published: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            last_frame: ArcSwap::from_pointee(None),
            next_id: AtomicU64::new(1),
            lifetime_clients: AtomicU64::new(0),
            frames_published: AtomicU64::new(0),
        }
    }

    /// Register a new stream client
    ///
    /// If a frame is cached it is queued immediately, so the client sees a
    /// picture before the next capture frame arrives. The cached part is
    /// queued under the set lock, ahead of anything published afterwards.
    pub fn attach(self: &Arc<Self>) -> StreamClient {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_PARTS);

        {
            let mut clients = self.clients.lock();
            if let Some(frame) = (**self.last_frame.load()).as_ref() {
                let _ = tx.try_send(compose_part(frame));
            }
            clients.push(Client { id, tx });
        }
        self.lifetime_clients.fetch_add(1, Ordering::Relaxed);
        info!(
            client_id = id,
            total = self.client_count(),
            "Stream client connected"
        );

        StreamClient {
            id,
            rx,
            broadcaster: Arc::clone(self),
        }
    }

    fn detach(&self, id: u64) {
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|c| c.id != id);
        if clients.len() < before {
            info!(
                client_id = id,
                total = clients.len(),
                "Stream client disconnected"
            );
        }
    }

    /// Publish a frame to every attached client
    ///
    /// Composes the part once, updates the cache, and delivers without
    /// awaiting. A client whose queue is full or closed is removed here;
    /// the rest still get the frame. Publishing with no clients attached
    /// still refreshes the cache.
    pub fn publish(&self, frame: &Frame) {
        let part = compose_part(frame);
        let mut clients = self.clients.lock();
        // Cache update happens under the set lock so a concurrent attach
        // queues either the previous frame or this one, never neither.
        self.last_frame.store(Arc::new(Some(frame.clone())));
        clients.retain(|client| match client.tx.try_send(part.clone()) {
            Ok(()) => true,
            Err(_) => {
                debug!(client_id = client.id, "Removing unresponsive stream client");
                false
            }
        });
        drop(clients);
        self.frames_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Latest published frame, if any
    pub fn last_frame(&self) -> Option<Frame> {
        (**self.last_frame.load()).clone()
    }

    /// Forget the cached frame (session teardown)
    pub fn clear_last_frame(&self) {
        self.last_frame.store(Arc::new(None));
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn lifetime_clients(&self) -> u64 {
        self.lifetime_clients.load(Ordering::Relaxed)
    }

    pub fn frames_published(&self) -> u64 {
        self.frames_published.load(Ordering::Relaxed)
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of one attached client
///
/// Yields fully framed multipart parts in publish order. Detaches from the
/// broadcaster when dropped, so an aborted HTTP response cleans up itself.
pub struct StreamClient {
    id: u64,
    rx: mpsc::Receiver<Bytes>,
    broadcaster: Arc<Broadcaster>,
}

impl StreamClient {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next part; `None` once detached by a failed publish
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.broadcaster.detach(self.id);
    }
}
