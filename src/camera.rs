//! Pi camera as an MJPEG frame source.
//!
//! The encoder runs as a child process writing concatenated JPEGs to stdout.
//! [`JpegSplitter`] cuts that byte stream into frames and the newest frame is
//! published on a `watch` channel: readers never queue, they only see the
//! latest picture.

use std::convert::Infallible;
use std::process::Stdio;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::config::{CAMERA_HEIGHT, CAMERA_PROGRAM, CAMERA_WIDTH, STREAM_BOUNDARY};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const READ_CHUNK: usize = 64 * 1024;

/// Largest partial frame kept while waiting for its end marker
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Camera encoder invocation
#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub program: String,
    pub width: u32,
    pub height: u32,
    pub hflip: bool,
    pub vflip: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        // Camera is mounted upside down
        Self {
            program: CAMERA_PROGRAM.to_string(),
            width: CAMERA_WIDTH,
            height: CAMERA_HEIGHT,
            hflip: true,
            vflip: true,
        }
    }
}

impl CameraConfig {
    /// rpicam-vid arguments for endless MJPEG on stdout without preview
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            "0".to_string(),
            "--nopreview".to_string(),
            "--codec".to_string(),
            "mjpeg".to_string(),
            "--width".to_string(),
            self.width.to_string(),
            "--height".to_string(),
            self.height.to_string(),
        ];
        if self.hflip {
            args.push("--hflip".to_string());
        }
        if self.vflip {
            args.push("--vflip".to_string());
        }
        args.extend(["-o".to_string(), "-".to_string()]);
        args
    }
}

/// Splits a byte stream of back-to-back JPEGs into frames
#[derive(Debug)]
pub struct JpegSplitter {
    buf: Vec<u8>,
    limit: usize,
}

impl Default for JpegSplitter {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|p| p + from)
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a partial frame once it grows past `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    /// Feed bytes, returning every frame completed by them
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find(&self.buf, &SOI, 0) else {
                // Keep a trailing 0xFF in case it begins a marker
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                self.buf.drain(..self.buf.len() - keep);
                break;
            };
            if start > 0 {
                self.buf.drain(..start);
            }
            let Some(end) = find(&self.buf, &EOI, SOI.len()) else {
                if self.buf.len() > self.limit {
                    warn!("Dropping {} byte frame with no end marker", self.buf.len());
                    self.buf.clear();
                }
                break;
            };
            let frame: Vec<u8> = self.buf.drain(..end + EOI.len()).collect();
            frames.push(Bytes::from(frame));
        }
        frames
    }
}

/// Cheap handle on the latest camera frame
#[derive(Debug, Clone)]
pub struct FrameFeed {
    rx: watch::Receiver<Option<Bytes>>,
}

impl FrameFeed {
    /// Feed plus the sender that publishes into it
    pub fn channel() -> (watch::Sender<Option<Bytes>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { rx })
    }

    pub fn latest(&self) -> Option<Bytes> {
        self.rx.borrow().clone()
    }

    /// Frames as they arrive, starting with the current one
    pub fn frames(&self) -> impl Stream<Item = Bytes> + Send + 'static {
        WatchStream::new(self.rx.clone()).filter_map(|frame| frame)
    }

    /// Frames wrapped as `multipart/x-mixed-replace` parts
    pub fn multipart(&self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        self.frames().map(|frame| Ok(multipart_part(&frame)))
    }
}

/// Content-Type of the MJPEG stream
pub fn multipart_content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={}", STREAM_BOUNDARY)
}

/// One boundary-delimited JPEG part
pub fn multipart_part(frame: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        STREAM_BOUNDARY,
        frame.len()
    );
    let mut part = Vec::with_capacity(header.len() + frame.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(frame);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

/// Running camera encoder
pub struct Camera {
    child: Child,
    reader: JoinHandle<()>,
    feed: FrameFeed,
}

impl Camera {
    /// Spawn the encoder and start publishing frames
    pub fn start(config: &CameraConfig) -> std::io::Result<Self> {
        info!("Starting camera: {} {}x{}", config.program, config.width, config.height);
        let mut child = Command::new(&config.program)
            .args(config.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("camera stdout not captured"))?;

        let (tx, feed) = FrameFeed::channel();
        let reader = tokio::spawn(async move {
            let mut splitter = JpegSplitter::new();
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => {
                        warn!("Camera stream ended");
                        break;
                    }
                    Ok(n) => {
                        for frame in splitter.push(&chunk[..n]) {
                            debug!("Frame {} bytes", frame.len());
                            tx.send_replace(Some(frame));
                        }
                    }
                    Err(e) => {
                        warn!("Camera read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            child,
            reader,
            feed,
        })
    }

    pub fn feed(&self) -> FrameFeed {
        self.feed.clone()
    }

    /// Stop recording and reap the encoder
    pub async fn stop(mut self) {
        info!("Stopping camera");
        self.reader.abort();
        if let Err(e) = self.child.kill().await {
            warn!("Failed to stop camera: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = SOI.to_vec();
        v.extend_from_slice(body);
        v.extend_from_slice(&EOI);
        v
    }

    #[test]
    fn test_splits_back_to_back_frames() {
        let mut data = jpeg(b"one");
        data.extend(jpeg(b"two"));

        let frames = JpegSplitter::new().push(&data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), jpeg(b"one").as_slice());
        assert_eq!(frames[1].as_ref(), jpeg(b"two").as_slice());
    }

    #[test]
    fn test_frame_across_chunks_and_markers() {
        let frame = jpeg(b"abcdef");
        let mut splitter = JpegSplitter::new();

        // Split inside the EOI marker itself
        let cut = frame.len() - 1;
        assert!(splitter.push(&frame[..cut]).is_empty());
        let frames = splitter.push(&frame[cut..]);
        assert_eq!(frames, vec![Bytes::from(frame)]);
    }

    #[test]
    fn test_leading_garbage_dropped() {
        let mut data = b"noise\xFF".to_vec();
        data.extend(jpeg(b"x"));
        let frames = JpegSplitter::new().push(&data);
        assert_eq!(frames, vec![Bytes::from(jpeg(b"x"))]);
    }

    #[test]
    fn test_soi_split_between_chunks() {
        let frame = jpeg(b"zz");
        let mut splitter = JpegSplitter::new();
        assert!(splitter.push(&frame[..1]).is_empty());
        assert_eq!(splitter.push(&frame[1..]), vec![Bytes::from(frame)]);
    }

    #[test]
    fn test_unterminated_frame_is_dropped() {
        let mut splitter = JpegSplitter::with_limit(16);
        let mut corrupt = SOI.to_vec();
        corrupt.extend_from_slice(&[0x11; 32]);
        assert!(splitter.push(&corrupt).is_empty());
        assert!(splitter.buf.is_empty());

        // The stream recovers at the next complete frame
        assert_eq!(splitter.push(&jpeg(b"ok")), vec![Bytes::from(jpeg(b"ok"))]);
    }

    #[test]
    fn test_multipart_part_layout() {
        let part = multipart_part(b"JPG");
        assert_eq!(
            part.as_ref(),
            b"--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\nJPG\r\n"
        );
        assert_eq!(
            multipart_content_type(),
            "multipart/x-mixed-replace; boundary=FRAME"
        );
    }

    #[test]
    fn test_feed_keeps_latest_only() {
        let (tx, feed) = FrameFeed::channel();
        assert!(feed.latest().is_none());
        tx.send_replace(Some(Bytes::from_static(b"a")));
        tx.send_replace(Some(Bytes::from_static(b"b")));
        assert_eq!(feed.latest(), Some(Bytes::from_static(b"b")));
    }

    #[test]
    fn test_camera_args() {
        let args = CameraConfig::default().args();
        assert!(args.windows(2).any(|w| w == ["--codec", "mjpeg"]));
        assert!(args.contains(&"--hflip".to_string()));
        assert_eq!(args[args.len() - 2..], ["-o".to_string(), "-".to_string()]);
    }
}
