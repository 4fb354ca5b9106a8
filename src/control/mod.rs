// SPDX-License-Identifier: GPL-3.0-only

//! Remote control link
//!
//! A write-only byte channel to a companion device. The capture pipeline
//! never reads from it; it only pushes opaque payloads such as the depth
//! thumbnail after a still capture.

use crate::pipelines::photo::ThumbnailGrid;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{trace, warn};

/// Failure to hand bytes to the link
#[derive(Debug)]
pub enum LinkError {
    /// The peer went away
    Closed,
    Io(std::io::Error),
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::Closed => write!(f, "Control link closed"),
            LinkError::Io(e) => write!(f, "Control link I/O error: {}", e),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LinkError::Io(e) => Some(e),
            LinkError::Closed => None,
        }
    }
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::BrokenPipe {
            LinkError::Closed
        } else {
            LinkError::Io(e)
        }
    }
}

/// Fire-and-forget byte sink
pub trait ControlLink: Send + Sync {
    fn send(&self, payload: &[u8]) -> Result<(), LinkError>;
}

/// Link over any byte sink: serial device, file, stdout
pub struct WriterLink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterLink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> ControlLink for WriterLink<W> {
    fn send(&self, payload: &[u8]) -> Result<(), LinkError> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(payload)?;
        writer.flush()?;
        trace!(bytes = payload.len(), "Control link write");
        Ok(())
    }
}

/// Link into an in-process channel
pub struct ChannelLink {
    sender: UnboundedSender<Vec<u8>>,
}

impl ChannelLink {
    pub fn new(sender: UnboundedSender<Vec<u8>>) -> Self {
        Self { sender }
    }
}

impl ControlLink for ChannelLink {
    fn send(&self, payload: &[u8]) -> Result<(), LinkError> {
        self.sender
            .send(payload.to_vec())
            .map_err(|_| LinkError::Closed)
    }
}

/// Thumbnail consumer that writes each grid's row-major bytes to `link`
///
/// Send failures are logged and swallowed.
pub fn link_thumbnail_handler(
    link: Arc<dyn ControlLink>,
) -> impl Fn(ThumbnailGrid) + Send + Sync + 'static {
    move |grid| {
        if let Err(e) = link.send(grid.as_bytes()) {
            warn!(
                error = %e,
                width = grid.width(),
                height = grid.height(),
                "Failed to send thumbnail over control link"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::{BufferId, DepthEncoding, DepthMap, Dimensions};
    use crate::media::depth_float::encode_depth_values;
    use crate::pipelines::photo::{ThumbnailConfig, reduce_depth};

    fn grid() -> ThumbnailGrid {
        let values: Vec<f32> = (0..64).map(|v| v as f32).collect();
        let map = DepthMap::packed(
            BufferId(1),
            Dimensions::new(8, 8),
            DepthEncoding::DepthFloat16,
            Arc::from(encode_depth_values(&values, DepthEncoding::DepthFloat16)),
        );
        reduce_depth(
            &map,
            &ThumbnailConfig {
                width: 2,
                height: 4,
                ..ThumbnailConfig::default()
            },
        )
        .unwrap()
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writer_link_appends_payloads() {
        let link = WriterLink::new(Vec::new());
        link.send(b"ab").unwrap();
        link.send(b"c").unwrap();
        assert_eq!(link.into_inner(), b"abc");
    }

    #[test]
    fn test_broken_pipe_is_closed() {
        let link = WriterLink::new(BrokenPipe);
        assert!(matches!(link.send(b"x"), Err(LinkError::Closed)));
    }

    #[test]
    fn test_channel_link() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let link = ChannelLink::new(tx);
        link.send(&[1, 2, 3]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![1, 2, 3]);

        drop(rx);
        assert!(matches!(link.send(&[4]), Err(LinkError::Closed)));
    }

    #[test]
    fn test_thumbnail_handler_sends_row_major_bytes() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handler = link_thumbnail_handler(Arc::new(ChannelLink::new(tx)));
        let grid = grid();

        handler(grid.clone());
        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.len(), 8);
        assert_eq!(sent, grid.as_bytes());
    }

    #[test]
    fn test_thumbnail_handler_swallows_failures() {
        let handler = link_thumbnail_handler(Arc::new(WriterLink::new(BrokenPipe)));
        handler(grid());
    }
}
