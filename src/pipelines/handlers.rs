// SPDX-License-Identifier: GPL-3.0-only

//! Registered consumers of pipeline output
//!
//! Every endpoint is called on the sensor queue thread and must return
//! quickly; long work belongs on the consumer's own thread, which is what
//! [`channel_handler`] arranges.

use crate::media::CapturedFrame;
use crate::pipelines::photo::{EncodedPhoto, ThumbnailGrid};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

/// A fire-and-forget consumer of `T`
pub type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Consumers of fused frames, still frames, thumbnails and encoded photos
#[derive(Clone, Default)]
pub struct Handlers {
    pub on_frame: Option<Handler<CapturedFrame>>,
    pub on_still_frame: Option<Handler<CapturedFrame>>,
    pub on_thumbnail: Option<Handler<ThumbnailGrid>>,
    pub on_photo: Option<Handler<EncodedPhoto>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_frame(mut self, handler: impl Fn(CapturedFrame) + Send + Sync + 'static) -> Self {
        self.on_frame = Some(Arc::new(handler));
        self
    }

    pub fn on_still_frame(mut self, handler: impl Fn(CapturedFrame) + Send + Sync + 'static) -> Self {
        self.on_still_frame = Some(Arc::new(handler));
        self
    }

    pub fn on_thumbnail(mut self, handler: impl Fn(ThumbnailGrid) + Send + Sync + 'static) -> Self {
        self.on_thumbnail = Some(Arc::new(handler));
        self
    }

    pub fn on_photo(mut self, handler: impl Fn(EncodedPhoto) + Send + Sync + 'static) -> Self {
        self.on_photo = Some(Arc::new(handler));
        self
    }

    pub(crate) fn frame(&self, frame: CapturedFrame) {
        if let Some(handler) = &self.on_frame {
            handler(frame);
        }
    }

    pub(crate) fn still_frame(&self, frame: CapturedFrame) {
        if let Some(handler) = &self.on_still_frame {
            handler(frame);
        }
    }

    /// Whether a thumbnail consumer is registered
    pub(crate) fn wants_thumbnail(&self) -> bool {
        self.on_thumbnail.is_some()
    }

    pub(crate) fn thumbnail(&self, grid: ThumbnailGrid) {
        if let Some(handler) = &self.on_thumbnail {
            handler(grid);
        }
    }

    pub(crate) fn wants_photo(&self) -> bool {
        self.on_photo.is_some()
    }

    pub(crate) fn photo(&self, photo: EncodedPhoto) {
        if let Some(handler) = &self.on_photo {
            handler(photo);
        }
    }
}

/// Forward every value into an unbounded channel
///
/// Values sent after the receiver is gone are discarded.
pub fn channel_handler<T: Send + 'static>(sender: UnboundedSender<T>) -> impl Fn(T) + Send + Sync + 'static {
    move |value| {
        if sender.send(value).is_err() {
            trace!("Handler channel closed, value discarded");
        }
    }
}
