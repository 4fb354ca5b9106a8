// SPDX-License-Identifier: GPL-3.0-only

//! Synchronized color + depth pairing
//!
//! Color and depth arrivals come in independently. An arrival waits until
//! its partner with the exact same capture timestamp shows up; at most one
//! arrival per side is held. Once a newer instant is seen on either side,
//! anything older can never be completed and is dropped, so frames leave
//! the fuser in strictly increasing timestamp order.

use crate::backends::sensor::{ColorSample, DepthSample, SensorEvent};
use crate::media::{CapturedFrame, FormatConverter};
use tracing::{debug, trace};

/// Pairing counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FuserStats {
    /// Frames emitted
    pub fused: u64,
    /// Instants that produced no frame
    pub dropped: u64,
}

/// Pairs color and depth arrivals into [`CapturedFrame`]s
pub struct StreamFuser {
    converter: FormatConverter,
    pending_color: Option<ColorSample>,
    pending_depth: Option<DepthSample>,
    /// Newest instant already resolved (fused or dropped)
    watermark: Option<u64>,
    stats: FuserStats,
}

impl StreamFuser {
    pub fn new(converter: FormatConverter) -> Self {
        Self {
            converter,
            pending_color: None,
            pending_depth: None,
            watermark: None,
            stats: FuserStats::default(),
        }
    }

    pub fn stats(&self) -> FuserStats {
        self.stats
    }

    /// Forget pending arrivals and the ordering watermark
    ///
    /// Counters are kept.
    pub fn reset(&mut self) {
        self.pending_color = None;
        self.pending_depth = None;
        self.watermark = None;
    }

    /// Feed one stream arrival; photo completions are ignored
    pub fn push(&mut self, event: SensorEvent) -> Option<CapturedFrame> {
        match event {
            SensorEvent::Color(color) => self.push_color(color),
            SensorEvent::Depth(depth) => self.push_depth(depth),
            SensorEvent::PhotoCaptured(_) => None,
        }
    }

    pub fn push_color(&mut self, color: ColorSample) -> Option<CapturedFrame> {
        let ts = color.timestamp_ns;
        if self.is_stale(ts) {
            return None;
        }

        match self.pending_depth.take() {
            Some(depth) if depth.timestamp_ns == ts => self.fuse(color, depth),
            Some(depth) if depth.timestamp_ns > ts => {
                // Partner instant already passed on the depth side
                self.pending_depth = Some(depth);
                self.drop_instant(ts, "color without depth");
                None
            }
            older => {
                if let Some(depth) = older {
                    self.drop_instant(depth.timestamp_ns, "depth without color");
                }
                match self.pending_color.take() {
                    Some(previous) if previous.timestamp_ns >= ts => {
                        // Out-of-order arrival; the newer pending one stays
                        self.pending_color = Some(previous);
                        self.discard_older(ts, "color without depth");
                    }
                    previous => {
                        if let Some(previous) = previous {
                            self.drop_instant(previous.timestamp_ns, "color without depth");
                        }
                        self.pending_color = Some(color);
                    }
                }
                None
            }
        }
    }

    pub fn push_depth(&mut self, depth: DepthSample) -> Option<CapturedFrame> {
        let ts = depth.timestamp_ns;
        if self.is_stale(ts) {
            return None;
        }

        match self.pending_color.take() {
            Some(color) if color.timestamp_ns == ts => self.fuse(color, depth),
            Some(color) if color.timestamp_ns > ts => {
                self.pending_color = Some(color);
                self.drop_instant(ts, "depth without color");
                None
            }
            older => {
                if let Some(color) = older {
                    self.drop_instant(color.timestamp_ns, "color without depth");
                }
                match self.pending_depth.take() {
                    Some(previous) if previous.timestamp_ns >= ts => {
                        self.pending_depth = Some(previous);
                        self.discard_older(ts, "depth without color");
                    }
                    previous => {
                        if let Some(previous) = previous {
                            self.drop_instant(previous.timestamp_ns, "depth without color");
                        }
                        self.pending_depth = Some(depth);
                    }
                }
                None
            }
        }
    }

    fn is_stale(&mut self, ts: u64) -> bool {
        if self.watermark.is_some_and(|w| ts <= w) {
            trace!(timestamp_ns = ts, "Discarding arrival for a resolved instant");
            return true;
        }
        false
    }

    /// Drop an arrival older than the one already pending on its side
    ///
    /// The watermark is left alone so the pending instant can still pair.
    fn discard_older(&mut self, ts: u64, reason: &str) {
        self.stats.dropped += 1;
        debug!(timestamp_ns = ts, reason, "Dropped out-of-order frame");
    }

    fn drop_instant(&mut self, ts: u64, reason: &str) {
        self.watermark = Some(self.watermark.map_or(ts, |w| w.max(ts)));
        self.stats.dropped += 1;
        debug!(timestamp_ns = ts, reason, "Dropped frame");
    }

    fn fuse(&mut self, color: ColorSample, depth: DepthSample) -> Option<CapturedFrame> {
        let ts = color.timestamp_ns;

        let Some(pixel_buffer) = color.pixel_buffer else {
            self.drop_instant(ts, "missing pixel buffer");
            return None;
        };
        let Some(depth) = depth.depth else {
            self.drop_instant(ts, "missing depth data");
            return None;
        };
        let Some(calibration) = depth.calibration else {
            self.drop_instant(ts, "missing calibration");
            return None;
        };

        match self
            .converter
            .build_frame(ts, &pixel_buffer, &depth.map, &calibration, depth.filtered)
        {
            Some(frame) => {
                self.watermark = Some(ts);
                self.stats.fused += 1;
                trace!(timestamp_ns = ts, "Fused frame");
                Some(frame)
            }
            None => {
                self.drop_instant(ts, "texture binding failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::synthetic::{synthetic_calibration, synthetic_color};
    use crate::backends::sensor::{BufferId, DepthData, DepthEncoding, DepthMap, Dimensions};
    use crate::media::TextureCache;
    use crate::media::depth_float::encode_depth_values;
    use std::sync::Arc;

    fn fuser() -> StreamFuser {
        StreamFuser::new(FormatConverter::new(Arc::new(TextureCache::new(8))))
    }

    fn color(ts: u64) -> ColorSample {
        ColorSample {
            timestamp_ns: ts,
            pixel_buffer: Some(synthetic_color(BufferId(ts), Dimensions::new(8, 6), true, ts)),
        }
    }

    fn depth(ts: u64) -> DepthSample {
        let dims = Dimensions::new(4, 3);
        DepthSample {
            timestamp_ns: ts,
            depth: Some(DepthData {
                map: DepthMap::packed(
                    BufferId(ts),
                    dims,
                    DepthEncoding::DepthFloat16,
                    Arc::from(encode_depth_values(&[ts as f32; 12], DepthEncoding::DepthFloat16)),
                ),
                calibration: Some(synthetic_calibration(Dimensions::new(8, 6))),
                filtered: false,
            }),
        }
    }

    #[test]
    fn test_pairs_in_either_order() {
        let mut fuser = fuser();
        assert!(fuser.push_color(color(1)).is_none());
        let frame = fuser.push_depth(depth(1)).unwrap();
        assert_eq!(frame.timestamp_ns, 1);

        assert!(fuser.push_depth(depth(2)).is_none());
        let frame = fuser.push_color(color(2)).unwrap();
        assert_eq!(frame.timestamp_ns, 2);

        assert_eq!(fuser.stats(), FuserStats { fused: 2, dropped: 0 });
    }

    #[test]
    fn test_never_cross_pairs() {
        let mut fuser = fuser();
        assert!(fuser.push_color(color(1)).is_none());
        assert!(fuser.push_depth(depth(2)).is_none());
        let frame = fuser.push_color(color(2)).unwrap();

        assert_eq!(frame.timestamp_ns, 2);
        assert_eq!(frame.color_y.key.buffer, BufferId(2));
        assert_eq!(frame.depth.key.buffer, BufferId(2));
        assert_eq!(fuser.stats().dropped, 1);
    }

    #[test]
    fn test_missing_payloads_drop_the_instant() {
        let mut fuser = fuser();

        fuser.push_color(ColorSample {
            timestamp_ns: 1,
            pixel_buffer: None,
        });
        assert!(fuser.push_depth(depth(1)).is_none());

        fuser.push_color(color(2));
        assert!(
            fuser
                .push_depth(DepthSample {
                    timestamp_ns: 2,
                    depth: None,
                })
                .is_none()
        );

        let mut uncalibrated = depth(3);
        if let Some(d) = uncalibrated.depth.as_mut() {
            d.calibration = None;
        }
        fuser.push_color(color(3));
        assert!(fuser.push_depth(uncalibrated).is_none());

        fuser.push_color(color(4));
        assert!(fuser.push_depth(depth(4)).is_some());
        assert_eq!(fuser.stats(), FuserStats { fused: 1, dropped: 3 });
    }

    #[test]
    fn test_late_arrival_is_discarded() {
        let mut fuser = fuser();
        fuser.push_color(color(5));
        fuser.push_depth(depth(5)).unwrap();

        assert!(fuser.push_depth(depth(4)).is_none());
        assert!(fuser.push_color(color(4)).is_none());
        assert!(fuser.push_color(color(5)).is_none());
        assert_eq!(fuser.stats().fused, 1);
    }

    #[test]
    fn test_out_of_order_same_side_keeps_newer() {
        let mut fuser = fuser();
        assert!(fuser.push_color(color(3)).is_none());
        assert!(fuser.push_color(color(2)).is_none());
        let frame = fuser.push_depth(depth(3)).unwrap();
        assert_eq!(frame.timestamp_ns, 3);

        assert!(fuser.push_depth(depth(5)).is_none());
        assert!(fuser.push_depth(depth(4)).is_none());
        let frame = fuser.push_color(color(5)).unwrap();
        assert_eq!(frame.timestamp_ns, 5);

        assert_eq!(fuser.stats(), FuserStats { fused: 2, dropped: 2 });
    }

    #[test]
    fn test_texture_failure_drops() {
        let mut fuser = fuser();
        let mut broken = color(1);
        if let Some(buffer) = broken.pixel_buffer.as_mut() {
            buffer.data = Arc::from(&buffer.data[..4]);
        }
        fuser.push_color(broken);
        assert!(fuser.push_depth(depth(1)).is_none());
        assert_eq!(fuser.stats().dropped, 1);
    }

    #[test]
    fn test_reset_clears_pending_and_watermark() {
        let mut fuser = fuser();
        fuser.push_color(color(10));
        fuser.push_depth(depth(10)).unwrap();
        fuser.push_color(color(11));

        fuser.reset();
        fuser.push_color(color(3));
        assert!(fuser.push_depth(depth(3)).is_some());
        // The pending color 11 was forgotten, not dropped
        assert_eq!(fuser.stats(), FuserStats { fused: 2, dropped: 0 });
    }
}
