//! Boundary between the frame cache and the map layer.
//!
//! The [`DisplayLayer`] shows the frame for the current timeline position when
//! it is cached. Otherwise the last shown frame stays up and the wanted key is
//! remembered until the prefetcher reports it ready.
//!
//! The layer never owns an image. It keeps the displayed key and borrows the
//! image from the frame cache while drawing, so an evicted frame is released
//! exactly once and simply stops being drawn.

use crate::cache::{CacheKey, DisplayImage, SharedFrameCache};
use crate::geo::{compute_radar_bounds, RadarBounds};
use std::time::Duration;

/// Playback speed multiplier options.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum PlaybackSpeed {
    Quarter,
    Half,
    #[default]
    Normal,
    Double,
    Quadruple,
    Octuple,
    Sixteen,
}

impl PlaybackSpeed {
    pub fn label(&self) -> &'static str {
        match self {
            PlaybackSpeed::Quarter => "0.25x",
            PlaybackSpeed::Half => "0.5x",
            PlaybackSpeed::Normal => "1x",
            PlaybackSpeed::Double => "2x",
            PlaybackSpeed::Quadruple => "4x",
            PlaybackSpeed::Octuple => "8x",
            PlaybackSpeed::Sixteen => "16x",
        }
    }

    pub fn all() -> &'static [PlaybackSpeed] {
        &[
            PlaybackSpeed::Quarter,
            PlaybackSpeed::Half,
            PlaybackSpeed::Normal,
            PlaybackSpeed::Double,
            PlaybackSpeed::Quadruple,
            PlaybackSpeed::Octuple,
            PlaybackSpeed::Sixteen,
        ]
    }

    pub fn multiplier(&self) -> f32 {
        match self {
            PlaybackSpeed::Quarter => 0.25,
            PlaybackSpeed::Half => 0.5,
            PlaybackSpeed::Normal => 1.0,
            PlaybackSpeed::Double => 2.0,
            PlaybackSpeed::Quadruple => 4.0,
            PlaybackSpeed::Octuple => 8.0,
            PlaybackSpeed::Sixteen => 16.0,
        }
    }

    /// Time between frames at this speed.
    pub fn frame_interval(&self, base: Duration) -> Duration {
        base.div_f64(self.multiplier() as f64)
    }
}

/// Next index to show during playback.
///
/// Looks up to `ceil(speed / 2)` frames ahead (at most `cap`) and jumps to the
/// first cached one, so fast playback skips frames instead of stalling. With
/// nothing cached in reach it steps one frame and waits there. `None` at the
/// end of the timeline.
pub fn frame_skip_target(
    current: usize,
    len: usize,
    speed: PlaybackSpeed,
    cap: usize,
    is_cached: impl Fn(usize) -> bool,
) -> Option<usize> {
    let next = current + 1;
    if next >= len {
        return None;
    }

    let reach = ((speed.multiplier() / 2.0).ceil() as usize).clamp(1, cap.max(1));
    (next..=current + reach)
        .take_while(|&index| index < len)
        .find(|&index| is_cached(index))
        .or(Some(next))
}

/// What the map layer needs to place one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOverlay {
    pub key: CacheKey,
    pub bounds: RadarBounds,
    pub opacity: f32,
}

/// The currently displayed frame and the one waiting to be shown.
pub struct DisplayLayer<I: DisplayImage> {
    frames: SharedFrameCache<I>,
    opacity: f32,
    displayed: Option<FrameOverlay>,
    pending: Option<CacheKey>,
}

impl<I: DisplayImage> DisplayLayer<I> {
    pub fn new(frames: SharedFrameCache<I>) -> Self {
        Self {
            frames,
            opacity: 1.0,
            displayed: None,
            pending: None,
        }
    }

    /// Show the frame for `key` if cached. Returns whether the overlay changed.
    pub fn advance_to(&mut self, key: CacheKey) -> bool {
        if self.displayed_key() == Some(&key) {
            self.pending = None;
            return false;
        }

        let bounds = {
            let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
            frames.get(&key).map(|frame| {
                compute_radar_bounds(
                    frame.site_lat as f64,
                    frame.site_lon as f64,
                    frame.range_km as f64,
                )
            })
        };

        match bounds {
            Some(bounds) => {
                self.displayed = Some(FrameOverlay {
                    key,
                    bounds,
                    opacity: self.opacity,
                });
                self.pending = None;
                true
            }
            None => {
                log::trace!("Frame {} not cached yet, keeping last frame", key);
                self.pending = Some(key);
                false
            }
        }
    }

    /// Re-check a newly cached frame against the pending one.
    pub fn on_frame_ready(&mut self, key: &CacheKey) -> bool {
        match &self.pending {
            Some(pending) if pending == key => self.advance_to(key.clone()),
            _ => false,
        }
    }

    pub fn overlay(&self) -> Option<&FrameOverlay> {
        self.displayed.as_ref()
    }

    pub fn displayed_key(&self) -> Option<&CacheKey> {
        self.displayed.as_ref().map(|overlay| &overlay.key)
    }

    /// Run `draw` with the displayed image while the cache still holds it.
    ///
    /// Returns `None` when nothing is displayed or the frame has been evicted.
    pub fn draw<R>(&self, draw: impl FnOnce(&I, &FrameOverlay) -> R) -> Option<R> {
        let overlay = self.displayed.as_ref()?;
        let frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        match frames.peek(&overlay.key) {
            Some(frame) => Some(draw(&frame.image, overlay)),
            None => {
                log::trace!("Displayed frame {} was evicted", overlay.key);
                None
            }
        }
    }

    pub fn pending_key(&self) -> Option<&CacheKey> {
        self.pending.as_ref()
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
        if let Some(overlay) = &mut self.displayed {
            overlay.opacity = self.opacity;
        }
    }

    /// Drop the displayed frame, e.g. when a new event is loaded.
    pub fn clear(&mut self) {
        self.displayed = None;
        self.pending = None;
    }
}
