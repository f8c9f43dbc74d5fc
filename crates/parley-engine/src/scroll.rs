//! Infinite-scroll coordinator.
//!
//! When the viewport reaches the top edge, older history is loaded and the
//! scroll offset is shifted by the height the new content added, so the
//! message the user was looking at stays where it was.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::engine::ConversationEngine;
use crate::error::Result;

/// A scrollable view of the timeline.
pub trait Viewport: Send + Sync {
    /// Distance from the top of the content to the top of the view.
    fn scroll_offset(&self) -> f64;

    /// Total height of the rendered content.
    fn content_height(&self) -> f64;

    /// Move the view.
    fn set_scroll_offset(&self, offset: f64);
}

/// Scroll position captured right before older content is fetched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportAnchor {
    /// Offset before the prepend.
    pub scroll_offset: f64,
    /// Content height before the prepend.
    pub content_height: f64,
}

impl ViewportAnchor {
    /// Capture the current position of `viewport`.
    #[must_use]
    pub fn capture(viewport: &dyn Viewport) -> Self {
        Self {
            scroll_offset: viewport.scroll_offset(),
            content_height: viewport.content_height(),
        }
    }

    /// Offset that keeps the anchored content in place once the content
    /// has grown to `new_height`.
    #[must_use]
    pub fn restored_offset(&self, new_height: f64) -> f64 {
        self.scroll_offset + (new_height - self.content_height)
    }
}

/// What a top-edge trigger ended up doing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollOutcome {
    /// A later trigger superseded this one.
    Coalesced,
    /// Nothing to load, or a load was already running.
    Skipped,
    /// Older messages were prepended and the view was re-anchored.
    Restored {
        /// Messages added.
        added: usize,
        /// Offset the view was moved to.
        offset: f64,
    },
}

/// Drives "load older" from viewport events.
pub struct ScrollCoordinator<V: Viewport> {
    engine: ConversationEngine,
    viewport: Arc<V>,
    generation: AtomicU64,
}

impl<V: Viewport> ScrollCoordinator<V> {
    /// Create a coordinator for `engine` rendering into `viewport`.
    #[must_use]
    pub fn new(engine: ConversationEngine, viewport: Arc<V>) -> Self {
        Self {
            engine,
            viewport,
            generation: AtomicU64::new(0),
        }
    }

    /// Handle the viewport reaching the top edge.
    ///
    /// Waits out the debounce window; only the last trigger inside it loads.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Fetch` if the older page cannot be loaded; the
    /// view is left where it is.
    pub async fn on_reached_top(&self) -> Result<ScrollOutcome> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let config = self.engine.config();
        tokio::time::sleep(config.load_older_debounce()).await;
        if self.generation.load(Ordering::Acquire) != generation {
            return Ok(ScrollOutcome::Coalesced);
        }

        let snapshot = self.engine.snapshot();
        if !snapshot.has_more_older() || snapshot.loading_older {
            return Ok(ScrollOutcome::Skipped);
        }

        let anchor = ViewportAnchor::capture(self.viewport.as_ref());
        let added = self.engine.load_older().await?;
        if added == 0 {
            return Ok(ScrollOutcome::Skipped);
        }

        tokio::time::sleep(config.anchor_settle()).await;
        let offset = anchor.restored_offset(self.viewport.content_height());
        self.viewport.set_scroll_offset(offset);
        tracing::debug!(added, offset, "Restored scroll anchor after prepend");

        Ok(ScrollOutcome::Restored { added, offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_adds_height_delta() {
        let anchor = ViewportAnchor {
            scroll_offset: 120.0,
            content_height: 800.0,
        };
        assert!((anchor.restored_offset(1_100.0) - 420.0).abs() < f64::EPSILON);
    }

    #[test]
    fn restore_without_growth_keeps_offset() {
        let anchor = ViewportAnchor {
            scroll_offset: 0.0,
            content_height: 500.0,
        };
        assert!(anchor.restored_offset(500.0).abs() < f64::EPSILON);
    }
}
