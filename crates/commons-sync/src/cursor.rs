use std::sync::Arc;

use tracing::{debug, info, warn};

use commons_types::{MessageId, ThreadId};

use crate::store::Store;
use crate::transport::RestApi;

/// Read position of one thread.
///
/// `last_read` is what the server has accepted. `sent` is the highest value
/// handed to the network so far, so the local cursor only moves forward even
/// while acks are still in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadCursor {
    last_read: Option<MessageId>,
    sent: Option<MessageId>,
    in_flight: Option<MessageId>,
    auto_flushed: bool,
}

impl ReadCursor {
    pub fn last_read(&self) -> Option<MessageId> {
        self.last_read
    }

    pub fn in_flight(&self) -> Option<MessageId> {
        self.in_flight
    }

    /// Optimistic cursor: never lower than anything sent or confirmed.
    pub fn local_ack(&self) -> Option<MessageId> {
        self.last_read.max(self.sent)
    }

    /// Reserve `candidate` for flushing. Returns false for stale values.
    ///
    /// A value equal to the current cursor is re-sent only when
    /// `allow_equal` is set or when its previous flush failed.
    pub fn begin_flush(&mut self, candidate: MessageId, allow_equal: bool) -> bool {
        if candidate.is_temporary() || self.in_flight == Some(candidate) {
            return false;
        }
        match self.local_ack() {
            Some(current) if candidate < current => false,
            Some(current) if candidate == current => {
                let retry = self.in_flight.is_none() && self.last_read < self.sent;
                if allow_equal || retry {
                    self.reserve(candidate);
                    true
                } else {
                    false
                }
            }
            _ => {
                self.reserve(candidate);
                true
            }
        }
    }

    fn reserve(&mut self, candidate: MessageId) {
        self.sent = self.sent.max(Some(candidate));
        self.in_flight = Some(candidate);
    }

    pub fn finish_flush(&mut self, id: MessageId, ok: bool) {
        if ok {
            self.last_read = self.last_read.max(Some(id));
        }
        if self.in_flight == Some(id) {
            self.in_flight = None;
        }
    }

    /// Fold in a cursor reported by the server.
    pub fn observe_server(&mut self, last_read: Option<MessageId>) {
        self.last_read = self.last_read.max(last_read);
    }

    /// The one-shot auto flush for threads that fit on screen. Returns
    /// true the first time after each snapshot load.
    pub fn claim_auto_flush(&mut self) -> bool {
        !std::mem::replace(&mut self.auto_flushed, true)
    }

    pub fn reset_auto_flush(&mut self) {
        self.auto_flushed = false;
    }
}

/// Scroll geometry of a rendered thread, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    pub fn distance_from_bottom(&self) -> f64 {
        (self.scroll_height - self.scroll_top - self.client_height).max(0.0)
    }

    pub fn is_near_bottom(&self, threshold_px: f64) -> bool {
        self.distance_from_bottom() <= threshold_px
    }

    /// Content shorter than the viewport, so no scroll event will ever fire.
    pub fn fits_viewport(&self) -> bool {
        self.scroll_height <= self.client_height
    }
}

/// Decides when to acknowledge reading and flushes acks to the server.
///
/// Flushes are fire-and-forget: a failure is logged and the cursor is left
/// so that the next qualifying trigger sends the value again.
#[derive(Clone)]
pub struct CursorTracker {
    store: Store,
    rest: Arc<dyn RestApi>,
    threshold_px: f64,
}

impl CursorTracker {
    pub fn new(store: Store, rest: Arc<dyn RestApi>, threshold_px: f64) -> Self {
        Self {
            store,
            rest,
            threshold_px,
        }
    }

    /// Entering a thread flagged unread acks its newest message right away,
    /// wherever the viewport is.
    pub async fn on_enter(&self, thread: ThreadId) -> Option<MessageId> {
        let candidate = self.newest_if(thread, |state| state.has_unread())?;
        self.flush(thread, candidate, true).await
    }

    pub async fn on_scroll(&self, thread: ThreadId, metrics: ScrollMetrics) -> Option<MessageId> {
        if !metrics.is_near_bottom(self.threshold_px) {
            return None;
        }
        let candidate = self.newest_if(thread, |_| true)?;
        self.flush(thread, candidate, false).await
    }

    /// Called after the first layout of a loaded thread. Flushes once if the
    /// whole thread is visible.
    pub async fn on_layout(&self, thread: ThreadId, metrics: ScrollMetrics) -> Option<MessageId> {
        if !metrics.fits_viewport() {
            return None;
        }
        let claimed = self
            .store
            .with_state(|state| state.claim_auto_flush(thread))
            .unwrap_or(false);
        if !claimed {
            return None;
        }
        let candidate = self.newest_if(thread, |_| true)?;
        self.flush(thread, candidate, false).await
    }

    /// Send `candidate` as the new read cursor unless it would move the
    /// cursor backwards. Returns the id acknowledged by the server.
    pub async fn flush(
        &self,
        thread: ThreadId,
        candidate: MessageId,
        allow_equal: bool,
    ) -> Option<MessageId> {
        let reserved = match self
            .store
            .with_state(|state| state.begin_ack(thread, candidate, allow_equal))
        {
            Ok(reserved) => reserved,
            Err(e) => {
                warn!("Cannot flush read cursor for {}: {}", thread, e);
                return None;
            }
        };
        if !reserved {
            debug!("Dropping stale read cursor {} for {}", candidate, thread);
            return None;
        }

        let result = self.rest.ack(thread, candidate).await;
        let ok = result.is_ok();
        if let Err(e) = result {
            warn!("Read ack {} for {} failed: {}", candidate, thread, e);
        }
        if let Err(e) = self
            .store
            .with_state(|state| state.finish_ack(thread, candidate, ok))
        {
            warn!("Cannot record read ack for {}: {}", thread, e);
        }

        if ok {
            info!("Marked {} read up to {}", thread, candidate);
            Some(candidate)
        } else {
            None
        }
    }

    fn newest_if(
        &self,
        thread: ThreadId,
        pred: impl FnOnce(&crate::thread::ThreadState) -> bool,
    ) -> Option<MessageId> {
        self.store
            .read(|state| {
                let t = state.thread(thread)?;
                if pred(t) { t.newest_confirmed_id() } else { None }
            })
            .ok()
            .flatten()
    }
}
