//! Infinite-scroll pagination.
//!
//! A proximity signal starts at most one fetch at a time. When the fetch
//! finishes, successfully or not, the coordinator stays in `Fetching` for a
//! fixed cooldown so the same signal cannot fire again before the new content
//! has rendered and pushed the trigger out of view.
//!
//! There is no fetch timeout: a fetch that never finishes keeps the
//! coordinator in `Fetching`.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::models::ImageFields;
use crate::source::PhotoCandidate;
use crate::transaction::Op;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FetchRequestId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PaginationState {
    Idle,
    Fetching,
}

/// A fetch the caller must start against the image source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    pub request_id: FetchRequestId,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    InFlight(FetchRequestId),
    CoolingDown { until: Instant },
}

#[derive(Debug)]
pub struct PaginationCoordinator {
    phase: Phase,
    page_size: usize,
    cooldown: Duration,
    next_request: u64,
    fetches_started: u64,
}

impl PaginationCoordinator {
    pub fn new(page_size: usize, cooldown: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            page_size,
            cooldown,
            next_request: 1,
            fetches_started: 0,
        }
    }

    pub fn state(&self) -> PaginationState {
        match self.phase {
            Phase::Idle => PaginationState::Idle,
            Phase::InFlight(_) | Phase::CoolingDown { .. } => PaginationState::Fetching,
        }
    }

    pub fn in_flight(&self) -> Option<FetchRequestId> {
        match self.phase {
            Phase::InFlight(id) => Some(id),
            _ => None,
        }
    }

    pub fn fetches_started(&self) -> u64 {
        self.fetches_started
    }

    /// Ids come from one sequence so that fetches started outside pagination
    /// (an explicit seed) never collide with a page request.
    pub fn allocate_request_id(&mut self) -> FetchRequestId {
        let id = FetchRequestId(self.next_request);
        self.next_request += 1;
        id
    }

    /// Return to `Idle` once the cooldown has elapsed.
    pub fn poll(&mut self, now: Instant) -> PaginationState {
        if let Phase::CoolingDown { until } = self.phase {
            if now >= until {
                self.phase = Phase::Idle;
            }
        }
        self.state()
    }

    /// Handle a proximity signal. `loaded` is the number of images currently
    /// rendered; with nothing loaded the signal is ignored, initial content
    /// comes from an explicit seed.
    pub fn on_proximity(&mut self, now: Instant, loaded: usize) -> Option<FetchRequest> {
        if loaded == 0 || self.poll(now) != PaginationState::Idle {
            return None;
        }

        let request_id = self.allocate_request_id();
        self.fetches_started += 1;
        self.phase = Phase::InFlight(request_id);
        debug!(request = request_id.0, count = self.page_size, "pagination fetch started");

        Some(FetchRequest {
            request_id,
            count: self.page_size,
        })
    }

    /// Mark a fetch finished and start the cooldown. Unknown or stale ids are ignored.
    pub fn finish(&mut self, request_id: FetchRequestId, now: Instant) -> bool {
        if self.phase != Phase::InFlight(request_id) {
            return false;
        }
        self.phase = Phase::CoolingDown {
            until: now + self.cooldown,
        };
        true
    }
}

/// One image-create op per fetched photo, all stamped with `created_at`.
///
/// Photos are not deduplicated by external id: every fetch yields new images.
pub fn ingest_ops(photos: Vec<PhotoCandidate>, created_at: u64) -> Vec<Op> {
    photos
        .into_iter()
        .map(|photo| {
            Op::create_image(ImageFields {
                external_id: photo.external_id,
                url: photo.url,
                alt_text: photo.alt_text,
                created_at,
            })
        })
        .collect()
}
