//! Peer-accounting drain ("spindown").
//!
//! Settles every request a session left behind so that, when the next
//! session starts, every peer it might use is marked idle and really is
//! idle. Active requests are waited out: each is settled by the first of
//! its delivery, its peer's disconnect, or its timer. Finished requests
//! already handed their data over and only need the idle marking.

use std::time::Instant;

use crate::requests::{IdleReason, RequestTracker};

/// What a drain did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub dropped: usize,
    pub timed_out: usize,
    pub finished: usize,
    /// Events that matched no active request.
    pub stale: usize,
}

impl DrainReport {
    /// Number of peers returned to idle.
    pub fn settled(&self) -> usize {
        self.delivered + self.dropped + self.timed_out + self.finished
    }

    fn record(&mut self, reason: IdleReason) {
        match reason {
            IdleReason::Delivered => self.delivered += 1,
            IdleReason::PeerDrop => self.dropped += 1,
            IdleReason::Timeout => self.timed_out += 1,
            IdleReason::Finished => self.finished += 1,
        }
    }
}

/// Drain the tracker: afterwards both its table and its finished list are
/// empty and each peer they held was marked idle exactly once.
///
/// Never fails. Stale and duplicate events are absorbed.
pub async fn spindown(requests: &mut RequestTracker) -> DrainReport {
    tracing::debug!(
        active = requests.active_len(),
        finished = requests.finished_len(),
        "State sync spinning down"
    );
    let mut report = DrainReport::default();

    while requests.has_active() {
        let Some(event) = requests.next_event().await else {
            // Unreachable while the tracker owns its timeout sender.
            tracing::warn!(
                active = requests.active_len(),
                "Request event sources closed during spindown"
            );
            for request in requests.take_active() {
                requests.release(&request, request.items(), Instant::now());
                report.record(IdleReason::Timeout);
            }
            break;
        };
        let reason = event.idle_reason();
        let Some(request) = requests.take_matching(&event) else {
            report.stale += 1;
            continue;
        };
        tracing::trace!(
            peer = %request.peer(),
            items = request.items(),
            %reason,
            "State peer marked idle (spindown)"
        );
        requests.release(&request, request.items(), Instant::now());
        report.record(reason);
    }

    // These responses were headed for processing; that is moot now, but the
    // idle marking processing would have done still has to happen.
    for finished in requests.take_finished() {
        let request = &finished.request;
        tracing::trace!(
            peer = %request.peer(),
            items = request.items(),
            "State peer marked idle (finished)"
        );
        requests.release(request, request.items(), Instant::now());
        report.record(IdleReason::Finished);
    }

    tracing::debug!(
        delivered = report.delivered,
        dropped = report.dropped,
        timed_out = report.timed_out,
        finished = report.finished,
        stale = report.stale,
        "State sync spun down"
    );
    report
}
