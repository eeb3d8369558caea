//! The analysis scheduling state machine.
//!
//! One lane exists per `(buffer, kind)`:
//!
//! ```text
//! Idle ──edit──▶ Pending{deadline} ──poll, deadline reached──▶ InFlight ──result──▶ Idle
//!   ▲                    ▲                                        │
//!   └────────────────────┴── stale result + edits during flight ──┘  (deadline = now)
//! ```
//!
//! Edits move a lane to `Pending` and reset its debounce deadline; when the
//! deadline passes, [`Orchestrator::poll`] dispatches a request carrying the
//! buffer's *current* revision and snapshot, cancelling any prior in-flight
//! request for the lane. A result whose revision no longer matches the
//! buffer is discarded, and if edits arrived while it was in flight, the
//! lane re-enters `Pending` with an immediate deadline so the catch-up pass
//! skips the debounce. Completion is the interactive exception: it
//! dispatches immediately on a trigger and is cancelled by cursor movement.
//!
//! Time is always injected (`Instant` parameters), never read from a clock,
//! so staleness and cancellation are testable without sleeping. The caller
//! drives the machine from its poll loop, feeding dispatched items to an
//! [`crate::AnalysisPool`] and routing pool results back through
//! [`Orchestrator::on_result`].

use crate::analyzer::{AnalysisKind, AnalysisRequest, AnalysisResult};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use textforge_core::{AnalysisSettings, BufferId, BufferSnapshot, CancelToken};

/// Supplies current snapshots at dispatch time. Implemented for
/// [`textforge_core::SessionCoordinator`].
pub trait SnapshotSource {
    /// The current snapshot of `buffer`, or `None` when it is closed.
    fn snapshot(&self, buffer: BufferId) -> Option<BufferSnapshot>;
}

impl SnapshotSource for textforge_core::SessionCoordinator {
    fn snapshot(&self, buffer: BufferId) -> Option<BufferSnapshot> {
        textforge_core::SessionCoordinator::snapshot(self, buffer).ok()
    }
}

/// A request ready for the worker pool, paired with the snapshot whose text
/// the analyzer will read.
#[derive(Debug, Clone)]
pub struct DispatchItem {
    /// The request (revision-tagged, cancellable).
    pub request: AnalysisRequest,
    /// The snapshot to analyze.
    pub snapshot: BufferSnapshot,
}

/// What happened to a result handed to [`Orchestrator::on_result`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Fresh and in order: hand the result to the consumer.
    Deliver(AnalysisResult),
    /// Computed from a superseded revision (or an already-replaced
    /// request); discarded. Not user-visible.
    Stale,
    /// An older revision arrived after a newer one was already delivered
    /// for the same lane; discarded.
    OutOfOrder,
}

/// An in-flight request that has exceeded the warn threshold. UI-facing
/// health signal only; the orchestrator imposes no hard timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneHealth {
    /// The lane's buffer.
    pub buffer: BufferId,
    /// The lane's kind.
    pub kind: AnalysisKind,
    /// Revision the slow request was dispatched with.
    pub revision: u64,
    /// How long the request has been in flight.
    pub in_flight_for: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaneState {
    Idle,
    Pending { deadline: Instant },
}

#[derive(Debug)]
struct Flight {
    revision: u64,
    token: CancelToken,
    started: Instant,
}

#[derive(Debug)]
struct Lane {
    state: LaneState,
    inflight: Option<Flight>,
    last_delivered: Option<u64>,
    /// Lint gate: edited characters accumulated since the last dispatch.
    pending_chars: usize,
}

impl Lane {
    fn new() -> Self {
        Self {
            state: LaneState::Idle,
            inflight: None,
            last_delivered: None,
            pending_chars: 0,
        }
    }

    fn cancel_flight(&mut self) {
        if let Some(flight) = self.inflight.take() {
            flight.token.cancel();
        }
    }
}

/// Debounces, dispatches, cancels, and reconciles analysis per
/// `(buffer, kind)`. Kinds for the same buffer run concurrently and
/// independently; only one request per lane is ever in flight.
pub struct Orchestrator {
    settings: AnalysisSettings,
    lanes: BTreeMap<(BufferId, AnalysisKind), Lane>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("lanes", &self.lanes.len())
            .finish()
    }
}

impl Orchestrator {
    /// Create an orchestrator with the given scheduling settings.
    pub fn new(settings: AnalysisSettings) -> Self {
        Self {
            settings,
            lanes: BTreeMap::new(),
        }
    }

    fn delay(&self) -> Duration {
        Duration::from_millis(self.settings.delay_ms)
    }

    /// Record an edit: lint/symbols lanes (re-)enter `Pending` with a fresh
    /// debounce deadline, and any in-flight completion is cancelled (the
    /// edit moved the cursor and invalidated its revision anyway).
    ///
    /// `edited_chars` is the edit's size (deleted + inserted characters);
    /// lint requests are suppressed until the accumulated size reaches
    /// `min_idle_chars`.
    pub fn on_edit(&mut self, buffer: BufferId, edited_chars: usize, now: Instant) {
        let deadline = now + self.delay();
        let min_idle_chars = self.settings.min_idle_chars;

        for kind in AnalysisKind::EDIT_DRIVEN {
            let lane = self
                .lanes
                .entry((buffer, kind))
                .or_insert_with(Lane::new);

            if kind == AnalysisKind::Lint {
                lane.pending_chars = lane.pending_chars.saturating_add(edited_chars);
                if lane.pending_chars < min_idle_chars {
                    continue;
                }
            }
            lane.state = LaneState::Pending { deadline };
        }

        if let Some(lane) = self.lanes.get_mut(&(buffer, AnalysisKind::Completion)) {
            lane.cancel_flight();
        }
    }

    /// Cursor movement cancels an in-flight completion before its result
    /// returns. Lint/symbols are unaffected.
    pub fn on_cursor_moved(&mut self, buffer: BufferId) {
        if let Some(lane) = self.lanes.get_mut(&(buffer, AnalysisKind::Completion)) {
            lane.cancel_flight();
        }
    }

    /// Dispatch a completion immediately: session-interactive requests are
    /// not debounced. Any prior in-flight completion for the buffer is
    /// cancelled. Returns `None` when the buffer is closed.
    pub fn on_completion_trigger(
        &mut self,
        buffer: BufferId,
        cursor: usize,
        now: Instant,
        source: &dyn SnapshotSource,
    ) -> Option<DispatchItem> {
        let snapshot = source.snapshot(buffer)?;
        let lane = self
            .lanes
            .entry((buffer, AnalysisKind::Completion))
            .or_insert_with(Lane::new);
        lane.cancel_flight();

        let token = CancelToken::new();
        lane.inflight = Some(Flight {
            revision: snapshot.revision(),
            token: token.clone(),
            started: now,
        });

        Some(DispatchItem {
            request: AnalysisRequest {
                buffer,
                revision: snapshot.revision(),
                kind: AnalysisKind::Completion,
                cursor: Some(cursor),
                token,
            },
            snapshot,
        })
    }

    /// Move every lane whose debounce deadline has passed into flight,
    /// returning the requests to hand to the worker pool. Each request
    /// carries the buffer's current revision and snapshot; the lane's prior
    /// in-flight request (if any) is cancelled first.
    pub fn poll(&mut self, now: Instant, source: &dyn SnapshotSource) -> Vec<DispatchItem> {
        let mut dispatched = Vec::new();

        for (&(buffer, kind), lane) in self.lanes.iter_mut() {
            let LaneState::Pending { deadline } = lane.state else {
                continue;
            };
            if deadline > now {
                continue;
            }

            let Some(snapshot) = source.snapshot(buffer) else {
                // Buffer closed while pending.
                lane.state = LaneState::Idle;
                lane.cancel_flight();
                continue;
            };

            lane.cancel_flight();
            let token = CancelToken::new();
            lane.inflight = Some(Flight {
                revision: snapshot.revision(),
                token: token.clone(),
                started: now,
            });
            lane.state = LaneState::Idle;
            lane.pending_chars = 0;

            dispatched.push(DispatchItem {
                request: AnalysisRequest {
                    buffer,
                    revision: snapshot.revision(),
                    kind,
                    cursor: None,
                    token,
                },
                snapshot,
            });
        }

        dispatched
    }

    /// Reconcile a completed analysis against the buffer's current
    /// revision.
    ///
    /// - Results from superseded requests (no matching flight) or
    ///   superseded revisions are [`Delivery::Stale`], and when edits
    ///   occurred during the flight, the lane's pending deadline collapses
    ///   to `now` so the catch-up request skips the debounce.
    /// - A result older than one already delivered for the lane is
    ///   [`Delivery::OutOfOrder`]: per-lane delivery is monotone in
    ///   revision, unconditionally.
    pub fn on_result(
        &mut self,
        result: AnalysisResult,
        current_revision: u64,
        now: Instant,
    ) -> Delivery {
        let lane = self
            .lanes
            .entry((result.buffer, result.kind))
            .or_insert_with(Lane::new);

        let expected = lane
            .inflight
            .as_ref()
            .is_some_and(|f| f.revision == result.revision);
        if expected {
            lane.inflight = None;
        }

        if !expected || result.revision != current_revision {
            log::debug!(
                "discarding stale {:?} result for buffer {:?}: revision {} (current {})",
                result.kind,
                result.buffer,
                result.revision,
                current_revision,
            );
            // Catch up without a second debounce wait.
            if let LaneState::Pending { deadline } = lane.state {
                lane.state = LaneState::Pending {
                    deadline: deadline.min(now),
                };
            }
            return Delivery::Stale;
        }

        if lane.last_delivered.is_some_and(|last| last > result.revision) {
            log::debug!(
                "dropping out-of-order {:?} result for buffer {:?}: revision {} after {}",
                result.kind,
                result.buffer,
                result.revision,
                lane.last_delivered.unwrap_or_default(),
            );
            return Delivery::OutOfOrder;
        }

        lane.last_delivered = Some(result.revision);
        Delivery::Deliver(result)
    }

    /// In-flight requests older than the warn threshold.
    pub fn health(&self, now: Instant) -> Vec<LaneHealth> {
        let warn = Duration::from_millis(self.settings.in_flight_warn_ms);
        self.lanes
            .iter()
            .filter_map(|(&(buffer, kind), lane)| {
                let flight = lane.inflight.as_ref()?;
                let age = now.saturating_duration_since(flight.started);
                (age >= warn).then_some(LaneHealth {
                    buffer,
                    kind,
                    revision: flight.revision,
                    in_flight_for: age,
                })
            })
            .collect()
    }

    /// Drop all lanes for a closed buffer, cancelling in-flight work.
    pub fn remove_buffer(&mut self, buffer: BufferId) {
        self.lanes.retain(|&(lane_buffer, _), lane| {
            if lane_buffer == buffer {
                lane.cancel_flight();
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalysisPayload;
    use std::collections::HashMap;
    use textforge_core::{Buffer, BufferSettings};

    struct MapSource {
        snapshots: HashMap<BufferId, BufferSnapshot>,
    }

    impl MapSource {
        fn single(text: &str) -> (Self, BufferId, Buffer) {
            let id = BufferId::from_raw(1);
            let buffer = Buffer::new(id, text, BufferSettings::default());
            let mut snapshots = HashMap::new();
            snapshots.insert(id, buffer.snapshot());
            (Self { snapshots }, id, buffer)
        }

        fn refresh(&mut self, buffer: &Buffer) {
            self.snapshots.insert(buffer.id(), buffer.snapshot());
        }
    }

    impl SnapshotSource for MapSource {
        fn snapshot(&self, buffer: BufferId) -> Option<BufferSnapshot> {
            self.snapshots.get(&buffer).cloned()
        }
    }

    fn settings() -> AnalysisSettings {
        AnalysisSettings::default()
    }

    fn result_for(item: &DispatchItem) -> AnalysisResult {
        AnalysisResult {
            buffer: item.request.buffer,
            revision: item.request.revision,
            kind: item.request.kind,
            payload: AnalysisPayload::Empty,
        }
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_debounce_delays_dispatch_until_quiet() {
        let (source, id, _buf) = MapSource::single("text");
        let mut orch = Orchestrator::new(settings());
        let t0 = Instant::now();

        orch.on_edit(id, 1, t0);
        assert!(orch.poll(t0, &source).is_empty());
        assert!(orch.poll(t0 + ms(299), &source).is_empty());

        let items = orch.poll(t0 + ms(300), &source);
        let kinds: Vec<AnalysisKind> = items.iter().map(|i| i.request.kind).collect();
        assert_eq!(kinds, vec![AnalysisKind::Lint, AnalysisKind::Symbols]);
        assert_eq!(items[0].request.revision, 0);
    }

    #[test]
    fn test_edit_burst_coalesces_into_one_dispatch() {
        let (source, id, _buf) = MapSource::single("text");
        let mut orch = Orchestrator::new(settings());
        let t0 = Instant::now();

        orch.on_edit(id, 1, t0);
        orch.on_edit(id, 1, t0 + ms(200));
        // The first deadline (t0+300) has passed, but the second edit reset it.
        assert!(orch.poll(t0 + ms(400), &source).is_empty());

        let items = orch.poll(t0 + ms(500), &source);
        assert_eq!(items.len(), 2, "one lint + one symbols for the whole burst");
    }

    #[test]
    fn test_redispatch_cancels_prior_flight() {
        let (mut source, id, mut buf) = MapSource::single("text");
        let mut orch = Orchestrator::new(settings());
        let t0 = Instant::now();

        orch.on_edit(id, 1, t0);
        let first = orch.poll(t0 + ms(300), &source);
        let first_token = first[0].request.token.clone();

        buf.apply(textforge_core::Edit::insert(0, "x")).unwrap();
        source.refresh(&buf);
        orch.on_edit(id, 1, t0 + ms(350));

        let second = orch.poll(t0 + ms(650), &source);
        assert_eq!(second.len(), 2);
        assert!(first_token.is_cancelled(), "superseded request is cancelled");
        assert_eq!(second[0].request.revision, 1);
    }

    #[test]
    fn test_stale_result_discarded_and_catchup_skips_debounce() {
        let (mut source, id, mut buf) = MapSource::single("text");
        let mut orch = Orchestrator::new(settings());
        let t0 = Instant::now();

        orch.on_edit(id, 1, t0);
        let items = orch.poll(t0 + ms(300), &source);
        let lint = items
            .iter()
            .find(|i| i.request.kind == AnalysisKind::Lint)
            .unwrap();
        let stale = result_for(lint);

        // Edits arrive while the request is in flight.
        buf.apply(textforge_core::Edit::insert(0, "y")).unwrap();
        source.refresh(&buf);
        orch.on_edit(id, 1, t0 + ms(310));

        // The rev-0 result lands after the edit: discarded...
        let delivery = orch.on_result(stale, buf.revision(), t0 + ms(320));
        assert_eq!(delivery, Delivery::Stale);

        // ...and the catch-up dispatch happens immediately, no extra 300ms.
        let catchup = orch.poll(t0 + ms(321), &source);
        assert!(
            catchup.iter().any(|i| i.request.kind == AnalysisKind::Lint
                && i.request.revision == 1)
        );
    }

    #[test]
    fn test_fresh_result_is_delivered_once() {
        let (source, id, buf) = MapSource::single("text");
        let mut orch = Orchestrator::new(settings());
        let t0 = Instant::now();

        orch.on_edit(id, 1, t0);
        let items = orch.poll(t0 + ms(300), &source);
        let result = result_for(&items[0]);

        match orch.on_result(result.clone(), buf.revision(), t0 + ms(350)) {
            Delivery::Deliver(delivered) => assert_eq!(delivered.revision, 0),
            other => panic!("expected delivery, got {other:?}"),
        }

        // The same result again has no matching flight: stale.
        assert_eq!(
            orch.on_result(result, buf.revision(), t0 + ms(360)),
            Delivery::Stale
        );
    }

    #[test]
    fn test_out_of_order_delivery_is_dropped() {
        let (source, id, _buf) = MapSource::single("text");
        let mut orch = Orchestrator::new(settings());
        let t0 = Instant::now();

        // Deliver a revision-5 result by driving the lane directly.
        orch.on_edit(id, 1, t0);
        let items = orch.poll(t0 + ms(300), &source);
        let mut newer = result_for(&items[0]);
        newer.revision = 5;
        orch.lanes
            .get_mut(&(id, AnalysisKind::Lint))
            .unwrap()
            .inflight
            .as_mut()
            .unwrap()
            .revision = 5;
        assert!(matches!(
            orch.on_result(newer, 5, t0 + ms(310)),
            Delivery::Deliver(_)
        ));

        // An older revision arriving afterwards is never delivered, even if
        // a caller hands it a matching current revision.
        let mut older = result_for(&items[0]);
        older.revision = 3;
        orch.lanes
            .get_mut(&(id, AnalysisKind::Lint))
            .unwrap()
            .inflight = Some(Flight {
            revision: 3,
            token: CancelToken::new(),
            started: t0,
        });
        assert_eq!(orch.on_result(older, 3, t0 + ms(320)), Delivery::OutOfOrder);
    }

    #[test]
    fn test_completion_bypasses_debounce_and_cancels_on_cursor_move() {
        let (source, id, buf) = MapSource::single("fn main");
        let mut orch = Orchestrator::new(settings());
        let t0 = Instant::now();

        let item = orch.on_completion_trigger(id, 7, t0, &source).unwrap();
        assert_eq!(item.request.kind, AnalysisKind::Completion);
        assert_eq!(item.request.cursor, Some(7));
        assert!(!item.request.token.is_cancelled());

        orch.on_cursor_moved(id);
        assert!(item.request.token.is_cancelled());

        // The cancelled request's result no longer has a flight: stale.
        assert_eq!(
            orch.on_result(result_for(&item), buf.revision(), t0 + ms(50)),
            Delivery::Stale
        );
    }

    #[test]
    fn test_completion_retrigger_cancels_previous() {
        let (source, id, _buf) = MapSource::single("fn main");
        let mut orch = Orchestrator::new(settings());
        let t0 = Instant::now();

        let first = orch.on_completion_trigger(id, 3, t0, &source).unwrap();
        let second = orch.on_completion_trigger(id, 4, t0 + ms(10), &source).unwrap();

        assert!(first.request.token.is_cancelled());
        assert!(!second.request.token.is_cancelled());
    }

    #[test]
    fn test_lint_gate_accumulates_small_edits() {
        let (source, id, _buf) = MapSource::single("text");
        let mut settings = settings();
        settings.min_idle_chars = 5;
        let mut orch = Orchestrator::new(settings);
        let t0 = Instant::now();

        orch.on_edit(id, 2, t0);
        let items = orch.poll(t0 + ms(300), &source);
        let kinds: Vec<AnalysisKind> = items.iter().map(|i| i.request.kind).collect();
        assert_eq!(kinds, vec![AnalysisKind::Symbols], "lint suppressed below gate");

        orch.on_edit(id, 3, t0 + ms(400));
        let items = orch.poll(t0 + ms(700), &source);
        assert!(items.iter().any(|i| i.request.kind == AnalysisKind::Lint));
    }

    #[test]
    fn test_health_reports_long_running_flights() {
        let (source, id, _buf) = MapSource::single("text");
        let mut orch = Orchestrator::new(settings());
        let t0 = Instant::now();

        orch.on_edit(id, 1, t0);
        orch.poll(t0 + ms(300), &source);

        assert!(orch.health(t0 + ms(1_000)).is_empty());
        let report = orch.health(t0 + ms(6_000));
        assert_eq!(report.len(), 2);
        assert!(report.iter().all(|h| h.in_flight_for >= ms(5_000)));
    }

    #[test]
    fn test_closed_buffer_lane_goes_idle() {
        let (mut source, id, _buf) = MapSource::single("text");
        let mut orch = Orchestrator::new(settings());
        let t0 = Instant::now();

        orch.on_edit(id, 1, t0);
        source.snapshots.clear();
        assert!(orch.poll(t0 + ms(300), &source).is_empty());
        // Nothing pending anymore either.
        source.refresh(&Buffer::new(id, "back", BufferSettings::default()));
        assert!(orch.poll(t0 + ms(600), &source).is_empty());
    }

    #[test]
    fn test_remove_buffer_cancels_flights() {
        let (source, id, _buf) = MapSource::single("text");
        let mut orch = Orchestrator::new(settings());
        let t0 = Instant::now();

        orch.on_edit(id, 1, t0);
        let items = orch.poll(t0 + ms(300), &source);
        orch.remove_buffer(id);

        assert!(items.iter().all(|i| i.request.token.is_cancelled()));
        assert!(orch.health(t0 + ms(10_000)).is_empty());
    }
}
