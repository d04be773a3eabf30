use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use super::auth::{AuthorizationGuard, Principal, RoleGuard};
use super::error::TrackerError;
use super::model::{NewTracker, ProgressTracker, RouteTemplate, Stop, StopStatus, TrackerFilter};
use super::ports::{RouteLookup, TrackerStore, VehicleLookup};

/// How `advance` treats a stop that is not the current frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvancePolicy {
    /// Any stop may be advanced; neighbours are overwritten relative to it.
    #[default]
    Permissive,
    /// Only the stop currently marked `Next` may be advanced.
    Strict,
}

impl AdvancePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "permissive" => Some(Self::Permissive),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Permissive => "permissive",
            Self::Strict => "strict",
        }
    }
}

/// Initial stop list for a new tracker: the first stop is `Next`, the rest
/// `Pending`, no arrival times.
pub fn snapshot_stops(route: &RouteTemplate) -> Vec<Stop> {
    route
        .stops
        .iter()
        .enumerate()
        .map(|(i, s)| Stop {
            name: s.name.clone(),
            position: s.position,
            status: if i == 0 {
                StopStatus::Next
            } else {
                StopStatus::Pending
            },
            arrival_time: None,
        })
        .collect()
}

/// Marks stop `k` reached and rewrites its immediate neighbours.
///
/// The update is relative to `k` only; stops further away are left as they
/// are, whatever the current frontier.
pub fn apply_advance(tracker: &mut ProgressTracker, k: usize, now: DateTime<Utc>) {
    let last = tracker.stops.len() - 1;

    tracker.stops[k].status = StopStatus::Reached;
    tracker.stops[k].arrival_time = Some(now);

    if k > 0 {
        tracker.stops[k - 1].status = StopStatus::Left;
    }
    if k < last {
        tracker.stops[k + 1].status = StopStatus::Next;
    }
    if k == last {
        tracker.completed = true;
    }
}

/// Route progress tracking over a set of collaborators.
pub struct Tracking<'a, S, G = RoleGuard> {
    store: &'a S,
    guard: G,
    policy: AdvancePolicy,
}

impl<'a, S> Tracking<'a, S, RoleGuard>
where
    S: RouteLookup + VehicleLookup + TrackerStore,
{
    pub fn new(store: &'a S, policy: AdvancePolicy) -> Self {
        Self::with_guard(store, RoleGuard, policy)
    }
}

impl<'a, S, G> Tracking<'a, S, G>
where
    S: RouteLookup + VehicleLookup + TrackerStore,
    G: AuthorizationGuard,
{
    pub fn with_guard(store: &'a S, guard: G, policy: AdvancePolicy) -> Self {
        Self {
            store,
            guard,
            policy,
        }
    }

    pub fn start(
        &self,
        vehicle_id: &str,
        route_id: &str,
        date: NaiveDate,
        principal: &Principal,
    ) -> Result<ProgressTracker, TrackerError> {
        let vehicle = self
            .store
            .vehicle_by_id(vehicle_id)?
            .ok_or_else(|| TrackerError::VehicleNotFound(vehicle_id.to_string()))?;

        if !self.guard.can_mutate(principal, &vehicle) {
            warn!(principal = principal.id(), vehicle = vehicle_id, "start rejected");
            return Err(TrackerError::Forbidden);
        }

        let route = self
            .store
            .route_by_id(route_id)?
            .ok_or_else(|| TrackerError::RouteNotFound(route_id.to_string()))?;
        if route.stops.is_empty() {
            return Err(TrackerError::InvalidRoute(route_id.to_string(), "has no stops"));
        }
        // Advance looks stops up by name, so a repeated name could never be reached.
        let repeated = route
            .stops
            .iter()
            .enumerate()
            .any(|(i, s)| route.stops[..i].iter().any(|p| p.name == s.name));
        if repeated {
            return Err(TrackerError::InvalidRoute(route_id.to_string(), "repeats a stop name"));
        }

        let stops = snapshot_stops(&route);
        let created = self.store.create_tracker(NewTracker {
            vehicle_id: vehicle.id,
            route_id: route.id,
            date,
            stops,
        })?;
        info!(
            tracker = %created.id,
            vehicle = %created.vehicle_id,
            route = %created.route_id,
            route_name = %route.name,
            %date,
            stops = created.stops.len(),
            "vehicle history started"
        );
        Ok(created)
    }

    pub fn advance(
        &self,
        tracker_id: &str,
        stop_name: &str,
        principal: &Principal,
    ) -> Result<ProgressTracker, TrackerError> {
        self.advance_at(tracker_id, stop_name, principal, Utc::now())
    }

    pub fn advance_at(
        &self,
        tracker_id: &str,
        stop_name: &str,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<ProgressTracker, TrackerError> {
        let mut tracker = self
            .store
            .tracker_by_id(tracker_id)?
            .ok_or_else(|| TrackerError::TrackerNotFound(tracker_id.to_string()))?;

        let vehicle = self
            .store
            .vehicle_by_id(&tracker.vehicle_id)?
            .ok_or_else(|| TrackerError::VehicleNotFound(tracker.vehicle_id.clone()))?;
        if !self.guard.can_mutate(principal, &vehicle) {
            warn!(principal = principal.id(), tracker = tracker_id, "advance rejected");
            return Err(TrackerError::Forbidden);
        }

        let k = tracker
            .stop_index(stop_name)
            .ok_or_else(|| TrackerError::StopNotFound(stop_name.to_string()))?;

        if self.policy == AdvancePolicy::Strict && tracker.stops[k].status != StopStatus::Next {
            return Err(TrackerError::OutOfOrder {
                stop: stop_name.to_string(),
                status: tracker.stops[k].status.as_str(),
            });
        }
        if let Some(frontier) = tracker.frontier() {
            if frontier != k {
                warn!(
                    tracker = tracker_id,
                    stop = stop_name,
                    frontier,
                    index = k,
                    "advancing a stop other than the frontier"
                );
            }
        }

        apply_advance(&mut tracker, k, now);
        let saved = self.store.save_tracker(&tracker)?;
        info!(
            tracker = tracker_id,
            stop = stop_name,
            index = k,
            completed = saved.completed,
            "stop reached"
        );
        Ok(saved)
    }

    pub fn get(&self, tracker_id: &str) -> Result<ProgressTracker, TrackerError> {
        self.store
            .tracker_by_id(tracker_id)?
            .ok_or_else(|| TrackerError::TrackerNotFound(tracker_id.to_string()))
    }

    pub fn list(&self, filter: &TrackerFilter) -> Result<Vec<ProgressTracker>, TrackerError> {
        self.store.list_trackers(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::model::{Position, RouteStop, VehicleRef};
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryStore {
        routes: HashMap<String, RouteTemplate>,
        vehicles: HashMap<String, VehicleRef>,
        trackers: RefCell<HashMap<String, ProgressTracker>>,
        next_id: RefCell<u32>,
        writes: RefCell<u32>,
    }

    impl RouteLookup for MemoryStore {
        fn route_by_id(&self, id: &str) -> Result<Option<RouteTemplate>, TrackerError> {
            Ok(self.routes.get(id).cloned())
        }
    }

    impl VehicleLookup for MemoryStore {
        fn vehicle_by_id(&self, id: &str) -> Result<Option<VehicleRef>, TrackerError> {
            Ok(self.vehicles.get(id).cloned())
        }
    }

    impl TrackerStore for MemoryStore {
        fn create_tracker(&self, doc: NewTracker) -> Result<ProgressTracker, TrackerError> {
            let mut n = self.next_id.borrow_mut();
            *n += 1;
            let t = ProgressTracker {
                id: format!("T{}", n),
                vehicle_id: doc.vehicle_id,
                route_id: doc.route_id,
                date: doc.date,
                stops: doc.stops,
                completed: false,
                version: 1,
            };
            self.trackers.borrow_mut().insert(t.id.clone(), t.clone());
            Ok(t)
        }

        fn tracker_by_id(&self, id: &str) -> Result<Option<ProgressTracker>, TrackerError> {
            Ok(self.trackers.borrow().get(id).cloned())
        }

        fn save_tracker(&self, doc: &ProgressTracker) -> Result<ProgressTracker, TrackerError> {
            let mut trackers = self.trackers.borrow_mut();
            let stored = trackers
                .get_mut(&doc.id)
                .ok_or_else(|| TrackerError::TrackerNotFound(doc.id.clone()))?;
            if stored.version != doc.version {
                return Err(TrackerError::Conflict(doc.id.clone()));
            }
            let mut next = doc.clone();
            next.version += 1;
            *stored = next.clone();
            *self.writes.borrow_mut() += 1;
            Ok(next)
        }

        fn list_trackers(
            &self,
            filter: &TrackerFilter,
        ) -> Result<Vec<ProgressTracker>, TrackerError> {
            let mut out: Vec<_> = self
                .trackers
                .borrow()
                .values()
                .filter(|t| filter.vehicle_id.as_ref().map_or(true, |v| *v == t.vehicle_id))
                .filter(|t| filter.date.map_or(true, |d| d == t.date))
                .cloned()
                .collect();
            out.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(out)
        }
    }

    fn route(id: &str, names: &[&str]) -> RouteTemplate {
        RouteTemplate {
            id: id.into(),
            name: format!("Route {}", id),
            stops: names
                .iter()
                .enumerate()
                .map(|(i, n)| RouteStop {
                    name: n.to_string(),
                    position: Position {
                        lat: 26.9 + i as f64 * 0.01,
                        lng: 75.7,
                    },
                })
                .collect(),
        }
    }

    fn store() -> MemoryStore {
        let mut s = MemoryStore::default();
        s.routes.insert("R1".into(), route("R1", &["A", "B", "C"]));
        s.routes.insert("R5".into(), route("R5", &["S0", "S1", "S2", "S3", "S4"]));
        s.routes.insert("EMPTY".into(), route("EMPTY", &[]));
        s.routes.insert("LOOP".into(), route("LOOP", &["School", "Market", "School"]));
        s.vehicles.insert(
            "V1".into(),
            VehicleRef {
                id: "V1".into(),
                driver_ids: vec!["D1".into()],
            },
        );
        s
    }

    fn admin() -> Principal {
        Principal::Admin { id: "A1".into() }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).expect("date")
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 7, minute, 0).single().expect("time")
    }

    fn statuses(t: &ProgressTracker) -> Vec<StopStatus> {
        t.stops.iter().map(|s| s.status).collect()
    }

    use StopStatus::{Left, Next, Pending, Reached};

    #[test]
    fn start_snapshots_route_with_first_stop_next() {
        let s = store();
        let tracking = Tracking::new(&s, AdvancePolicy::Permissive);
        let t = tracking.start("V1", "R5", day(), &admin()).expect("start");
        assert_eq!(statuses(&t), vec![Next, Pending, Pending, Pending, Pending]);
        assert!(!t.completed);
        assert!(t.stops.iter().all(|s| s.arrival_time.is_none()));
        assert_eq!(t.stops[2].position, s.routes["R5"].stops[2].position);
    }

    #[test]
    fn start_failures() {
        let s = store();
        let tracking = Tracking::new(&s, AdvancePolicy::Permissive);
        assert!(matches!(
            tracking.start("V404", "R1", day(), &admin()),
            Err(TrackerError::VehicleNotFound(_))
        ));
        assert!(matches!(
            tracking.start("V1", "R404", day(), &admin()),
            Err(TrackerError::RouteNotFound(_))
        ));
        assert!(matches!(
            tracking.start("V1", "EMPTY", day(), &admin()),
            Err(TrackerError::InvalidRoute(..))
        ));
        assert!(matches!(
            tracking.start("V1", "R1", day(), &Principal::Parent { id: "P1".into() }),
            Err(TrackerError::Forbidden)
        ));
        assert!(s.trackers.borrow().is_empty());
    }

    #[test]
    fn loop_route_with_repeated_stop_name_cannot_start() {
        let s = store();
        let tracking = Tracking::new(&s, AdvancePolicy::Permissive);
        match tracking.start("V1", "LOOP", day(), &admin()) {
            Err(e @ TrackerError::InvalidRoute(..)) => {
                assert_eq!(e.code(), "invalid_route");
                assert_eq!(e.status(), "bad_request");
            }
            other => panic!("expected invalid route, got {:?}", other),
        }
        assert!(s.trackers.borrow().is_empty());
    }

    #[test]
    fn in_order_advance_moves_the_frontier() {
        let s = store();
        let tracking = Tracking::new(&s, AdvancePolicy::Strict);
        let driver = Principal::Driver { id: "D1".into() };
        let t = tracking.start("V1", "R5", day(), &driver).expect("start");

        let names = ["S0", "S1", "S2", "S3", "S4"];
        let mut last = t;
        for (k, name) in names.iter().enumerate() {
            last = tracking
                .advance_at(&last.id, name, &driver, at(k as u32))
                .expect("advance");
            assert_eq!(last.stops[k].status, Reached);
            if k > 0 {
                assert_eq!(last.stops[k - 1].status, Left);
            }
            if k + 1 < names.len() {
                assert_eq!(last.stops[k + 1].status, Next);
                assert!(!last.completed, "completed early at {}", k);
            }
            assert!(last.stops.iter().skip(k + 2).all(|s| s.status == Pending));
        }
        assert!(last.completed);
        assert_eq!(statuses(&last), vec![Left, Left, Left, Left, Reached]);
        assert!(last.frontier().is_none());
    }

    #[test]
    fn arrival_times_are_kept_once_set() {
        let s = store();
        let tracking = Tracking::new(&s, AdvancePolicy::Permissive);
        let t = tracking.start("V1", "R1", day(), &admin()).expect("start");
        tracking.advance_at(&t.id, "A", &admin(), at(0)).expect("A");
        tracking.advance_at(&t.id, "B", &admin(), at(5)).expect("B");
        let t = tracking.advance_at(&t.id, "C", &admin(), at(9)).expect("C");
        assert_eq!(t.stops[0].arrival_time, Some(at(0)));
        assert_eq!(t.stops[1].arrival_time, Some(at(5)));
        assert_eq!(t.stops[2].arrival_time, Some(at(9)));
    }

    #[test]
    fn out_of_order_advance_is_applied_relative_to_the_stop() {
        let s = store();
        let tracking = Tracking::new(&s, AdvancePolicy::Permissive);
        let t = tracking.start("V1", "R1", day(), &admin()).expect("start");

        let t = tracking.advance_at(&t.id, "B", &admin(), at(1)).expect("B");
        assert_eq!(statuses(&t), vec![Left, Reached, Next]);
        assert!(!t.completed);

        let t = tracking.advance_at(&t.id, "C", &admin(), at(2)).expect("C");
        assert_eq!(statuses(&t), vec![Left, Left, Reached]);
        assert!(t.completed);
    }

    #[test]
    fn skipping_to_the_last_stop_completes_and_strands_middle_stops() {
        let s = store();
        let tracking = Tracking::new(&s, AdvancePolicy::Permissive);
        let t = tracking.start("V1", "R5", day(), &admin()).expect("start");
        let t = tracking.advance_at(&t.id, "S4", &admin(), at(1)).expect("S4");
        assert_eq!(statuses(&t), vec![Next, Pending, Pending, Left, Reached]);
        assert!(t.completed);
    }

    #[test]
    fn advancing_the_last_stop_again_keeps_completion() {
        let s = store();
        let tracking = Tracking::new(&s, AdvancePolicy::Permissive);
        let t = tracking.start("V1", "R1", day(), &admin()).expect("start");
        for name in ["A", "B", "C"] {
            tracking.advance_at(&t.id, name, &admin(), at(1)).expect("advance");
        }
        let again = tracking.advance_at(&t.id, "C", &admin(), at(30)).expect("again");
        assert!(again.completed);
        assert_eq!(statuses(&again), vec![Left, Left, Reached]);
        assert_eq!(again.stops[0].arrival_time, Some(at(1)));
    }

    #[test]
    fn strict_policy_rejects_anything_but_the_frontier() {
        let s = store();
        let tracking = Tracking::new(&s, AdvancePolicy::Strict);
        let t = tracking.start("V1", "R1", day(), &admin()).expect("start");
        let e = tracking.advance_at(&t.id, "C", &admin(), at(1)).unwrap_err();
        assert!(matches!(e, TrackerError::OutOfOrder { status: "Pending", .. }));
        assert_eq!(e.code(), "out_of_order");
        assert_eq!(statuses(&tracking.get(&t.id).expect("get")), vec![Next, Pending, Pending]);
    }

    #[test]
    fn unauthorized_advance_leaves_tracker_untouched() {
        let s = store();
        let tracking = Tracking::new(&s, AdvancePolicy::Permissive);
        let t = tracking.start("V1", "R1", day(), &admin()).expect("start");
        let before = tracking.get(&t.id).expect("get");

        for p in [
            Principal::Driver { id: "D2".into() },
            Principal::Teacher { id: "T1".into() },
            Principal::Student { id: "S1".into() },
        ] {
            assert!(matches!(
                tracking.advance_at(&t.id, "A", &p, at(1)),
                Err(TrackerError::Forbidden)
            ));
        }
        assert_eq!(tracking.get(&t.id).expect("get"), before);
        assert_eq!(*s.writes.borrow(), 0);
    }

    #[test]
    fn advance_lookup_failures() {
        let s = store();
        let tracking = Tracking::new(&s, AdvancePolicy::Permissive);
        let t = tracking.start("V1", "R1", day(), &admin()).expect("start");
        assert!(matches!(
            tracking.advance_at("nope", "A", &admin(), at(1)),
            Err(TrackerError::TrackerNotFound(_))
        ));
        assert!(matches!(
            tracking.advance_at(&t.id, "Z", &admin(), at(1)),
            Err(TrackerError::StopNotFound(_))
        ));
    }

    #[test]
    fn stale_version_is_a_conflict() {
        let s = store();
        let tracking = Tracking::new(&s, AdvancePolicy::Permissive);
        let t = tracking.start("V1", "R1", day(), &admin()).expect("start");
        tracking.advance_at(&t.id, "A", &admin(), at(1)).expect("A");

        let mut stale = t.clone();
        apply_advance(&mut stale, 1, at(2));
        assert!(matches!(s.save_tracker(&stale), Err(TrackerError::Conflict(_))));
    }

    #[test]
    fn later_route_edits_do_not_reach_started_trackers() {
        let mut s = store();
        let t = Tracking::new(&s, AdvancePolicy::Permissive)
            .start("V1", "R1", day(), &admin())
            .expect("start");
        s.routes.insert("R1".into(), route("R1", &["X"]));
        let tracking = Tracking::new(&s, AdvancePolicy::Permissive);
        let got = tracking.get(&t.id).expect("get");
        assert_eq!(got.stops.len(), 3);
        assert_eq!(got.stops[0].name, "A");
    }

    #[test]
    fn list_filters_by_vehicle_and_date() {
        let s = store();
        let tracking = Tracking::new(&s, AdvancePolicy::Permissive);
        tracking.start("V1", "R1", day(), &admin()).expect("start");
        let other = NaiveDate::from_ymd_opt(2024, 1, 2).expect("date");
        tracking.start("V1", "R5", other, &admin()).expect("start");

        let all = tracking.list(&TrackerFilter::default()).expect("list");
        assert_eq!(all.len(), 2);
        let on_day = tracking
            .list(&TrackerFilter {
                vehicle_id: Some("V1".into()),
                date: Some(other),
            })
            .expect("list");
        assert_eq!(on_day.len(), 1);
        assert_eq!(on_day[0].route_id, "R5");
    }
}
