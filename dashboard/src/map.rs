//! Map renderer.
//!
//! [`MapRenderer`] owns exactly one [`MapSurface`] and keeps its markers and
//! polygons in step with the vehicle and geofence collections by diffing:
//! extraneous items are removed, missing ones created, existing ones updated
//! in place. Nothing is rebuilt wholesale.
//!
//! Marker moves are animated. The renderer has no clock of its own; the host
//! calls [`MapRenderer::frame`] on every animation frame.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::store::GeofenceStore;
use crate::types::{GeoFence, LatLng, Vehicle, VehicleStatus};

pub const MARKER_ANIMATION: Duration = Duration::from_millis(600);
pub const FLY_DURATION: Duration = Duration::from_secs(1);
pub const DEFAULT_CENTER: LatLng = LatLng { lat: 24.8607, lng: 67.0011 };
pub const DEFAULT_ZOOM: u8 = 12;
pub const HIGHLIGHT_ZOOM: u8 = 16;

/// Rings with fewer vertices than this are not drawn.
const MIN_RING_VERTICES: usize = 3;

/// How a vehicle marker should look. The surface turns this into an icon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerIcon {
    pub status: VehicleStatus,
    pub heading: f64,
    pub highlighted: bool,
}

/// The mapping library, seen from the renderer. Markers are addressed by
/// vehicle id and polygons by geofence id. A surface reports marker clicks
/// back through [`MapRenderer::marker_clicked`].
pub trait MapSurface {
    fn add_marker(&mut self, vehicle_id: &str, position: LatLng, icon: MarkerIcon, vehicle: &Vehicle);
    fn move_marker(&mut self, vehicle_id: &str, position: LatLng);
    /// Refreshes icon and popup content.
    fn update_marker(&mut self, vehicle_id: &str, icon: MarkerIcon, vehicle: &Vehicle);
    fn remove_marker(&mut self, vehicle_id: &str);
    fn open_popup(&mut self, vehicle_id: &str);

    fn add_polygon(&mut self, geofence_id: i64, name: &str, ring: &[LatLng]);
    fn set_polygon_ring(&mut self, geofence_id: i64, ring: &[LatLng]);
    fn remove_polygon(&mut self, geofence_id: i64);

    fn fly_to(&mut self, center: LatLng, zoom: u8, duration: Duration);
    fn dispose(&mut self);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

enum Lifecycle<S> {
    Uninitialized,
    Ready(S),
    Disposed,
}

#[derive(Debug, Clone, Copy)]
struct Animation {
    from: LatLng,
    to: LatLng,
    started: Instant,
}

#[derive(Debug)]
struct Marker {
    position: LatLng,
    animation: Option<Animation>,
}

#[derive(Debug)]
struct PendingPopup {
    vehicle_id: String,
    at: Instant,
}

pub struct MapRenderer<S: MapSurface> {
    surface: Lifecycle<S>,
    markers: HashMap<String, Marker>,
    polygons: HashSet<i64>,
    highlighted: Option<String>,
    pending_popup: Option<PendingPopup>,
}

impl<S: MapSurface> Default for MapRenderer<S> {
    fn default() -> Self {
        Self::new()
    }
}

pub fn ease_out_cubic(progress: f64) -> f64 {
    1.0 - (1.0 - progress.clamp(0.0, 1.0)).powi(3)
}

pub fn interpolate(from: LatLng, to: LatLng, t: f64) -> LatLng {
    LatLng { lat: from.lat + (to.lat - from.lat) * t, lng: from.lng + (to.lng - from.lng) * t }
}

/// Mean vehicle position, or the default centre for an empty fleet.
pub fn initial_center(vehicles: &[Vehicle]) -> LatLng {
    if vehicles.is_empty() {
        return DEFAULT_CENTER;
    }
    let n = vehicles.len() as f64;
    LatLng {
        lat: vehicles.iter().map(|v| v.lat).sum::<f64>() / n,
        lng: vehicles.iter().map(|v| v.lng).sum::<f64>() / n,
    }
}

impl<S: MapSurface> MapRenderer<S> {
    pub fn new() -> Self {
        MapRenderer {
            surface: Lifecycle::Uninitialized,
            markers: HashMap::new(),
            polygons: HashSet::new(),
            highlighted: None,
            pending_popup: None,
        }
    }

    /// Creates the surface once the host container is available. `create`
    /// receives the initial centre and zoom. Does nothing, and returns false,
    /// if a surface already exists or was disposed.
    pub fn mount(&mut self, vehicles: &[Vehicle], create: impl FnOnce(LatLng, u8) -> S) -> bool {
        if !matches!(self.surface, Lifecycle::Uninitialized) {
            return false;
        }
        let center = initial_center(vehicles);
        info!(lat = center.lat, lng = center.lng, zoom = DEFAULT_ZOOM, "map surface created");
        self.surface = Lifecycle::Ready(create(center, DEFAULT_ZOOM));
        true
    }

    pub fn unmount(&mut self) {
        if let Lifecycle::Ready(surface) = &mut self.surface {
            surface.dispose();
            info!("map surface disposed");
        }
        self.surface = Lifecycle::Disposed;
        self.markers.clear();
        self.polygons.clear();
        self.pending_popup = None;
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.surface, Lifecycle::Ready(_))
    }

    pub fn surface(&self) -> Option<&S> {
        match &self.surface {
            Lifecycle::Ready(surface) => Some(surface),
            _ => None,
        }
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    /// Displayed position of a marker, mid-animation included.
    pub fn marker_position(&self, vehicle_id: &str) -> Option<LatLng> {
        self.markers.get(vehicle_id).map(|m| m.position)
    }

    pub fn highlighted(&self) -> Option<&str> {
        self.highlighted.as_deref()
    }

    pub fn reconcile_vehicles(&mut self, vehicles: &[Vehicle], now: Instant) -> Reconciled {
        let Lifecycle::Ready(surface) = &mut self.surface else {
            return Reconciled::default();
        };
        let mut report = Reconciled::default();

        let present: HashSet<&str> = vehicles.iter().map(|v| v.vehicle_id.as_str()).collect();
        self.markers.retain(|id, _| {
            let keep = present.contains(id.as_str());
            if !keep {
                surface.remove_marker(id);
                report.removed += 1;
            }
            keep
        });

        for vehicle in vehicles {
            let icon = MarkerIcon {
                status: vehicle.status.unwrap_or(VehicleStatus::Online),
                heading: vehicle.heading,
                highlighted: self.highlighted.as_deref() == Some(vehicle.vehicle_id.as_str()),
            };
            let target = vehicle.position();

            match self.markers.get_mut(&vehicle.vehicle_id) {
                Some(marker) => {
                    marker.animation = Some(Animation { from: marker.position, to: target, started: now });
                    surface.update_marker(&vehicle.vehicle_id, icon, vehicle);
                    report.updated += 1;
                }
                None => {
                    surface.add_marker(&vehicle.vehicle_id, target, icon, vehicle);
                    self.markers
                        .insert(vehicle.vehicle_id.clone(), Marker { position: target, animation: None });
                    report.created += 1;
                }
            }
        }

        if report.created > 0 || report.removed > 0 {
            debug!(created = report.created, removed = report.removed, "markers reconciled");
        }
        report
    }

    /// Brings the polygons in line with the loaded geofences. Waits until the
    /// geofence fetch has finished.
    pub fn reconcile_geofences(&mut self, geofences: &GeofenceStore) -> Reconciled {
        let Lifecycle::Ready(surface) = &mut self.surface else {
            return Reconciled::default();
        };
        if geofences.is_loading() {
            return Reconciled::default();
        }
        let mut report = Reconciled::default();

        let fences: Vec<&GeoFence> = geofences
            .geofences()
            .iter()
            .filter(|f| f.coordinates.len() >= MIN_RING_VERTICES)
            .collect();
        // a fence whose ring became too short is removed like a missing one
        let present: HashSet<i64> = fences.iter().map(|f| f.id).collect();
        self.polygons.retain(|id| {
            let keep = present.contains(id);
            if !keep {
                surface.remove_polygon(*id);
                report.removed += 1;
            }
            keep
        });

        for fence in fences {
            let ring = fence.lat_lngs();
            if self.polygons.contains(&fence.id) {
                surface.set_polygon_ring(fence.id, &ring);
                report.updated += 1;
            } else {
                surface.add_polygon(fence.id, &fence.name, &ring);
                self.polygons.insert(fence.id);
                report.created += 1;
            }
        }
        report
    }

    /// Sets the highlighted vehicle. When it changes to a vehicle present in
    /// `vehicles`, the view flies there and the vehicle's popup opens once the
    /// flight is over.
    pub fn set_highlighted(&mut self, vehicle_id: Option<&str>, vehicles: &[Vehicle], now: Instant) {
        if self.highlighted.as_deref() == vehicle_id {
            return;
        }
        self.highlighted = vehicle_id.map(str::to_string);
        self.pending_popup = None;

        let Lifecycle::Ready(surface) = &mut self.surface else {
            return;
        };
        let Some(vehicle) = vehicle_id.and_then(|id| vehicles.iter().find(|v| v.vehicle_id == id))
        else {
            return;
        };
        surface.fly_to(vehicle.position(), HIGHLIGHT_ZOOM, FLY_DURATION);
        self.pending_popup =
            Some(PendingPopup { vehicle_id: vehicle.vehicle_id.clone(), at: now + FLY_DURATION });
    }

    /// Returns the vehicle id to report as selected if `vehicle_id` is one of
    /// our markers.
    pub fn marker_clicked<'a>(&self, vehicle_id: &'a str) -> Option<&'a str> {
        self.markers.contains_key(vehicle_id).then_some(vehicle_id)
    }

    /// Advances marker animations and fires a due popup. Returns whether any
    /// animation is still running.
    pub fn frame(&mut self, now: Instant) -> bool {
        let Lifecycle::Ready(surface) = &mut self.surface else {
            return false;
        };

        let mut running = false;
        for (id, marker) in &mut self.markers {
            let Some(animation) = marker.animation else {
                continue;
            };
            let elapsed = now.saturating_duration_since(animation.started);
            let progress = (elapsed.as_secs_f64() / MARKER_ANIMATION.as_secs_f64()).min(1.0);
            marker.position = interpolate(animation.from, animation.to, ease_out_cubic(progress));
            surface.move_marker(id, marker.position);
            if progress < 1.0 {
                running = true;
            } else {
                marker.animation = None;
            }
        }

        if self.pending_popup.as_ref().is_some_and(|p| now >= p.at) {
            if let Some(popup) = self.pending_popup.take() {
                if self.markers.contains_key(&popup.vehicle_id) {
                    surface.open_popup(&popup.vehicle_id);
                }
            }
        }
        running
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Add(String),
        Move(String),
        Update(String, bool),
        Remove(String),
        Popup(String),
        AddPolygon(i64, Vec<LatLng>),
        SetPolygon(i64),
        RemovePolygon(i64),
        FlyTo(LatLng, u8),
        Dispose,
    }

    #[derive(Debug, Default)]
    struct Recorder {
        calls: Vec<Call>,
    }

    impl Recorder {
        fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| f(c)).count()
        }
    }

    impl MapSurface for Recorder {
        fn add_marker(&mut self, id: &str, _: LatLng, _: MarkerIcon, _: &Vehicle) {
            self.calls.push(Call::Add(id.to_string()));
        }
        fn move_marker(&mut self, id: &str, _: LatLng) {
            self.calls.push(Call::Move(id.to_string()));
        }
        fn update_marker(&mut self, id: &str, icon: MarkerIcon, _: &Vehicle) {
            self.calls.push(Call::Update(id.to_string(), icon.highlighted));
        }
        fn remove_marker(&mut self, id: &str) {
            self.calls.push(Call::Remove(id.to_string()));
        }
        fn open_popup(&mut self, id: &str) {
            self.calls.push(Call::Popup(id.to_string()));
        }
        fn add_polygon(&mut self, id: i64, _: &str, ring: &[LatLng]) {
            self.calls.push(Call::AddPolygon(id, ring.to_vec()));
        }
        fn set_polygon_ring(&mut self, id: i64, _: &[LatLng]) {
            self.calls.push(Call::SetPolygon(id));
        }
        fn remove_polygon(&mut self, id: i64) {
            self.calls.push(Call::RemovePolygon(id));
        }
        fn fly_to(&mut self, center: LatLng, zoom: u8, _: Duration) {
            self.calls.push(Call::FlyTo(center, zoom));
        }
        fn dispose(&mut self) {
            self.calls.push(Call::Dispose);
        }
    }

    fn vehicle(id: &str, lat: f64, lng: f64) -> Vehicle {
        Vehicle {
            vehicle_id: id.to_string(),
            lat,
            lng,
            speed_kph: 50.0,
            heading: 0.0,
            timestamp: Utc::now(),
            status: Some(VehicleStatus::Online),
            region: None,
        }
    }

    fn fence(id: i64, coordinates: Vec<[f64; 2]>) -> GeoFence {
        GeoFence { id, name: format!("zone {id}"), coordinates }
    }

    fn mounted(vehicles: &[Vehicle]) -> MapRenderer<Recorder> {
        let mut map = MapRenderer::new();
        assert!(map.mount(vehicles, |_, _| Recorder::default()));
        map
    }

    fn calls(map: &MapRenderer<Recorder>) -> &[Call] {
        &map.surface().unwrap().calls
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let fleet = vec![vehicle("a", 1.0, 1.0), vehicle("b", 2.0, 2.0)];
        let mut map = mounted(&fleet);
        let now = Instant::now();

        let first = map.reconcile_vehicles(&fleet, now);
        let second = map.reconcile_vehicles(&fleet, now);

        assert_eq!(first, Reconciled { created: 2, updated: 0, removed: 0 });
        assert_eq!(second, Reconciled { created: 0, updated: 2, removed: 0 });
        assert_eq!(map.marker_count(), 2);
    }

    #[test]
    fn absent_vehicles_lose_their_marker() {
        let mut map = mounted(&[]);
        let now = Instant::now();
        map.reconcile_vehicles(&[vehicle("a", 1.0, 1.0), vehicle("b", 2.0, 2.0)], now);

        let report = map.reconcile_vehicles(&[vehicle("b", 2.0, 2.0), vehicle("c", 3.0, 3.0)], now);

        assert_eq!(report, Reconciled { created: 1, updated: 1, removed: 1 });
        assert!(calls(&map).contains(&Call::Remove("a".to_string())));
        assert!(map.marker_position("a").is_none());
    }

    #[test]
    fn moves_are_eased_over_600ms() {
        let mut map = mounted(&[]);
        let start = Instant::now();
        map.reconcile_vehicles(&[vehicle("a", 0.0, 0.0)], start);
        map.reconcile_vehicles(&[vehicle("a", 1.0, 2.0)], start);

        assert!(map.frame(start + Duration::from_millis(300)));
        let halfway = map.marker_position("a").unwrap();
        // ease-out covers 87.5% of the distance at half time
        assert!((halfway.lat - 0.875).abs() < 1e-9);
        assert!((halfway.lng - 1.75).abs() < 1e-9);

        assert!(!map.frame(start + MARKER_ANIMATION));
        assert_eq!(map.marker_position("a"), Some(LatLng { lat: 1.0, lng: 2.0 }));
        assert!(!map.frame(start + Duration::from_secs(5)));
    }

    #[test]
    fn new_move_starts_from_displayed_position() {
        let mut map = mounted(&[]);
        let start = Instant::now();
        map.reconcile_vehicles(&[vehicle("a", 0.0, 0.0)], start);
        map.reconcile_vehicles(&[vehicle("a", 1.0, 0.0)], start);
        let mid = start + Duration::from_millis(300);
        map.frame(mid);

        map.reconcile_vehicles(&[vehicle("a", 2.0, 0.0)], mid);
        map.frame(mid);

        assert!((map.marker_position("a").unwrap().lat - 0.875).abs() < 1e-9);
    }

    #[test]
    fn ease_out_cubic_endpoints() {
        assert_eq!(ease_out_cubic(0.0), 0.0);
        assert_eq!(ease_out_cubic(1.0), 1.0);
        assert_eq!(ease_out_cubic(2.0), 1.0);
    }

    #[test]
    fn polygons_wait_for_the_load_and_transpose_rings() {
        let mut map = mounted(&[]);
        let mut store = GeofenceStore::default();
        assert_eq!(map.reconcile_geofences(&store), Reconciled::default());

        store.finish(Ok(vec![
            fence(1, vec![[67.0, 24.0], [67.1, 24.0], [67.1, 24.1], [67.0, 24.0]]),
            fence(2, vec![[67.0, 24.0], [67.1, 24.0]]),
        ]));
        let report = map.reconcile_geofences(&store);

        assert_eq!(report.created, 1);
        assert_eq!(map.polygon_count(), 1);
        let Call::AddPolygon(id, ring) = &calls(&map)[0] else {
            panic!("expected a polygon, got {:?}", calls(&map));
        };
        assert_eq!(*id, 1);
        assert_eq!(ring.len(), 4);
        assert_eq!(ring[1], LatLng { lat: 24.0, lng: 67.1 });

        let again = map.reconcile_geofences(&store);
        assert_eq!(again, Reconciled { created: 0, updated: 1, removed: 0 });
    }

    #[test]
    fn polygon_with_a_degenerate_ring_is_removed() {
        let mut map = mounted(&[]);
        let square = fence(3, vec![[67.0, 24.0], [67.1, 24.0], [67.1, 24.1], [67.0, 24.0]]);
        map.reconcile_geofences(&GeofenceStore::Loaded(vec![square]));
        assert_eq!(map.polygon_count(), 1);

        let shrunk = fence(3, vec![[67.0, 24.0], [67.1, 24.0]]);
        let report = map.reconcile_geofences(&GeofenceStore::Loaded(vec![shrunk]));

        assert_eq!(report, Reconciled { created: 0, updated: 0, removed: 1 });
        assert_eq!(map.polygon_count(), 0);
        assert_eq!(calls(&map).last(), Some(&Call::RemovePolygon(3)));
    }

    #[test]
    fn highlight_flies_then_opens_popup() {
        let fleet = vec![vehicle("a", 1.0, 1.0), vehicle("b", 5.0, 6.0)];
        let mut map = mounted(&fleet);
        let now = Instant::now();
        map.reconcile_vehicles(&fleet, now);

        map.set_highlighted(Some("b"), &fleet, now);
        assert!(calls(&map).contains(&Call::FlyTo(LatLng { lat: 5.0, lng: 6.0 }, HIGHLIGHT_ZOOM)));

        map.frame(now + Duration::from_millis(500));
        assert!(!calls(&map).contains(&Call::Popup("b".to_string())));
        map.frame(now + FLY_DURATION);
        assert_eq!(map.surface().unwrap().count(|c| *c == Call::Popup("b".to_string())), 1);

        map.reconcile_vehicles(&fleet, now);
        assert!(calls(&map).contains(&Call::Update("b".to_string(), true)));
    }

    #[test]
    fn highlight_of_unknown_vehicle_does_not_fly() {
        let fleet = vec![vehicle("a", 1.0, 1.0)];
        let mut map = mounted(&fleet);
        map.set_highlighted(Some("ghost"), &fleet, Instant::now());

        assert_eq!(map.highlighted(), Some("ghost"));
        assert_eq!(map.surface().unwrap().count(|c| matches!(c, Call::FlyTo(..))), 0);
    }

    #[test]
    fn clicks_report_known_markers_only() {
        let fleet = vec![vehicle("a", 1.0, 1.0)];
        let mut map = mounted(&fleet);
        map.reconcile_vehicles(&fleet, Instant::now());

        assert_eq!(map.marker_clicked("a"), Some("a"));
        assert_eq!(map.marker_clicked("z"), None);
    }

    #[test]
    fn lifecycle_mounts_once_and_ignores_work_when_not_ready() {
        let fleet = vec![vehicle("a", 1.0, 1.0)];
        let mut map: MapRenderer<Recorder> = MapRenderer::new();
        assert_eq!(map.reconcile_vehicles(&fleet, Instant::now()), Reconciled::default());

        assert!(map.mount(&fleet, |_, _| Recorder::default()));
        assert!(!map.mount(&fleet, |_, _| Recorder::default()));
        map.reconcile_vehicles(&fleet, Instant::now());

        map.unmount();
        assert!(!map.is_ready());
        assert_eq!(map.marker_count(), 0);
        assert_eq!(map.reconcile_vehicles(&fleet, Instant::now()), Reconciled::default());
        assert!(!map.mount(&fleet, |_, _| Recorder::default()));
    }

    #[test]
    fn surface_is_centred_on_the_fleet() {
        let fleet = vec![vehicle("a", 10.0, 20.0), vehicle("b", 20.0, 40.0)];
        assert_eq!(initial_center(&fleet), LatLng { lat: 15.0, lng: 30.0 });
        assert_eq!(initial_center(&[]), DEFAULT_CENTER);
    }
}
