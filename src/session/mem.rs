//! In-memory [`Session`] used by the host demo and the tests.
//!
//! Routes only store the values exposed through [`Route`]. Nothing is
//! processed.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use super::{RemoteId, Route, RouteId, Session};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteKind {
    Track,
    Bus,
}

#[derive(Debug)]
struct RouteState {
    name: String,
    gain: f32,
    gain_override: Option<f32>,
    muted: bool,
    soloed: bool,
    rec_enabled: bool,
    peaks: Vec<f32>,
}

#[derive(Debug)]
pub struct MemRoute {
    id: RouteId,
    remote_id: RemoteId,
    kind: RouteKind,
    state: Mutex<RouteState>,
}

impl MemRoute {
    fn new(id: RouteId, remote_id: RemoteId, kind: RouteKind, name: &str, inputs: usize) -> Self {
        Self {
            id,
            remote_id,
            kind,
            state: Mutex::new(RouteState {
                name: name.to_string(),
                gain: 1.0,
                gain_override: None,
                muted: false,
                soloed: false,
                rec_enabled: false,
                peaks: vec![0.0; inputs],
            }),
        }
    }

    pub fn kind(&self) -> RouteKind {
        self.kind
    }

    /// Simulates automation: the effective gain diverges from the fader.
    pub fn set_gain_override(&self, gain: Option<f32>) {
        self.state.lock().unwrap().gain_override = gain;
    }

    pub fn set_peak(&self, which_input: usize, power: f32) {
        if let Some(peak) = self.state.lock().unwrap().peaks.get_mut(which_input) {
            *peak = power;
        }
    }
}

impl Route for MemRoute {
    fn id(&self) -> RouteId {
        self.id
    }

    fn remote_id(&self) -> RemoteId {
        self.remote_id
    }

    fn name(&self) -> String {
        self.state.lock().unwrap().name.clone()
    }

    fn set_name(&self, name: &str) {
        self.state.lock().unwrap().name = name.to_string();
    }

    fn gain(&self) -> f32 {
        self.state.lock().unwrap().gain
    }

    fn set_gain(&self, gain: f32) {
        self.state.lock().unwrap().gain = gain.max(0.0);
    }

    fn effective_gain(&self) -> f32 {
        let state = self.state.lock().unwrap();
        state.gain_override.unwrap_or(state.gain)
    }

    fn muted(&self) -> bool {
        self.state.lock().unwrap().muted
    }

    fn set_muted(&self, yn: bool) {
        self.state.lock().unwrap().muted = yn;
    }

    fn soloed(&self) -> bool {
        self.state.lock().unwrap().soloed
    }

    fn set_soloed(&self, yn: bool) {
        self.state.lock().unwrap().soloed = yn;
    }

    fn rec_enabled(&self) -> bool {
        self.state.lock().unwrap().rec_enabled
    }

    fn set_rec_enabled(&self, yn: bool) {
        // Busses can't record.
        if self.kind == RouteKind::Track {
            self.state.lock().unwrap().rec_enabled = yn;
        }
    }

    fn peak_input_power(&self, which_input: u32) -> Option<f32> {
        self.state
            .lock()
            .unwrap()
            .peaks
            .get(which_input as usize)
            .copied()
    }
}

#[derive(Debug, Default)]
pub struct MemSession {
    routes: Mutex<Vec<Arc<MemRoute>>>,
    next_id: AtomicU64,
    transport_sample: AtomicU64,
}

impl MemSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Appends a route at the end of the session order.
    pub fn add_route(
        &self,
        kind: RouteKind,
        name: &str,
        remote_id: RemoteId,
        inputs: usize,
    ) -> Arc<MemRoute> {
        let id = RouteId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let route = Arc::new(MemRoute::new(id, remote_id, kind, name, inputs));

        log::debug!("Session: adding {kind:?} {name} ({id}, remote id {remote_id})");
        self.routes.lock().unwrap().push(route.clone());

        route
    }

    pub fn add_track(&self, name: &str, remote_id: RemoteId) -> Arc<MemRoute> {
        self.add_route(RouteKind::Track, name, remote_id, 2)
    }

    pub fn remove_route(&self, id: RouteId) -> bool {
        let mut routes = self.routes.lock().unwrap();
        let len = routes.len();
        routes.retain(|route| route.id != id);

        let removed = routes.len() != len;
        if removed {
            log::debug!("Session: removed {id}");
        }

        removed
    }

    pub fn route(&self, id: RouteId) -> Option<Arc<MemRoute>> {
        self.routes
            .lock()
            .unwrap()
            .iter()
            .find(|route| route.id == id)
            .cloned()
    }

    pub fn set_transport_sample(&self, sample: u64) {
        self.transport_sample.store(sample, Ordering::Release);
    }
}

impl Session for MemSession {
    fn route_by_remote_id(&self, id: RemoteId) -> Option<Arc<dyn Route>> {
        self.routes
            .lock()
            .unwrap()
            .iter()
            .find(|route| route.remote_id == id)
            .map(|route| route.clone() as Arc<dyn Route>)
    }

    fn route_by_id(&self, id: RouteId) -> Option<Arc<dyn Route>> {
        self.route(id).map(|route| route as Arc<dyn Route>)
    }

    fn routes(&self) -> Vec<Arc<dyn Route>> {
        self.routes
            .lock()
            .unwrap()
            .iter()
            .map(|route| route.clone() as Arc<dyn Route>)
            .collect()
    }

    fn transport_sample(&self) -> u64 {
        self.transport_sample.load(Ordering::Acquire)
    }
}
