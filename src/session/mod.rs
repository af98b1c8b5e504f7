//! Boundary with the host session.
//!
//! The session owns the routes. Everything in this crate only ever holds
//! [`RouteRef`]s, which are weak and must be re-validated before use.

use std::{
    fmt,
    sync::{Arc, Weak},
};

pub mod mem;

/// Session-unique identifier of a route, stable for the route's lifetime.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RouteId(pub u64);

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route#{}", self.0)
    }
}

/// Operator-facing numeric id, independent of the route's position.
pub type RemoteId = u32;

pub trait Route: Send + Sync + 'static {
    fn id(&self) -> RouteId;
    fn remote_id(&self) -> RemoteId;

    fn name(&self) -> String;
    fn set_name(&self, name: &str);

    /// Nominal fader gain (linear).
    fn gain(&self) -> f32;
    fn set_gain(&self, gain: f32);
    /// Gain currently applied, taking automation and overrides into account.
    fn effective_gain(&self) -> f32;

    fn muted(&self) -> bool;
    fn set_muted(&self, yn: bool);

    fn soloed(&self) -> bool;
    fn set_soloed(&self, yn: bool);

    fn rec_enabled(&self) -> bool;
    fn set_rec_enabled(&self, yn: bool);

    /// Peak power on the given input, `None` if the route has no such input.
    fn peak_input_power(&self, which_input: u32) -> Option<f32>;
}

pub trait Session: Send + Sync + 'static {
    fn route_by_remote_id(&self, id: RemoteId) -> Option<Arc<dyn Route>>;
    fn route_by_id(&self, id: RouteId) -> Option<Arc<dyn Route>>;

    /// Whether the route is still part of the session.
    fn contains(&self, id: RouteId) -> bool {
        self.route_by_id(id).is_some()
    }

    /// Routes in session order.
    fn routes(&self) -> Vec<Arc<dyn Route>>;

    /// Current transport position in samples.
    fn transport_sample(&self) -> u64;
}

/// Weak handle on a session route.
#[derive(Clone)]
pub struct RouteRef {
    id: RouteId,
    route: Weak<dyn Route>,
}

impl RouteRef {
    pub fn new(route: &Arc<dyn Route>) -> Self {
        Self {
            id: route.id(),
            route: Arc::downgrade(route),
        }
    }

    pub fn id(&self) -> RouteId {
        self.id
    }

    /// Returns the route if it is still alive and still part of `session`.
    pub fn resolve(&self, session: &dyn Session) -> Option<Arc<dyn Route>> {
        let route = self.route.upgrade()?;
        if !session.contains(self.id) {
            return None;
        }

        Some(route)
    }
}

impl From<&Arc<dyn Route>> for RouteRef {
    fn from(route: &Arc<dyn Route>) -> Self {
        Self::new(route)
    }
}

impl PartialEq for RouteRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RouteRef {}

impl fmt::Debug for RouteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RouteRef").field(&self.id).finish()
    }
}
