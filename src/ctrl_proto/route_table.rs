//! Mapping between the fixed controls of a surface and the session routes.
//!
//! Most surfaces control 1 to N strips at a time while the session holds M
//! routes, where M may be smaller, larger or equal to N. The table tells
//! which route each physical strip currently drives.
//!
//! Accessors are called on every refresh tick. An index past the current
//! size, an unbound slot or a route which left the session are routine
//! while the operator works, so getters return a neutral value and setters
//! do nothing. Only [`RouteTable::bind`] reports an error.

use std::sync::Arc;

use super::Error;
use crate::session::{RemoteId, Route, RouteRef, Session};

pub struct RouteTable {
    session: Arc<dyn Session>,
    slots: Vec<Option<RouteRef>>,
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("slots", &self.slots)
            .finish()
    }
}

impl RouteTable {
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self {
            session,
            slots: Vec::new(),
        }
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    pub fn size(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Resizes the table to exactly `size` slots, all of them unbound.
    pub fn set_size(&mut self, size: u32) {
        log::debug!("Route table size {} -> {size}", self.slots.len());

        self.slots.clear();
        self.slots.resize(size as usize, None);
    }

    pub fn bind(&mut self, index: u32, route: impl Into<RouteRef>) -> Result<(), Error> {
        let size = self.size();
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(Error::IndexOutOfRange { index, size })?;

        let route = route.into();
        log::debug!("Route table slot {index} -> {}", route.id());
        *slot = Some(route);

        Ok(())
    }

    /// Binds the slot to the route with the given remote control id.
    ///
    /// Returns `false`, leaving the slot untouched, if the index is out of
    /// range or if no route has this id.
    pub fn bind_by_remote_id(&mut self, index: u32, id: RemoteId) -> bool {
        if index >= self.size() {
            log::trace!("Route table: no slot {index} to bind remote id {id}");
            return false;
        }

        match self.session.route_by_remote_id(id) {
            Some(route) => self.bind(index, &route).is_ok(),
            None => {
                log::debug!("Route table: no route with remote id {id}");
                false
            }
        }
    }

    pub fn unbind(&mut self, index: u32) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            *slot = None;
        }
    }

    pub fn route_ref(&self, index: u32) -> Option<&RouteRef> {
        self.slots.get(index as usize)?.as_ref()
    }

    /// Returns the route in the slot if it is still part of the session.
    pub fn route(&self, index: u32) -> Option<Arc<dyn Route>> {
        let route = self.route_ref(index)?.resolve(self.session.as_ref());
        if route.is_none() {
            log::trace!("Route table: slot {index} is unbound or its route is gone");
        }

        route
    }

    fn with_route<T>(&self, index: u32, neutral: T, f: impl FnOnce(&dyn Route) -> T) -> T {
        match self.route(index) {
            Some(route) => f(route.as_ref()),
            None => neutral,
        }
    }

    pub fn route_set_rec_enable(&self, index: u32, yn: bool) {
        self.with_route(index, (), |route| route.set_rec_enabled(yn))
    }

    pub fn route_get_rec_enable(&self, index: u32) -> bool {
        self.with_route(index, false, |route| route.rec_enabled())
    }

    pub fn route_get_gain(&self, index: u32) -> f32 {
        self.with_route(index, 0.0, |route| route.gain())
    }

    pub fn route_set_gain(&self, index: u32, gain: f32) {
        self.with_route(index, (), |route| route.set_gain(gain))
    }

    /// Gain currently applied by the route, automation included.
    pub fn route_get_effective_gain(&self, index: u32) -> f32 {
        self.with_route(index, 0.0, |route| route.effective_gain())
    }

    pub fn route_get_peak_input_power(&self, index: u32, which_input: u32) -> f32 {
        self.with_route(index, 0.0, |route| {
            route.peak_input_power(which_input).unwrap_or(0.0)
        })
    }

    pub fn route_get_muted(&self, index: u32) -> bool {
        self.with_route(index, false, |route| route.muted())
    }

    pub fn route_set_muted(&self, index: u32, yn: bool) {
        self.with_route(index, (), |route| route.set_muted(yn))
    }

    pub fn route_get_soloed(&self, index: u32) -> bool {
        self.with_route(index, false, |route| route.soloed())
    }

    pub fn route_set_soloed(&self, index: u32, yn: bool) {
        self.with_route(index, (), |route| route.set_soloed(yn))
    }

    pub fn route_get_name(&self, index: u32) -> String {
        self.with_route(index, String::new(), |route| route.name())
    }

    pub fn route_set_name(&self, index: u32, name: &str) {
        self.with_route(index, (), |route| route.set_name(name))
    }

    /// Moves the first slot to the route following `initial_id` in session order.
    ///
    /// Does nothing if the table has no slots, if `initial_id` doesn't
    /// resolve or if that route is the last one.
    pub fn next_track(&mut self, initial_id: RemoteId) {
        self.step_first_slot(initial_id, |pos, len| (pos + 1 < len).then(|| pos + 1));
    }

    /// Moves the first slot to the route preceding `initial_id` in session order.
    ///
    /// Does nothing if the table has no slots, if `initial_id` doesn't
    /// resolve or if that route is the first one.
    pub fn prev_track(&mut self, initial_id: RemoteId) {
        self.step_first_slot(initial_id, |pos, _len| pos.checked_sub(1));
    }

    fn step_first_slot(
        &mut self,
        initial_id: RemoteId,
        step: impl FnOnce(usize, usize) -> Option<usize>,
    ) {
        if self.slots.is_empty() {
            log::trace!("Route table: empty, ignoring bank step");
            return;
        }

        let routes = self.session.routes();
        let pos = match routes.iter().position(|route| route.remote_id() == initial_id) {
            Some(pos) => pos,
            None => {
                log::debug!("Route table: no route with remote id {initial_id} to step from");
                return;
            }
        };

        match step(pos, routes.len()) {
            Some(target) => {
                let _ = self.bind(0, &routes[target]);
            }
            None => log::trace!("Route table: reached the end of the session routes"),
        }
    }
}
