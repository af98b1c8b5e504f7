//! Session-facing side shared by every control surface.

use crossbeam_channel as channel;
use std::sync::Arc;

pub mod error;
pub use error::Error;

pub mod event_loop;
pub use event_loop::{LoopContext, Spawner, SurfaceHandle};

mod factory;
pub use factory::{Buildable, Caps, Descriptor, Factory, ProtocolBox, FACTORY};

pub mod imp;

pub mod route_table;
pub use route_table::RouteTable;

pub mod selection;
pub use selection::{SelectionRegistry, SelectionSnapshot};

pub mod signal;
pub use signal::{UiRequest, UI_REQUESTS};

pub mod state;
pub use state::Node;

use crate::session::{RemoteId, RouteRef, Session};
use signal::Broadcaster;

/// State every control protocol carries, whatever the surface.
#[derive(Debug)]
pub struct ProtocolCore {
    name: Arc<str>,
    route_table: RouteTable,
    selection: Arc<SelectionRegistry>,
    active: bool,
    active_changed: Broadcaster<bool>,
}

impl ProtocolCore {
    pub fn new(
        name: impl Into<Arc<str>>,
        session: Arc<dyn Session>,
        selection: Arc<SelectionRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            route_table: RouteTable::new(session),
            selection,
            active: false,
            active_changed: Broadcaster::default(),
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        self.route_table.session()
    }

    pub fn selection(&self) -> &Arc<SelectionRegistry> {
        &self.selection
    }

    pub fn route_table(&self) -> &RouteTable {
        &self.route_table
    }

    pub fn route_table_mut(&mut self) -> &mut RouteTable {
        &mut self.route_table
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Receives the new state after each call to `set_active`.
    pub fn subscribe_active_changed(&self) -> channel::Receiver<bool> {
        self.active_changed.subscribe()
    }

    fn stripable_by_rid(&self, rid: RemoteId) -> Option<RouteRef> {
        let stripable = self.session().route_by_remote_id(rid).map(|route| RouteRef::new(&route));
        if stripable.is_none() {
            log::debug!("{}: no stripable with remote id {rid}", self.name);
        }

        stripable
    }

    fn record_active(&mut self, yn: bool) {
        self.active = yn;
        self.active_changed.emit(yn);
    }
}

pub trait ControlProtocol: Send + 'static {
    fn core(&self) -> &ProtocolCore;
    fn core_mut(&mut self) -> &mut ProtocolCore;

    fn name(&self) -> Arc<str> {
        self.core().name.clone()
    }

    /// Starts whatever the surface needs to run.
    ///
    /// Only called by [`ControlProtocol::set_active`] when the protocol
    /// is inactive.
    fn on_activate(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Only called by [`ControlProtocol::set_active`] when the protocol
    /// is active.
    fn on_deactivate(&mut self) {}

    /// Single entry point for activation changes.
    ///
    /// Surfaces implement `on_activate` & `on_deactivate` rather than
    /// overriding this. `ActiveChanged` is emitted even if the state
    /// doesn't change.
    fn set_active(&mut self, yn: bool) -> Result<(), Error> {
        if yn != self.active() {
            if yn {
                if let Err(err) = self.on_activate() {
                    log::error!("{}: {err}", self.name());
                    self.core_mut().record_active(false);
                    return Err(err);
                }
            } else {
                self.on_deactivate();
            }

            log::info!(
                "{}: {}",
                self.name(),
                if yn { "activated" } else { "deactivated" }
            );
        }

        self.core_mut().record_active(yn);

        Ok(())
    }

    fn active(&self) -> bool {
        self.core().active
    }

    /// Surfaces which can reflect the session state implement this.
    fn set_feedback(&mut self, _yn: bool) -> Result<(), Error> {
        Ok(())
    }

    fn get_feedback(&self) -> bool {
        false
    }

    fn midi_connectivity_established(&mut self, _yn: bool) {}

    fn stripable_selection_changed(&mut self, selection: &SelectionSnapshot);

    /// Called once by the surface thread before entering its loop.
    ///
    /// Surfaces which need [`ControlProtocol::event_loop_precall`] install
    /// it from here.
    fn attach_to_loop(&mut self, _ctx: &mut LoopContext) {}

    /// Runs once per loop iteration, before anything else is dispatched.
    ///
    /// Must be quick: it gates the iteration.
    fn event_loop_precall(&mut self) {}

    /// Periodic display refresh.
    fn refresh(&mut self) {}

    /// Surface specific child of the state node.
    fn surface_state(&self) -> Option<Node> {
        None
    }

    /// `node` is the whole protocol node.
    fn set_surface_state(&mut self, _node: &Node, _version: u32) -> Result<(), Error> {
        Ok(())
    }

    fn get_state(&self) -> Node {
        let mut node = Node::new(state::STATE_NODE_NAME)
            .with_attr("name", self.name())
            .with_attr("active", self.active())
            .with_attr("feedback", self.get_feedback())
            .with_attr(state::VERSION_ATTR, state::STATE_VERSION);

        if let Some(child) = self.surface_state() {
            node.add_child(child);
        }

        node
    }

    /// Restores a state written with schema `version` or older.
    ///
    /// On error, the protocol is left inactive, without feedback and with an
    /// empty route table. The surface specific state is rolled back.
    fn set_state(&mut self, node: &Node, version: u32) -> Result<(), Error> {
        let previous = self.get_state();

        apply_state(self, node, version).map_err(|err| {
            log::error!("{}: restoring state: {err}", self.name());

            let _ = self.set_active(false);
            let _ = self.set_feedback(false);
            if let Err(err) = self.set_surface_state(&previous, state::STATE_VERSION) {
                log::error!("{}: rolling back surface state: {err}", self.name());
            }
            self.core_mut().route_table_mut().set_size(0);

            err
        })
    }

    fn set_route_table_size(&mut self, size: u32) {
        self.core_mut().route_table_mut().set_size(size);
    }

    fn set_route_table(&mut self, index: u32, stripable: &RouteRef) -> Result<(), Error> {
        self.core_mut().route_table_mut().bind(index, stripable.clone())
    }

    fn set_route_table_by_remote_id(&mut self, index: u32, id: RemoteId) -> bool {
        self.core_mut().route_table_mut().bind_by_remote_id(index, id)
    }

    fn next_track(&mut self, initial_id: RemoteId) {
        self.core_mut().route_table_mut().next_track(initial_id);
    }

    fn prev_track(&mut self, initial_id: RemoteId) {
        self.core_mut().route_table_mut().prev_track(initial_id);
    }

    fn add_stripable_to_selection(&self, stripable: &RouteRef) {
        self.core().selection.add(stripable);
    }

    fn set_stripable_selection(&self, stripable: &RouteRef) {
        self.core().selection.set(stripable);
    }

    fn toggle_stripable_selection(&self, stripable: &RouteRef) {
        self.core().selection.toggle(stripable);
    }

    fn remove_stripable_from_selection(&self, stripable: &RouteRef) {
        self.core().selection.remove(stripable);
    }

    fn clear_stripable_selection(&self) {
        self.core().selection.clear();
    }

    fn add_rid_to_selection(&self, rid: RemoteId) {
        if let Some(stripable) = self.core().stripable_by_rid(rid) {
            self.add_stripable_to_selection(&stripable);
        }
    }

    fn set_rid_selection(&self, rid: RemoteId) {
        if let Some(stripable) = self.core().stripable_by_rid(rid) {
            self.set_stripable_selection(&stripable);
        }
    }

    fn toggle_rid_selection(&self, rid: RemoteId) {
        if let Some(stripable) = self.core().stripable_by_rid(rid) {
            self.toggle_stripable_selection(&stripable);
        }
    }

    fn remove_rid_from_selection(&self, rid: RemoteId) {
        if let Some(stripable) = self.core().stripable_by_rid(rid) {
            self.remove_stripable_from_selection(&stripable);
        }
    }

    fn first_selected_stripable(&self) -> Option<RouteRef> {
        self.core().selection.first()
    }

    /// Asks the GUI to do something.
    fn emit(&self, request: UiRequest) {
        log::debug!("{}: GUI request {request:?}", self.name());
        UI_REQUESTS.emit(request);
    }
}

fn apply_state<P>(protocol: &mut P, node: &Node, version: u32) -> Result<(), Error>
where
    P: ControlProtocol + ?Sized,
{
    node.expect_name(state::STATE_NODE_NAME)?;

    if version > state::STATE_VERSION {
        return Err(Error::UnsupportedVersion {
            found: version,
            latest: state::STATE_VERSION,
        });
    }

    let active = node.parse_attr::<bool>("active")?.unwrap_or(false);
    // Absent before version 2.
    let feedback = node.parse_attr::<bool>("feedback")?.unwrap_or(false);

    protocol.set_surface_state(node, version)?;
    protocol.set_feedback(feedback)?;
    protocol.set_active(active)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{mem::MemSession, Route};

    #[derive(Debug)]
    struct Probe {
        core: ProtocolCore,
        feedback: bool,
        fail_activation: bool,
        activations: u32,
        deactivations: u32,
        bank: u32,
        selections: Vec<SelectionSnapshot>,
    }

    impl Probe {
        fn new(session: Arc<dyn Session>, selection: Arc<SelectionRegistry>) -> Self {
            Self {
                core: ProtocolCore::new("Probe", session, selection),
                feedback: false,
                fail_activation: false,
                activations: 0,
                deactivations: 0,
                bank: 0,
                selections: Vec::new(),
            }
        }
    }

    impl ControlProtocol for Probe {
        fn core(&self) -> &ProtocolCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut ProtocolCore {
            &mut self.core
        }

        fn on_activate(&mut self) -> Result<(), Error> {
            if self.fail_activation {
                return Err(Error::Activation("no device".into()));
            }

            self.activations += 1;
            Ok(())
        }

        fn on_deactivate(&mut self) {
            self.deactivations += 1;
        }

        fn set_feedback(&mut self, yn: bool) -> Result<(), Error> {
            self.feedback = yn;
            Ok(())
        }

        fn get_feedback(&self) -> bool {
            self.feedback
        }

        fn stripable_selection_changed(&mut self, selection: &SelectionSnapshot) {
            self.selections.push(selection.clone());
        }

        fn surface_state(&self) -> Option<Node> {
            Some(Node::new("Probe").with_attr("bank", self.bank))
        }

        fn set_surface_state(&mut self, node: &Node, _version: u32) -> Result<(), Error> {
            if let Some(child) = node.child("Probe") {
                self.bank = child.require_attr("bank")?;
            }

            Ok(())
        }
    }

    fn probe() -> (Arc<MemSession>, Probe) {
        let session = MemSession::new();
        let probe = Probe::new(session.clone(), Arc::new(SelectionRegistry::new()));

        (session, probe)
    }

    #[test]
    fn starts_inactive() {
        let (_, probe) = probe();
        assert!(!probe.active());
        assert!(!probe.get_feedback());
        assert_eq!(probe.core().route_table().size(), 0);
    }

    #[test]
    fn set_active_runs_hooks_on_transitions_only() {
        let (_, mut probe) = probe();
        let changes = probe.core().subscribe_active_changed();

        probe.set_active(true).unwrap();
        probe.set_active(true).unwrap();
        probe.set_active(false).unwrap();

        assert_eq!(probe.activations, 1);
        assert_eq!(probe.deactivations, 1);
        assert!(!probe.active());
        // Re-entering the same state still notifies.
        assert_eq!(changes.try_iter().collect::<Vec<_>>(), [true, true, false]);
    }

    #[test]
    fn failed_activation_stays_inactive() {
        let (_, mut probe) = probe();
        probe.fail_activation = true;

        assert!(matches!(probe.set_active(true), Err(Error::Activation(_))));
        assert!(!probe.active());
    }

    #[test]
    fn default_feedback_is_unsupported_but_succeeds() {
        struct Bare(ProtocolCore);
        impl ControlProtocol for Bare {
            fn core(&self) -> &ProtocolCore {
                &self.0
            }
            fn core_mut(&mut self) -> &mut ProtocolCore {
                &mut self.0
            }
            fn stripable_selection_changed(&mut self, _: &SelectionSnapshot) {}
        }

        let mut bare = Bare(ProtocolCore::new(
            "Bare",
            MemSession::new(),
            Arc::new(SelectionRegistry::new()),
        ));
        assert!(bare.set_feedback(true).is_ok());
        assert!(!bare.get_feedback());
        assert!(bare.surface_state().is_none());
    }

    #[test]
    fn state_round_trip() {
        let (_, mut probe) = probe();
        probe.set_feedback(true).unwrap();
        probe.set_active(true).unwrap();
        let node = probe.get_state();
        assert_eq!(node.name, state::STATE_NODE_NAME);
        assert_eq!(node.attr("name"), Some("Probe"));

        let (_, mut fresh) = self::probe();
        fresh.set_state(&node, node.version().unwrap()).unwrap();

        assert!(fresh.active());
        assert!(fresh.get_feedback());
    }

    #[test]
    fn version_1_state_defaults_feedback() {
        let (_, mut probe) = probe();
        probe.feedback = true;

        let node = Node::new(state::STATE_NODE_NAME)
            .with_attr("name", "Probe")
            .with_attr("active", true);
        probe.set_state(&node, 1).unwrap();

        assert!(probe.active());
        assert!(!probe.get_feedback());
    }

    #[test]
    fn malformed_state_falls_back_to_default() {
        let (session, mut probe) = probe();
        let route: Arc<dyn Route> = session.add_track("A", 1);
        probe.set_route_table_size(2);
        probe.set_route_table(0, &RouteRef::new(&route)).unwrap();
        probe.set_active(true).unwrap();

        let node = Node::new(state::STATE_NODE_NAME).with_attr("active", "maybe");
        assert!(matches!(
            probe.set_state(&node, 2),
            Err(Error::MalformedState(_))
        ));
        assert!(!probe.active());
        assert_eq!(probe.core().route_table().size(), 0);

        let node = Node::new("Bogus");
        assert!(matches!(
            probe.set_state(&node, 2),
            Err(Error::UnexpectedNode { .. })
        ));
    }

    #[test]
    fn failed_activation_on_restore_resets_everything() {
        let (session, mut probe) = probe();
        let route: Arc<dyn Route> = session.add_track("A", 1);
        probe.set_route_table_size(1);
        probe.set_route_table(0, &RouteRef::new(&route)).unwrap();
        probe.bank = 3;
        probe.fail_activation = true;

        let mut node = Node::new(state::STATE_NODE_NAME)
            .with_attr("active", true)
            .with_attr("feedback", true);
        node.add_child(Node::new("Probe").with_attr("bank", 5));

        assert!(matches!(
            probe.set_state(&node, 2),
            Err(Error::Activation(_))
        ));
        assert!(!probe.active());
        assert!(!probe.get_feedback());
        assert_eq!(probe.bank, 3);
        assert_eq!(probe.core().route_table().size(), 0);
    }

    #[test]
    fn newer_state_is_rejected() {
        let (_, mut probe) = probe();
        let node = Node::new(state::STATE_NODE_NAME).with_attr("active", true);

        assert!(matches!(
            probe.set_state(&node, state::STATE_VERSION + 1),
            Err(Error::UnsupportedVersion { .. })
        ));
        assert!(!probe.active());
    }

    #[test]
    fn selection_forwarders() {
        let (session, probe) = probe();
        let a: Arc<dyn Route> = session.add_track("A", 1);
        let b: Arc<dyn Route> = session.add_track("B", 2);
        let (a, b) = (RouteRef::new(&a), RouteRef::new(&b));

        probe.set_stripable_selection(&a);
        probe.add_stripable_to_selection(&b);
        assert_eq!(probe.first_selected_stripable(), Some(a.clone()));

        probe.toggle_stripable_selection(&a);
        assert_eq!(probe.first_selected_stripable(), Some(b.clone()));

        probe.remove_stripable_from_selection(&b);
        assert!(probe.core().selection().is_empty());

        probe.add_stripable_to_selection(&a);
        probe.clear_stripable_selection();
        assert!(probe.core().selection().is_empty());
    }

    #[test]
    fn rid_selection_forwarders() {
        let (session, probe) = probe();
        session.add_track("A", 1);
        session.add_track("B", 2);
        let selection = probe.core().selection().clone();

        probe.set_rid_selection(2);
        probe.add_rid_to_selection(1);
        probe.add_rid_to_selection(99);
        let names: Vec<String> = selection
            .snapshot()
            .iter()
            .filter_map(|s| s.resolve(&*session))
            .map(|r| r.name())
            .collect();
        assert_eq!(names, ["B", "A"]);

        probe.toggle_rid_selection(2);
        probe.remove_rid_from_selection(1);
        assert!(selection.is_empty());
    }

    #[test]
    fn ui_requests_are_broadcast() {
        let (_, probe) = probe();
        let gui = UI_REQUESTS.subscribe();

        probe.emit(UiRequest::ScrollTimeline(0.5));

        assert!(gui
            .try_iter()
            .any(|req| req == UiRequest::ScrollTimeline(0.5)));
    }
}
