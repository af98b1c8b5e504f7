//! Virtual bank of channel strips.
//!
//! Mirrors the routes bound to its slots into a display model, the way a
//! hardware surface would light its LEDs and move its faders. A focus
//! strip follows the first selected stripable instead of a bank.

use std::sync::Arc;

use crate::{
    ctrl_proto::{
        factory::{Buildable, Caps, ProtocolBox},
        ControlProtocol, Error, LoopContext, Node, ProtocolCore, SelectionRegistry,
        SelectionSnapshot,
    },
    session::{RemoteId, Route, RouteRef, Session},
};

const STATE_NODE: &str = "StripBank";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StripDisplay {
    pub name: String,
    pub gain: f32,
    pub effective_gain: f32,
    pub peak: f32,
    pub muted: bool,
    pub soloed: bool,
    pub rec_enabled: bool,
    pub selected: bool,
}

#[derive(Debug)]
pub struct StripBank {
    core: ProtocolCore,
    strips: u32,
    follow_selection: bool,
    feedback: bool,
    bank_start: Option<RemoteId>,
    display: Vec<StripDisplay>,
    selection: SelectionSnapshot,
    transport_sample: u64,
}

impl StripBank {
    pub fn new(
        name: &str,
        strips: u32,
        follow_selection: bool,
        session: Arc<dyn Session>,
        selection: Arc<SelectionRegistry>,
    ) -> Self {
        Self {
            core: ProtocolCore::new(name, session, selection),
            strips,
            follow_selection,
            feedback: false,
            bank_start: None,
            display: Vec::new(),
            selection: SelectionSnapshot::from(Vec::new()),
            transport_sample: 0,
        }
    }

    pub fn strips(&self) -> u32 {
        self.strips
    }

    pub fn display(&self) -> &[StripDisplay] {
        &self.display
    }

    /// Transport position as of the last loop iteration.
    pub fn transport_sample(&self) -> u64 {
        self.transport_sample
    }

    /// Remote id of the route on the first strip of the bank.
    pub fn bank_start(&self) -> Option<RemoteId> {
        self.bank_start
    }

    /// Binds consecutive session routes to the strips, from `bank_start`.
    fn assign_bank(&mut self) {
        let routes = self.core.session().routes();
        let start = self
            .bank_start
            .and_then(|rid| routes.iter().position(|route| route.remote_id() == rid))
            .unwrap_or(0);

        let table = self.core.route_table_mut();
        table.set_size(self.strips);
        for (idx, route) in routes.iter().skip(start).take(self.strips as usize).enumerate() {
            let _ = table.bind(idx as u32, route);
        }

        self.bank_start = routes.get(start).map(|route| route.remote_id());
        log::debug!("{}: bank starts at {:?}", self.core.name(), self.bank_start);
    }

    fn focus_first_selected(&mut self) {
        let first = self
            .selection
            .first()
            .filter(|first| first.resolve(self.core.session().as_ref()).is_some())
            .cloned();

        let table = self.core.route_table_mut();
        match first {
            Some(first) => {
                let _ = table.bind(0, first);
            }
            None => table.unbind(0),
        }
    }

    /// Scrolls the bank by one route.
    pub fn scroll(&mut self, forward: bool) {
        if self.follow_selection {
            return;
        }

        let routes = self.core.session().routes();
        let table = self.core.route_table();

        // Session position of the first strip, recovered from the first
        // strip whose route is still in the session.
        let current = (0..table.size()).find_map(|idx| {
            let route = table.route(idx)?;
            let pos = routes.iter().position(|other| other.id() == route.id())?;
            Some(pos as isize - idx as isize)
        });
        let current = match current {
            Some(current) => current,
            None => {
                log::debug!("{}: no live strip to scroll from", self.core.name());
                return;
            }
        };

        let step = if forward { 1 } else { -1 };
        let target = (current + step).clamp(0, routes.len() as isize - 1);
        if target == current {
            return;
        }

        self.bank_start = routes.get(target as usize).map(|route| route.remote_id());
        self.assign_bank();
    }

    pub fn fader_moved(&mut self, strip: u32, gain: f32) {
        self.core.route_table().route_set_gain(strip, gain);
    }

    pub fn mute_pressed(&mut self, strip: u32) {
        let table = self.core.route_table();
        table.route_set_muted(strip, !table.route_get_muted(strip));
    }

    pub fn solo_pressed(&mut self, strip: u32) {
        let table = self.core.route_table();
        table.route_set_soloed(strip, !table.route_get_soloed(strip));
    }

    pub fn rec_pressed(&mut self, strip: u32) {
        let table = self.core.route_table();
        table.route_set_rec_enable(strip, !table.route_get_rec_enable(strip));
    }

    /// Selects the strip's route, or toggles it in the selection if `extend`.
    pub fn select_pressed(&mut self, strip: u32, extend: bool) {
        let stripable = match self.core.route_table().route(strip) {
            Some(route) => RouteRef::new(&route),
            None => return,
        };

        if extend {
            self.toggle_stripable_selection(&stripable);
        } else {
            self.set_stripable_selection(&stripable);
        }
    }
}

impl ControlProtocol for StripBank {
    fn core(&self) -> &ProtocolCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ProtocolCore {
        &mut self.core
    }

    fn on_activate(&mut self) -> Result<(), Error> {
        if self.strips == 0 {
            return Err(Error::Activation(
                format!("{}: no strips", self.core.name()).into(),
            ));
        }

        self.display = vec![StripDisplay::default(); self.strips as usize];
        self.selection = self.core.selection().snapshot();

        if self.follow_selection {
            self.core.route_table_mut().set_size(self.strips);
            self.focus_first_selected();
        } else {
            self.assign_bank();
        }

        Ok(())
    }

    fn on_deactivate(&mut self) {
        self.core.route_table_mut().set_size(0);
        self.display.clear();
        self.selection = SelectionSnapshot::from(Vec::new());
    }

    fn set_feedback(&mut self, yn: bool) -> Result<(), Error> {
        self.feedback = yn;
        Ok(())
    }

    fn get_feedback(&self) -> bool {
        self.feedback
    }

    fn stripable_selection_changed(&mut self, selection: &SelectionSnapshot) {
        self.selection = selection.clone();
        if self.follow_selection {
            self.focus_first_selected();
        }
    }

    fn attach_to_loop(&mut self, ctx: &mut LoopContext) {
        ctx.install_precall(&self.name());
    }

    fn event_loop_precall(&mut self) {
        self.transport_sample = self.core.session().transport_sample();
    }

    fn refresh(&mut self) {
        if !self.feedback {
            return;
        }

        let table = self.core.route_table();
        for (idx, strip) in self.display.iter_mut().enumerate() {
            let idx = idx as u32;
            *strip = StripDisplay {
                name: table.route_get_name(idx),
                gain: table.route_get_gain(idx),
                effective_gain: table.route_get_effective_gain(idx),
                peak: table.route_get_peak_input_power(idx, 0),
                muted: table.route_get_muted(idx),
                soloed: table.route_get_soloed(idx),
                rec_enabled: table.route_get_rec_enable(idx),
                selected: table
                    .route_ref(idx)
                    .map_or(false, |stripable| self.selection.contains(stripable)),
            };
        }
    }

    fn surface_state(&self) -> Option<Node> {
        let mut node = Node::new(STATE_NODE)
            .with_attr("strips", self.strips)
            .with_attr("follow-selection", self.follow_selection);
        if let Some(bank_start) = self.bank_start {
            node.set_attr("bank-start", bank_start);
        }

        Some(node)
    }

    fn set_surface_state(&mut self, node: &Node, _version: u32) -> Result<(), Error> {
        let child = match node.child(STATE_NODE) {
            Some(child) => child,
            None => return Ok(()),
        };

        let strips = child.parse_attr("strips")?.unwrap_or(self.strips);
        if strips == 0 {
            return Err(Error::MalformedState(
                format!("{STATE_NODE}: strips must be > 0").into(),
            ));
        }
        let follow_selection = child
            .parse_attr("follow-selection")?
            .unwrap_or(self.follow_selection);
        let bank_start = child.parse_attr("bank-start")?;

        self.strips = strips;
        self.follow_selection = follow_selection;
        self.bank_start = bank_start;

        if self.active() {
            self.display = vec![StripDisplay::default(); self.strips as usize];
            if self.follow_selection {
                self.core.route_table_mut().set_size(self.strips);
                self.focus_first_selected();
            } else {
                self.assign_bank();
            }
        }

        Ok(())
    }
}

pub struct StripBank8;

impl Buildable for StripBank8 {
    const NAME: &'static str = "Strip Bank";
    const ID: &'static str = "uri://ctrl-protocol/strip-bank/1";
    const CAPS: Caps = Caps::FEEDBACK;

    fn build(
        session: Arc<dyn Session>,
        selection: Arc<SelectionRegistry>,
    ) -> Result<ProtocolBox, Error> {
        Ok(Box::new(StripBank::new(Self::NAME, 8, false, session, selection)))
    }
}

pub struct FocusStrip;

impl Buildable for FocusStrip {
    const NAME: &'static str = "Focus Strip";
    const ID: &'static str = "uri://ctrl-protocol/focus-strip/1";
    const CAPS: Caps = Caps::FEEDBACK;

    fn build(
        session: Arc<dyn Session>,
        selection: Arc<SelectionRegistry>,
    ) -> Result<ProtocolBox, Error> {
        Ok(Box::new(StripBank::new(Self::NAME, 1, true, session, selection)))
    }
}
