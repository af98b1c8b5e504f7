//! Dedicated thread driving a control protocol.
//!
//! Each iteration runs the protocol's precall, if it installed one, then
//! dispatches one of: a request from the host, a selection change, a
//! refresh tick.

use crossbeam_channel as channel;
use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use super::{ControlProtocol, Error, ProtocolBox, SelectionSnapshot};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Per-loop registration point for the precall.
#[derive(Debug)]
pub struct LoopContext {
    id: u64,
    precall_owner: Option<Arc<str>>,
}

impl Default for LoopContext {
    fn default() -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            precall_owner: None,
        }
    }
}

impl LoopContext {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Installs `owner`'s precall in this loop.
    ///
    /// Installing again for the same owner is a no-op and returns `false`.
    /// A loop holds a single precall: installing for another owner replaces
    /// the previous one.
    pub fn install_precall(&mut self, owner: &str) -> bool {
        match self.precall_owner {
            Some(ref cur) if cur.as_ref() == owner => {
                log::trace!("Loop {}: precall already installed for {owner}", self.id);
                return false;
            }
            Some(ref cur) => {
                log::warn!("Loop {}: precall for {cur} replaced by {owner}", self.id);
            }
            None => log::debug!("Loop {}: precall installed for {owner}", self.id),
        }

        self.precall_owner = Some(owner.into());

        true
    }

    pub fn remove_precall(&mut self) {
        if let Some(owner) = self.precall_owner.take() {
            log::debug!("Loop {}: precall removed for {owner}", self.id);
        }
    }

    pub fn has_precall(&self) -> bool {
        self.precall_owner.is_some()
    }
}

pub type Invocation = Box<dyn FnOnce(&mut dyn ControlProtocol) + Send>;

pub enum Request {
    SetActive(bool),
    SetFeedback(bool),
    MidiConnectivity(bool),
    Invoke(Invocation),
    Shutdown,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Request::*;
        match self {
            SetActive(yn) => f.debug_tuple("SetActive").field(yn).finish(),
            SetFeedback(yn) => f.debug_tuple("SetFeedback").field(yn).finish(),
            MidiConnectivity(yn) => f.debug_tuple("MidiConnectivity").field(yn).finish(),
            Invoke(_) => f.write_str("Invoke"),
            Shutdown => f.write_str("Shutdown"),
        }
    }
}

pub struct Spawner {
    pub protocol: ProtocolBox,
    pub refresh_interval: Duration,
}

impl Spawner {
    pub fn new(protocol: ProtocolBox) -> Self {
        Self {
            protocol,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    pub fn spawn(self) -> SurfaceHandle {
        let (req_tx, req_rx) = channel::unbounded();
        let name = self.protocol.name();

        let surface_loop = SurfaceLoop::new(self.protocol, req_rx, self.refresh_interval);
        let thread = std::thread::spawn(move || surface_loop.run());

        SurfaceHandle {
            name,
            req_tx,
            thread: Some(thread),
        }
    }
}

/// Host side of a surface thread.
pub struct SurfaceHandle {
    name: Arc<str>,
    req_tx: channel::Sender<Request>,
    thread: Option<std::thread::JoinHandle<ProtocolBox>>,
}

impl SurfaceHandle {
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    fn send(&self, req: Request) -> Result<(), Error> {
        self.req_tx.send(req).map_err(|_| Error::ThreadGone)
    }

    pub fn set_active(&self, yn: bool) -> Result<(), Error> {
        self.send(Request::SetActive(yn))
    }

    pub fn set_feedback(&self, yn: bool) -> Result<(), Error> {
        self.send(Request::SetFeedback(yn))
    }

    pub fn midi_connectivity_established(&self, yn: bool) -> Result<(), Error> {
        self.send(Request::MidiConnectivity(yn))
    }

    /// Runs `f` on the surface thread.
    pub fn invoke<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut dyn ControlProtocol) + Send + 'static,
    {
        self.send(Request::Invoke(Box::new(f)))
    }

    /// Runs `f` on the surface thread and waits for its result.
    pub fn query<T, F>(&self, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn ControlProtocol) -> T + Send + 'static,
    {
        let (res_tx, res_rx) = channel::bounded(1);
        self.invoke(move |protocol| {
            let _ = res_tx.send(f(protocol));
        })?;

        res_rx.recv().map_err(|_| Error::ThreadGone)
    }

    /// Stops the thread and hands the protocol back, deactivated.
    pub fn shutdown(mut self) -> Result<ProtocolBox, Error> {
        self.stop().ok_or(Error::ThreadGone)
    }

    fn stop(&mut self) -> Option<ProtocolBox> {
        let thread = self.thread.take()?;
        let _ = self.req_tx.send(Request::Shutdown);

        match thread.join() {
            Ok(protocol) => Some(protocol),
            Err(_) => {
                log::error!("{}: surface thread panicked", self.name);
                None
            }
        }
    }
}

impl Drop for SurfaceHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

pub(crate) struct SurfaceLoop {
    protocol: ProtocolBox,
    ctx: LoopContext,
    req_rx: channel::Receiver<Request>,
    selection_rx: channel::Receiver<SelectionSnapshot>,
    ticker: channel::Receiver<std::time::Instant>,
}

impl SurfaceLoop {
    pub(crate) fn new(
        mut protocol: ProtocolBox,
        req_rx: channel::Receiver<Request>,
        refresh_interval: Duration,
    ) -> Self {
        let selection_rx = protocol.core().selection().subscribe();

        let mut ctx = LoopContext::default();
        protocol.attach_to_loop(&mut ctx);

        Self {
            protocol,
            ctx,
            req_rx,
            selection_rx,
            ticker: channel::tick(refresh_interval),
        }
    }

    fn run(mut self) -> ProtocolBox {
        log::debug!("{}: entering surface loop {}", self.protocol.name(), self.ctx.id);

        while self.iterate().is_continue() {}

        if let Err(err) = self.protocol.set_active(false) {
            log::error!("{}: {err}", self.protocol.name());
        }

        log::debug!("{}: leaving surface loop {}", self.protocol.name(), self.ctx.id);

        self.protocol
    }

    pub(crate) fn iterate(&mut self) -> ControlFlow<(), ()> {
        if self.ctx.has_precall() && self.protocol.active() {
            self.protocol.event_loop_precall();
        }

        channel::select! {
            recv(self.req_rx) -> req => match req {
                Ok(req) => return self.handle_request(req),
                Err(_) => {
                    log::debug!("{}: request channel closed", self.protocol.name());
                    return ControlFlow::Break(());
                }
            },
            recv(self.selection_rx) -> snapshot => {
                // Always drained so it doesn't pile up while inactive.
                if let Ok(snapshot) = snapshot {
                    if self.protocol.active() {
                        self.protocol.stripable_selection_changed(&snapshot);
                    } else {
                        log::trace!("{}: inactive, ignoring selection", self.protocol.name());
                    }
                }
            },
            recv(self.ticker) -> _ => {
                if self.protocol.active() {
                    self.protocol.refresh();
                }
            },
        }

        ControlFlow::Continue(())
    }

    fn handle_request(&mut self, req: Request) -> ControlFlow<(), ()> {
        use Request::*;

        log::trace!("{}: {req:?}", self.protocol.name());

        match req {
            SetActive(yn) => {
                if let Err(err) = self.protocol.set_active(yn) {
                    log::error!("{}: {err}", self.protocol.name());
                }
            }
            SetFeedback(yn) => {
                if let Err(err) = self.protocol.set_feedback(yn) {
                    log::error!("{}: {err}", self.protocol.name());
                }
            }
            MidiConnectivity(yn) => self.protocol.midi_connectivity_established(yn),
            Invoke(f) => f(self.protocol.as_mut()),
            Shutdown => return ControlFlow::Break(()),
        }

        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ctrl_proto::{ProtocolCore, SelectionRegistry},
        session::{mem::MemSession, Route, RouteRef},
    };
    use std::sync::atomic::AtomicU32;

    #[derive(Debug, Default)]
    struct Counts {
        precalls: AtomicU32,
        refreshes: AtomicU32,
        selections: AtomicU32,
    }

    impl Counts {
        fn precalls(&self) -> u32 {
            self.precalls.load(Ordering::SeqCst)
        }

        fn refreshes(&self) -> u32 {
            self.refreshes.load(Ordering::SeqCst)
        }

        fn selections(&self) -> u32 {
            self.selections.load(Ordering::SeqCst)
        }
    }

    struct Counter {
        core: ProtocolCore,
        install_twice: bool,
        counts: Arc<Counts>,
    }

    impl ControlProtocol for Counter {
        fn core(&self) -> &ProtocolCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut ProtocolCore {
            &mut self.core
        }

        fn stripable_selection_changed(&mut self, _: &SelectionSnapshot) {
            self.counts.selections.fetch_add(1, Ordering::SeqCst);
        }

        fn attach_to_loop(&mut self, ctx: &mut LoopContext) {
            assert!(ctx.install_precall(&self.name()));
            if self.install_twice {
                assert!(!ctx.install_precall(&self.name()));
            }
        }

        fn event_loop_precall(&mut self) {
            self.counts.precalls.fetch_add(1, Ordering::SeqCst);
        }

        fn refresh(&mut self) {
            self.counts.refreshes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter(
        selection: Arc<SelectionRegistry>,
        install_twice: bool,
    ) -> (ProtocolBox, Arc<Counts>) {
        let counts = Arc::new(Counts::default());
        let protocol: ProtocolBox = Box::new(Counter {
            core: ProtocolCore::new("Counter", MemSession::new(), selection),
            install_twice,
            counts: counts.clone(),
        });

        (protocol, counts)
    }

    fn quiet_loop(protocol: ProtocolBox) -> (channel::Sender<Request>, SurfaceLoop) {
        let (req_tx, req_rx) = channel::unbounded();
        let surface_loop = SurfaceLoop::new(protocol, req_rx, Duration::from_secs(3600));

        (req_tx, surface_loop)
    }

    #[test]
    fn install_precall_is_idempotent_per_owner() {
        let mut ctx = LoopContext::default();
        assert!(!ctx.has_precall());

        assert!(ctx.install_precall("A"));
        assert!(!ctx.install_precall("A"));
        assert!(ctx.install_precall("B"));
        assert!(ctx.has_precall());

        ctx.remove_precall();
        assert!(!ctx.has_precall());
        assert_ne!(ctx.id(), LoopContext::default().id());
    }

    #[test]
    fn precall_once_per_iteration_while_active() {
        let (protocol, counts) = counter(Arc::new(SelectionRegistry::new()), true);
        let (req_tx, mut surface_loop) = quiet_loop(protocol);

        req_tx.send(Request::MidiConnectivity(true)).unwrap();
        assert!(surface_loop.iterate().is_continue());
        assert_eq!(counts.precalls(), 0);

        req_tx.send(Request::SetActive(true)).unwrap();
        for _ in 0..3 {
            req_tx.send(Request::SetFeedback(true)).unwrap();
        }
        for _ in 0..4 {
            assert!(surface_loop.iterate().is_continue());
        }
        // Active during the last 3 iterations.
        assert_eq!(counts.precalls(), 3);

        req_tx.send(Request::Shutdown).unwrap();
        assert!(surface_loop.iterate().is_break());
    }

    #[test]
    fn selection_ignored_while_inactive() {
        let session = MemSession::new();
        let route: Arc<dyn Route> = session.add_track("A", 1);
        let a = RouteRef::new(&route);
        let selection = Arc::new(SelectionRegistry::new());
        let (protocol, counts) = counter(selection.clone(), false);
        let (req_tx, mut surface_loop) = quiet_loop(protocol);

        selection.add(&a);
        assert!(surface_loop.iterate().is_continue());
        assert_eq!(counts.selections(), 0);

        req_tx.send(Request::SetActive(true)).unwrap();
        assert!(surface_loop.iterate().is_continue());
        selection.clear();
        assert!(surface_loop.iterate().is_continue());
        assert_eq!(counts.selections(), 1);
    }

    #[test]
    fn closed_request_channel_ends_loop() {
        let (protocol, _) = counter(Arc::new(SelectionRegistry::new()), false);
        let (req_tx, mut surface_loop) = quiet_loop(protocol);

        drop(req_tx);
        assert!(surface_loop.iterate().is_break());
    }

    #[test]
    fn refresh_ticks_while_active() {
        let (protocol, counts) = counter(Arc::new(SelectionRegistry::new()), false);
        let mut spawner = Spawner::new(protocol);
        spawner.refresh_interval = Duration::from_millis(5);
        let handle = spawner.spawn();
        assert_eq!(handle.name().as_ref(), "Counter");

        handle.set_active(true).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert!(handle.query(|protocol| protocol.active()).unwrap());

        let protocol = handle.shutdown().unwrap();
        assert!(!protocol.active());
        assert!(counts.refreshes() > 0);
        assert!(counts.precalls() >= counts.refreshes());
    }
}
