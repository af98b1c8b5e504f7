use once_cell::sync::Lazy;
use std::{collections::BTreeMap, fmt, sync::Arc};

use super::{imp, ControlProtocol, Error, SelectionRegistry};
use crate::session::Session;

pub static FACTORY: Lazy<Arc<Factory>> = Lazy::new(|| {
    Factory::default()
        .with::<imp::StripBank8>()
        .with::<imp::FocusStrip>()
        .into()
});

pub type ProtocolBox = Box<dyn ControlProtocol>;

bitflags::bitflags! {
    pub struct Caps: u8 {
        const FEEDBACK   = 0b0000_0001;
        const PORT_PROBE = 0b0000_0010;
        const USB        = 0b0000_0100;
    }
}

/// A type of control surface.
pub trait Buildable {
    const NAME: &'static str;
    /// Unique and version specific.
    const ID: &'static str;
    const CAPS: Caps = Caps::empty();

    /// Called once when the surface type is registered.
    fn available() -> bool {
        true
    }

    /// Called when ports appear or disappear.
    fn probe_port() -> bool {
        false
    }

    /// Called when a USB device is plugged.
    fn match_usb(_vendor: u16, _product: u16) -> bool {
        false
    }

    fn build(
        session: Arc<dyn Session>,
        selection: Arc<SelectionRegistry>,
    ) -> Result<ProtocolBox, Error>;
}

/// Static manifest the host uses to instantiate a surface.
#[derive(Clone, Copy)]
pub struct Descriptor {
    pub name: &'static str,
    pub id: &'static str,
    pub caps: Caps,
    pub available: fn() -> bool,
    pub probe_port: fn() -> bool,
    pub match_usb: fn(u16, u16) -> bool,
    pub initialize: fn(Arc<dyn Session>, Arc<SelectionRegistry>) -> Result<ProtocolBox, Error>,
    pub destroy: fn(ProtocolBox),
}

impl Descriptor {
    pub fn of<B: Buildable>() -> Self {
        Self {
            name: B::NAME,
            id: B::ID,
            caps: B::CAPS,
            available: B::available,
            probe_port: B::probe_port,
            match_usb: B::match_usb,
            initialize: B::build,
            destroy,
        }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("caps", &self.caps)
            .finish()
    }
}

fn destroy(mut protocol: ProtocolBox) {
    if let Err(err) = protocol.set_active(false) {
        log::error!("{}: {err}", protocol.name());
    }

    log::debug!("{}: destroyed", protocol.name());
}

#[derive(Default)]
pub struct Factory(BTreeMap<&'static str, Descriptor>);

impl Factory {
    pub fn with<B: Buildable>(mut self) -> Self {
        let desc = Descriptor::of::<B>();
        if !(desc.available)() {
            log::info!("Control Surface {} unavailable", desc.name);
        }

        self.0.insert(B::NAME, desc);
        self
    }

    pub fn list(&self) -> impl Iterator<Item = &str> {
        self.0.keys().cloned()
    }

    pub fn descriptor(&self, name: &str) -> Option<&Descriptor> {
        self.0.get(name)
    }

    pub fn descriptor_by_id(&self, id: &str) -> Option<&Descriptor> {
        self.0.values().find(|desc| desc.id == id)
    }

    pub fn available(&self) -> impl Iterator<Item = &Descriptor> {
        self.0.values().filter(|desc| (desc.available)())
    }

    /// Surfaces which recognize one of the current ports.
    pub fn probe_port(&self) -> impl Iterator<Item = &Descriptor> {
        self.0
            .values()
            .filter(|desc| desc.caps.contains(Caps::PORT_PROBE) && (desc.probe_port)())
    }

    pub fn match_usb(&self, vendor: u16, product: u16) -> impl Iterator<Item = &Descriptor> {
        self.0
            .values()
            .filter(move |desc| desc.caps.contains(Caps::USB) && (desc.match_usb)(vendor, product))
    }

    pub fn build(
        &self,
        name: &str,
        session: Arc<dyn Session>,
        selection: Arc<SelectionRegistry>,
    ) -> Result<ProtocolBox, Error> {
        let desc = self
            .descriptor(name)
            .ok_or_else(|| Error::UnknownSurface(name.into()))?;

        if !(desc.available)() {
            return Err(Error::Unavailable(name.into()));
        }

        let protocol = (desc.initialize)(session, selection)?;
        log::info!("Control Surface {} ({}) built", desc.name, desc.id);

        Ok(protocol)
    }
}
