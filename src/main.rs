use anyhow::Context;
use std::path::Path;

use ctrl_protocol::{
    ctrl_proto::{self, Node, SelectionRegistry, Spawner, UiRequest},
    session::{mem::MemSession, RouteRef, Session},
    Config, ControlProtocol,
};

fn main() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Debug)
        .parse_default_env()
        .init();

    match run() {
        Ok(()) => log::info!("Exiting"),
        Err(err) => {
            log::error!("Error: {}", err);
            for source in err.chain().skip(1) {
                log::error!("\t{}", source)
            }
        }
    }
}

fn run() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(Path::new(&path))?,
        None => Config::default(),
    };
    log::debug!("{config:?}");

    let session = MemSession::new();
    for (idx, name) in config.tracks.iter().enumerate() {
        session.add_track(name, idx as u32 + 1);
    }

    let selection = SelectionRegistry::global();
    let gui_selection = selection.subscribe();
    let gui_requests = ctrl_proto::UI_REQUESTS.subscribe();

    let mut protocol = ctrl_proto::FACTORY
        .build(&config.surface, session.clone(), selection.clone())
        .context("Building Control Surface")?;

    match config.state_file.as_deref().filter(|path| path.exists()) {
        Some(path) => {
            let node = Node::load(path)?;
            protocol.set_state(&node, node.version()?)?;
        }
        None => {
            protocol.set_feedback(true)?;
            protocol.set_active(true)?;
        }
    }

    let mut spawner = Spawner::new(protocol);
    spawner.refresh_interval = config.refresh_interval();
    let surface = spawner.spawn();

    // Operator gestures, as the device would report them.
    surface.invoke(|protocol| {
        protocol.set_rid_selection(2);
        protocol.emit(UiRequest::ZoomToSession);
    })?;

    for step in 0..4u64 {
        session.set_transport_sample(step * 48_000);
        std::thread::sleep(config.refresh_interval() * 2);
    }

    if let Some(route) = session.route_by_remote_id(1) {
        selection.add(&RouteRef::new(&route));
    }
    surface.invoke(|protocol| {
        if let Some(first) = protocol.core().route_table().route(0) {
            protocol.next_track(first.remote_id());
        }
    })?;
    std::thread::sleep(config.refresh_interval() * 2);

    let bank = surface.query(|protocol| {
        let table = protocol.core().route_table();
        (0..table.size())
            .map(|idx| table.route_get_name(idx))
            .collect::<Vec<_>>()
    })?;
    log::info!("{}: bank {bank:?}", surface.name());

    for snapshot in gui_selection.try_iter() {
        let names: Vec<String> = snapshot
            .iter()
            .filter_map(|stripable| stripable.resolve(&*session))
            .map(|route| route.name())
            .collect();
        log::info!("GUI: selection {names:?}");
    }
    for request in gui_requests.try_iter() {
        log::info!("GUI: {request:?}");
    }

    surface.invoke(|protocol| log_strips(protocol))?;
    let state = surface.query(|protocol| protocol.get_state())?;
    let protocol = surface.shutdown()?;

    if let Some(path) = config.state_file.as_deref() {
        state.save(path)?;
    }

    if let Some(desc) = ctrl_proto::FACTORY.descriptor(&config.surface) {
        (desc.destroy)(protocol);
    }

    Ok(())
}

fn log_strips(protocol: &dyn ControlProtocol) {
    let table = protocol.core().route_table();
    for idx in 0..table.size() {
        log::debug!(
            "strip {idx}: {} gain {:.2} muted {}",
            table.route_get_name(idx),
            table.route_get_gain(idx),
            table.route_get_muted(idx),
        );
    }
}
