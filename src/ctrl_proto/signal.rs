//! Fan-out of notifications to any number of observers.

use crossbeam_channel as channel;
use once_cell::sync::Lazy;
use std::sync::Mutex;

/// Delivers clones of each emitted value to every subscribed receiver.
///
/// Receivers which were dropped are pruned on the next emission.
#[derive(Debug)]
pub struct Broadcaster<T> {
    observers: Mutex<Vec<channel::Sender<T>>>,
}

impl<T> Default for Broadcaster<T> {
    fn default() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone + Send> Broadcaster<T> {
    pub fn subscribe(&self) -> channel::Receiver<T> {
        let (tx, rx) = channel::unbounded();
        self.observers.lock().unwrap().push(tx);

        rx
    }

    pub fn emit(&self, value: T) {
        self.observers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(value.clone()).is_ok());
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }
}

/// Requests a control protocol can send to a graphical user interface.
#[derive(Clone, Debug, PartialEq)]
pub enum UiRequest {
    ZoomToSession,
    ZoomIn,
    ZoomOut,
    Enter,
    Undo,
    Redo,
    /// Scroll by a fraction of the visible timeline.
    ScrollTimeline(f32),
    GotoView(u32),
    CloseDialog,
    VerticalZoomInAll,
    VerticalZoomOutAll,
    VerticalZoomInSelected,
    VerticalZoomOutSelected,
    StepTracksDown,
    StepTracksUp,
    /// Opaque id of a plugin insert, interpreted by the host.
    PluginSelected(u64),
}

pub static UI_REQUESTS: Lazy<Broadcaster<UiRequest>> = Lazy::new(Broadcaster::default);
