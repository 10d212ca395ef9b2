use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum UiEvent {
    /// The translator changed button state; the UI should redraw all buttons.
    RedrawButtons,
}

/// Handle for signalling the (external) desktop UI.
///
/// Constructed once at startup and handed into the bridge; emitting never
/// blocks and tolerates the UI not listening (headless runs).
#[derive(Clone)]
pub struct UiEmitter {
    sender: broadcast::Sender<UiEvent>,
}

impl UiEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: UiEvent) {
        let _ = self.sender.send(event);
    }
}
