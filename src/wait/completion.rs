use std::sync::Arc;
use tokio::sync::watch;

/// Handle an operation under test uses to signal that it has finished.
///
/// Cloneable and callable from any thread. Completing twice, or after the
/// waiter gave up, has no effect.
#[derive(Clone, Debug)]
pub struct Completion {
    sender: Arc<watch::Sender<bool>>,
}

impl Completion {
    /// Create a completion and the receiver a waiter observes it through
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (sender, receiver) = watch::channel(false);
        (
            Self {
                sender: Arc::new(sender),
            },
            receiver,
        )
    }

    pub fn complete(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_complete(&self) -> bool {
        *self.sender.borrow()
    }
}
