use std::sync::Arc;

use tokio::sync::watch;

/// Boolean reachability signal. The platform connectivity callback feeds
/// `set_reachable`; the sync layer only ever reads it to pick a branch.
/// No retries, no backoff — pure observation.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(initially_reachable: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_reachable);
        NetworkMonitor {
            inner: Arc::new(tx),
        }
    }

    pub fn is_reachable(&self) -> bool {
        *self.inner.borrow()
    }

    pub fn set_reachable(&self, reachable: bool) {
        let prev = self.inner.send_replace(reachable);
        if prev != reachable {
            log::info!("reachability changed: {}", if reachable { "online" } else { "offline" });
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.subscribe()
    }
}
