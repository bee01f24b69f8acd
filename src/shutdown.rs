//! Cooperative stop signal shared by background loops

use tokio::sync::watch;

/// Resolve once stop has been requested (or the sender is gone)
pub(crate) async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stop| *stop).await;
}
