//! Receiver task: cloud link → dispatcher.
//!
//! A read error ends the task and asks the supervisor for a reconnect. Dispatch
//! errors only concern one message and are logged.

use super::HubState;
use crate::error::{DispatchError, LinkError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub(crate) async fn run(
    state: HubState,
    reconnect: mpsc::Sender<LinkError>,
    cancel: CancellationToken,
) {
    debug!("receiver started");
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("receiver stopped");
                return;
            }
            result = state.link.receive() => result,
        };

        let msg = match received {
            Ok(msg) => msg,
            Err(e) => {
                error!(error = %e, "failed to read message from cloud");
                let _ = reconnect.try_send(e);
                return;
            }
        };

        let msg_id = msg.id().to_string();
        match state.dispatcher.dispatch(msg) {
            Ok(()) => {}
            Err(DispatchError::NoHandler { group }) => {
                warn!(msg_id = %msg_id, group = %group, "no handler for cloud message, dropped");
            }
            Err(e) => {
                warn!(msg_id = %msg_id, error = %e, "failed to dispatch cloud message");
            }
        }
    }
}
