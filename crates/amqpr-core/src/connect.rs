//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Connect-command channel: multi-producer single-consumer wake-ups for the recovery supervisor."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
use tokio::sync::{mpsc, oneshot};

/// A single-shot "please (re)connect now" signal. Commands with no
/// notifier are fire-and-forget wake-ups emitted by failure handlers;
/// commands with a notifier are fulfilled once the supervisor finishes
/// (re)establishing the connection.
pub struct ConnectCommand {
    pub(crate) notify: Option<oneshot::Sender<()>>,
}

/// The producer half of the connect-command channel. Cheaply cloned and
/// shared by every recoverable registered on a logical connection.
#[derive(Clone)]
pub struct ConnectSender(mpsc::UnboundedSender<ConnectCommand>);

impl ConnectSender {
    /// Fire a wake-up with no completion notifier. Always succeeds unless
    /// the supervisor has already shut down, in which case the signal is
    /// silently dropped (the supervisor is terminating anyway).
    pub fn wake(&self) {
        let _ = self.0.send(ConnectCommand { notify: None });
    }

    /// Fire a wake-up and return a receiver that resolves once the
    /// supervisor finishes the reconnect cycle this wake-up triggers (or
    /// the fast path, if the connection was already open).
    pub fn wake_and_notify(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.0.send(ConnectCommand { notify: Some(tx) });
        rx
    }
}

/// The consumer half of the connect-command channel, owned exclusively by
/// the recovery supervisor.
pub struct ConnectReceiver(mpsc::UnboundedReceiver<ConnectCommand>);

impl ConnectReceiver {
    /// Await the next command, cancellable by the caller via
    /// `tokio::select!` against a cancellation token.
    pub async fn recv(&mut self) -> Option<ConnectCommand> {
        self.0.recv().await
    }

    /// Drain every command currently queued without waiting, coalescing a
    /// burst of wake-ups from many recoverables into the commands for a
    /// single reconnect cycle.
    pub fn drain_pending(&mut self) -> Vec<ConnectCommand> {
        let mut drained = Vec::new();
        while let Ok(command) = self.0.try_recv() {
            drained.push(command);
        }
        drained
    }
}

/// Build a fresh connect-command channel.
pub fn connect_channel() -> (ConnectSender, ConnectReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ConnectSender(tx), ConnectReceiver(rx))
}

/// Fulfill every notifier carried by `commands`, ignoring commands whose
/// receiver was already dropped.
pub(crate) fn fulfill_all(commands: Vec<ConnectCommand>) {
    for command in commands {
        if let Some(notify) = command.notify {
            let _ = notify.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wake_and_notify_resolves_after_fulfillment() {
        let (tx, mut rx) = connect_channel();
        let waiter = tx.wake_and_notify();
        let command = rx.recv().await.expect("command delivered");
        fulfill_all(vec![command]);
        waiter.await.expect("notifier fulfilled");
    }

    #[tokio::test]
    async fn drain_pending_coalesces_a_burst_of_wakeups() {
        let (tx, mut rx) = connect_channel();
        tx.wake();
        tx.wake();
        tx.wake();
        let first = rx.recv().await.expect("at least one command");
        let mut rest = rx.drain_pending();
        rest.insert(0, first);
        assert_eq!(rest.len(), 3);
    }
}
