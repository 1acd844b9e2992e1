//! sd_notify integration for running `sync` as a systemd service.
//!
//! Every method is a no-op when disabled or off Linux, so callers never need
//! `#[cfg]`.

#[derive(Debug, Clone, Copy)]
pub(crate) struct SystemdNotifier {
    enabled: bool,
}

enum Message<'a> {
    Ready,
    Stopping,
    Status(&'a str),
    Watchdog,
}

impl SystemdNotifier {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// `READY=1`: session established and target resolved.
    pub(crate) fn ready(&self) {
        self.send(Message::Ready);
    }

    pub(crate) fn stopping(&self) {
        self.send(Message::Stopping);
    }

    /// `STATUS=<msg>`, shown by `systemctl status`.
    pub(crate) fn status(&self, msg: &str) {
        self.send(Message::Status(msg));
    }

    /// Keepalive, sent once per processed batch.
    pub(crate) fn watchdog(&self) {
        self.send(Message::Watchdog);
    }

    fn send(&self, message: Message<'_>) {
        if !self.enabled {
            return;
        }
        Self::send_impl(message);
    }

    #[cfg(target_os = "linux")]
    fn send_impl(message: Message<'_>) {
        use sd_notify::NotifyState;

        let (state, label) = match message {
            Message::Ready => (NotifyState::Ready, "READY"),
            Message::Stopping => (NotifyState::Stopping, "STOPPING"),
            Message::Status(msg) => (NotifyState::Status(msg), "STATUS"),
            Message::Watchdog => (NotifyState::Watchdog, "WATCHDOG"),
        };
        if let Err(e) = sd_notify::notify(false, &[state]) {
            tracing::debug!(error = %e, "sd_notify {} failed", label);
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn send_impl(_message: Message<'_>) {}
}
