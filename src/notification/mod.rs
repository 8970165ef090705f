//! Notification backends for session status transitions

use std::str::FromStr;

use tracing::{debug, warn};

use crate::tmux::{tmux_broadcast_to_sessions, tmux_list_session_names};
use crate::types::{SessionKey, SessionStatus};

const NOTIFICATION_DISPLAY_DURATION_MS: u64 = 4_000;

/// Notification backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationBackend {
    /// No notifications
    None,
    /// Tmux notifications only (broadcast to all tmux sessions)
    #[default]
    Tmux,
    /// System notifications only (via notify-rust)
    System,
    /// Both tmux and system notifications
    Both,
}

impl NotificationBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Tmux => "tmux",
            Self::System => "system",
            Self::Both => "both",
        }
    }

    fn targets(self) -> (bool, bool) {
        match self {
            NotificationBackend::None => (false, false),
            NotificationBackend::Tmux => (true, false),
            NotificationBackend::System => (false, true),
            NotificationBackend::Both => (true, true),
        }
    }
}

impl FromStr for NotificationBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "tmux" => Ok(Self::Tmux),
            "system" => Ok(Self::System),
            "both" => Ok(Self::Both),
            _ => Err(()),
        }
    }
}

/// Receives detected status transitions.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, key: &SessionKey, status: SessionStatus);
}

pub struct DesktopNotifier {
    backend: NotificationBackend,
    statuses: Vec<SessionStatus>,
}

impl DesktopNotifier {
    pub fn new(backend: NotificationBackend, statuses: Vec<SessionStatus>) -> Self {
        Self { backend, statuses }
    }

    pub fn wants(&self, status: SessionStatus) -> bool {
        self.backend != NotificationBackend::None && self.statuses.contains(&status)
    }
}

impl NotificationSink for DesktopNotifier {
    fn notify(&self, key: &SessionKey, status: SessionStatus) {
        if !self.wants(status) {
            debug!(session = %key, status = %status, "notification skipped");
            return;
        }

        let message = notification_message(key, status);
        let (send_tmux, send_system) = self.backend.targets();
        if send_tmux {
            send_tmux_notification(&message);
        }
        if send_system {
            send_system_notification(&message);
        }
    }
}

pub fn notification_message(key: &SessionKey, status: SessionStatus) -> String {
    let verb = match status {
        SessionStatus::Waiting => "is waiting for input",
        SessionStatus::NeedsPermission => "needs permission",
        SessionStatus::Done => "finished",
        SessionStatus::Error => "hit an error",
        SessionStatus::Working => "is working",
        SessionStatus::Unknown => "changed state",
    };
    format!("{key} {verb}")
}

fn send_tmux_notification(message: &str) {
    let sessions = tmux_list_session_names();
    if sessions.is_empty() {
        debug!("no tmux sessions to broadcast notification");
        return;
    }

    if let Err(err) =
        tmux_broadcast_to_sessions(&sessions, message, NOTIFICATION_DISPLAY_DURATION_MS)
    {
        warn!(error = %err, "failed to broadcast tmux notification");
    }
}

fn send_system_notification(message: &str) {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        let timeout_ms = NOTIFICATION_DISPLAY_DURATION_MS.min(u32::MAX as u64) as u32;
        let result = notify_rust::Notification::new()
            .summary("Session Deck")
            .body(message)
            .icon("dialog-information")
            .timeout(notify_rust::Timeout::Milliseconds(timeout_ms))
            .show();

        if let Err(err) = result {
            warn!(error = %err, "failed to send system notification");
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        debug!(message, "system notifications not supported on this OS");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Origin;

    #[test]
    fn test_notification_backend_from_str() {
        assert_eq!(
            NotificationBackend::from_str("Tmux"),
            Ok(NotificationBackend::Tmux)
        );
        assert_eq!(
            NotificationBackend::from_str("SYSTEM"),
            Ok(NotificationBackend::System)
        );
        assert_eq!(
            NotificationBackend::from_str("both"),
            Ok(NotificationBackend::Both)
        );
        assert_eq!(
            NotificationBackend::from_str("none"),
            Ok(NotificationBackend::None)
        );
        assert!(NotificationBackend::from_str("").is_err());
    }

    #[test]
    fn test_backend_targets() {
        assert_eq!(NotificationBackend::None.targets(), (false, false));
        assert_eq!(NotificationBackend::Tmux.targets(), (true, false));
        assert_eq!(NotificationBackend::System.targets(), (false, true));
        assert_eq!(NotificationBackend::Both.targets(), (true, true));
    }

    #[test]
    fn test_notifier_filters_statuses() {
        let notifier = DesktopNotifier::new(
            NotificationBackend::Tmux,
            vec![SessionStatus::Done, SessionStatus::Waiting],
        );
        assert!(notifier.wants(SessionStatus::Done));
        assert!(!notifier.wants(SessionStatus::Working));

        let silent = DesktopNotifier::new(NotificationBackend::None, vec![SessionStatus::Done]);
        assert!(!silent.wants(SessionStatus::Done));
    }

    #[test]
    fn test_notification_message_names_origin() {
        let key = SessionKey::new(Origin::Remote("gpu".to_string()), "train");
        assert_eq!(
            notification_message(&key, SessionStatus::NeedsPermission),
            "gpu:train needs permission"
        );
    }
}
