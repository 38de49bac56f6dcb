use std::time::Duration;

/// Default remote-call timeout, overridable via
/// `COLYSEUS_PRESENCE_SHORT_TIMEOUT` (milliseconds).
const DEFAULT_SHORT_TIMEOUT_MS: u64 = 2000;

/// Seat reservations older than this with no connected client are swept.
/// Picked within the suggested 5-10s band.
pub const DEFAULT_RESERVATION_TTL: Duration = Duration::from_secs(8);

/// How often the reservation sweeper wakes up to look for expired seats.
pub const RESERVATION_SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Process-wide tunables sourced from the environment, mirroring the
/// teacher's inline `const` tunables but for the one value that needs to
/// be externally overridable.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub remote_call_timeout: Duration,
}

impl Settings {
    pub fn from_env() -> Self {
        let remote_call_timeout = std::env::var("COLYSEUS_PRESENCE_SHORT_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_SHORT_TIMEOUT_MS));
        Self { remote_call_timeout }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            remote_call_timeout: Duration::from_millis(DEFAULT_SHORT_TIMEOUT_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_matches_the_documented_default() {
        assert_eq!(
            Settings::default().remote_call_timeout,
            Duration::from_millis(2000)
        );
    }

    #[test]
    fn env_override_is_honored() {
        std::env::set_var("COLYSEUS_PRESENCE_SHORT_TIMEOUT", "500");
        let settings = Settings::from_env();
        assert_eq!(settings.remote_call_timeout, Duration::from_millis(500));
        std::env::remove_var("COLYSEUS_PRESENCE_SHORT_TIMEOUT");
    }
}
