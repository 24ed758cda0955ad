use std::fmt;
use std::time::Duration;

/// When an ad interstitial interrupts the main content.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AdTrigger {
    /// Shortly after mount, independent of playback.
    OnLoad,
    Start,
    Middle,
    End,
    /// Explicit offset in seconds.
    At(f64),
}

impl AdTrigger {
    /// Resolves the stored movie columns into a trigger. A missing or
    /// unparseable position leaves the ad disabled.
    pub fn from_settings(position: Option<&str>, show_on_load: bool) -> Option<Self> {
        if show_on_load {
            return Some(AdTrigger::OnLoad);
        }
        match position.map(str::trim)? {
            "start" => Some(AdTrigger::Start),
            "middle" => Some(AdTrigger::Middle),
            "end" => Some(AdTrigger::End),
            other => leading_seconds(other).map(AdTrigger::At),
        }
    }

    /// Playback position at which a time update fires this trigger.
    /// `None` for triggers that do not fire from time updates.
    pub fn offset(&self, duration: f64) -> Option<f64> {
        match self {
            AdTrigger::Start => Some(0.0),
            AdTrigger::Middle if duration > 0.0 => Some(duration / 2.0),
            AdTrigger::At(seconds) => Some(*seconds),
            AdTrigger::Middle | AdTrigger::End | AdTrigger::OnLoad => None,
        }
    }

    /// Intercepts the first play request instead of waiting for a time update.
    pub fn fires_on_play(&self) -> bool {
        match self {
            AdTrigger::Start => true,
            AdTrigger::At(seconds) => *seconds == 0.0,
            _ => false,
        }
    }

    /// Whether main playback continues once the ad finishes or is skipped.
    pub fn resumes_main(&self) -> bool {
        matches!(
            self,
            AdTrigger::OnLoad | AdTrigger::Start | AdTrigger::Middle
        )
    }
}

impl fmt::Display for AdTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdTrigger::OnLoad => f.write_str("onload"),
            AdTrigger::Start => f.write_str("start"),
            AdTrigger::Middle => f.write_str("middle"),
            AdTrigger::End => f.write_str("end"),
            AdTrigger::At(seconds) => write!(f, "{}", seconds.trunc() as u64),
        }
    }
}

// "90", "90s" and " 90 " all mean 90 seconds
fn leading_seconds(s: &str) -> Option<f64> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<u64>().ok().map(|n| n as f64)
}

/// Single tagged value for the interstitial sub-state. At most one ad plays
/// per mount: once `Watched`, nothing re-arms it until the next mount.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AdState {
    None,
    Pending(AdTrigger),
    Playing {
        trigger: AdTrigger,
        started_at: Duration,
    },
    Watched,
}

impl AdState {
    pub fn armed(trigger: Option<AdTrigger>) -> Self {
        trigger.map_or(AdState::None, AdState::Pending)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, AdState::Playing { .. })
    }
}
