//! Host-agnostic playback controller.
//!
//! The controller owns no media elements. The host feeds it discrete events
//! (user input, media element callbacks, timer ticks) stamped with a
//! monotonic `now`, and applies the [`Command`]s it returns. Every timer is a
//! deadline checked on [`PlaybackController::tick`], so the whole machine runs
//! to completion per event and is trivially testable.

mod ad;
mod config;
mod format;

pub use ad::{AdState, AdTrigger};
pub use config::{IntroWindow, PlaybackSettings, player_config};
pub use format::format_time;

use std::time::Duration;
use tracing::{debug, warn};

pub const ONLOAD_AD_DELAY: Duration = Duration::from_millis(500);
pub const AD_SKIP_DELAY: Duration = Duration::from_secs(5);
pub const CONTROLS_HIDE_DELAY: Duration = Duration::from_secs(5);
pub const PROGRESS_SAVE_DEBOUNCE: Duration = Duration::from_secs(10);

/// Main-content playback state. Natural completion returns to `Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaState {
    Idle,
    Playing,
    Paused,
}

/// Side effects for the host to perform.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    PlayMain,
    PauseMain,
    SeekMain(f64),
    /// Show the ad element and start it from the beginning.
    PlayAd,
    /// Pause the ad element, rewind it and hide it.
    StopAd,
    SaveProgress { position: f64, duration: f64 },
    ClearProgress,
    EnterFullscreen,
    ExitFullscreen,
    SetPlaybackRate(f32),
}

#[derive(Debug)]
pub struct PlaybackController {
    settings: PlaybackSettings,
    state: MediaState,
    ad: AdState,
    position: f64,
    duration: f64,
    resume_prompt_open: bool,
    // saved position the prompt was last shown for; survives remounts
    resume_prompted_for: Option<f64>,
    controls_visible: bool,
    controls_hide_at: Option<Duration>,
    save_at: Option<Duration>,
    onload_ad_at: Option<Duration>,
    fullscreen: bool,
    playback_rate: f32,
}

impl PlaybackController {
    pub fn new(settings: PlaybackSettings) -> Self {
        Self {
            ad: AdState::armed(settings.ad),
            settings,
            state: MediaState::Idle,
            position: 0.0,
            duration: 0.0,
            resume_prompt_open: false,
            resume_prompted_for: None,
            controls_visible: true,
            controls_hide_at: None,
            save_at: None,
            onload_ad_at: None,
            fullscreen: false,
            playback_rate: 1.0,
        }
    }

    /// Resets per-mount state and schedules mount-time behavior: the resume
    /// prompt (once per saved position) and the on-load ad.
    pub fn mount(&mut self, now: Duration) -> Vec<Command> {
        self.state = MediaState::Idle;
        self.ad = AdState::armed(self.settings.ad);
        self.position = 0.0;
        self.duration = 0.0;
        self.resume_prompt_open = false;
        self.controls_visible = true;
        self.controls_hide_at = None;
        self.save_at = None;
        self.onload_ad_at = None;

        self.maybe_open_resume_prompt();

        if self.ad == AdState::Pending(AdTrigger::OnLoad) {
            self.onload_ad_at = Some(now + ONLOAD_AD_DELAY);
        }
        Vec::new()
    }

    /// Mounts again with a possibly different saved position. The resume
    /// prompt only reappears if the saved position changed.
    pub fn remount(&mut self, saved_progress: f64, now: Duration) -> Vec<Command> {
        self.settings.saved_progress = saved_progress;
        self.mount(now)
    }

    pub fn unmount(&mut self) -> Vec<Command> {
        let commands = if self.position > 0.0 {
            self.save_progress()
        } else {
            Vec::new()
        };
        self.controls_hide_at = None;
        self.save_at = None;
        self.onload_ad_at = None;
        commands
    }

    pub fn before_unload(&mut self) -> Vec<Command> {
        self.save_progress()
    }

    // ------------------------------------------------------------------
    // User input
    // ------------------------------------------------------------------

    /// Play/pause button or a click on the video surface.
    pub fn request_play(&mut self, now: Duration) -> Vec<Command> {
        if self.resume_prompt_open {
            return Vec::new();
        }
        if self.maybe_open_resume_prompt() {
            return Vec::new();
        }
        self.toggle_play(now)
    }

    pub fn toggle_play(&mut self, now: Duration) -> Vec<Command> {
        if self.ad.is_playing() {
            return Vec::new();
        }
        if self.state == MediaState::Playing {
            return vec![Command::PauseMain];
        }
        if let AdState::Pending(trigger) = self.ad {
            if trigger.fires_on_play() {
                return self.trigger_ad(AdTrigger::Start, now);
            }
        }
        vec![Command::PlayMain]
    }

    pub fn choose_resume(&mut self, now: Duration) -> Vec<Command> {
        if !self.resume_prompt_open {
            return Vec::new();
        }
        self.resume_prompt_open = false;
        let mut commands = Vec::new();
        let saved = self.settings.saved_progress;
        if saved > 0.0 {
            self.position = saved;
            commands.push(Command::SeekMain(saved));
        }
        commands.extend(self.toggle_play(now));
        commands
    }

    pub fn choose_restart(&mut self, now: Duration) -> Vec<Command> {
        if !self.resume_prompt_open {
            return Vec::new();
        }
        self.resume_prompt_open = false;
        self.position = 0.0;
        let mut commands = vec![Command::SeekMain(0.0), Command::ClearProgress];
        commands.extend(self.toggle_play(now));
        commands
    }

    /// Closes the prompt without choosing. It stays suppressed for this
    /// saved position.
    pub fn dismiss_resume_prompt(&mut self) {
        self.resume_prompt_open = false;
    }

    pub fn seek(&mut self, position: f64) -> Vec<Command> {
        if self.ad.is_playing() || !position.is_finite() {
            return Vec::new();
        }
        let upper = if self.duration > 0.0 { self.duration } else { f64::MAX };
        let target = position.clamp(0.0, upper);
        self.position = target;
        vec![Command::SeekMain(target)]
    }

    /// Relative jump, clamped to `[0, duration]`.
    pub fn skip_by(&mut self, delta: f64) -> Vec<Command> {
        if self.ad.is_playing() {
            return Vec::new();
        }
        let target = (self.position + delta).clamp(0.0, self.duration.max(0.0));
        self.position = target;
        vec![Command::SeekMain(target)]
    }

    pub fn skip_intro(&mut self) -> Vec<Command> {
        if self.ad.is_playing() {
            return Vec::new();
        }
        match self.settings.intro {
            Some(window) => {
                self.position = window.end;
                vec![Command::SeekMain(window.end)]
            }
            None => Vec::new(),
        }
    }

    pub fn skip_ad(&mut self, now: Duration) -> Vec<Command> {
        if !self.can_skip_ad(now) {
            return Vec::new();
        }
        self.finish_ad()
    }

    pub fn toggle_fullscreen(&mut self) -> Vec<Command> {
        if self.fullscreen {
            vec![Command::ExitFullscreen]
        } else {
            vec![Command::EnterFullscreen]
        }
    }

    pub fn set_playback_rate(&mut self, rate: f32) -> Vec<Command> {
        if !rate.is_finite() || rate <= 0.0 {
            return Vec::new();
        }
        self.playback_rate = rate;
        vec![Command::SetPlaybackRate(rate)]
    }

    pub fn pointer_activity(&mut self, now: Duration) {
        self.controls_visible = true;
        self.controls_hide_at = Some(now + CONTROLS_HIDE_DELAY);
    }

    pub fn pointer_left(&mut self) {
        if self.state == MediaState::Playing && !self.ad.is_playing() {
            self.controls_visible = false;
        }
    }

    /// Backgrounding the tab pauses playback. Best effort only.
    pub fn visibility_changed(&mut self, hidden: bool) -> Vec<Command> {
        if hidden && self.state == MediaState::Playing {
            vec![Command::PauseMain]
        } else {
            Vec::new()
        }
    }

    // ------------------------------------------------------------------
    // Media element callbacks
    // ------------------------------------------------------------------

    pub fn loaded_metadata(&mut self, duration: f64) {
        self.duration = if duration.is_finite() && duration > 0.0 {
            duration
        } else {
            0.0
        };
    }

    pub fn media_played(&mut self) {
        if !self.ad.is_playing() {
            self.state = MediaState::Playing;
        }
    }

    /// The host's `play()` call was refused (autoplay policy and the like).
    /// No retry: the viewer has to start playback again.
    pub fn play_rejected(&mut self, reason: &str) {
        warn!(reason = %reason, "main video play() rejected");
        self.state = MediaState::Paused;
        self.controls_visible = true;
    }

    pub fn media_paused(&mut self) -> Vec<Command> {
        if self.ad.is_playing() {
            return Vec::new();
        }
        self.state = MediaState::Paused;
        self.controls_visible = true;
        self.controls_hide_at = None;
        self.save_progress()
    }

    pub fn time_update(&mut self, position: f64, now: Duration) -> Vec<Command> {
        let mut commands = Vec::new();
        if !self.ad.is_playing() && position.is_finite() {
            self.position = position;
            if let AdState::Pending(trigger) = self.ad {
                if trigger != AdTrigger::OnLoad && self.duration > 0.0 {
                    if let Some(offset) = trigger.offset(self.duration) {
                        if position >= offset {
                            commands.extend(self.trigger_ad(trigger, now));
                        }
                    }
                }
            }
        }
        // each update pushes the save out; persistence waits for a quiet period
        self.save_at = Some(now + PROGRESS_SAVE_DEBOUNCE);
        commands
    }

    pub fn ended(&mut self, now: Duration) -> Vec<Command> {
        if self.ad == AdState::Pending(AdTrigger::End) {
            return self.trigger_ad(AdTrigger::End, now);
        }
        self.finish_main()
    }

    pub fn ad_ended(&mut self) -> Vec<Command> {
        if !self.ad.is_playing() {
            return Vec::new();
        }
        self.finish_ad()
    }

    pub fn fullscreen_changed(&mut self, fullscreen: bool) {
        self.fullscreen = fullscreen;
    }

    /// Fires every deadline that has passed.
    pub fn tick(&mut self, now: Duration) -> Vec<Command> {
        let mut commands = Vec::new();

        if self.onload_ad_at.is_some_and(|at| now >= at) {
            self.onload_ad_at = None;
            if self.ad == AdState::Pending(AdTrigger::OnLoad) {
                commands.extend(self.trigger_ad(AdTrigger::OnLoad, now));
            }
        }

        if self.save_at.is_some_and(|at| now >= at) {
            self.save_at = None;
            commands.extend(self.save_progress());
        }

        if self.controls_hide_at.is_some_and(|at| now >= at) {
            self.controls_hide_at = None;
            if self.state == MediaState::Playing && !self.ad.is_playing() {
                self.controls_visible = false;
            }
        }

        commands
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn state(&self) -> MediaState {
        self.state
    }

    pub fn ad_state(&self) -> AdState {
        self.ad
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn resume_prompt_open(&self) -> bool {
        self.resume_prompt_open
    }

    pub fn saved_progress(&self) -> f64 {
        self.settings.saved_progress
    }

    /// The ad overlay suppresses the main controls entirely.
    pub fn controls_visible(&self) -> bool {
        self.controls_visible && !self.ad.is_playing()
    }

    pub fn intro_skip_visible(&self) -> bool {
        !self.ad.is_playing()
            && self
                .settings
                .intro
                .is_some_and(|w| w.contains(self.position))
    }

    pub fn can_skip_ad(&self, now: Duration) -> bool {
        match self.ad {
            AdState::Playing { started_at, .. } => {
                now.saturating_sub(started_at) >= AD_SKIP_DELAY
            }
            _ => false,
        }
    }

    /// Whole seconds left before the ad can be skipped.
    pub fn ad_countdown(&self, now: Duration) -> Option<u64> {
        match self.ad {
            AdState::Playing { started_at, .. } => {
                let remaining = AD_SKIP_DELAY.saturating_sub(now.saturating_sub(started_at));
                let mut secs = remaining.as_secs();
                if remaining.subsec_nanos() > 0 {
                    secs += 1;
                }
                Some(secs)
            }
            _ => None,
        }
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn playback_rate(&self) -> f32 {
        self.playback_rate
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn maybe_open_resume_prompt(&mut self) -> bool {
        let saved = self.settings.saved_progress;
        if saved > 0.0 && self.resume_prompted_for != Some(saved) {
            self.resume_prompt_open = true;
            self.resume_prompted_for = Some(saved);
            return true;
        }
        false
    }

    fn trigger_ad(&mut self, trigger: AdTrigger, now: Duration) -> Vec<Command> {
        debug!(trigger = %trigger, "ad interstitial triggered");
        let mut commands = Vec::new();
        if self.state == MediaState::Playing {
            commands.push(Command::PauseMain);
            self.state = MediaState::Paused;
        }
        self.ad = AdState::Playing {
            trigger,
            started_at: now,
        };
        self.onload_ad_at = None;
        commands.push(Command::PlayAd);
        commands
    }

    fn finish_ad(&mut self) -> Vec<Command> {
        let AdState::Playing { trigger, .. } = self.ad else {
            return Vec::new();
        };
        self.ad = AdState::Watched;
        let mut commands = vec![Command::StopAd];
        if trigger.resumes_main() {
            commands.push(Command::PlayMain);
        } else if trigger == AdTrigger::End {
            commands.extend(self.finish_main());
        }
        commands
    }

    fn finish_main(&mut self) -> Vec<Command> {
        self.state = MediaState::Idle;
        self.controls_visible = true;
        self.controls_hide_at = None;
        self.save_at = None;
        vec![Command::ClearProgress]
    }

    fn save_progress(&self) -> Vec<Command> {
        if self.ad.is_playing() {
            return Vec::new();
        }
        vec![Command::SaveProgress {
            position: self.position,
            duration: self.duration,
        }]
    }
}
