use super::ad::AdTrigger;
use crate::types::{AdSettings, Episode, IntroSettings, Movie, PlayerConfig};

/// Half-open `[start, end)` range in which the skip-intro affordance shows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntroWindow {
    pub start: f64,
    pub end: f64,
}

impl IntroWindow {
    pub fn new(start: Option<f64>, end: Option<f64>) -> Option<Self> {
        let (start, end) = (start?, end?);
        if !start.is_finite() || !end.is_finite() || start < 0.0 || end <= start {
            return None;
        }
        Some(Self { start, end })
    }

    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position < self.end
    }
}

/// Everything a controller needs at mount time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlaybackSettings {
    pub saved_progress: f64,
    pub ad: Option<AdTrigger>,
    pub intro: Option<IntroWindow>,
}

impl PlaybackSettings {
    pub fn from_config(config: &PlayerConfig) -> Self {
        let ad = config.ad.as_ref().and_then(|ad| {
            AdTrigger::from_settings(Some(&ad.trigger), ad.trigger == "onload")
        });
        let intro = config
            .intro
            .as_ref()
            .and_then(|i| IntroWindow::new(Some(i.start_seconds), Some(i.end_seconds)));
        Self {
            saved_progress: sanitize_progress(config.saved_progress),
            ad,
            intro,
        }
    }
}

fn sanitize_progress(p: f64) -> f64 {
    if p.is_finite() && p > 0.0 { p } else { 0.0 }
}

/// Builds the player payload for a movie, or `None` when nothing is playable.
pub fn player_config(
    movie: &Movie,
    episodes: &[Episode],
    episode: Option<i64>,
    saved_progress: f64,
) -> Option<PlayerConfig> {
    let src = movie.source_url(episodes, episode)?.to_string();
    let current_episode = movie
        .resolve_source(episodes, episode)
        .map(|e| e.episode_number);

    let title = match current_episode {
        Some(n) => format!("{} - Episode {}", movie.title, n),
        None => movie.title.clone(),
    };

    let ad = movie
        .ad_video_url
        .as_deref()
        .filter(|url| movie.ad_enabled && !url.is_empty())
        .and_then(|url| {
            AdTrigger::from_settings(movie.ad_position.as_deref(), movie.ad_show_on_load).map(
                |trigger| AdSettings {
                    video_url: url.to_string(),
                    trigger: trigger.to_string(),
                },
            )
        });

    let intro = IntroWindow::new(movie.intro_start_seconds, movie.intro_end_seconds).map(|w| {
        IntroSettings {
            start_seconds: w.start,
            end_seconds: w.end,
        }
    });

    Some(PlayerConfig {
        movie_id: movie.id.clone(),
        title,
        src,
        poster: movie.poster_url.clone(),
        episode: current_episode,
        saved_progress: sanitize_progress(saved_progress),
        ad,
        intro,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_movie;

    #[test]
    fn intro_window_is_half_open() {
        let w = IntroWindow::new(Some(10.0), Some(40.0)).unwrap();
        assert!(!w.contains(9.99));
        assert!(w.contains(10.0));
        assert!(w.contains(39.99));
        assert!(!w.contains(40.0));
    }

    #[test]
    fn invalid_intro_windows_are_dropped() {
        assert_eq!(IntroWindow::new(Some(40.0), Some(10.0)), None);
        assert_eq!(IntroWindow::new(Some(10.0), None), None);
        assert_eq!(IntroWindow::new(Some(-1.0), Some(10.0)), None);
    }

    #[test]
    fn ad_omitted_unless_enabled() {
        let mut movie = sample_movie("m1");
        movie.ad_video_url = Some("https://cdn/ad.mp4".into());
        movie.ad_position = Some("middle".into());

        let config = player_config(&movie, &[], None, 0.0).unwrap();
        assert!(config.ad.is_none());

        movie.ad_enabled = true;
        let config = player_config(&movie, &[], None, 0.0).unwrap();
        let ad = config.ad.unwrap();
        assert_eq!(ad.trigger, "middle");
        assert_eq!(ad.video_url, "https://cdn/ad.mp4");
    }

    #[test]
    fn settings_round_trip_through_config() {
        let mut movie = sample_movie("m1");
        movie.ad_enabled = true;
        movie.ad_video_url = Some("https://cdn/ad.mp4".into());
        movie.ad_show_on_load = true;
        movie.intro_start_seconds = Some(5.0);
        movie.intro_end_seconds = Some(65.0);

        let config = player_config(&movie, &[], None, 42.5).unwrap();
        let settings = PlaybackSettings::from_config(&config);
        assert_eq!(settings.ad, Some(AdTrigger::OnLoad));
        assert_eq!(settings.saved_progress, 42.5);
        assert_eq!(
            settings.intro,
            Some(IntroWindow {
                start: 5.0,
                end: 65.0
            })
        );
    }

    #[test]
    fn nothing_playable_yields_none() {
        let mut movie = sample_movie("m1");
        movie.video_url = None;
        assert!(player_config(&movie, &[], None, 0.0).is_none());
    }
}
