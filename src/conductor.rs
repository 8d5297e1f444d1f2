use bevy::prelude::*;

use crate::ScoreSet;
use crate::audio::{KiraContext, clock_beats, start_clock};
use crate::config::ScoreSettings;

pub struct ConductorPlugin;

impl Plugin for ConductorPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, start_conductor)
            .add_systems(Update, update_conductor.in_set(ScoreSet::UpdateConductor));
    }
}

/// Where the beat position is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    Audio,
    /// Real time since startup scaled by the tempo.
    Frame,
}

/// Monotonic beat position fed to the scheduler every frame.
#[derive(Resource, Debug)]
pub struct Conductor {
    pub current_beat: f64,
    pub bpm: f64,
    pub source: ClockSource,
    offset_beats: f64,
    frame_origin: Option<f64>,
}

impl Conductor {
    pub fn new(bpm: f64, offset_beats: f64, source: ClockSource) -> Self {
        Self {
            current_beat: 0.0,
            bpm,
            source,
            offset_beats,
            frame_origin: None,
        }
    }

    /// Fold in a raw clock reading. The beat never moves backwards, even if
    /// the source jitters.
    pub fn advance(&mut self, raw_beats: f64) -> f64 {
        let beat = raw_beats + self.offset_beats;
        if beat.is_finite() && beat > self.current_beat {
            self.current_beat = beat;
        }
        self.current_beat
    }

    /// Beats elapsed on the frame clock since the first call.
    pub fn frame_beats(&mut self, elapsed_secs: f64) -> f64 {
        let origin = *self.frame_origin.get_or_insert(elapsed_secs);
        (elapsed_secs - origin) * self.bpm / 60.0
    }

    /// Pick this frame's raw reading for the configured source. An audio
    /// conductor without a clock reading holds its current beat.
    pub fn raw_beats(&mut self, audio_beats: Option<f64>, elapsed_secs: f64) -> Option<f64> {
        match self.source {
            ClockSource::Audio => audio_beats,
            ClockSource::Frame => Some(self.frame_beats(elapsed_secs)),
        }
    }
}

fn start_conductor(
    mut commands: Commands,
    mut ctx: NonSendMut<KiraContext>,
    settings: Res<ScoreSettings>,
) {
    let source = if start_clock(&mut ctx, settings.bpm) {
        ClockSource::Audio
    } else {
        ClockSource::Frame
    };
    commands.insert_resource(Conductor::new(settings.bpm, settings.offset_beats(), source));
}

fn update_conductor(
    time: Res<Time<Real>>,
    ctx: NonSend<KiraContext>,
    conductor: Option<ResMut<Conductor>>,
) {
    let Some(mut conductor) = conductor else { return };

    if let Some(raw) = conductor.raw_beats(clock_beats(&ctx), time.elapsed_secs_f64()) {
        conductor.advance(raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beats_are_monotonic() {
        let mut conductor = Conductor::new(60.0, 0.0, ClockSource::Audio);
        assert_eq!(conductor.advance(1.5), 1.5);
        assert_eq!(conductor.advance(1.4), 1.5);
        assert_eq!(conductor.advance(f64::NAN), 1.5);
        assert_eq!(conductor.advance(2.0), 2.0);
    }

    #[test]
    fn offset_shifts_beats_forward() {
        let mut conductor = Conductor::new(120.0, 0.25, ClockSource::Audio);
        assert_eq!(conductor.advance(1.0), 1.25);
    }

    #[test]
    fn frame_clock_counts_from_first_reading() {
        let mut conductor = Conductor::new(120.0, 0.0, ClockSource::Frame);
        assert_eq!(conductor.frame_beats(10.0), 0.0);
        assert!((conductor.frame_beats(11.5) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn audio_source_holds_without_a_reading() {
        let mut conductor = Conductor::new(60.0, 0.0, ClockSource::Audio);
        conductor.advance(3.25);
        assert_eq!(conductor.raw_beats(None, 100.0), None);
        assert_eq!(conductor.source, ClockSource::Audio);
        assert_eq!(conductor.current_beat, 3.25);
        assert_eq!(conductor.raw_beats(Some(3.5), 100.0), Some(3.5));
    }

    #[test]
    fn frame_source_ignores_audio_readings() {
        let mut conductor = Conductor::new(60.0, 0.0, ClockSource::Frame);
        assert_eq!(conductor.raw_beats(Some(42.0), 5.0), Some(0.0));
        assert_eq!(conductor.raw_beats(Some(42.0), 7.0), Some(2.0));
    }
}
