use bevy::prelude::*;
use rand::Rng;
use rand::rngs::StdRng;

use crate::bar::{Bar, BarBuilder, BarIndex};
use crate::note::PitchSet;
use crate::quantize::QuantizedDuration;

/// Beats in one two-bar cycle.
pub const CYCLE_BEATS: u64 = 8;
/// Beats per bar, and the number of conductor markers.
pub const BAR_BEATS: u64 = 4;
pub const MARKER_COUNT: usize = 4;
pub const MARKER_BASE_SCALE: f32 = 1.0;
pub const MARKER_HIGHLIGHT_SCALE: f32 = 3.0;

/// Where the score is drawn. Handles identify placed elements so they can be
/// removed again when their bar is rebuilt.
pub trait ScoreSurface {
    type Handle;

    fn place(
        &mut self,
        offset: f64,
        pitches: &PitchSet,
        duration: QuantizedDuration,
    ) -> Self::Handle;
    fn remove(&mut self, handle: Self::Handle);
    fn scale_marker(&mut self, marker: usize, scale: f32);
    /// Move the bar-progress indicator to a horizontal offset.
    fn move_progress(&mut self, offset: f64);
}

/// Fixed horizontal positions of the two bars and the progress indicator.
#[derive(Debug, Clone, Copy)]
pub struct ScoreLayout {
    pub bar_one_start: f64,
    pub bar_two_start: f64,
    pub cycle_start: f64,
    pub cycle_midpoint: f64,
}

impl Default for ScoreLayout {
    fn default() -> Self {
        Self {
            bar_one_start: 10.0,
            bar_two_start: 100.0,
            cycle_start: 0.0,
            cycle_midpoint: 90.0,
        }
    }
}

impl ScoreLayout {
    pub fn bar_start(&self, index: BarIndex) -> f64 {
        match index {
            BarIndex::One => self.bar_one_start,
            BarIndex::Two => self.bar_two_start,
        }
    }

    /// Indicator position while `index` is sounding.
    pub fn progress_offset(&self, index: BarIndex) -> f64 {
        match index {
            BarIndex::One => self.cycle_start,
            BarIndex::Two => self.cycle_midpoint,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleState {
    /// Beat within the cycle, 1..=8. `None` until the first tick.
    pub current_beat: Option<u8>,
    pub highlighted_markers: [f32; MARKER_COUNT],
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub beat_changed: bool,
    pub rebuilt: Option<BarIndex>,
}

/// Sounding bar for a beat of the cycle: the first bar plays on beats 1-4.
pub fn sounding_bar_for(beat: u8) -> BarIndex {
    if u64::from(beat) <= BAR_BEATS {
        BarIndex::One
    } else {
        BarIndex::Two
    }
}

/// Drives the rolling two-bar window from a beat clock.
pub struct BeatScheduler<H, R = StdRng> {
    builder: BarBuilder<R>,
    layout: ScoreLayout,
    cycle: CycleState,
    beat_count: Option<u64>,
    bars: [Option<Bar>; 2],
    handles: [Vec<H>; 2],
}

impl<H, R: Rng> BeatScheduler<H, R> {
    pub fn new(builder: BarBuilder<R>, layout: ScoreLayout) -> Self {
        Self {
            builder,
            layout,
            cycle: CycleState {
                current_beat: None,
                highlighted_markers: [MARKER_BASE_SCALE; MARKER_COUNT],
            },
            beat_count: None,
            bars: [None, None],
            handles: [Vec::new(), Vec::new()],
        }
    }

    /// Build both bars for the first time.
    pub fn prime<S: ScoreSurface<Handle = H>>(&mut self, surface: &mut S) {
        self.rebuild(BarIndex::One, surface);
        self.rebuild(BarIndex::Two, surface);
        surface.move_progress(self.layout.progress_offset(BarIndex::One));
    }

    /// Advance to clock time `t` (in beats). Highlights the beat marker when
    /// the beat changes, then rebuilds the bar that is not sounding if a
    /// cycle boundary (beat 1 or 5) was reached since the previous tick.
    pub fn tick<S: ScoreSurface<Handle = H>>(&mut self, t: f64, surface: &mut S) -> TickOutcome {
        let t = if t.is_finite() { t.max(0.0) } else { 0.0 };
        let count = t.floor() as u64;
        let beat = (count % CYCLE_BEATS) as u8 + 1;

        let previous = self.beat_count;
        if previous == Some(count) {
            return TickOutcome::default();
        }
        self.beat_count = Some(count);

        let mut outcome = TickOutcome::default();
        if self.cycle.current_beat != Some(beat) {
            self.highlight(beat, surface);
            self.cycle.current_beat = Some(beat);
            outcome.beat_changed = true;
        }

        // The first observed beat only seeds the state.
        let Some(previous) = previous else {
            return outcome;
        };

        let crossed_boundary = count > previous
            && (previous + 1..=count).any(|c| c % BAR_BEATS == 0);
        if crossed_boundary {
            let sounding = sounding_bar_for(beat);
            let stale = sounding.other();
            debug!("Beat {beat}: rebuilding {stale:?} while {sounding:?} sounds");
            surface.move_progress(self.layout.progress_offset(sounding));
            self.rebuild(stale, surface);
            outcome.rebuilt = Some(stale);
        }

        outcome
    }

    pub fn cycle(&self) -> &CycleState {
        &self.cycle
    }

    pub fn bar(&self, index: BarIndex) -> Option<&Bar> {
        self.bars[index.slot()].as_ref()
    }

    pub fn sounding_bar(&self) -> BarIndex {
        self.cycle
            .current_beat
            .map(sounding_bar_for)
            .unwrap_or(BarIndex::One)
    }

    fn highlight<S: ScoreSurface<Handle = H>>(&mut self, beat: u8, surface: &mut S) {
        let boosted = (beat as usize - 1) % MARKER_COUNT;
        for (i, scale) in self.cycle.highlighted_markers.iter_mut().enumerate() {
            *scale = if i == boosted {
                MARKER_HIGHLIGHT_SCALE
            } else {
                MARKER_BASE_SCALE
            };
            surface.scale_marker(i, *scale);
        }
    }

    fn rebuild<S: ScoreSurface<Handle = H>>(&mut self, index: BarIndex, surface: &mut S) {
        let slot = index.slot();
        for handle in self.handles[slot].drain(..) {
            surface.remove(handle);
        }

        let bar = self.builder.build(index, self.layout.bar_start(index));
        self.handles[slot] = bar
            .elements
            .iter()
            .map(|e| surface.place(e.offset, &e.pitches, e.duration))
            .collect();
        self.bars[slot] = Some(bar);
    }
}
