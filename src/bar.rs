use bevy::prelude::*;
use rand::Rng;
use rand::rngs::StdRng;

use crate::note::{NoteLength, PitchSet};
use crate::quantize::{QuantizedDuration, quantize};
use crate::selector::NoteSelector;

/// Horizontal units in one bar.
pub const BAR_UNITS: f64 = 80.0;
/// Horizontal units per beat.
pub const BEAT_SIZE: f64 = 20.0;
/// Shortest performed length an element may have, in beats (one unit).
pub const MIN_PERFORMED: f64 = 1.0 / BEAT_SIZE;
/// Rounding slack when comparing accumulated unit sums.
const BAR_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarIndex {
    One,
    Two,
}

impl BarIndex {
    pub fn other(self) -> Self {
        match self {
            BarIndex::One => BarIndex::Two,
            BarIndex::Two => BarIndex::One,
        }
    }

    pub fn slot(self) -> usize {
        match self {
            BarIndex::One => 0,
            BarIndex::Two => 1,
        }
    }
}

/// A note or rest with its position on the score.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedElement {
    pub offset: f64,
    pub pitches: PitchSet,
    pub duration: QuantizedDuration,
}

impl PlacedElement {
    pub fn units(&self) -> f64 {
        self.duration.performed_length * BEAT_SIZE
    }

    pub fn is_rest(&self) -> bool {
        self.pitches.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub index: BarIndex,
    pub start_offset: f64,
    pub elements: Vec<PlacedElement>,
}

impl Bar {
    pub fn total_units(&self) -> f64 {
        self.elements.iter().map(PlacedElement::units).sum()
    }
}

/// Snap a producer's length onto the lattice. Measured lengths are doubled
/// first; nominal ones become a single quarter.
pub fn quantize_length(length: NoteLength) -> QuantizedDuration {
    match length {
        NoteLength::Measured(beats) => quantize(beats * 2.0),
        NoteLength::Nominal => quantize(1.0),
    }
}

/// Fills bars with selected notes until the unit budget is spent.
pub struct BarBuilder<R = StdRng> {
    selector: NoteSelector<R>,
}

impl<R: Rng> BarBuilder<R> {
    pub fn new(selector: NoteSelector<R>) -> Self {
        Self { selector }
    }

    /// Build one bar starting at `start_offset`. The elements tile
    /// `[start_offset, start_offset + BAR_UNITS)` exactly: a note that would
    /// run past the end is replaced by a rest covering the remaining gap.
    pub fn build(&mut self, index: BarIndex, start_offset: f64) -> Bar {
        let mut sum = 0.0;
        let mut elements = Vec::new();

        while BAR_UNITS - sum > BAR_EPSILON {
            let event = self.selector.select();
            let mut duration = quantize_length(event.length);
            // NaN compares false here and was already clamped by `quantize`.
            if duration.performed_length < MIN_PERFORMED {
                duration.performed_length = MIN_PERFORMED;
            }
            let length = duration.performed_length * BEAT_SIZE;
            let offset = start_offset + sum;

            if sum + length > BAR_UNITS + BAR_EPSILON {
                let remaining = (BAR_UNITS - sum) / BEAT_SIZE;
                let closing = quantize(remaining);
                debug!(
                    "{:?}: {} does not fit, closing with a {remaining}-beat rest",
                    index, event.label
                );
                elements.push(PlacedElement {
                    offset,
                    pitches: PitchSet::new(),
                    duration: QuantizedDuration {
                        performed_length: remaining,
                        lattice: closing.lattice,
                    },
                });
                break;
            }

            elements.push(PlacedElement {
                offset,
                pitches: event.pitches,
                duration,
            });
            sum += length;
        }

        Bar {
            index,
            start_offset,
            elements,
        }
    }
}
