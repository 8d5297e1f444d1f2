use bevy::prelude::*;
use rand::Rng;
use rand::rngs::StdRng;

use crate::corpus::NoteCorpus;
use crate::listener::LiveNoteSource;
use crate::note::NoteEvent;

/// Default chance boundary: draws above it come from the corpus.
pub const DEFAULT_THRESHOLD: f64 = 0.36;

/// Where a selected note came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteOrigin {
    Corpus,
    Live,
}

/// Picks each note from either the corpus or the live listener.
pub struct NoteSelector<R = StdRng> {
    corpus: NoteCorpus,
    live: LiveNoteSource,
    threshold: f64,
    rng: R,
}

impl<R: Rng> NoteSelector<R> {
    pub fn new(corpus: NoteCorpus, live: LiveNoteSource, threshold: f64, rng: R) -> Self {
        Self {
            corpus,
            live,
            threshold,
            rng,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn select(&mut self) -> NoteEvent {
        self.select_with_origin().0
    }

    pub fn select_with_origin(&mut self) -> (NoteEvent, NoteOrigin) {
        if self.rng.r#gen::<f64>() > self.threshold {
            let event = self.corpus.sample(&mut self.rng).clone();
            debug!("MIDI {event}");
            (event, NoteOrigin::Corpus)
        } else {
            let event = self.live.read();
            debug!("EAR {event}");
            (event, NoteOrigin::Live)
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::mock::StepRng;

    use super::*;
    use crate::listener::live_note_channel;
    use crate::note::{NoteLength, Pitch};

    fn corpus() -> NoteCorpus {
        let event = NoteEvent::new([Pitch(60)].into_iter().collect(), NoteLength::Measured(0.5));
        NoteCorpus::new("test", vec![event]).unwrap()
    }

    fn live() -> LiveNoteSource {
        let event = NoteEvent::new([Pitch(72)].into_iter().collect(), NoteLength::Measured(1.0));
        live_note_channel(event).1
    }

    #[test]
    fn high_draws_come_from_corpus() {
        // Every draw is just under 0.5.
        let rng = StepRng::new(u64::MAX / 2, 0);
        let mut selector = NoteSelector::new(corpus(), live(), DEFAULT_THRESHOLD, rng);
        for _ in 0..5 {
            let (event, origin) = selector.select_with_origin();
            assert_eq!(origin, NoteOrigin::Corpus);
            assert!(event.pitches.contains(&Pitch(60)));
        }
    }

    #[test]
    fn low_draws_come_from_listener() {
        // Every draw is exactly 0.0.
        let rng = StepRng::new(0, 0);
        let mut selector = NoteSelector::new(corpus(), live(), DEFAULT_THRESHOLD, rng);
        for _ in 0..5 {
            let (event, origin) = selector.select_with_origin();
            assert_eq!(origin, NoteOrigin::Live);
            assert!(event.pitches.contains(&Pitch(72)));
        }
    }

    #[test]
    fn threshold_one_always_listens() {
        let rng = StdRng::seed_from_u64(3);
        let mut selector = NoteSelector::new(corpus(), live(), 1.0, rng);
        for _ in 0..100 {
            assert_eq!(selector.select_with_origin().1, NoteOrigin::Live);
        }
    }

    #[test]
    fn default_threshold_mixes_sources() {
        let rng = StdRng::seed_from_u64(11);
        let mut selector = NoteSelector::new(corpus(), live(), DEFAULT_THRESHOLD, rng);
        let draws = 2000;
        let from_corpus = (0..draws)
            .filter(|_| selector.select_with_origin().1 == NoteOrigin::Corpus)
            .count();
        let share = from_corpus as f64 / draws as f64;
        assert!((share - 0.64).abs() < 0.05, "corpus share {share}");
    }
}
