use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use bevy::prelude::*;
use midly::{MidiMessage, Smf, Timing, TrackEventKind};
use rand::Rng;
use ron::ser::PrettyConfig;

use crate::error::ScoreError;
use crate::note::{NoteEvent, NoteLength, Pitch, PitchSet};

/// PPQ assumed when a file uses SMPTE timecode instead of metrical timing.
const FALLBACK_PPQ: f64 = 480.0;

/// Immutable pool of events sampled uniformly with replacement.
#[derive(Debug)]
pub struct NoteCorpus {
    source: PathBuf,
    events: Vec<NoteEvent>,
}

impl NoteCorpus {
    /// Wrap a list of events. An empty list is rejected so that `sample`
    /// always has something to return.
    pub fn new(source: impl Into<PathBuf>, events: Vec<NoteEvent>) -> Result<Self, ScoreError> {
        let source = source.into();
        if events.is_empty() {
            return Err(ScoreError::EmptyCorpus { path: source });
        }
        Ok(Self { source, events })
    }

    pub fn load(path: &Path) -> Result<Self, ScoreError> {
        let events = get_note_lists(path)?;
        let corpus = Self::new(path, events)?;
        info!("Loaded {} events from {:?}", corpus.len(), path);
        Ok(corpus)
    }

    pub fn sample(&self, rng: &mut impl Rng) -> &NoteEvent {
        &self.events[rng.gen_range(0..self.events.len())]
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }
}

/// Read an ordered event list from a MIDI file or a pre-parsed RON corpus.
pub fn get_note_lists(path: &Path) -> Result<Vec<NoteEvent>, ScoreError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("mid") | Some("midi") => {
            let bytes = std::fs::read(path).map_err(|source| ScoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let smf = Smf::parse(&bytes)?;
            Ok(note_lists_from_smf(&smf))
        }
        Some("ron") => {
            let contents = std::fs::read_to_string(path).map_err(|source| ScoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(ron::from_str(&contents)?)
        }
        _ => Err(ScoreError::UnsupportedCorpus {
            path: path.to_path_buf(),
        }),
    }
}

pub fn write_corpus(path: &Path, events: &[NoteEvent]) -> Result<(), ScoreError> {
    let contents = ron::ser::to_string_pretty(&events, PrettyConfig::default())?;
    std::fs::write(path, contents).map_err(|source| ScoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: u64,
    end: u64,
    key: u8,
}

/// Merge every track into one vertical slice per change of sounding keys.
///
/// Each note-on or note-off tick starts a new slice; a slice carries the keys
/// held across it (empty for a rest) and its length in quarter-note beats.
pub fn note_lists_from_smf(smf: &Smf<'_>) -> Vec<NoteEvent> {
    let ppq = match smf.header.timing {
        Timing::Metrical(t) => t.as_int() as f64,
        _ => FALLBACK_PPQ,
    };

    let mut spans = Vec::new();
    for track in &smf.tracks {
        let mut abs_ticks: u64 = 0;
        let mut held: HashMap<(u8, u8), Vec<u64>> = HashMap::new();

        for ev in track {
            abs_ticks += ev.delta.as_int() as u64;
            let TrackEventKind::Midi { channel, message } = ev.kind else {
                continue;
            };
            let ch = channel.as_int();
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    held.entry((ch, key.as_int())).or_default().push(abs_ticks);
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    if let Some(start) = held.get_mut(&(ch, key.as_int())).and_then(Vec::pop) {
                        spans.push(Span {
                            start,
                            end: abs_ticks,
                            key: key.as_int(),
                        });
                    }
                }
                _ => {}
            }
        }

        // Notes never released ring until the end of their track.
        for ((_, key), starts) in held {
            for start in starts {
                spans.push(Span {
                    start,
                    end: abs_ticks,
                    key,
                });
            }
        }
    }

    let mut boundaries: BTreeSet<u64> = BTreeSet::new();
    if !spans.is_empty() {
        boundaries.insert(0);
    }
    for span in &spans {
        boundaries.insert(span.start);
        boundaries.insert(span.end);
    }
    let boundaries: Vec<u64> = boundaries.into_iter().collect();

    boundaries
        .windows(2)
        .filter(|w| w[1] > w[0])
        .map(|w| {
            let (from, to) = (w[0], w[1]);
            let pitches: PitchSet = spans
                .iter()
                .filter(|s| s.start <= from && s.end >= to && s.end > s.start)
                .map(|s| Pitch(s.key))
                .collect();
            NoteEvent::new(pitches, NoteLength::Measured((to - from) as f64 / ppq))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use midly::num::{u4, u7, u15, u28};
    use midly::{Format, Header, MetaMessage, TrackEvent};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn note(delta: u32, key: u8, vel: u8) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOn {
                    key: u7::new(key),
                    vel: u7::new(vel),
                },
            },
        }
    }

    fn end_of_track() -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        }
    }

    fn smf(tracks: Vec<Vec<TrackEvent<'static>>>) -> Smf<'static> {
        let mut smf = Smf::new(Header::new(
            Format::Parallel,
            Timing::Metrical(u15::new(480)),
        ));
        smf.tracks = tracks;
        smf
    }

    fn keys(event: &NoteEvent) -> Vec<u8> {
        event.pitches.iter().map(|p| p.0).collect()
    }

    #[test]
    fn empty_corpus_is_rejected() {
        let err = NoteCorpus::new("empty.mid", Vec::new()).unwrap_err();
        assert!(matches!(err, ScoreError::EmptyCorpus { .. }));
    }

    #[test]
    fn sampling_covers_the_corpus() {
        let events: Vec<NoteEvent> = (60..64)
            .map(|k| NoteEvent::new([Pitch(k)].into_iter().collect(), NoteLength::Measured(1.0)))
            .collect();
        let corpus = NoteCorpus::new("test", events).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = BTreeSet::new();
        for _ in 0..200 {
            seen.insert(keys(corpus.sample(&mut rng))[0]);
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn single_track_melody_with_leading_rest() {
        // Rest 1 beat, C4 half a beat, E4 one beat.
        let smf = smf(vec![vec![
            note(480, 60, 90),
            note(240, 60, 0),
            note(0, 64, 90),
            note(480, 64, 0),
            end_of_track(),
        ]]);
        let events = note_lists_from_smf(&smf);
        assert_eq!(events.len(), 3);
        assert!(events[0].pitches.is_empty());
        assert_eq!(events[0].length, NoteLength::Measured(1.0));
        assert_eq!(keys(&events[1]), vec![60]);
        assert_eq!(events[1].length, NoteLength::Measured(0.5));
        assert_eq!(events[1].label, "note");
        assert_eq!(keys(&events[2]), vec![64]);
        assert_eq!(events[2].length, NoteLength::Measured(1.0));
    }

    #[test]
    fn overlapping_tracks_are_chordified() {
        // Track 1 holds C4 for two beats; track 2 plays G4 on the second beat.
        let smf = smf(vec![
            vec![note(0, 60, 90), note(960, 60, 0), end_of_track()],
            vec![note(480, 67, 90), note(480, 67, 0), end_of_track()],
        ]);
        let events = note_lists_from_smf(&smf);
        assert_eq!(events.len(), 2);
        assert_eq!(keys(&events[0]), vec![60]);
        assert_eq!(keys(&events[1]), vec![60, 67]);
        assert_eq!(events[1].label, "chord");
        assert_eq!(events[1].length, NoteLength::Measured(1.0));
    }

    #[test]
    fn unreleased_note_rings_to_track_end() {
        let smf = smf(vec![vec![
            note(0, 62, 90),
            TrackEvent {
                delta: u28::new(240),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ]]);
        let events = note_lists_from_smf(&smf);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].length, NoteLength::Measured(0.5));
    }

    #[test]
    fn ron_corpus_round_trips_through_disk() {
        let path = std::env::temp_dir().join(format!("livescore-corpus-{}.ron", std::process::id()));
        let events = vec![
            NoteEvent::new([Pitch(60)].into_iter().collect(), NoteLength::Measured(0.5)),
            NoteEvent::rest(NoteLength::Measured(1.0)),
        ];
        write_corpus(&path, &events).unwrap();
        let loaded = get_note_lists(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, events);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = get_note_lists(Path::new("song.wav")).unwrap_err();
        assert!(matches!(err, ScoreError::UnsupportedCorpus { .. }));
    }
}
