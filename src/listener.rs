use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use bevy::prelude::*;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam::channel::bounded;
use realfft::{RealFftPlanner, RealToComplex};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::error::ScoreError;
use crate::note::{NoteEvent, NoteLength, Pitch, PitchSet};

/// Analysis frame length in samples.
pub const WINDOW_SIZE: usize = 2048;
/// Samples between successive analysis frames.
pub const HOP_SIZE: usize = 1024;
/// Lowest and highest frequency considered when picking the pitch peak.
const MIN_PITCH_HZ: f64 = 60.0;
const MAX_PITCH_HZ: f64 = 2000.0;
/// Segments shorter than this many frames are treated as glitches.
const MIN_SEGMENT_FRAMES: usize = 2;
/// Mono samples buffered between the capture callback and the analysis thread.
const RING_CAPACITY: usize = WINDOW_SIZE * 8;
/// How long the analysis thread sleeps once the ring runs dry.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Writer half of the latest-reading buffer.
#[derive(Clone)]
pub struct NoteSlot(Arc<ArcSwap<NoteEvent>>);

/// Reader half of the latest-reading buffer. Reads never block and always
/// see a whole event.
#[derive(Clone)]
pub struct LiveNoteSource(Arc<ArcSwap<NoteEvent>>);

/// Create a connected slot/source pair holding `initial` until the first
/// publish.
pub fn live_note_channel(initial: NoteEvent) -> (NoteSlot, LiveNoteSource) {
    let shared = Arc::new(ArcSwap::from_pointee(initial));
    (NoteSlot(shared.clone()), LiveNoteSource(shared))
}

impl NoteSlot {
    pub fn publish(&self, event: NoteEvent) {
        self.0.store(Arc::new(event));
    }
}

impl LiveNoteSource {
    /// The most recent reading. Returns the previous value again when the
    /// listener has nothing new.
    pub fn read(&self) -> NoteEvent {
        NoteEvent::clone(&self.0.load())
    }
}

/// Placeholder served before the listener has heard anything.
pub fn silent_reading() -> NoteEvent {
    NoteEvent::rest(NoteLength::Nominal).with_label("ear rest")
}

// --- Spectral pitch estimation ---

pub struct PitchAnalyzer {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    scratch: Vec<realfft::num_complex::Complex<f32>>,
    spectrum: Vec<realfft::num_complex::Complex<f32>>,
    input: Vec<f32>,
    magnitudes: Vec<f32>,
    sample_rate: u32,
    gate: f32,
}

impl PitchAnalyzer {
    /// `gate` is the RMS level below which a frame counts as silence.
    pub fn new(sample_rate: u32, gate: f32) -> Self {
        let window = (0..WINDOW_SIZE)
            .map(|i| {
                0.5 * (1.0
                    - (2.0 * std::f32::consts::PI * i as f32 / (WINDOW_SIZE - 1) as f32).cos())
            })
            .collect();

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(WINDOW_SIZE);
        let scratch = fft.make_scratch_vec();
        let spectrum = fft.make_output_vec();

        Self {
            fft,
            window,
            scratch,
            spectrum,
            input: vec![0.0; WINDOW_SIZE],
            magnitudes: vec![0.0; WINDOW_SIZE / 2 + 1],
            sample_rate,
            gate,
        }
    }

    /// Estimate the dominant pitch of one `WINDOW_SIZE` frame, or `None` for
    /// silence.
    pub fn analyze(&mut self, frame: &[f32]) -> Option<Pitch> {
        debug_assert_eq!(frame.len(), WINDOW_SIZE);

        let rms = (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt();
        if rms < self.gate {
            return None;
        }

        for ((dst, s), w) in self.input.iter_mut().zip(frame).zip(&self.window) {
            *dst = s * w;
        }
        if let Err(e) =
            self.fft
                .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
        {
            warn!("FFT failed: {e}");
            return None;
        }
        for (m, c) in self.magnitudes.iter_mut().zip(&self.spectrum) {
            *m = (c.re * c.re + c.im * c.im).sqrt();
        }

        let hz = peak_frequency(&self.magnitudes, self.sample_rate)?;
        Pitch::from_hz(hz)
    }
}

/// Frequency of the strongest bin inside the pitch range, refined by
/// parabolic interpolation over its neighbours.
fn peak_frequency(magnitudes: &[f32], sample_rate: u32) -> Option<f64> {
    let bin_hz = sample_rate as f64 / WINDOW_SIZE as f64;
    let lo = ((MIN_PITCH_HZ / bin_hz).floor() as usize).max(1);
    let hi = ((MAX_PITCH_HZ / bin_hz).ceil() as usize).min(magnitudes.len() - 2);
    if lo >= hi {
        return None;
    }

    let (peak, _) = magnitudes[lo..=hi]
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    let k = lo + peak;

    let (a, b, c) = (
        magnitudes[k - 1] as f64,
        magnitudes[k] as f64,
        magnitudes[k + 1] as f64,
    );
    let denom = a - 2.0 * b + c;
    let offset = if denom.abs() < f64::EPSILON {
        0.0
    } else {
        0.5 * (a - c) / denom
    };

    Some((k as f64 + offset) * bin_hz)
}

// --- Segmentation ---

/// Turns a stream of per-frame pitch readings into finished notes.
pub struct NoteSegmenter {
    current: Option<Pitch>,
    frames: usize,
    beats_per_frame: f64,
}

impl NoteSegmenter {
    pub fn new(sample_rate: u32, bpm: f64) -> Self {
        let frame_secs = HOP_SIZE as f64 / sample_rate as f64;
        Self {
            current: None,
            frames: 0,
            beats_per_frame: frame_secs * bpm / 60.0,
        }
    }

    /// Feed one frame's reading. Returns the segment that just ended when
    /// the reading differs from the one being held.
    pub fn push(&mut self, reading: Option<Pitch>) -> Option<NoteEvent> {
        if reading == self.current {
            self.frames += 1;
            return None;
        }

        let finished = (self.frames >= MIN_SEGMENT_FRAMES).then(|| {
            let pitches: PitchSet = self.current.into_iter().collect();
            let length = NoteLength::Measured(self.frames as f64 * self.beats_per_frame);
            let event = NoteEvent::new(pitches, length);
            let label = format!("ear {}", event.label);
            event.with_label(label)
        });

        self.current = reading;
        self.frames = 1;
        finished
    }
}

// --- Capture ---

/// Sliding analysis window fed from the capture ring.
pub struct AnalysisLoop {
    analyzer: PitchAnalyzer,
    segmenter: NoteSegmenter,
    window: Vec<f32>,
}

impl AnalysisLoop {
    pub fn new(sample_rate: u32, bpm: f64, gate: f32) -> Self {
        Self {
            analyzer: PitchAnalyzer::new(sample_rate, gate),
            segmenter: NoteSegmenter::new(sample_rate, bpm),
            window: Vec::with_capacity(WINDOW_SIZE),
        }
    }

    /// Analyse every whole frame available in `samples`, hopping by
    /// `HOP_SIZE`. A partial frame stays buffered for the next call.
    pub fn drain(&mut self, samples: &mut HeapCons<f32>) -> Vec<NoteEvent> {
        let mut finished = Vec::new();
        loop {
            let filled = self.window.len();
            self.window.resize(WINDOW_SIZE, 0.0);
            let read = samples.pop_slice(&mut self.window[filled..]);
            self.window.truncate(filled + read);
            if self.window.len() < WINDOW_SIZE {
                return finished;
            }

            let reading = self.analyzer.analyze(&self.window);
            finished.extend(self.segmenter.push(reading));
            self.window.drain(..HOP_SIZE);
        }
    }
}

/// Background pitch listener publishing into a [`NoteSlot`].
pub struct PitchListener {
    slot: NoteSlot,
    bpm: f64,
    gate: f32,
}

impl PitchListener {
    pub fn new(slot: NoteSlot, bpm: f64, gate: f32) -> Self {
        Self { slot, bpm, gate }
    }

    /// Open the default input device and start analysing on a detached
    /// thread that runs until the process exits. The stream lives on that
    /// thread since it is not `Send` on every platform. Returns the input
    /// sample rate.
    pub fn start(self) -> Result<u32, ScoreError> {
        let (ready_tx, ready_rx) = bounded::<Result<u32, ScoreError>>(1);

        std::thread::Builder::new()
            .name("pitch-listener".into())
            .spawn(move || {
                let (producer, mut consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
                let overruns = Arc::new(AtomicUsize::new(0));
                let (_stream, sample_rate) = match open_input_stream(producer, overruns.clone()) {
                    Ok(opened) => {
                        let _ = ready_tx.send(Ok(opened.1));
                        opened
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let mut analysis = AnalysisLoop::new(sample_rate, self.bpm, self.gate);
                loop {
                    for event in analysis.drain(&mut consumer) {
                        self.slot.publish(event);
                    }
                    let dropped = overruns.swap(0, Ordering::Relaxed);
                    if dropped > 0 {
                        warn!("Pitch analysis fell behind, dropped {dropped} samples");
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            })
            .map_err(|e| ScoreError::Audio(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| ScoreError::Audio("listener thread exited during startup".into()))?
    }
}

fn open_input_stream(
    samples: HeapProd<f32>,
    overruns: Arc<AtomicUsize>,
) -> Result<(cpal::Stream, u32), ScoreError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| ScoreError::Audio("no input device found".into()))?;
    let name = device.name().unwrap_or_else(|_| "<unnamed>".into());

    let config = device
        .default_input_config()
        .map_err(|e| ScoreError::Audio(e.to_string()))?;
    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(&device, &config.into(), samples, overruns, channels)
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&device, &config.into(), samples, overruns, channels)
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(&device, &config.into(), samples, overruns, channels)
        }
        other => Err(ScoreError::Audio(format!("unsupported sample format {other:?}"))),
    }?;

    stream.play().map_err(|e| ScoreError::Audio(e.to_string()))?;
    info!("Listening on {name} at {sample_rate} Hz");

    Ok((stream, sample_rate))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut samples: HeapProd<f32>,
    overruns: Arc<AtomicUsize>,
    channels: usize,
) -> Result<cpal::Stream, ScoreError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Downmix to mono straight into the ring; no allocation here.
                let mut dropped = 0;
                for frame in data.chunks(channels) {
                    let mono =
                        frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / channels as f32;
                    if samples.try_push(mono).is_err() {
                        dropped += 1;
                    }
                }
                if dropped > 0 {
                    overruns.fetch_add(dropped, Ordering::Relaxed);
                }
            },
            |err| error!("Audio input error: {}", err),
            None,
        )
        .map_err(|e| ScoreError::Audio(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(hz: f32, sample_rate: u32, amplitude: f32) -> Vec<f32> {
        (0..WINDOW_SIZE)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * hz * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn detects_concert_a() {
        let mut analyzer = PitchAnalyzer::new(44_100, 0.01);
        assert_eq!(analyzer.analyze(&sine(440.0, 44_100, 0.5)), Some(Pitch(69)));
    }

    #[test]
    fn detects_middle_c_at_48k() {
        let mut analyzer = PitchAnalyzer::new(48_000, 0.01);
        assert_eq!(analyzer.analyze(&sine(261.63, 48_000, 0.5)), Some(Pitch(60)));
    }

    #[test]
    fn quiet_frames_are_silence() {
        let mut analyzer = PitchAnalyzer::new(44_100, 0.01);
        assert_eq!(analyzer.analyze(&vec![0.0; WINDOW_SIZE]), None);
        assert_eq!(analyzer.analyze(&sine(440.0, 44_100, 0.001)), None);
    }

    #[test]
    fn segmenter_emits_on_pitch_change() {
        // 1024-sample hop at 48 kHz, 60 BPM: 0.021333 beats per frame.
        let mut seg = NoteSegmenter::new(48_000, 60.0);
        let a = Some(Pitch(69));
        let c = Some(Pitch(72));

        // Leading silence of 2 frames.
        assert!(seg.push(None).is_none());
        assert!(seg.push(None).is_none());
        let rest = seg.push(a).expect("silence segment");
        assert!(rest.pitches.is_empty());
        assert_eq!(rest.label, "ear rest");

        for _ in 0..9 {
            assert!(seg.push(a).is_none());
        }
        let note = seg.push(c).expect("A4 segment");
        assert_eq!(note.label, "ear note");
        assert!(note.pitches.contains(&Pitch(69)));
        let NoteLength::Measured(beats) = note.length else {
            panic!("listener notes are measured");
        };
        let expected = 10.0 * HOP_SIZE as f64 / 48_000.0;
        assert!((beats - expected).abs() < 1e-9, "beats {beats}");
    }

    #[test]
    fn segmenter_drops_single_frame_glitches() {
        let mut seg = NoteSegmenter::new(44_100, 60.0);
        for _ in 0..4 {
            seg.push(Some(Pitch(60)));
        }
        assert!(seg.push(Some(Pitch(61))).is_some());
        // One frame of C#4, then back: the blip is discarded.
        assert!(seg.push(Some(Pitch(60))).is_none());
    }

    #[test]
    fn source_returns_last_published_value() {
        let (slot, source) = live_note_channel(silent_reading());
        assert_eq!(source.read(), silent_reading());
        assert_eq!(source.read(), silent_reading());

        let event = NoteEvent::new([Pitch(64)].into_iter().collect(), NoteLength::Measured(0.5));
        slot.publish(event.clone());
        assert_eq!(source.read(), event);
        // Stale reads keep returning the cached value.
        assert_eq!(source.read(), event);
    }

    #[test]
    fn reads_from_another_thread_see_whole_events() {
        let (slot, source) = live_note_channel(silent_reading());
        let writer = std::thread::spawn(move || {
            for key in 40..90u8 {
                let pitches: PitchSet = [Pitch(key), Pitch(key + 4)].into_iter().collect();
                slot.publish(NoteEvent::new(pitches, NoteLength::Measured(key as f64)));
            }
        });
        for _ in 0..500 {
            let event = source.read();
            if let NoteLength::Measured(beats) = event.length {
                let lowest = event.pitches.iter().next().map(|p| p.0 as f64);
                assert_eq!(lowest, Some(beats));
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn analysis_loop_segments_samples_from_the_ring() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
        let mut analysis = AnalysisLoop::new(44_100, 60.0, 0.01);

        let tone: Vec<f32> = (0..WINDOW_SIZE + 4 * HOP_SIZE)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44_100.0).sin())
            .collect();

        // One sample short of a frame: nothing is analysed yet.
        assert_eq!(producer.push_slice(&tone[..WINDOW_SIZE - 1]), WINDOW_SIZE - 1);
        assert!(analysis.drain(&mut consumer).is_empty());

        let rest = &tone[WINDOW_SIZE - 1..];
        assert_eq!(producer.push_slice(rest), rest.len());
        assert!(analysis.drain(&mut consumer).is_empty());

        // Silence ends the held A4.
        let silence = vec![0.0; 4 * HOP_SIZE];
        assert_eq!(producer.push_slice(&silence), silence.len());
        let events = analysis.drain(&mut consumer);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].label, "ear note");
        assert!(events[0].pitches.contains(&Pitch(69)));
    }
}
