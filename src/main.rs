mod audio;
mod bar;
mod conductor;
mod config;
mod corpus;
mod error;
mod listener;
mod note;
mod quantize;
mod scheduler;
mod score;
mod selector;
mod surface;

use std::path::{Path, PathBuf};

use bevy::prelude::*;
use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;

use audio::KiraPlugin;
use bar::BarBuilder;
use conductor::ConductorPlugin;
use config::ScoreSettings;
use corpus::{NoteCorpus, write_corpus};
use listener::{PitchListener, live_note_channel, silent_reading};
use scheduler::{BeatScheduler, ScoreLayout};
use score::{ScoreAnnotation, ScorePlugin, ScoreScheduler};
use selector::NoteSelector;
use surface::StaffLayout;

#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
enum ScoreSet {
    UpdateConductor,
    Schedule,
    Render,
}

#[derive(Parser)]
#[command(name = "livescore", about = "Rolling two-bar score generated from a MIDI piece and a live microphone")]
struct Cli {
    /// Source piece: a MIDI file or a RON corpus written by --dump-corpus
    source: PathBuf,

    /// Override the clock tempo
    #[arg(long)]
    bpm: Option<f64>,

    /// Chance boundary for source selection (draws above it use the MIDI corpus)
    #[arg(long)]
    threshold: Option<f64>,

    /// Do not open the microphone
    #[arg(long)]
    no_listen: bool,

    /// Seed the note selector for a reproducible score
    #[arg(long)]
    seed: Option<u64>,

    /// Write the parsed corpus as RON to this path and exit
    #[arg(long)]
    dump_corpus: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, mut settings: ScoreSettings) -> ScoreSettings {
        if let Some(bpm) = self.bpm {
            settings.bpm = bpm;
        }
        if let Some(threshold) = self.threshold {
            settings.selector_threshold = threshold;
        }
        if self.no_listen {
            settings.listen = false;
        }
        settings
    }
}

fn main() {
    let cli = Cli::parse();

    if let Some(ref out) = cli.dump_corpus {
        dump_corpus(&cli.source, out);
        return;
    }

    let mut app = App::new();
    app.add_plugins(DefaultPlugins.set(WindowPlugin {
        primary_window: Some(Window {
            title: "Live Score".into(),
            resolution: (1280, 480).into(),
            ..default()
        }),
        ..default()
    }));

    let settings = cli.apply(ScoreSettings::load());

    let corpus = NoteCorpus::load(&cli.source).unwrap_or_else(|e| {
        error!("{e}");
        std::process::exit(1);
    });
    let annotation = format!(
        "{} · {} events · {:.0} BPM",
        display_name(corpus.source()),
        corpus.len(),
        settings.bpm
    );

    let (slot, live) = live_note_channel(silent_reading());
    if settings.listen {
        match PitchListener::new(slot, settings.bpm, settings.input_gate).start() {
            Ok(sample_rate) => info!("Pitch listener running at {sample_rate} Hz"),
            Err(e) => warn!("{e}; live notes will stay silent"),
        }
    }

    let rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let selector = NoteSelector::new(corpus, live, settings.selector_threshold, rng);
    info!("Selecting from the corpus above {}", selector.threshold());
    let scheduler = BeatScheduler::new(BarBuilder::new(selector), ScoreLayout::default());

    app.insert_resource(StaffLayout::new(settings.units_to_px))
        .insert_resource(ScoreAnnotation(annotation))
        .insert_resource(ScoreScheduler(scheduler))
        .insert_resource(settings)
        .configure_sets(
            Update,
            (ScoreSet::UpdateConductor, ScoreSet::Schedule, ScoreSet::Render).chain(),
        )
        .add_plugins((KiraPlugin, ConductorPlugin, ScorePlugin))
        .run();
}

fn dump_corpus(source: &Path, out: &Path) {
    let corpus = NoteCorpus::load(source).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });
    write_corpus(out, corpus.events()).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });
    eprintln!("Wrote {} events to {}", corpus.len(), out.display());
}

fn display_name(path: &Path) -> String {
    path.file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}
