use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("corpus {path:?} contains no notes")]
    EmptyCorpus { path: PathBuf },

    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid MIDI file: {0}")]
    Midi(#[from] midly::Error),

    #[error("invalid corpus file: {0}")]
    CorpusFormat(#[from] ron::error::SpannedError),

    #[error("failed to serialize corpus: {0}")]
    CorpusWrite(#[from] ron::Error),

    #[error("unsupported corpus file {path:?} (expected .mid, .midi or .ron)")]
    UnsupportedCorpus { path: PathBuf },

    #[error("failed to serialize settings: {0}")]
    SettingsFormat(#[from] serde_json::Error),

    #[error("audio input unavailable: {0}")]
    Audio(String),
}
