use bevy::prelude::*;
use kira::{
    AudioManager, AudioManagerSettings, DefaultBackend,
    clock::{ClockHandle, ClockSpeed},
};

pub struct KiraPlugin;

impl Plugin for KiraPlugin {
    fn build(&self, app: &mut App) {
        let manager = match AudioManager::<DefaultBackend>::new(AudioManagerSettings::default()) {
            Ok(manager) => Some(manager),
            Err(e) => {
                warn!("No audio output ({e}), beat clock falls back to frame time");
                None
            }
        };

        app.insert_non_send_resource(KiraContext {
            manager,
            clock: None,
        });
    }
}

pub struct KiraContext {
    pub manager: Option<AudioManager>,
    pub clock: Option<ClockHandle>,
}

/// Start a clock ticking once per beat at `bpm`. Returns false when no
/// audio backend is available.
pub fn start_clock(ctx: &mut KiraContext, bpm: f64) -> bool {
    let Some(manager) = ctx.manager.as_mut() else {
        return false;
    };

    match manager.add_clock(ClockSpeed::TicksPerMinute(bpm)) {
        Ok(mut clock) => {
            clock.start();
            ctx.clock = Some(clock);
            info!("Beat clock started at {bpm} BPM");
            true
        }
        Err(e) => {
            warn!("Failed to create beat clock: {e}");
            false
        }
    }
}

/// Elapsed beats on the running clock, including the fractional part.
pub fn clock_beats(ctx: &KiraContext) -> Option<f64> {
    let clock = ctx.clock.as_ref()?;
    let t = clock.time();
    Some(t.ticks as f64 + t.fraction)
}
