use bevy::prelude::*;

/// A notation duration expressed as a fraction of a whole note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lattice {
    pub numerator: u32,
    pub denominator: u32,
}

impl Lattice {
    pub const SIXTEENTH: Lattice = Lattice::new(1, 16);
    pub const EIGHTH: Lattice = Lattice::new(1, 8);
    pub const DOTTED_QUARTER: Lattice = Lattice::new(3, 8);
    pub const QUARTER: Lattice = Lattice::new(1, 4);
    pub const DOTTED_HALF: Lattice = Lattice::new(3, 4);
    pub const HALF: Lattice = Lattice::new(1, 2);

    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub fn whole_fraction(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Three-part values (3/8, 3/4) are written as a dotted note.
    pub fn is_dotted(self) -> bool {
        self.numerator == 3
    }

    /// Quarters and shorter get a filled notehead.
    pub fn is_filled(self) -> bool {
        self.whole_fraction() <= 0.375
    }

    /// Number of flags on the stem: one for eighths, two for sixteenths.
    pub fn flags(self) -> u32 {
        match self.denominator {
            8 if self.numerator == 1 => 1,
            16 => 2,
            _ => 0,
        }
    }
}

/// A duration snapped to the lattice, together with the beat count it
/// actually consumes from the bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantizedDuration {
    /// Beats consumed from the bar budget (multiply by beat size for units).
    pub performed_length: f64,
    pub lattice: Lattice,
}

/// Map a beat count onto the notation lattice.
///
/// Exact breakpoints keep their value; anything shorter than a sixteenth is
/// passed through as a sixteenth. Every other value is clamped to a quarter
/// that consumes exactly one beat.
pub fn quantize(raw: f64) -> QuantizedDuration {
    let lattice = if raw <= 0.25 {
        Lattice::SIXTEENTH
    } else if raw == 0.5 {
        Lattice::EIGHTH
    } else if raw == 0.75 {
        Lattice::DOTTED_QUARTER
    } else if raw == 1.0 {
        Lattice::QUARTER
    } else if raw == 1.5 {
        Lattice::DOTTED_HALF
    } else if raw == 2.0 {
        Lattice::HALF
    } else {
        debug!("Unrecognized duration {raw}, clamping to a quarter");
        return QuantizedDuration {
            performed_length: 1.0,
            lattice: Lattice::QUARTER,
        };
    };

    QuantizedDuration {
        performed_length: raw,
        lattice,
    }
}
