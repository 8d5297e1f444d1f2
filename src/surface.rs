use bevy::prelude::*;
use bevy_prototype_lyon::prelude::*;

use crate::note::{Pitch, PitchSet};
use crate::quantize::QuantizedDuration;
use crate::scheduler::{MARKER_BASE_SCALE, MARKER_COUNT, ScoreSurface};

/// Distance between staff lines, in score units.
pub const LINE_GAP: f32 = 2.0;
/// Horizontal centre of the two-bar score, in score units.
const SCORE_CENTER: f32 = 90.0;
/// Middle staff line of the treble staff.
const MIDDLE_LINE: Pitch = Pitch(71);
/// Steps above or below the middle line still inside the staff.
const STAFF_HALF_STEPS: i32 = 4;
const STEM_UNITS: f32 = 7.0;

pub const INK: Color = Color::srgb(0.1, 0.1, 0.12);
const REST_INK: Color = Color::srgb(0.25, 0.25, 0.3);

// --- Components ---

/// Root entity of one placed note, chord or rest.
#[derive(Component)]
pub struct ScoreGlyph;

#[derive(Component)]
pub struct BeatMarker(pub usize);

#[derive(Component)]
pub struct ProgressIndicator;

// --- Resources ---

/// Maps score units onto world coordinates.
#[derive(Resource, Debug, Clone, Copy)]
pub struct StaffLayout {
    pub units_to_px: f32,
    /// World y of the middle staff line.
    pub staff_y: f32,
}

impl StaffLayout {
    pub fn new(units_to_px: f32) -> Self {
        Self {
            units_to_px,
            staff_y: 0.0,
        }
    }

    pub fn x(&self, offset: f64) -> f32 {
        (offset as f32 - SCORE_CENTER) * self.units_to_px
    }

    pub fn px(&self, units: f32) -> f32 {
        units * self.units_to_px
    }

    /// Staff steps (lines and spaces) above the middle line.
    pub fn steps(pitch: Pitch) -> i32 {
        pitch.diatonic_index() - MIDDLE_LINE.diatonic_index()
    }

    /// Height of a pitch relative to the middle line.
    pub fn pitch_y(&self, pitch: Pitch) -> f32 {
        self.px(Self::steps(pitch) as f32 * LINE_GAP * 0.5)
    }

    /// Steps that need a ledger line to reach `steps`.
    pub fn ledger_steps(steps: i32) -> Vec<i32> {
        if steps > STAFF_HALF_STEPS {
            (STAFF_HALF_STEPS + 2..=steps).step_by(2).collect()
        } else if steps < -STAFF_HALF_STEPS {
            (steps..=-STAFF_HALF_STEPS - 2)
                .rev()
                .filter(|s| s % 2 == 0)
                .collect()
        } else {
            Vec::new()
        }
    }
}

/// Marker scales and indicator position written by the scheduler and
/// applied to transforms during rendering.
#[derive(Resource, Debug, Clone)]
pub struct SurfaceOverlay {
    pub marker_scales: [f32; MARKER_COUNT],
    pub progress_offset: f64,
}

impl Default for SurfaceOverlay {
    fn default() -> Self {
        Self {
            marker_scales: [MARKER_BASE_SCALE; MARKER_COUNT],
            progress_offset: 0.0,
        }
    }
}

/// [`ScoreSurface`] backed by Bevy entities for the current frame.
pub struct BevySurface<'a, 'w, 's> {
    commands: &'a mut Commands<'w, 's>,
    layout: &'a StaffLayout,
    overlay: &'a mut SurfaceOverlay,
}

impl<'a, 'w, 's> BevySurface<'a, 'w, 's> {
    pub fn new(
        commands: &'a mut Commands<'w, 's>,
        layout: &'a StaffLayout,
        overlay: &'a mut SurfaceOverlay,
    ) -> Self {
        Self {
            commands,
            layout,
            overlay,
        }
    }
}

impl ScoreSurface for BevySurface<'_, '_, '_> {
    type Handle = Entity;

    fn place(&mut self, offset: f64, pitches: &PitchSet, duration: QuantizedDuration) -> Entity {
        let layout = *self.layout;
        let origin = Vec3::new(layout.x(offset), layout.staff_y, 1.0);
        self.commands
            .spawn((ScoreGlyph, Transform::from_translation(origin), Visibility::default()))
            .with_children(|glyph: &mut ChildSpawnerCommands| {
                if pitches.is_empty() {
                    spawn_rest(glyph, &layout, duration);
                } else {
                    spawn_chord(glyph, &layout, pitches, duration);
                }
            })
            .id()
    }

    fn remove(&mut self, handle: Entity) {
        self.commands.entity(handle).despawn();
    }

    fn scale_marker(&mut self, marker: usize, scale: f32) {
        if let Some(slot) = self.overlay.marker_scales.get_mut(marker) {
            *slot = scale;
        }
    }

    fn move_progress(&mut self, offset: f64) {
        self.overlay.progress_offset = offset;
    }
}

// --- Glyphs ---

fn spawn_rest(glyph: &mut ChildSpawnerCommands, layout: &StaffLayout, duration: QuantizedDuration) {
    // Longer rests sit as taller blocks, centred on the middle line.
    let height = layout.px(if duration.lattice.whole_fraction() >= 0.5 {
        LINE_GAP
    } else {
        LINE_GAP * 1.5
    });
    let width = layout.px(1.2);
    let block = shapes::Polygon {
        points: vec![
            Vec2::new(0.0, -height * 0.5),
            Vec2::new(width, -height * 0.5),
            Vec2::new(width, height * 0.5),
            Vec2::new(0.0, height * 0.5),
        ],
        closed: true,
    };
    glyph.spawn((ShapeBuilder::with(&block).fill(REST_INK).build(), Transform::default()));

    if duration.lattice.is_dotted() {
        spawn_dot(glyph, layout, Vec2::new(width + layout.px(0.8), layout.px(LINE_GAP * 0.5)));
    }
}

fn spawn_chord(
    glyph: &mut ChildSpawnerCommands,
    layout: &StaffLayout,
    pitches: &PitchSet,
    duration: QuantizedDuration,
) {
    let head_radius = layout.px(LINE_GAP * 0.5);
    let lattice = duration.lattice;

    for &pitch in pitches {
        let y = layout.pitch_y(pitch);
        let head = shapes::Circle {
            radius: head_radius,
            center: Vec2::ZERO,
        };
        let shape = if lattice.is_filled() {
            ShapeBuilder::with(&head).fill(INK).build()
        } else {
            ShapeBuilder::with(&head).stroke((INK, 1.5)).build()
        };
        glyph.spawn((shape, Transform::from_xyz(0.0, y, 0.1)));

        for step in StaffLayout::ledger_steps(StaffLayout::steps(pitch)) {
            let ly = layout.px(step as f32 * LINE_GAP * 0.5);
            let ledger = shapes::Line(
                Vec2::new(-head_radius * 1.6, ly),
                Vec2::new(head_radius * 1.6, ly),
            );
            glyph.spawn((ShapeBuilder::with(&ledger).stroke((INK, 1.0)).build(), Transform::default()));
        }

        if pitch.is_sharp() {
            glyph.spawn((
                Text2d::new("#"),
                TextFont {
                    font_size: head_radius * 2.4,
                    ..default()
                },
                TextColor(INK),
                Transform::from_xyz(-head_radius * 2.6, y, 0.1),
            ));
        }

        if lattice.is_dotted() {
            spawn_dot(glyph, layout, Vec2::new(head_radius * 2.0, y + head_radius * 0.5));
        }
    }

    // Stem rises from the lowest head past the highest one.
    let (Some(low), Some(high)) = (pitches.first(), pitches.last()) else {
        return;
    };
    let stem_x = head_radius * 0.95;
    let stem_bottom = layout.pitch_y(*low);
    let stem_top = layout.pitch_y(*high) + layout.px(STEM_UNITS);
    let stem = shapes::Line(Vec2::new(stem_x, stem_bottom), Vec2::new(stem_x, stem_top));
    glyph.spawn((ShapeBuilder::with(&stem).stroke((INK, 1.5)).build(), Transform::default()));

    for flag in 0..lattice.flags() {
        let y = stem_top - layout.px(flag as f32 * LINE_GAP * 0.75);
        let flag_path = ShapePath::new()
            .move_to(Vec2::new(stem_x, y))
            .line_to(Vec2::new(stem_x + layout.px(1.6), y - layout.px(LINE_GAP)));
        glyph.spawn((ShapeBuilder::with(&flag_path).stroke((INK, 1.5)).build(), Transform::default()));
    }
}

fn spawn_dot(glyph: &mut ChildSpawnerCommands, layout: &StaffLayout, at: Vec2) {
    let dot = shapes::Circle {
        radius: layout.px(0.3),
        center: Vec2::ZERO,
    };
    glyph.spawn((ShapeBuilder::with(&dot).fill(INK).build(), Transform::from_translation(at.extend(0.1))));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_units_centre_on_the_staff() {
        let layout = StaffLayout::new(6.0);
        assert_eq!(layout.x(90.0), 0.0);
        assert_eq!(layout.x(0.0), -540.0);
        assert_eq!(layout.x(180.0), 540.0);
    }

    #[test]
    fn treble_staff_positions() {
        let layout = StaffLayout::new(5.0);
        assert_eq!(StaffLayout::steps(Pitch(71)), 0);
        // E4 bottom line, F5 top line.
        assert_eq!(StaffLayout::steps(Pitch(64)), -4);
        assert_eq!(StaffLayout::steps(Pitch(77)), 4);
        assert_eq!(layout.pitch_y(Pitch(64)), -20.0);
        // Sharps share their natural's position.
        assert_eq!(layout.pitch_y(Pitch(66)), layout.pitch_y(Pitch(65)));
    }

    #[test]
    fn ledger_lines_outside_the_staff() {
        // Middle C sits on the first ledger line below.
        assert_eq!(StaffLayout::ledger_steps(StaffLayout::steps(Pitch(60))), vec![-6]);
        // B3 hangs under that ledger line.
        assert_eq!(StaffLayout::ledger_steps(-7), vec![-6]);
        assert_eq!(StaffLayout::ledger_steps(6), vec![6]);
        assert_eq!(StaffLayout::ledger_steps(9), vec![6, 8]);
        assert_eq!(StaffLayout::ledger_steps(-10), vec![-6, -8, -10]);
        assert!(StaffLayout::ledger_steps(4).is_empty());
        assert!(StaffLayout::ledger_steps(-5).is_empty());
    }
}
