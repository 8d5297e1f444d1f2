use bevy::prelude::*;
use bevy_prototype_lyon::prelude::*;

use crate::ScoreSet;
use crate::bar::BAR_UNITS;
use crate::conductor::Conductor;
use crate::scheduler::{BeatScheduler, MARKER_BASE_SCALE};
use crate::surface::{
    BeatMarker, BevySurface, INK, LINE_GAP, ProgressIndicator, StaffLayout, SurfaceOverlay,
};

pub struct ScorePlugin;

impl Plugin for ScorePlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(ShapePlugin)
            .insert_resource(ClearColor(PAPER))
            .init_resource::<SurfaceOverlay>()
            .add_systems(Startup, (setup_staff, prime_score).chain())
            .add_systems(Update, drive_scheduler.in_set(ScoreSet::Schedule))
            .add_systems(Update, apply_overlay.in_set(ScoreSet::Render));
    }
}

const PAPER: Color = Color::srgb(0.97, 0.96, 0.92);
const MARKER_COLOR: Color = Color::srgb(0.6, 0.15, 0.2);
const INDICATOR_COLOR: Color = Color::srgb(0.35, 0.35, 0.4);

/// Score width: two bars plus the clef margin.
const SCORE_UNITS: f64 = 180.0;
const BARLINES: [f64; 3] = [0.0, 90.0, 180.0];
/// Conductor points "1".."4", two per bar.
const MARKER_OFFSETS: [f64; 4] = [10.0, 50.0, 100.0, 140.0];
const MARKER_HEIGHT: f32 = 10.0;
const INDICATOR_DEPTH: f32 = -12.0;
const MARKER_FONT: f32 = 18.0;
const ANNOTATION_FONT: f32 = 16.0;

/// The two-bar scheduler, keyed by glyph entities.
#[derive(Resource)]
pub struct ScoreScheduler(pub BeatScheduler<Entity>);

/// Text shown above the score.
#[derive(Resource)]
pub struct ScoreAnnotation(pub String);

fn setup_staff(
    mut commands: Commands,
    layout: Res<StaffLayout>,
    annotation: Option<Res<ScoreAnnotation>>,
) {
    commands.spawn(Camera2d);

    let left = layout.x(0.0);
    let right = layout.x(SCORE_UNITS);

    // Five staff lines around the middle line.
    for line in -2..=2 {
        let y = layout.staff_y + layout.px(line as f32 * LINE_GAP);
        let staff_line = shapes::Line(Vec2::new(left, y), Vec2::new(right, y));
        commands.spawn(ShapeBuilder::with(&staff_line).stroke((INK, 1.0)).build());
    }

    let top = layout.staff_y + layout.px(2.0 * LINE_GAP);
    let bottom = layout.staff_y - layout.px(2.0 * LINE_GAP);
    for offset in BARLINES {
        let x = layout.x(offset);
        let barline = shapes::Line(Vec2::new(x, bottom), Vec2::new(x, top));
        commands.spawn(ShapeBuilder::with(&barline).stroke((INK, 1.5)).build());
    }

    // Treble clef stand-in: a loop around the G line and a spine through the staff.
    let clef_x = layout.x(3.5);
    let g_line = layout.staff_y - layout.px(LINE_GAP);
    let clef_loop = shapes::Circle {
        radius: layout.px(LINE_GAP * 0.9),
        center: Vec2::new(clef_x, g_line),
    };
    commands.spawn(ShapeBuilder::with(&clef_loop).stroke((INK, 2.0)).build());
    let spine = shapes::Line(
        Vec2::new(clef_x + layout.px(0.6), bottom - layout.px(LINE_GAP)),
        Vec2::new(clef_x + layout.px(0.6), top + layout.px(LINE_GAP)),
    );
    commands.spawn(ShapeBuilder::with(&spine).stroke((INK, 2.0)).build());

    for (i, offset) in MARKER_OFFSETS.into_iter().enumerate() {
        commands.spawn((
            BeatMarker(i),
            Text2d::new((i + 1).to_string()),
            TextFont {
                font_size: MARKER_FONT,
                ..default()
            },
            TextColor(MARKER_COLOR),
            Transform::from_xyz(layout.x(offset), top + layout.px(MARKER_HEIGHT), 2.0),
        ));
    }

    // Bar-progress bracket spanning one bar, lifted halfway along.
    let span = layout.px(BAR_UNITS as f32 + 10.0);
    let lift = layout.px(1.5);
    let bracket = ShapePath::new()
        .move_to(Vec2::new(0.0, lift))
        .line_to(Vec2::ZERO)
        .line_to(Vec2::new(span * 0.5 - lift, 0.0))
        .line_to(Vec2::new(span * 0.5, lift))
        .line_to(Vec2::new(span * 0.5 + lift, 0.0))
        .line_to(Vec2::new(span, 0.0))
        .line_to(Vec2::new(span, lift));
    commands.spawn((
        ProgressIndicator,
        ShapeBuilder::with(&bracket)
            .stroke((INDICATOR_COLOR, 2.0))
            .build(),
        Transform::from_xyz(left, bottom + layout.px(INDICATOR_DEPTH), 0.5),
    ));

    if let Some(annotation) = annotation {
        commands.spawn((
            Node {
                position_type: PositionType::Absolute,
                top: Val::Px(16.0),
                left: Val::Px(16.0),
                ..default()
            },
            Text::new(annotation.0.clone()),
            TextFont {
                font_size: ANNOTATION_FONT,
                ..default()
            },
            TextColor(INK),
        ));
    }
}

fn prime_score(
    mut commands: Commands,
    layout: Res<StaffLayout>,
    mut overlay: ResMut<SurfaceOverlay>,
    mut scheduler: ResMut<ScoreScheduler>,
) {
    let mut surface = BevySurface::new(&mut commands, &layout, &mut overlay);
    scheduler.0.prime(&mut surface);
    info!("Score primed with two bars");
}

fn drive_scheduler(
    mut commands: Commands,
    conductor: Option<Res<Conductor>>,
    layout: Res<StaffLayout>,
    mut overlay: ResMut<SurfaceOverlay>,
    mut scheduler: ResMut<ScoreScheduler>,
) {
    let Some(conductor) = conductor else { return };

    let mut surface = BevySurface::new(&mut commands, &layout, &mut overlay);
    let outcome = scheduler.0.tick(conductor.current_beat, &mut surface);

    if outcome.beat_changed {
        let cycle = scheduler.0.cycle();
        trace!("Beat {:?}, markers {:?}", cycle.current_beat, cycle.highlighted_markers);
    }
    if let Some(bar) = outcome.rebuilt.and_then(|index| scheduler.0.bar(index)) {
        let rests = bar.elements.iter().filter(|e| e.is_rest()).count();
        debug!(
            "{:?} now holds {} elements ({} rests, {} units), {:?} sounding",
            bar.index,
            bar.elements.len(),
            rests,
            bar.total_units(),
            scheduler.0.sounding_bar()
        );
    }
}

fn apply_overlay(
    overlay: Res<SurfaceOverlay>,
    layout: Res<StaffLayout>,
    mut markers: Query<(&BeatMarker, &mut Transform), Without<ProgressIndicator>>,
    mut indicator: Query<&mut Transform, (With<ProgressIndicator>, Without<BeatMarker>)>,
) {
    if !overlay.is_changed() {
        return;
    }

    for (marker, mut transform) in &mut markers {
        let scale = overlay.marker_scales.get(marker.0).copied().unwrap_or(MARKER_BASE_SCALE);
        transform.scale = Vec3::splat(scale);
    }

    for mut transform in &mut indicator {
        transform.translation.x = layout.x(overlay.progress_offset);
    }
}
