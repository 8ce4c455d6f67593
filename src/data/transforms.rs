//! Patch augmentations.
//!
//! Both transforms simulate scanning noise: a one pixel horizontal
//! misalignment and a small skew. Patches are white (1.0) on black ink (0.0),
//! so every fill value introduced here is background colored.

use super::random::RandomSource;
use crate::config::PatchesConfig;
use ndarray::{s, Array2};

/// A randomized, label-preserving patch transform.
pub trait Augmentation: Send + Sync {
    /// Returns the augmented patch. Exactly the draws documented by the
    /// implementation are taken from `rng`.
    fn apply(&self, patch: Array2<f32>, rng: &mut dyn RandomSource) -> Array2<f32>;

    fn name(&self) -> &'static str;
}

/// Chain of augmentations applied in insertion order.
pub struct AugmentationPipeline {
    augmentations: Vec<Box<dyn Augmentation>>,
}

impl AugmentationPipeline {
    /// Empty pipeline (identity, no draws).
    pub fn new() -> Self {
        Self {
            augmentations: Vec::new(),
        }
    }

    /// Shift followed by rotation, configured from the run config.
    pub fn from_config(config: &PatchesConfig) -> Self {
        Self::new()
            .add(ShiftAugmentation::new(config.shift_probability()))
            .add(RotationAugmentation::from_radians(
                config.max_rotation_radians(),
            ))
    }

    /// Appends `augmentation` after the ones already added.
    pub fn add<A: Augmentation + 'static>(mut self, augmentation: A) -> Self {
        self.augmentations.push(Box::new(augmentation));
        self
    }

    /// Number of chained augmentations.
    pub fn len(&self) -> usize {
        self.augmentations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.augmentations.is_empty()
    }

    /// Names in application order, for logs.
    pub fn names(&self) -> Vec<&'static str> {
        self.augmentations.iter().map(|a| a.name()).collect()
    }
}

impl Default for AugmentationPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Augmentation for AugmentationPipeline {
    fn apply(&self, mut patch: Array2<f32>, rng: &mut dyn RandomSource) -> Array2<f32> {
        for augmentation in &self.augmentations {
            patch = augmentation.apply(patch, rng);
        }
        patch
    }

    fn name(&self) -> &'static str {
        "pipeline"
    }
}

/// Outcome of one shift draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftDirection {
    Left,
    Right,
    None,
}

impl ShiftDirection {
    /// Maps a draw `r` in `[0, 1)` to a direction for shift probability `p`:
    /// `[0, p/2)` is left, `[p/2, p)` is right, the rest is no shift.
    pub fn from_draw(r: f32, probability: f32) -> Self {
        let p = probability.min(1.0);
        if r < p / 2.0 {
            ShiftDirection::Left
        } else if r < p {
            ShiftDirection::Right
        } else {
            ShiftDirection::None
        }
    }
}

/// Shifts the patch one pixel left or right with probability `p`, filling the
/// vacated column by replicating the adjacent edge column.
///
/// Takes one draw per call.
#[derive(Debug, Clone)]
pub struct ShiftAugmentation {
    probability: f32,
}

impl ShiftAugmentation {
    /// `probability` above 1 is clamped to 1.
    pub fn new(probability: f32) -> Self {
        Self {
            probability: probability.min(1.0),
        }
    }

    /// Probability that a patch is shifted at all.
    pub fn probability(&self) -> f32 {
        self.probability
    }
}

impl Augmentation for ShiftAugmentation {
    fn apply(&self, patch: Array2<f32>, rng: &mut dyn RandomSource) -> Array2<f32> {
        let r = rng.next_uniform();
        match ShiftDirection::from_draw(r, self.probability) {
            ShiftDirection::Left => shift_left(&patch),
            ShiftDirection::Right => shift_right(&patch),
            ShiftDirection::None => patch,
        }
    }

    fn name(&self) -> &'static str {
        "shift"
    }
}

/// Drops column 0 and repeats the last column on the right.
pub fn shift_left(patch: &Array2<f32>) -> Array2<f32> {
    let width = patch.ncols();
    if width == 0 {
        return patch.clone();
    }
    let mut out = Array2::zeros(patch.raw_dim());
    out.slice_mut(s![.., ..width - 1])
        .assign(&patch.slice(s![.., 1..]));
    out.column_mut(width - 1).assign(&patch.column(width - 1));
    out
}

/// Drops the last column and repeats column 0 on the left.
pub fn shift_right(patch: &Array2<f32>) -> Array2<f32> {
    let width = patch.ncols();
    if width == 0 {
        return patch.clone();
    }
    let mut out = Array2::zeros(patch.raw_dim());
    out.column_mut(0).assign(&patch.column(0));
    out.slice_mut(s![.., 1..])
        .assign(&patch.slice(s![.., ..width - 1]));
    out
}

/// Rotates the patch by an angle drawn uniformly from `[-max, max]` radians.
///
/// Takes one draw per call, also when `max` is 0. The patch is inverted
/// around the rotation so the zero fill of exposed corners turns into white
/// background.
#[derive(Debug, Clone)]
pub struct RotationAugmentation {
    max_radians: f32,
}

impl RotationAugmentation {
    /// Maximum angle in degrees, as written in the run config.
    pub fn from_degrees(max_degrees: f32) -> Self {
        Self::from_radians(max_degrees.to_radians())
    }

    pub fn from_radians(max_radians: f32) -> Self {
        Self { max_radians }
    }

    /// Half-width of the angle range.
    pub fn max_radians(&self) -> f32 {
        self.max_radians
    }
}

impl Augmentation for RotationAugmentation {
    fn apply(&self, patch: Array2<f32>, rng: &mut dyn RandomSource) -> Array2<f32> {
        let angle = rng.uniform_range(-self.max_radians, self.max_radians);
        rotate_on_background(&patch, angle)
    }

    fn name(&self) -> &'static str {
        "rotation"
    }
}

/// `1 - rotate(1 - patch, angle)`.
pub fn rotate_on_background(patch: &Array2<f32>, angle: f32) -> Array2<f32> {
    let inverted = patch.mapv(|v| 1.0 - v);
    rotate_bilinear(&inverted, angle).mapv_into(|v| 1.0 - v)
}

/// Counter-clockwise rotation about the patch center with bilinear sampling;
/// samples outside the image read as 0.
pub fn rotate_bilinear(image: &Array2<f32>, angle: f32) -> Array2<f32> {
    let (height, width) = image.dim();
    let (sin, cos) = angle.sin_cos();
    let max_x = width as f32 - 1.0;
    let max_y = height as f32 - 1.0;
    let x_offset = (max_x - (cos * max_x - sin * max_y)) / 2.0;
    let y_offset = (max_y - (sin * max_x + cos * max_y)) / 2.0;

    Array2::from_shape_fn((height, width), |(y, x)| {
        let (x, y) = (x as f32, y as f32);
        let in_x = cos * x - sin * y + x_offset;
        let in_y = sin * x + cos * y + y_offset;
        bilinear_sample(image, in_y, in_x)
    })
}

fn bilinear_sample(image: &Array2<f32>, y: f32, x: f32) -> f32 {
    let y_floor = y.floor();
    let x_floor = x.floor();
    let y_ceil = y_floor + 1.0;
    let x_ceil = x_floor + 1.0;

    let top = (x_ceil - x) * read_or_zero(image, y_floor, x_floor)
        + (x - x_floor) * read_or_zero(image, y_floor, x_ceil);
    let bottom = (x_ceil - x) * read_or_zero(image, y_ceil, x_floor)
        + (x - x_floor) * read_or_zero(image, y_ceil, x_ceil);
    (y_ceil - y) * top + (y - y_floor) * bottom
}

fn read_or_zero(image: &Array2<f32>, y: f32, x: f32) -> f32 {
    let (height, width) = image.dim();
    if y < 0.0 || x < 0.0 || y >= height as f32 || x >= width as f32 {
        return 0.0;
    }
    image[[y as usize, x as usize]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::random::ScriptedDraws;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn ramp(height: usize, width: usize) -> Array2<f32> {
        Array2::from_shape_fn((height, width), |(y, x)| (y * width + x) as f32 / 100.0)
    }

    #[test]
    fn shift_draw_partitions_unit_interval() {
        assert_eq!(ShiftDirection::from_draw(0.0, 0.5), ShiftDirection::Left);
        assert_eq!(ShiftDirection::from_draw(0.2499, 0.5), ShiftDirection::Left);
        assert_eq!(ShiftDirection::from_draw(0.25, 0.5), ShiftDirection::Right);
        assert_eq!(ShiftDirection::from_draw(0.4999, 0.5), ShiftDirection::Right);
        assert_eq!(ShiftDirection::from_draw(0.5, 0.5), ShiftDirection::None);
        assert_eq!(ShiftDirection::from_draw(0.0, 0.0), ShiftDirection::None);
        // Probabilities above one behave like one.
        assert_eq!(ShiftDirection::from_draw(0.7, 4.0), ShiftDirection::Right);
    }

    #[test]
    fn shift_left_replicates_right_edge() {
        let patch: Array2<f32> = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let expected: Array2<f32> = array![[2.0, 3.0, 3.0], [5.0, 6.0, 6.0]];
        assert_eq!(shift_left(&patch), expected);
    }

    #[test]
    fn shift_right_replicates_left_edge() {
        let patch: Array2<f32> = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let expected: Array2<f32> = array![[1.0, 1.0, 2.0], [4.0, 4.0, 5.0]];
        assert_eq!(shift_right(&patch), expected);
    }

    #[test]
    fn single_column_shift_is_identity() {
        let patch: Array2<f32> = array![[0.3], [0.7]];
        assert_eq!(shift_left(&patch), patch);
        assert_eq!(shift_right(&patch), patch);
    }

    #[test]
    fn shift_takes_exactly_one_draw() {
        let shift = ShiftAugmentation::new(1.0);
        let mut rng = ScriptedDraws::constant(0.9);
        let out = shift.apply(ramp(3, 4), &mut rng);
        assert_eq!(rng.consumed(), 1);
        assert_eq!(out, shift_right(&ramp(3, 4)));
    }

    #[test]
    fn zero_angle_rotation_is_identity() {
        let patch = ramp(5, 7);
        let rotated = rotate_on_background(&patch, 0.0);
        assert_eq!(rotated.dim(), (5, 7));
        for (a, b) in rotated.iter().zip(patch.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn zero_max_rotation_still_draws() {
        let rotation = RotationAugmentation::from_degrees(0.0);
        let mut rng = ScriptedDraws::constant(0.73);
        let patch = ramp(4, 4);
        let out = rotation.apply(patch.clone(), &mut rng);
        assert_eq!(rng.consumed(), 1);
        for (a, b) in out.iter().zip(patch.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn rotation_exposes_background_not_ink() {
        // All-ink patch: any area rotated in from outside must be white.
        let patch = Array2::<f32>::zeros((9, 9));
        let rotated = rotate_on_background(&patch, 30f32.to_radians());
        assert_eq!(rotated.dim(), (9, 9));
        assert!(rotated[[0, 0]] > 0.5, "corner should be background, got {}", rotated[[0, 0]]);
        assert_abs_diff_eq!(rotated[[4, 4]], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn quarter_turn_moves_pixels_counter_clockwise() {
        let mut image = Array2::<f32>::zeros((3, 3));
        image[[0, 2]] = 1.0; // top right
        let rotated = rotate_bilinear(&image, std::f32::consts::FRAC_PI_2);
        // Output (y, x) samples input (x, 2 - y): top right lands top left.
        assert_abs_diff_eq!(rotated[[0, 0]], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(rotated[[0, 2]], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn pipeline_applies_shift_then_rotation() {
        let config = PatchesConfig::default().with_augmentation(1.0, 0.0);
        let pipeline = AugmentationPipeline::from_config(&config);
        assert_eq!(pipeline.names(), vec!["shift", "rotation"]);

        let mut rng = ScriptedDraws::new(vec![0.2, 0.5]);
        let patch = ramp(4, 6);
        let out = pipeline.apply(patch.clone(), &mut rng);
        assert_eq!(rng.consumed(), 2);
        for (a, b) in out.iter().zip(shift_left(&patch).iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }
}
