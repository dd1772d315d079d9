//! Separable Gaussian kernel generation.
//!
//! Weights are taken from a row of Pascal's triangle, the discrete
//! equivalent of the normal distribution. Only the centre tap and the
//! positive half of the kernel are stored; the negative half is its mirror.
//!
//! Two optional reductions are supported:
//! - **Truncation** widens the distribution until every retained tap carries
//!   at least `min_acceptable_coefficient` of the energy, then renormalizes
//!   over the retained taps so repeated blurs do not darken the image.
//! - **Linear sampling** merges adjacent taps into one bilinear fetch placed
//!   at their weighted average offset, roughly halving the fetch count.
//!   When the half kernel has an odd number of side taps, the centre is
//!   split in two and each half joins the first tap on its side, so the
//!   merged kernel has no lone centre fetch.

use serde::Serialize;

/// Largest supported kernel size.
pub const MAX_GAUSSIAN_KERNEL: u32 = 51;

/// Number of half-kernel entries for [`MAX_GAUSSIAN_KERNEL`] (centre + 25).
pub const MAX_GAUSSIAN_HALF_KERNEL: usize = ((MAX_GAUSSIAN_KERNEL - 1) / 2 + 1) as usize;

/// Default minimum contribution a tap must have to survive truncation.
pub const MINIMUM_ACCEPTABLE_COEFFICIENT: f64 = 0.0003;

/// Upper bound on the Pascal row searched while truncating.
const MAX_TRUNCATION_ROW: usize = 4096;

/// Half of a symmetric Gaussian kernel.
///
/// Offsets increase monotonically. With a centre tap `offsets[0]` is 0 and
/// the full kernel is `mirror(offsets[1..]) ++ offsets`; without one the
/// full kernel is `mirror(offsets) ++ offsets`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GaussianKernel {
    /// Requested kernel size (odd).
    pub kernel_size: u32,
    /// Per-tap weights for the positive half, centre first when present.
    pub weights: Vec<f64>,
    /// Per-tap offsets in texels, matching `weights`.
    pub offsets: Vec<f64>,
    /// Whether taps were merged for bilinear fetches.
    pub linear_sampling: bool,
    /// Whether negligible coefficients were discarded.
    pub truncated: bool,
    /// Whether `weights[0]` is a lone centre fetch at offset 0.
    pub centre_tap: bool,
    /// Pascal row the weights were taken from.
    pub pascal_row: usize,
}

impl GaussianKernel {
    /// Generate a kernel.
    ///
    /// `kernel_size` must be odd and at most [`MAX_GAUSSIAN_KERNEL`]; even
    /// sizes are rounded up and oversized kernels are clamped.
    pub fn generate(
        kernel_size: u32,
        truncate: bool,
        linear_sampling: bool,
        min_acceptable_coefficient: f64,
    ) -> Self {
        let kernel_size = sanitize_kernel_size(kernel_size);
        let half = ((kernel_size - 1) / 2) as usize;

        let mut row = kernel_size as usize - 1;
        let mut coefficients = binomial_half_row(row);

        if truncate {
            while row < MAX_TRUNCATION_ROW {
                let significant = coefficients
                    .iter()
                    .filter(|c| **c >= min_acceptable_coefficient)
                    .count();
                if significant >= half + 1 {
                    break;
                }
                row += 2;
                coefficients = binomial_half_row(row);
            }
        }

        coefficients.truncate(half + 1);

        // Renormalize over the retained (mirrored) taps.
        let total = coefficients[0] + 2.0 * coefficients[1..].iter().sum::<f64>();
        let mut weights: Vec<f64> = coefficients.iter().map(|c| c / total).collect();
        let mut offsets: Vec<f64> = (0..weights.len()).map(|i| i as f64).collect();

        let mut centre_tap = true;
        if linear_sampling {
            let (w, o, centre) = merge_for_linear_sampling(&weights, &offsets);
            weights = w;
            offsets = o;
            centre_tap = centre;
        }

        Self {
            kernel_size,
            weights,
            offsets,
            linear_sampling,
            truncated: truncate,
            centre_tap,
            pascal_row: row,
        }
    }

    /// Generate with the default minimum acceptable coefficient.
    pub fn with_defaults(kernel_size: u32, truncate: bool, linear_sampling: bool) -> Self {
        Self::generate(kernel_size, truncate, linear_sampling, MINIMUM_ACCEPTABLE_COEFFICIENT)
    }

    /// Number of half-kernel entries (centre included when present).
    pub fn tap_count(&self) -> usize {
        self.weights.len()
    }

    /// Index of the first entry fetched on both sides of the centre.
    fn first_side_tap(&self) -> usize {
        usize::from(self.centre_tap)
    }

    /// Texture fetches per blur direction.
    pub fn fetch_count(&self) -> usize {
        self.weights.len() * 2 - self.first_side_tap()
    }

    /// Sum of the weights across the mirrored kernel.
    pub fn sum(&self) -> f64 {
        let first = self.first_side_tap();
        self.weights[..first].iter().sum::<f64>() + 2.0 * self.weights[first..].iter().sum::<f64>()
    }

    /// The mirrored kernel as `(offsets, weights)` from most negative to most positive.
    pub fn mirrored(&self) -> (Vec<f64>, Vec<f64>) {
        let n = self.fetch_count();
        let mut offsets = Vec::with_capacity(n);
        let mut weights = Vec::with_capacity(n);
        for i in (self.first_side_tap()..self.weights.len()).rev() {
            offsets.push(-self.offsets[i]);
            weights.push(self.weights[i]);
        }
        offsets.extend_from_slice(&self.offsets);
        weights.extend_from_slice(&self.weights);
        (offsets, weights)
    }

    /// Mirrored weights repeated twice.
    ///
    /// The compute blur keeps a ring of the last `kernel_size` samples;
    /// indexing into the doubled array lets it apply the weights from any
    /// ring position without wrapping.
    pub fn duplicated_weights(&self) -> Vec<f32> {
        let (_, weights) = self.mirrored();
        weights
            .iter()
            .chain(weights.iter())
            .map(|w| *w as f32)
            .collect()
    }

    pub fn weights_f32(&self) -> Vec<f32> {
        self.weights.iter().map(|w| *w as f32).collect()
    }

    pub fn offsets_f32(&self) -> Vec<f32> {
        self.offsets.iter().map(|o| *o as f32).collect()
    }
}

fn sanitize_kernel_size(kernel_size: u32) -> u32 {
    let size = kernel_size.clamp(1, MAX_GAUSSIAN_KERNEL);
    if size % 2 == 0 {
        size + 1
    } else {
        size
    }
}

/// Normalized binomial coefficients `C(row, row/2 + j) / 2^row` for `j = 0..=row/2`.
///
/// `row` must be even. Computed from the centre outwards so no factorial is
/// ever materialized.
fn binomial_half_row(row: usize) -> Vec<f64> {
    debug_assert!(row % 2 == 0);
    let m = row / 2;

    // C(2m, m) / 4^m = prod_{i=1..m} (2i - 1) / (2i)
    let mut centre = 1.0f64;
    for i in 1..=m {
        centre *= (2 * i - 1) as f64 / (2 * i) as f64;
    }

    let mut coefficients = Vec::with_capacity(m + 1);
    coefficients.push(centre);
    let mut current = centre;
    for j in 0..m {
        // C(2m, m+j+1) = C(2m, m+j) * (m - j) / (m + j + 1)
        current *= (m - j) as f64 / (m + j + 1) as f64;
        coefficients.push(current);
    }
    coefficients
}

/// Merge adjacent taps into single bilinear fetches.
///
/// With an even number of side taps the centre stays alone and taps
/// (1,2), (3,4), ... are paired. With an odd number the centre is halved,
/// paired with tap 1 on each side, and taps (2,3), (4,5), ... follow.
/// Returns the merged weights and offsets and whether a centre tap remains.
fn merge_for_linear_sampling(weights: &[f64], offsets: &[f64]) -> (Vec<f64>, Vec<f64>, bool) {
    let side_taps = weights.len() - 1;
    let centre_tap = side_taps % 2 == 0;

    let mut merged_weights = Vec::with_capacity(side_taps / 2 + 1);
    let mut merged_offsets = Vec::with_capacity(side_taps / 2 + 1);

    let first_pair = if centre_tap {
        merged_weights.push(weights[0]);
        merged_offsets.push(offsets[0]);
        1
    } else {
        let weight = weights[0] * 0.5 + weights[1];
        merged_weights.push(weight);
        merged_offsets.push((offsets[0] * weights[0] * 0.5 + offsets[1] * weights[1]) / weight);
        2
    };
    for i in (first_pair..weights.len()).step_by(2) {
        let weight = weights[i] + weights[i + 1];
        merged_weights.push(weight);
        merged_offsets.push((offsets[i] * weights[i] + offsets[i + 1] * weights[i + 1]) / weight);
    }

    (merged_weights, merged_offsets, centre_tap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binomial_half_row() {
        // Row 4: 1 4 6 4 1 over 16
        let row = binomial_half_row(4);
        assert_eq!(row.len(), 3);
        assert!((row[0] - 6.0 / 16.0).abs() < 1e-12);
        assert!((row[1] - 4.0 / 16.0).abs() < 1e-12);
        assert!((row[2] - 1.0 / 16.0).abs() < 1e-12);
    }

    #[test]
    fn test_kernel_5_plain() {
        let kernel = GaussianKernel::with_defaults(5, false, false);
        assert_eq!(kernel.tap_count(), 3);
        assert_eq!(kernel.offsets, vec![0.0, 1.0, 2.0]);
        assert!((kernel.sum() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_normalized_for_all_sizes() {
        for size in (1..=MAX_GAUSSIAN_KERNEL).step_by(2) {
            for truncate in [false, true] {
                for linear in [false, true] {
                    let kernel = GaussianKernel::with_defaults(size, truncate, linear);
                    assert!(
                        (kernel.sum() - 1.0).abs() < 1e-5,
                        "size {} truncate {} linear {} sums to {}",
                        size,
                        truncate,
                        linear,
                        kernel.sum()
                    );
                }
            }
        }
    }

    #[test]
    fn test_offsets_monotonic() {
        for size in (3..=MAX_GAUSSIAN_KERNEL).step_by(2) {
            let kernel = GaussianKernel::with_defaults(size, true, true);
            assert_eq!(kernel.offsets[0] == 0.0, kernel.centre_tap);
            assert!(kernel.offsets[0] >= 0.0);
            for pair in kernel.offsets.windows(2) {
                assert!(pair[1] > pair[0]);
            }
        }
    }

    #[test]
    fn test_mirrored_is_symmetric() {
        for size in [13, 15] {
            let kernel = GaussianKernel::with_defaults(size, false, true);
            let (offsets, weights) = kernel.mirrored();
            let n = offsets.len();
            assert_eq!(n, kernel.fetch_count());
            assert_eq!(n % 2 == 1, kernel.centre_tap);
            for i in 0..n {
                assert!((offsets[i] + offsets[n - 1 - i]).abs() < 1e-12);
                assert!((weights[i] - weights[n - 1 - i]).abs() < 1e-12);
            }
            assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_linear_sampling_reduces_fetches() {
        for size in (5..=MAX_GAUSSIAN_KERNEL).step_by(2) {
            let plain = GaussianKernel::with_defaults(size, false, false);
            let linear = GaussianKernel::with_defaults(size, false, true);
            let side_taps = (size as usize - 1) / 2;
            let expected = if side_taps % 2 == 0 { side_taps / 2 + 1 } else { (side_taps + 1) / 2 };
            assert_eq!(plain.tap_count(), side_taps + 1);
            assert_eq!(linear.tap_count(), expected, "size {}", size);
            assert_eq!(linear.centre_tap, side_taps % 2 == 0);
            assert!(linear.tap_count() < plain.tap_count());
        }
    }

    #[test]
    fn test_kernel_15_linear() {
        let plain = GaussianKernel::with_defaults(15, false, false);
        let linear = GaussianKernel::with_defaults(15, false, true);
        assert_eq!(plain.tap_count(), 8);
        assert_eq!(linear.tap_count(), 4);
        assert_eq!(linear.fetch_count(), 8);
        assert!(!linear.centre_tap);

        // Row 14 of Pascal's triangle from the centre out, over 2^14.
        let c = [3432.0, 3003.0, 2002.0, 1001.0, 364.0, 91.0, 14.0, 1.0].map(|v: f64| v / 16384.0);
        let first = c[0] * 0.5 + c[1];
        let expected_weights = [first, c[2] + c[3], c[4] + c[5], c[6] + c[7]];
        let expected_offsets = [c[1] / first, 7.0 / 3.0, 4.2, 91.0 / 15.0];
        for i in 0..4 {
            assert!((linear.weights[i] - expected_weights[i]).abs() < 1e-12);
            assert!((linear.offsets[i] - expected_offsets[i]).abs() < 1e-12);
        }
        assert!((linear.offsets[0] - 7.0 / 11.0).abs() < 1e-12);
        assert!((linear.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_kernel_3_linear_splits_centre() {
        // 1 2 1 becomes two fetches halfway between the centre and each neighbour.
        let kernel = GaussianKernel::with_defaults(3, false, true);
        assert!(!kernel.centre_tap);
        assert_eq!(kernel.weights, vec![0.5]);
        assert_eq!(kernel.offsets, vec![0.5]);
        assert_eq!(kernel.mirrored(), (vec![-0.5, 0.5], vec![0.5, 0.5]));
    }

    #[test]
    fn test_kernel_5_linear_keeps_centre() {
        let kernel = GaussianKernel::with_defaults(5, false, true);
        assert!(kernel.centre_tap);
        assert_eq!(kernel.tap_count(), 2);
        assert!((kernel.weights[0] - 6.0 / 16.0).abs() < 1e-12);
        assert!((kernel.offsets[1] - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_truncation_never_adds_taps() {
        for size in (1..=MAX_GAUSSIAN_KERNEL).step_by(2) {
            let plain = GaussianKernel::with_defaults(size, false, false);
            let truncated = GaussianKernel::with_defaults(size, true, false);
            assert!(truncated.tap_count() <= plain.tap_count());
        }
    }

    #[test]
    fn test_truncated_taps_are_significant() {
        let kernel = GaussianKernel::with_defaults(25, true, false);
        assert!(kernel.pascal_row > 24);
        // Retained taps were all above the threshold before renormalization,
        // and renormalization only scales them up.
        for w in &kernel.weights {
            assert!(*w >= MINIMUM_ACCEPTABLE_COEFFICIENT);
        }
    }

    #[test]
    fn test_duplicated_weights() {
        let kernel = GaussianKernel::with_defaults(5, false, false);
        let doubled = kernel.duplicated_weights();
        assert_eq!(doubled.len(), 10);
        assert_eq!(&doubled[..5], &doubled[5..]);
        assert!((doubled[0] - 1.0 / 16.0).abs() < 1e-6);
        assert!((doubled[2] - 6.0 / 16.0).abs() < 1e-6);
    }

    #[test]
    fn test_even_size_rounds_up() {
        let kernel = GaussianKernel::with_defaults(4, false, false);
        assert_eq!(kernel.kernel_size, 5);
        let kernel = GaussianKernel::with_defaults(99, false, false);
        assert_eq!(kernel.kernel_size, MAX_GAUSSIAN_KERNEL);
        assert_eq!(kernel.tap_count(), MAX_GAUSSIAN_HALF_KERNEL);
    }
}
