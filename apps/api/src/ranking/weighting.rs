//! Weighting & colorization: pure functions, no I/O.
//!
//! weight(rank)  = max(1, round(100 · 0.6^(rank−1)))
//! green_cutoff  = max(3, round(0.3·N))           clamped to N
//! yellow_cutoff = max(green_cutoff+3, round(0.7·N)) clamped to N
//! weighted_score = round(weight · multiplier(color))

use crate::models::attribute::{AttributeColor, FinalAttribute};

const DECAY: f64 = 0.6;
const TOP_WEIGHT: f64 = 100.0;

/// Pareto weight for a 1-based rank. Rank 0 is treated as rank 1.
pub fn weight(rank: u32) -> u32 {
    let exponent = rank.max(1) - 1;
    let w = (TOP_WEIGHT * DECAY.powi(exponent as i32)).round();
    (w as u32).max(1)
}

/// Position cutoffs for a set of `n` attributes: `(green_cutoff, yellow_cutoff)`.
pub fn color_cutoffs(n: usize) -> (usize, usize) {
    let green = 3usize.max((0.3 * n as f64).round() as usize);
    let yellow = (green + 3).max((0.7 * n as f64).round() as usize);
    (green.min(n), yellow.min(n))
}

/// Color for a 0-based position within a set of size `n`.
pub fn color_for_position(position: usize, n: usize) -> AttributeColor {
    let (green, yellow) = color_cutoffs(n);
    if position < green {
        AttributeColor::Green
    } else if position < yellow {
        AttributeColor::Yellow
    } else {
        AttributeColor::Grey
    }
}

pub fn weighted_score(weight: u32, color: AttributeColor) -> u32 {
    (weight as f64 * color.multiplier()).round() as u32
}

/// Sets color, multiplier and weighted score together so they never drift apart.
pub fn apply_color(attr: &mut FinalAttribute, color: AttributeColor) {
    attr.color = color;
    attr.multiplier = color.multiplier();
    attr.weighted_score = weighted_score(attr.weight, color);
}

/// Assigns weights from `final_rank` and percentile colors from position.
/// Expects `attrs` sorted by `final_rank`.
pub fn weigh_and_colorize(attrs: &mut [FinalAttribute]) {
    let n = attrs.len();
    for (position, attr) in attrs.iter_mut().enumerate() {
        attr.weight = weight(attr.final_rank);
        apply_color(attr, color_for_position(position, n));
    }
}

/// Assigns weights from `final_rank` and colors every attribute grey.
pub fn weigh_all_grey(attrs: &mut [FinalAttribute]) {
    for attr in attrs.iter_mut() {
        attr.weight = weight(attr.final_rank);
        apply_color(attr, AttributeColor::Grey);
    }
}
