//! Pure box arithmetic. No I/O, no rounding surprises: every division goes
//! through `u64` or `f64` and every result is bounded by the original.

use imageshop_schema::Dimensions;

fn floor_scale(given: u32, numerator: u32, denominator: u32) -> u32 {
    (u64::from(given) * u64::from(numerator) / u64::from(denominator)) as u32
}

fn round_scale(given: u32, numerator: u32, denominator: u32) -> u32 {
    (f64::from(given) * f64::from(numerator) / f64::from(denominator)).round() as u32
}

/// Fit `requested` inside `original`, preserving the original aspect ratio.
///
/// Each side is first clamped to the original. A zero side is derived from
/// the other with floor semantics. When both sides are given and the original
/// is larger in either direction, the side that would distort the image is
/// recomputed (rounded). A crop never widens past the original.
///
/// Returns `None` for a degenerate result (a zero side after fitting).
pub fn fit_box(original: Dimensions, requested: Dimensions, crop: bool) -> Option<Dimensions> {
    let mut width = requested.width.min(original.width);
    let mut height = requested.height.min(original.height);

    if width == 0 && height == 0 {
        return None;
    }

    if width == 0 {
        if original.height == 0 {
            return None;
        }
        width = floor_scale(height, original.width, original.height);
    } else if height == 0 {
        if original.width == 0 {
            return None;
        }
        height = floor_scale(width, original.height, original.width);
    } else if original.width > width || original.height > height {
        // Compare width/height ratios by cross-multiplying.
        let requested_is_wider = u64::from(width) * u64::from(original.height)
            > u64::from(original.width) * u64::from(height);
        if requested_is_wider {
            width = round_scale(height, original.width, original.height);
        } else {
            height = round_scale(width, original.height, original.width);
        }
    }

    if crop && width > original.width {
        width = original.width;
    }

    (width > 0 && height > 0).then_some(Dimensions::new(width, height))
}

/// Whether a `source` box has the same aspect ratio as a `target` box, give
/// or take one pixel after scaling the larger one down.
pub fn matches_ratio(source: Dimensions, target: Dimensions) -> bool {
    if source.is_unknown() || target.is_unknown() {
        return false;
    }
    let (scaled, expected) = if source.width > target.width {
        (
            round_scale(source.height, target.width, source.width),
            target.height,
        )
    } else {
        (
            round_scale(target.height, source.width, target.width),
            source.height,
        )
    };
    scaled.abs_diff(expected) <= 1
}
