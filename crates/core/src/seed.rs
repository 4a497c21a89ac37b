//! Seed selection for generation workflows.

use rand::Rng;

/// Seed baked into the image-to-image workflow when none is supplied.
pub const DEFAULT_IMAGE_TO_IMAGE_SEED: i64 = 1_716_280_943;

/// Seed baked into the masked-edit workflow when none is supplied.
pub const DEFAULT_MASKED_EDIT_SEED: i64 = 1_371_116_998;

/// Upper bound (inclusive) for randomly drawn seeds.
pub const MAX_RANDOM_SEED: i64 = i32::MAX as i64;

/// Draw a fresh seed in `1..=MAX_RANDOM_SEED`.
pub fn random_seed() -> i64 {
    rand::rng().random_range(1..=MAX_RANDOM_SEED)
}

/// Use the caller's seed, or draw a random one.
pub fn resolve_seed(requested: Option<i64>) -> i64 {
    requested.unwrap_or_else(random_seed)
}

/// Seed for item `index` of a batch sharing `base`.
pub fn batch_item_seed(base: i64, index: usize) -> i64 {
    base.saturating_add(index as i64)
}
