//! Object-storage key naming for persisted inputs and results.

use crate::types::Timestamp;

/// Top-level prefix for every object this service writes.
pub const STORAGE_ROOT: &str = "generated";

/// Sub-folder for uploaded inputs kept for the audit trail.
pub const CATEGORY_INPUTS: &str = "inputs";

/// Sub-folder for generated results.
pub const CATEGORY_RESULTS: &str = "results";

/// Build a file name like `result_image_dev_20250101_120000_123_{run_id}.png`.
///
/// The timestamp keeps names sortable. `run_id` must be unique per run:
/// runs for the same user can persist within the same millisecond. `index`
/// disambiguates several images produced by one run.
pub fn unique_image_name(
    user_id: &str,
    operation: &str,
    now: Timestamp,
    run_id: &str,
    index: usize,
) -> String {
    let stamp = now.format("%Y%m%d_%H%M%S_%3f");
    if index == 0 {
        format!("{operation}_image_{user_id}_{stamp}_{run_id}.png")
    } else {
        format!("{operation}_image_{user_id}_{stamp}_{run_id}_{index}.png")
    }
}

/// Full object key: `generated/{user_id}/{category}/{file_name}`.
pub fn object_key(user_id: &str, category: &str, file_name: &str) -> String {
    format!("{STORAGE_ROOT}/{user_id}/{category}/{file_name}")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn fixed_time() -> Timestamp {
        chrono::Utc
            .with_ymd_and_hms(2025, 3, 4, 5, 6, 7)
            .unwrap()
            + chrono::Duration::milliseconds(89)
    }

    #[test]
    fn unique_name_has_millisecond_stamp_and_run_id() {
        let name = unique_image_name("dev", "result", fixed_time(), "r1", 0);
        assert_eq!(name, "result_image_dev_20250304_050607_089_r1.png");
    }

    #[test]
    fn later_images_get_an_index_suffix() {
        let name = unique_image_name("dev", "result", fixed_time(), "r1", 2);
        assert_eq!(name, "result_image_dev_20250304_050607_089_r1_2.png");
    }

    #[test]
    fn same_millisecond_runs_get_distinct_names() {
        let a = unique_image_name("dev", "result", fixed_time(), "run-a", 0);
        let b = unique_image_name("dev", "result", fixed_time(), "run-b", 0);
        assert_ne!(a, b);
    }

    #[test]
    fn object_key_layout() {
        assert_eq!(
            object_key("u1", CATEGORY_RESULTS, "x.png"),
            "generated/u1/results/x.png"
        );
    }
}
