//! Cluster resource names for step executions.
//!
//! Names follow `{team}-{scenario}-{step}-{run_number}`. The run number is
//! globally unique, so the composite is unique across the whole namespace.

use std::sync::LazyLock;

use regex::Regex;

static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]").unwrap());
static DASH_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").unwrap());

pub const CONFIG_SUFFIX: &str = "-config";

/// Lowercases, maps every non `[a-z0-9]` char to `-`, collapses dash runs and
/// strips dashes at both ends.
pub fn sanitize_segment(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let dashed = NON_ALNUM.replace_all(&lowered, "-");
    let collapsed = DASH_RUNS.replace_all(&dashed, "-");
    collapsed.trim_matches('-').to_string()
}

pub fn test_run_name(
    team_slug: &str,
    scenario_identifier: &str,
    step_name: &str,
    run_number: i64,
) -> String {
    format!(
        "{}-{}-{}-{}",
        team_slug,
        scenario_identifier,
        sanitize_segment(step_name),
        run_number
    )
}

pub fn config_map_name(test_run_name: &str) -> String {
    format!("{}{}", test_run_name, CONFIG_SUFFIX)
}

/// Slugs land verbatim in resource names, so they must already be cluster safe.
pub fn is_cluster_safe_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
