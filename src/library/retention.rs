//! Retention policy for tidying a library.

use semver::Version;

/// Outcome of [`plan_retention`]: which installed versions stay and which go.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RetentionPlan {
    /// Versions kept, newest first
    pub keep: Vec<Version>,
    /// Versions to remove, newest first
    pub remove: Vec<Version>,
}

/// Decide which of `installed` to keep.
///
/// Every installed version listed in `protected` (running, pinned, activated)
/// is kept. Of the rest, the newest `versions_to_keep` are kept and everything
/// older is removed. `versions_to_keep` is treated as at least 1, and a
/// non-empty library is never planned down to nothing.
pub fn plan_retention(
    installed: &[Version],
    protected: &[Version],
    versions_to_keep: usize,
) -> RetentionPlan {
    let mut installed = installed.to_vec();
    installed.sort_by(|a, b| b.cmp(a));
    installed.dedup();

    let mut plan = RetentionPlan::default();
    let mut recent_kept = 0;
    for version in installed {
        if protected.contains(&version) {
            plan.keep.push(version);
        } else if recent_kept < versions_to_keep.max(1) {
            recent_kept += 1;
            plan.keep.push(version);
        } else {
            plan.remove.push(version);
        }
    }

    if plan.keep.is_empty() && !plan.remove.is_empty() {
        plan.keep.push(plan.remove.remove(0));
    }
    plan
}
