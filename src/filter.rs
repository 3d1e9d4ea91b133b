//! Per-repository eligibility checks.
//!
//! Every check is an independent exclusion; their order only decides which
//! reason gets reported when several apply.

use std::fmt;

use crate::config::BackupPolicy;
use crate::discovery::RepositoryRef;

/// Why a repository was left out of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    Archived,
    Fork,
    OtherOwner,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Archived => "archived",
            SkipReason::Fork => "fork",
            SkipReason::OtherOwner => "owned by another user",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First exclusion that applies to `repo`, or `None` if it should be backed up
pub fn skip_reason(
    repo: &RepositoryRef,
    policy: &BackupPolicy,
    username: &str,
) -> Option<SkipReason> {
    if repo.is_archived && !policy.include_archived_repos {
        return Some(SkipReason::Archived);
    }
    if repo.is_fork && !policy.include_forked_repos {
        return Some(SkipReason::Fork);
    }
    if !policy.include_other_users_repos && !repo.owner.eq_ignore_ascii_case(username) {
        return Some(SkipReason::OtherOwner);
    }
    None
}

/// Whether `repo` is eligible for backup under `policy`
pub fn should_backup(repo: &RepositoryRef, policy: &BackupPolicy, username: &str) -> bool {
    skip_reason(repo, policy, username).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn repo(owner: &str, is_fork: bool, is_archived: bool) -> RepositoryRef {
        RepositoryRef {
            owner: owner.to_string(),
            name: "project".to_string(),
            clone_url: format!("https://github.com/{}/project.git", owner),
            archive_url: format!("https://api.github.com/repos/{}/project/tarball", owner),
            is_fork,
            is_archived,
            default_branch: None,
        }
    }

    fn policy(other_users: bool, forks: bool, archived: bool) -> BackupPolicy {
        BackupPolicy {
            include_other_users_repos: other_users,
            include_forked_repos: forks,
            include_archived_repos: archived,
            ..BackupPolicy::default()
        }
    }

    #[test]
    fn test_plain_owned_repository_is_eligible() {
        let r = repo("octocat", false, false);
        assert!(should_backup(&r, &policy(false, false, false), "octocat"));
    }

    #[test]
    fn test_fork_excluded_by_default() {
        let r = repo("octocat", true, false);
        assert_eq!(
            skip_reason(&r, &policy(false, false, false), "octocat"),
            Some(SkipReason::Fork)
        );
        assert!(should_backup(&r, &policy(false, true, false), "octocat"));
    }

    #[test]
    fn test_archived_excluded_by_default() {
        let r = repo("octocat", false, true);
        assert_eq!(
            skip_reason(&r, &policy(false, false, false), "octocat"),
            Some(SkipReason::Archived)
        );
        assert!(should_backup(&r, &policy(false, false, true), "octocat"));
    }

    #[test]
    fn test_owner_match_is_case_insensitive() {
        let r = repo("OctoCat", false, false);
        assert!(should_backup(&r, &policy(false, false, false), "octocat"));
    }

    #[test]
    fn test_other_owner_excluded_unless_enabled() {
        let r = repo("hubot", false, false);
        assert_eq!(
            skip_reason(&r, &policy(false, false, false), "octocat"),
            Some(SkipReason::OtherOwner)
        );
        assert!(should_backup(&r, &policy(true, false, false), "octocat"));
    }

    #[test]
    fn test_archived_reason_reported_first() {
        let r = repo("hubot", true, true);
        assert_eq!(
            skip_reason(&r, &policy(false, false, false), "octocat"),
            Some(SkipReason::Archived)
        );
    }

    /// The decision is the conjunction of three independent exclusions, each
    /// lifted only by its own flag.
    #[quickcheck]
    fn prop_flags_toggle_only_their_exclusion(
        is_fork: bool,
        is_archived: bool,
        same_owner: bool,
        other_users: bool,
        forks: bool,
        archived: bool,
    ) -> bool {
        let owner = if same_owner { "octocat" } else { "hubot" };
        let r = repo(owner, is_fork, is_archived);
        let p = policy(other_users, forks, archived);

        let expected =
            (!is_archived || archived) && (!is_fork || forks) && (same_owner || other_users);

        should_backup(&r, &p, "octocat") == expected
    }

    #[quickcheck]
    fn prop_decision_is_deterministic(is_fork: bool, is_archived: bool, owner: String) -> bool {
        let r = repo(&owner, is_fork, is_archived);
        let p = policy(false, false, false);
        should_backup(&r, &p, "octocat") == should_backup(&r, &p, "octocat")
    }
}
