//! Integration branches for links naming a patch series.
//!
//! `git+<url>@master,refs/changes/01/1001/2,refs/changes/02/1002/1` is checked out as `master`
//! with each following change cherry-picked on top, in order.

use std::path::Path;

use crate::git_link::GitLink;
use crate::retry::RetryPolicy;
use crate::vcs::{Vcs, FETCH_HEAD};

const BRANCH_PREFIX: &str = "yaprt-integration-";

/// The same series always gets the same branch.
pub fn integration_branch_name(refs: &[&str]) -> String {
	let digest = sha256::digest(refs.join(",").as_str());
	format!("{}{}", BRANCH_PREFIX, &digest[..12])
}

/// Builds the integration branch for `link` in `checkout` and leaves it checked out.
///
/// # Returns
/// The refs the branch was assembled from.
///
/// # Errors
/// - [`Transient`](crate::Error::Transient) when fetching a ref keeps failing.
/// - [`VcsConflict`](crate::Error::VcsConflict) when a change doesn't apply. The cherry-pick is aborted and the branch deleted.
pub fn integrate(vcs: &dyn Vcs, checkout: &Path, link: &GitLink, retry: &RetryPolicy) -> crate::Result<Vec<String>> {
	let refs = link.patch_refs();
	let (base, changes) = match refs.split_first() {
		Some((base, changes)) => (*base, changes),
		None => return Err(crate::Error::Parse(format!("git link [ {} ] has an empty patch series", link))),
	};
	let branch = integration_branch_name(&refs);
	log::info!("Assembling {} for {} from {} change(s) on top of {}", branch, link.name, changes.len(), base);

	let conflict = |reference: &str, message: String| crate::Error::VcsConflict {
		repo: link.name.clone(),
		reference: reference.to_string(),
		message,
	};

	retry.run_transient(&format!("fetch {} {}", link.url, base), || vcs.fetch(checkout, Some(base)))?;
	vcs.checkout(checkout, FETCH_HEAD, Some(branch.as_str())).map_err(|e| conflict(base, e.to_string()))?;

	for &change in changes {
		retry.run_transient(&format!("fetch {} {}", link.url, change), || vcs.fetch(checkout, Some(change)))?;
		if let Err(e) = vcs.cherry_pick(checkout, FETCH_HEAD) {
			log::error!("Change {} does not apply to {} of {}", change, base, link.name);
			if let Err(e) = vcs.abort_cherry_pick(checkout) {
				log::warn!("Failed to abort cherry-pick: {}", e);
			}
			if let Err(e) = vcs.delete_branch(checkout, &branch) {
				log::warn!("Failed to delete {}: {}", branch, e);
			}
			return Err(conflict(change, e.to_string()));
		}
	}

	Ok(refs.into_iter().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn integration_branch_is_deterministic() {
		let a = integration_branch_name(&["master", "refs/changes/01/1001/2"]);
		assert_eq!(a, integration_branch_name(&["master", "refs/changes/01/1001/2"]));
		assert_ne!(a, integration_branch_name(&["master", "refs/changes/01/1001/3"]));
		assert!(a.starts_with("yaprt-integration-"));
		assert_eq!(a.len(), "yaprt-integration-".len() + 12);
	}
}
