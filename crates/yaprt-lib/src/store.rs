//! Keeps a local clone of every repository named in a report.

use std::path::Path;

use crate::git_link;
use crate::report::Report;
use crate::retry::RetryPolicy;
use crate::vcs::{Vcs, FETCH_HEAD};

#[derive(Debug, Default)]
pub struct StoreSummary {
	pub cloned: Vec<String>,
	pub updated: Vec<String>,
	pub failures: Vec<(String, crate::Error)>,
}

/// Clones or updates every repository of `report` under `git_repo_path`.
///
/// A directory that isn't a checkout is removed and cloned again. Existing checkouts are fetched and
/// moved to the first ref recorded for them. One repository failing doesn't stop the others.
pub fn store_repos(report: &Report, vcs: &dyn Vcs, git_repo_path: &Path, retry: &RetryPolicy) -> StoreSummary {
	let mut summary = StoreSummary::default();

	for (name, url, reference) in report.repositories() {
		/* Plugin packages share the checkout of their repository. */
		let dir_name = git_link::GitLink::parse_with_default_ref(&format!("git+{}", url), git_link::DEFAULT_REF)
			.map(|l| l.name)
			.unwrap_or_else(|_| name.to_string());
		let checkout = git_repo_path.join(&dir_name);

		match store_repo(vcs, url, &checkout, reference, retry) {
			Ok(true) => summary.cloned.push(name.to_string()),
			Ok(false) => summary.updated.push(name.to_string()),
			Err(e) => {
				log::error!("Failed to store {}: {}", name, e);
				summary.failures.push((name.to_string(), e));
			},
		}
	}

	summary
}

/// Returns whether the repository was cloned.
fn store_repo(vcs: &dyn Vcs, url: &str, checkout: &Path, reference: Option<&str>, retry: &RetryPolicy) -> crate::Result<bool> {
	if vcs.is_checkout(checkout) {
		log::info!("Updating {}", checkout.display());
		retry.run_transient(&format!("fetch {}", url), || vcs.fetch(checkout, None))?;
		if let Some(reference) = reference {
			retry.run_transient(&format!("fetch {} {}", url, reference), || vcs.fetch(checkout, Some(reference)))?;
			vcs.checkout(checkout, FETCH_HEAD, None)?;
		}
		return Ok(false);
	}

	if checkout.exists() {
		log::warn!("{} is not a checkout, removing it", checkout.display());
		std::fs::remove_dir_all(checkout)?;
	}
	log::info!("Cloning {} into {}", url, checkout.display());
	retry.run_transient(&format!("clone {}", url), || vcs.clone_repo(url, checkout))?;
	Ok(true)
}
