//! Splits a report into what gets built from an index, from a branch and from a release tag.

use std::collections::BTreeSet;

use crate::git_link::{self, GitLink};
use crate::reconciler::{requirement_name, Reconciler};
use crate::report::Report;
use crate::requirement::normalize_name;

/// Three disjoint sorted sets. A package named by a release is never built from a branch
/// and a package with a branch is never built from a plain requirement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSet {
	pub requirements: Vec<String>,
	pub branches: Vec<String>,
	pub releases: Vec<String>,
}

/// The package name an install url provides, from its `egg` fragment or else its url.
pub fn install_url_name(url: &str) -> String {
	match GitLink::parse_with_default_ref(url, git_link::DEFAULT_REF) {
		Ok(link) => normalize_name(link.package_name()),
		Err(_) => {
			let url = url.split(['#', '?']).next().unwrap_or(url);
			let base = git_link::path_basename(url);
			let base = base.split('@').next().unwrap_or(base);
			normalize_name(base.strip_suffix(".git").unwrap_or(base))
		},
	}
}

impl BuildSet {
	/// # Errors
	/// Whatever [`Reconciler::reconcile`] fails with.
	pub fn from_report(report: &Report, reconciler: &Reconciler, remove_overlap: bool) -> crate::Result<Self> {
		let requirements = reconciler.reconcile(report.requirement_strings())?;
		let branches: Vec<String> = report.install_urls().into_iter().collect();
		let releases: Vec<String> = report.release_urls().into_iter().collect();
		Ok(Self::partition(requirements, branches, releases, remove_overlap))
	}

	/// Applies the precedence releases > branches > requirements to already reconciled lists.
	pub fn partition(requirements: Vec<String>, branches: Vec<String>, releases: Vec<String>, remove_overlap: bool) -> Self {
		let release_names: BTreeSet<String> = releases.iter().map(|r| install_url_name(r)).collect();
		let branch_names: BTreeSet<String> = branches.iter().map(|b| install_url_name(b)).collect();

		let keep_requirement = |r: &String| {
			let name = match requirement_name(r) {
				Some(n) => n,
				None => return true,
			};
			let shadowed = branch_names.contains(&name) || release_names.contains(&name);
			if shadowed && !remove_overlap {
				log::warn!("Requirement {} is also built from a git source", r);
			}
			!(shadowed && remove_overlap)
		};
		let keep_branch = |b: &String| {
			let shadowed = release_names.contains(&install_url_name(b));
			if shadowed && !remove_overlap {
				log::warn!("Branch {} is also built from a release", b);
			}
			!(shadowed && remove_overlap)
		};

		let requirements: BTreeSet<String> = requirements.into_iter().filter(keep_requirement).collect();
		let branches: BTreeSet<String> = branches.into_iter().filter(keep_branch).collect();
		let releases: BTreeSet<String> = releases.into_iter().collect();

		BuildSet {
			requirements: requirements.into_iter().collect(),
			branches: branches.into_iter().collect(),
			releases: releases.into_iter().collect(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.requirements.is_empty() && self.branches.is_empty() && self.releases.is_empty()
	}

	pub fn len(&self) -> usize {
		self.requirements.len() + self.branches.len() + self.releases.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn strings(v: &[&str]) -> Vec<String> {
		v.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn partition_release_beats_branch_beats_requirement() {
		let set = BuildSet::partition(
			strings(&["foo>=1.0", "bar", "baz<2"]),
			strings(&["git+https://host/org/foo@master", "git+https://host/org/bar@master"]),
			strings(&["git+https://host/org/bar@1.0"]),
			true,
		);
		assert_eq!(set.requirements, vec!["baz<2"]);
		assert_eq!(set.branches, vec!["git+https://host/org/foo@master"]);
		assert_eq!(set.releases, vec!["git+https://host/org/bar@1.0"]);
	}

	#[test]
	fn partition_overlap_kept_when_removal_disabled() {
		let set = BuildSet::partition(strings(&["foo"]), strings(&["git+https://host/org/foo@master"]), vec![], false);
		assert_eq!(set.len(), 2);
	}

	#[test]
	fn partition_egg_names_the_package() {
		assert_eq!(install_url_name("git+https://host/org/repo@main#egg=My_Plugin&subdirectory=plugins/x"), "my-plugin");
		assert_eq!(install_url_name("git+https://host/org/Python_Thing.git@1.0"), "python-thing");
		assert_eq!(install_url_name("https://host/archive/thing.git"), "thing");
	}

	#[test]
	fn partition_from_report() {
		let report = Report::from_json(r#"{
			"a": {"git_url": "https://h/o/a", "branches": {"master": {"requirements": {"base_requirements": ["six>=1.0", "a"]}, "pip_install_url": "git+https://h/o/a@master"}}},
			"b": {"git_url": "https://h/o/b", "branches": {"master": {"requirements": {"base_requirements": ["six>=1.2"]}}}}
		}"#).unwrap();
		let set = BuildSet::from_report(&report, &Reconciler::default(), true).unwrap();
		assert_eq!(set.requirements, vec!["six>=1.2"]);
		assert_eq!(set.branches, vec!["git+https://h/o/a@master"]);
		assert!(set.releases.is_empty());
	}
}
