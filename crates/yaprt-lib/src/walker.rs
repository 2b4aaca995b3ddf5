//! # Walker
//!
//! Walks git repositories and records what each of their refs requires.
//!
//! Every link is checked out under the git repo path, its requirement files and `setup.py` metadata
//! are scanned and any link found while scanning is queued and walked too. A link is walked once
//! per (url, ref, subdirectory) so cycles between repositories terminate.
//!
//! A ref that can't be checked out is recorded as skipped and listed in the [`WalkSummary`], the
//! walk carries on with the remaining links.

pub mod patch;

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use crate::git_link::GitLink;
use crate::process::{ProcessRunner, Shell};
use crate::report::{BranchEntry, Report, ResolvedBranch, BASE_SECTION};
use crate::retry::RetryPolicy;
use crate::scanner::{self, ScanContext, ScannedRequirements};
use crate::vcs::{Vcs, FETCH_HEAD};

/// Requirement files looked for in a checkout, with the section their contents go to.
pub const REQUIREMENT_FILES: [(&str, &str); 7] = [
	(BASE_SECTION, "requirements.txt"),
	(BASE_SECTION, "global-requirements.txt"),
	(BASE_SECTION, "global_requirements.txt"),
	("test_requirements", "test-requirements.txt"),
	("test_requirements", "test_requirements.txt"),
	("dev_requirements", "dev-requirements.txt"),
	("dev_requirements", "dev_requirements.txt"),
];

#[derive(Debug, Clone)]
pub struct WalkerOptions {
	/// Where checkouts are kept, one directory per repository.
	pub git_repo_path: PathBuf,
	/// Record every tag with a `setup.py` as a release.
	pub discover_releases: bool,
	pub retry: RetryPolicy,
	pub python: String,
}

impl WalkerOptions {
	pub fn new(git_repo_path: impl Into<PathBuf>) -> Self {
		Self {
			git_repo_path: git_repo_path.into(),
			discover_releases: false,
			retry: RetryPolicy::default(),
			python: "python".to_string(),
		}
	}
}

#[derive(Debug)]
pub struct WalkFailure {
	pub link: String,
	pub error: crate::Error,
}

#[derive(Debug, Default)]
pub struct WalkSummary {
	/// Original text of every resolved link.
	pub resolved: Vec<String>,
	pub failures: Vec<WalkFailure>,
}

impl WalkSummary {
	pub fn is_success(&self) -> bool {
		self.failures.is_empty()
	}
}

type VisitKey = (String, String, Option<String>);

pub struct Walker<'a> {
	vcs: &'a dyn Vcs,
	shell: Shell<'a>,
	options: WalkerOptions,
	visited: HashSet<VisitKey>,
	releases_checked: HashSet<String>,
	queue: VecDeque<GitLink>,
	report: Report,
	summary: WalkSummary,
}

impl<'a> Walker<'a> {
	pub fn new(vcs: &'a dyn Vcs, runner: &'a dyn ProcessRunner, options: WalkerOptions) -> Self {
		Self::with_report(vcs, runner, options, Report::default())
	}

	/// Walks into an existing report, entries of walked refs are replaced.
	pub fn with_report(vcs: &'a dyn Vcs, runner: &'a dyn ProcessRunner, options: WalkerOptions, report: Report) -> Self {
		Self {
			vcs,
			shell: Shell::new(runner),
			options,
			visited: HashSet::new(),
			releases_checked: HashSet::new(),
			queue: VecDeque::new(),
			report,
			summary: WalkSummary::default(),
		}
	}

	pub fn report(&self) -> &Report {
		&self.report
	}

	/// Walks `links` and everything they lead to.
	pub fn walk<I>(&mut self, links: I)
	where I: IntoIterator<Item = GitLink>
	{
		self.queue.extend(links);
		while let Some(link) = self.queue.pop_front() {
			let key = (link.url.clone(), link.reference.clone(), link.subdirectory.clone());
			if !self.visited.insert(key) {
				log::trace!("Already walked {}", link);
				continue;
			}

			log::info!("Walking {}", link);
			match self.walk_link(&link) {
				Ok(sub_links) => {
					self.summary.resolved.push(link.original.clone());
					self.queue.extend(sub_links);
				},
				Err(error) => {
					log::error!("Skipping {}: {}", link, error);
					self.report.insert_branch(
						&link.report_name(),
						Some(&link.url),
						&link.reference,
						BranchEntry::Skipped { skipped: error.to_string() },
					);
					self.summary.failures.push(WalkFailure { link: link.original.clone(), error });
				},
			}
		}
	}

	pub fn finish(self) -> (Report, WalkSummary) {
		(self.report, self.summary)
	}

	/// Where a repository is checked out. Plugin packages share their repository's checkout.
	pub fn checkout_path(&self, link: &GitLink) -> PathBuf {
		self.options.git_repo_path.join(&link.name)
	}

	fn walk_link(&mut self, link: &GitLink) -> crate::Result<Vec<GitLink>> {
		let checkout = self.checkout_path(link);
		self.prepare_checkout(link, &checkout)?;

		let patched_from = if link.is_patch_series() {
			Some(patch::integrate(self.vcs, &checkout, link, &self.options.retry)?)
		} else {
			self.checkout_ref(link, &checkout)?;
			None
		};

		let package_dir = match &link.subdirectory {
			Some(s) => checkout.join(s),
			None => checkout.clone(),
		};

		let mut scanned = ScannedRequirements::default();
		if link.ignores_requirements() {
			log::info!("Requirement discovery disabled for {}", link);
		} else {
			scanned.merge(scan_requirement_files(&package_dir, link));
		}

		let has_setup = package_dir.join("setup.py").is_file();
		if has_setup && !link.ignores_requirements() {
			scanned.merge(self.egg_info(&package_dir, link));
		}

		let sub_links = std::mem::take(&mut scanned.sub_links);
		let entry = ResolvedBranch {
			requirements: scanned.sections.into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect(),
			pip_install_url: has_setup.then(|| link.original.clone()),
			original_data: Some(link.original.clone()),
			patched_from,
		};
		self.report.insert_branch(&link.report_name(), Some(&link.url), &link.reference, BranchEntry::Resolved(entry));

		if self.options.discover_releases && link.subdirectory.is_none() {
			self.discover_releases(link, &checkout);
		}

		Ok(sub_links)
	}

	/// Clones the repository if needed, otherwise fetches everything.
	fn prepare_checkout(&self, link: &GitLink, checkout: &Path) -> crate::Result<()> {
		let retry = &self.options.retry;
		if self.vcs.is_checkout(checkout) {
			return retry.run_transient(&format!("fetch {}", link.url), || self.vcs.fetch(checkout, None));
		}

		if checkout.exists() {
			log::warn!("{} is not a checkout, removing it", checkout.display());
			std::fs::remove_dir_all(checkout)?;
		}
		retry.run_transient(&format!("clone {}", link.url), || {
			let result = self.vcs.clone_repo(&link.url, checkout);
			if result.is_err() && checkout.exists() {
				if let Err(e) = std::fs::remove_dir_all(checkout) {
					log::warn!("Failed to clean up partial clone at {}: {}", checkout.display(), e);
				}
			}
			result
		})
	}

	fn checkout_ref(&self, link: &GitLink, checkout: &Path) -> crate::Result<()> {
		let conflict = |e: crate::vcs::VcsError| crate::Error::VcsConflict {
			repo: link.name.clone(),
			reference: link.reference.clone(),
			message: e.to_string(),
		};

		let fetched = self.options.retry.run(&format!("fetch {} {}", link.url, link.reference), || {
			self.vcs.fetch(checkout, Some(link.reference.as_str()))
		});
		match fetched {
			Ok(()) => self.vcs.checkout(checkout, FETCH_HEAD, None).map_err(conflict),
			Err((_, e)) => {
				/* Commits that aren't advertised can't be fetched by name but are already present after the full fetch. */
				log::debug!("Could not fetch {} by name, checking it out directly: {}", link.reference, e);
				self.vcs.checkout(checkout, &link.reference, None).map_err(conflict)
			},
		}
	}

	/// Scans the metadata `setup.py egg_info` writes. A failing `setup.py` is logged and ignored.
	fn egg_info(&self, package_dir: &Path, link: &GitLink) -> ScannedRequirements {
		let mut scanned = ScannedRequirements::default();

		let scratch = match tempfile::Builder::new().prefix("yaprt-egg-").tempdir() {
			Ok(d) => d,
			Err(e) => {
				log::warn!("Could not create scratch directory for {}: {}", link, e);
				return scanned;
			},
		};
		let egg_base = scratch.path().to_string_lossy().to_string();

		{
			let _dir = self.shell.enter(package_dir);
			if let Err(e) = self.shell.run(&[self.options.python.as_str(), "setup.py", "egg_info", "--egg-base", egg_base.as_str()]) {
				log::warn!("Could not read egg info of {}: {}", link, e);
				return scanned;
			}
		}

		let entries = match std::fs::read_dir(scratch.path()) {
			Ok(e) => e,
			Err(e) => {
				log::warn!("Could not read egg info of {}: {}", link, e);
				return scanned;
			},
		};
		let context = ScanContext { default_section: BASE_SECTION, parent: Some(link) };
		for egg in entries.flatten().map(|e| e.path()).filter(|p| p.is_dir() && p.extension().map(|e| e == "egg-info").unwrap_or(false)) {
			for file in ["requires.txt", "dependency_links.txt"] {
				if let Ok(text) = std::fs::read_to_string(egg.join(file)) {
					log::debug!("Scanning {}", egg.join(file).display());
					scanned.merge(scanner::scan(&text, context));
				}
			}
		}
		scanned
	}

	fn discover_releases(&mut self, link: &GitLink, checkout: &Path) {
		if !self.releases_checked.insert(link.url.clone()) {
			return;
		}
		let tags = match self.vcs.list_tags(checkout) {
			Ok(t) => t,
			Err(e) => {
				log::warn!("Could not list tags of {}: {}", link.name, e);
				return;
			},
		};
		for tag in tags {
			if self.vcs.file_exists_at(checkout, &tag, "setup.py") {
				log::debug!("Discovered release {} for repo {}", tag, link.name);
				self.report.add_release(&link.report_name(), Some(&link.url), format!("git+{}@{}", link.url, tag));
			}
		}
	}
}

/// Scans every known requirement file in `dir` along with the files they include.
///
/// Includes reaching outside of `dir` are ignored.
pub fn scan_requirement_files(dir: &Path, link: &GitLink) -> ScannedRequirements {
	let mut scanned = ScannedRequirements::default();
	let mut seen = HashSet::<PathBuf>::new();

	for (section, file) in REQUIREMENT_FILES {
		let mut pending = vec![dir.join(file)];
		while let Some(path) = pending.pop() {
			if !seen.insert(path.clone()) {
				continue;
			}
			let text = match std::fs::read_to_string(&path) {
				Ok(t) => t,
				Err(_) => continue,
			};
			log::debug!("Scanning {}", path.display());
			let mut found = scanner::scan(&text, ScanContext { default_section: section, parent: Some(link) });
			for include in std::mem::take(&mut found.includes) {
				let include_path = Path::new(&include);
				if include_path.is_absolute() || include_path.components().any(|c| c == std::path::Component::ParentDir) {
					log::warn!("Ignoring include {} outside of {}", include, dir.display());
					continue;
				}
				pending.push(path.parent().unwrap_or(dir).join(include_path));
			}
			scanned.merge(found);
		}
	}
	scanned
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn walker_scans_requirement_files_and_includes() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("requirements.txt"), "six>=1.9\n-r extra.txt\n").unwrap();
		std::fs::write(dir.path().join("extra.txt"), "pbr\n").unwrap();
		std::fs::write(dir.path().join("test-requirements.txt"), "mock\n-r test-requirements.txt\n").unwrap();

		let link = GitLink::parse("git+https://host/org/app@master").unwrap();
		let scanned = scan_requirement_files(dir.path(), &link);

		let base: Vec<_> = scanned.sections[BASE_SECTION].iter().map(String::as_str).collect();
		assert_eq!(base, vec!["pbr", "six>=1.9"]);
		assert!(scanned.sections["test_requirements"].contains("mock"));
	}

	#[test]
	fn walker_ignores_includes_outside_checkout() {
		let root = tempfile::tempdir().unwrap();
		let repo = root.path().join("repo");
		std::fs::create_dir_all(&repo).unwrap();
		std::fs::write(root.path().join("secret.txt"), "evil\n").unwrap();
		std::fs::write(repo.join("requirements.txt"), "-r ../secret.txt\n").unwrap();

		let link = GitLink::parse("git+https://host/org/repo@master").unwrap();
		assert!(scan_requirement_files(&repo, &link).is_empty());
	}
}
