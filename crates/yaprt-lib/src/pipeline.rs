//! The commands of the `yaprt` binary, wired from the components of this crate.

use std::path::{Path, PathBuf};

use crate::builder::{BuildSummary, WheelBuilder};
use crate::config::Config;
use crate::git_link::{GitLink, DEFAULT_REF};
use crate::partition::BuildSet;
use crate::process::ProcessRunner;
use crate::reconciler::Reconciler;
use crate::remote::GithubSource;
use crate::report::{Report, RepoEntry};
use crate::store::StoreSummary;
use crate::vcs::Vcs;
use crate::walker::{WalkSummary, Walker};

/// What goes into a report besides the pending entries of an existing one.
#[derive(Debug, Clone, Default)]
pub struct ReportRequest {
	/// Plain requirements named by the user.
	pub packages: Vec<String>,
	/// Git install links walked locally.
	pub git_install_repos: Vec<String>,
	/// GitHub API urls of repository lists or single repositories.
	pub github_repos: Vec<String>,
	pub git_username: Option<String>,
	pub git_password: Option<String>,
	pub discover_releases: bool,
}

/// Which parts of the report get built.
#[derive(Debug, Clone, Default)]
pub struct BuildSelection {
	/// Built as hard requirements together with the reconciled requirements.
	pub packages: Vec<String>,
	pub requirements: bool,
	pub branches: bool,
	pub releases: bool,
}

/// Non-empty lines of a list file, `#` comments skipped.
pub fn read_items(path: &Path) -> crate::Result<Vec<String>> {
	let text = std::fs::read_to_string(path)?;
	Ok(text
		.lines()
		.map(str::trim)
		.filter(|l| !l.is_empty() && !l.starts_with('#'))
		.map(str::to_string)
		.collect())
}

/// Scans everything named in `request` into the report file of `config`.
///
/// An existing report is extended: its pending entries are walked again and its other entries are kept
/// unless a walked ref replaces them. The report is saved even when some refs failed.
///
/// # Errors
/// - [`Parse`](crate::Error::Parse) for a malformed git install link.
/// - [`Validation`](crate::Error::Validation) when the existing report is broken.
/// - whatever the GitHub api fails with.
pub fn create_report(config: &Config, request: &ReportRequest, vcs: &dyn Vcs, runner: &dyn ProcessRunner) -> crate::Result<(Report, WalkSummary)> {
	let mut report = Report::load_or_default(config.report_file())?;
	report.add_user_packages(request.packages.iter().cloned());

	let mut links = report.take_pending_links();
	for repo in request.git_install_repos.iter().filter(|r| !r.trim().is_empty()) {
		links.push(GitLink::parse_with_default_ref(repo.trim(), DEFAULT_REF)?);
	}

	if !request.github_repos.is_empty() {
		let mut source = GithubSource::new(config.retry().clone())?.with_release_discovery(request.discover_releases);
		if let Some(user) = &request.git_username {
			source = source.with_auth(user.clone(), request.git_password.clone());
		}
		links.extend(scan_github(&source, &request.github_repos, &mut report)?);
	}

	let mut options = config.walker_options();
	options.discover_releases = request.discover_releases;
	let mut walker = Walker::with_report(vcs, runner, options, report);
	walker.walk(links);
	let (report, summary) = walker.finish();

	report.save(config.report_file())?;
	log::info!("Resolved {} link(s), {} failed", summary.resolved.len(), summary.failures.len());
	Ok((report, summary))
}

/// Adds every repository behind `urls` to `report`.
///
/// # Returns
/// The git links found in their requirement files, to be walked locally.
pub fn scan_github(source: &GithubSource, urls: &[String], report: &mut Report) -> crate::Result<Vec<GitLink>> {
	let mut links = Vec::new();
	for url in urls.iter().filter(|u| !u.trim().is_empty()) {
		for repo in source.repos(url.trim())? {
			log::info!("Scanning {} over the GitHub api", repo.full_name);
			let scan = source.scan_repo(&repo, None)?;
			links.extend(scan.sub_links);
			report.merge(single_repo(scan.name, scan.entry));
		}
	}
	Ok(links)
}

fn single_repo(name: String, entry: RepoEntry) -> Report {
	let mut report = Report::new();
	report.repos.insert(name, entry);
	report
}

/// Builds the selected parts of the report file of `config`.
///
/// Packages and requirements go first in one build, then branches, then releases.
///
/// # Errors
/// - [`Unsatisfiable`](crate::Error::Unsatisfiable) when the requirements of a package can't be met.
/// - problems with the report or the build environment. Packages failing to build are listed in the summary.
pub fn build_wheels(config: &Config, selection: &BuildSelection, vcs: &dyn Vcs, runner: &dyn ProcessRunner) -> crate::Result<BuildSummary> {
	let report = Report::load_or_default(config.report_file())?;
	let reconciler = Reconciler::new(config.reconciler_options());
	let set = BuildSet::from_report(&report, &reconciler, config.version_sanity())?;
	log::info!(
		"Found {} requirement(s), {} branch(es), {} release(s)",
		set.requirements.len(),
		set.branches.len(),
		set.releases.len()
	);

	let mut options = config.build_options();
	if options.link_dir.is_dir() {
		options.link_dir_as_find_links();
	}

	let mut requirements = selection.packages.clone();
	if selection.requirements {
		requirements.extend(set.requirements.iter().cloned());
	}
	let requirements = reconciler.reconcile(requirements)?;

	let mut summary = BuildSummary::default();
	let batches = [
		("requirements", requirements, true),
		("branches", set.branches, selection.branches),
		("releases", set.releases, selection.releases),
	];
	for (label, packages, selected) in batches {
		if !selected || packages.is_empty() {
			continue;
		}
		log::info!("Building {} {}", packages.len(), label);
		summary.absorb(WheelBuilder::new(vcs, runner, options.clone()).build(packages)?);
	}

	log::info!(
		"Built {} package(s), {} warning(s), {} failure(s)",
		summary.built.len(),
		summary.warnings.len(),
		summary.failures.len()
	);
	Ok(summary)
}

/// Clones or updates every repository of the report file of `config`.
pub fn store_repos(config: &Config, vcs: &dyn Vcs) -> crate::Result<StoreSummary> {
	let report = Report::load(config.report_file())?;
	std::fs::create_dir_all(config.git_repo_path())?;
	Ok(crate::store::store_repos(&report, vcs, config.git_repo_path(), config.retry()))
}

/// Writes `index.html` files below `repo_dir`.
pub fn create_html_indexes(repo_dir: &Path, excludes: &[PathBuf]) -> crate::Result<Vec<PathBuf>> {
	crate::html_index::create_html_indexes(repo_dir, excludes)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pipeline_read_items_skips_blanks_and_comments() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("packages.txt");
		std::fs::write(&path, "six\n\n# pinned elsewhere\n  requests>=2.0  \n").unwrap();
		assert_eq!(read_items(&path).unwrap(), vec!["six", "requests>=2.0"]);
	}
}
