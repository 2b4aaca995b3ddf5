use std::path::PathBuf;
use std::process::ExitCode;

use yaprt::pipeline::{self, BuildSelection, ReportRequest};
use yaprt::process::SystemRunner;
use yaprt::vcs::GitCli;

const COMMANDS: &str = "Commands:
    create-report        Scan packages and git repositories into the report file
    build-wheels         Build wheels for the report file into the storage pool
    store-repos          Clone or update every repository of the report file
    create-html-indexes  Write index.html files for a link directory";

fn options() -> getopts::Options {
	let mut opts = getopts::Options::new();
	opts.parsing_style(getopts::ParsingStyle::FloatingFrees);

	opts.optflag("h", "help", "Show help");
	opts.optflag("", "debug", "Enable debug output");
	opts.optflag("", "quiet", "Only show errors");
	opts.optopt("", "report-file", "Report json file", "FILE");
	opts.optopt("", "git-repo-path", "Where git repositories are checked out", "DIR");

	/* create-report */
	opts.optmulti("", "packages", "Packages to add to the report", "PACKAGES");
	opts.optopt("", "packages-file", "File with one package per line", "FILE");
	opts.optmulti("", "git-install-repos", "Git install links to walk", "LINKS");
	opts.optopt("", "git-install-repos-file", "File with one git install link per line", "FILE");
	opts.optmulti("", "github-repos", "GitHub api urls of repository lists or repositories", "URLS");
	opts.optopt("", "git-username", "GitHub user name", "USER");
	opts.optopt("", "git-password", "GitHub password or token", "PASSWORD");
	opts.optflag("", "discover-releases", "Record every tag with a setup.py as a release");

	/* build-wheels */
	opts.optopt("", "build-output", "Where wheels are built to", "DIR");
	opts.optopt("", "build-dir", "Parent of scratch directories", "DIR");
	opts.optopt("", "storage-pool", "Where built wheels are stored", "DIR");
	opts.optopt("", "link-dir", "Where links to the stored wheels are kept", "DIR");
	opts.optmulti("", "build-packages", "Packages to build as hard requirements", "PACKAGES");
	opts.optflag("", "build-requirements", "Build the reconciled requirements of the report");
	opts.optflag("", "build-branches", "Build the branches of the report");
	opts.optflag("", "build-releases", "Build the releases of the report");
	opts.optopt("", "pip-index", "Index url", "URL");
	opts.optopt("", "pip-extra-index", "Extra index url", "URL");
	opts.optflag("", "pip-no-deps", "Don't build dependencies");
	opts.optflag("", "pip-no-index", "Don't use an index");
	opts.optmulti("", "pip-extra-link-dirs", "Extra --find-links locations", "DIRS");
	opts.optflag("", "pip-bulk-operation", "Build all requirements with one pip invocation");
	opts.optopt("", "duplicate-handling", "Which of duplicate constraints to keep", "max|min");
	opts.optflag("", "disable-version-sanity", "Don't reconcile or deduplicate requirements");
	opts.optflag("", "force-clean", "Remove links of packages before building them");

	/* create-html-indexes */
	opts.optopt("", "repo-dir", "Directory to index", "DIR");
	opts.optmulti("", "dir-exclude", "Directories not to index", "DIRS");

	opts
}

/// Values of a list flag, split on commas and whitespace.
fn list(matches: &getopts::Matches, name: &str) -> Vec<String> {
	split_list(&matches.opt_strs(name))
}

/// Requirements split on whitespace and on commas which start a new requirement.
///
/// `six,pbr>=1.0,<2.0` is `six` and `pbr>=1.0,<2.0`.
fn split_packages(values: &[String]) -> Vec<String> {
	let mut packages: Vec<String> = Vec::new();
	for piece in values.iter().flat_map(|v| v.split_whitespace()) {
		for (i, segment) in piece.split(',').enumerate() {
			let constraint = segment.starts_with(['<', '>', '=', '!', '~']);
			if i > 0 && constraint {
				if let Some(last) = packages.last_mut() {
					last.push(',');
					last.push_str(segment);
					continue;
				}
			}
			if !segment.is_empty() {
				packages.push(segment.to_string());
			}
		}
	}
	packages
}

fn list_with_file(matches: &getopts::Matches, name: &str, file_flag: &str, split: fn(&[String]) -> Vec<String>) -> Result<Vec<String>, Error> {
	let mut items = Vec::new();
	if let Some(file) = matches.opt_str(file_flag) {
		items.extend(pipeline::read_items(&PathBuf::from(file))?);
	}
	items.extend(split(&matches.opt_strs(name)));
	Ok(items)
}

fn split_list(values: &[String]) -> Vec<String> {
	values
		.iter()
		.flat_map(|v| v.split(|c: char| c == ',' || c.is_whitespace()))
		.filter(|v| !v.is_empty())
		.map(str::to_string)
		.collect()
}

fn apply_overrides(config: &mut yaprt::Config, matches: &getopts::Matches) -> Result<(), Error> {
	if let Some(v) = matches.opt_str("report-file") {
		config.set_report_file(PathBuf::from(v));
	}
	if let Some(v) = matches.opt_str("git-repo-path") {
		config.set_git_repo_path(PathBuf::from(v));
	}
	if let Some(v) = matches.opt_str("build-output") {
		config.set_build_output(PathBuf::from(v));
	}
	if let Some(v) = matches.opt_str("build-dir") {
		let dir = PathBuf::from(v);
		std::fs::create_dir_all(&dir).map_err(yaprt::Error::from)?;
		if !config.set_build_dir(dir.clone()) {
			return Err(Error::InvalidArgument(format!("--build-dir {} is not a directory", dir.display())));
		}
	}
	if let Some(v) = matches.opt_str("storage-pool") {
		config.set_storage_pool(PathBuf::from(v));
	}
	if let Some(v) = matches.opt_str("link-dir") {
		config.set_link_dir(PathBuf::from(v));
	}
	if let Some(v) = matches.opt_str("duplicate-handling") {
		config.set_duplicate_handling(v.parse()?);
	}
	if matches.opt_present("disable-version-sanity") {
		config.set_version_sanity(false);
	}
	if matches.opt_present("pip-bulk-operation") {
		config.set_bulk(true);
	}
	if matches.opt_present("force-clean") {
		config.set_force_clean(true);
	}

	let pip = config.pip_mut();
	if let Some(v) = matches.opt_str("pip-index") {
		pip.index = Some(v);
	}
	if let Some(v) = matches.opt_str("pip-extra-index") {
		pip.extra_index = Some(v);
	}
	pip.no_deps |= matches.opt_present("pip-no-deps");
	pip.no_index |= matches.opt_present("pip-no-index");
	pip.verbose |= matches.opt_present("debug");
	pip.extra_link_dirs.extend(list(matches, "pip-extra-link-dirs"));
	Ok(())
}

fn create_report(config: &yaprt::Config, matches: &getopts::Matches) -> Result<(), Error> {
	let request = ReportRequest {
		packages: list_with_file(matches, "packages", "packages-file", split_packages)?,
		git_install_repos: list_with_file(matches, "git-install-repos", "git-install-repos-file", split_list)?,
		github_repos: list(matches, "github-repos"),
		git_username: matches.opt_str("git-username"),
		git_password: matches.opt_str("git-password"),
		discover_releases: matches.opt_present("discover-releases"),
	};

	let runner = SystemRunner;
	let vcs = GitCli::new(&runner);
	let (_, summary) = pipeline::create_report(config, &request, &vcs, &runner)?;

	for failure in &summary.failures {
		log::error!("Failed to resolve [ {} ]: {}", failure.link, failure.error);
	}
	if summary.is_success() {
		Ok(())
	} else {
		Err(Error::Incomplete(summary.failures.len()))
	}
}

fn build_wheels(config: &yaprt::Config, matches: &getopts::Matches) -> Result<(), Error> {
	let selection = BuildSelection {
		packages: split_packages(&matches.opt_strs("build-packages")),
		requirements: matches.opt_present("build-requirements"),
		branches: matches.opt_present("build-branches"),
		releases: matches.opt_present("build-releases"),
	};
	if selection.packages.is_empty() && !selection.requirements && !selection.branches && !selection.releases {
		return Err(Error::InvalidArgument(
			"nothing to build, pass --build-packages, --build-requirements, --build-branches or --build-releases".to_string(),
		));
	}

	let runner = SystemRunner;
	let vcs = GitCli::new(&runner);
	let summary = pipeline::build_wheels(config, &selection, &vcs, &runner)?;

	for warning in &summary.warnings {
		log::warn!("[ {} ] only built without link lookups", warning);
	}
	for failure in &summary.failures {
		log::error!("Failed to build [ {} ]: {}", failure.package, failure.error);
	}
	if summary.is_success() {
		Ok(())
	} else {
		Err(Error::Incomplete(summary.failures.len()))
	}
}

fn store_repos(config: &yaprt::Config) -> Result<(), Error> {
	let runner = SystemRunner;
	let vcs = GitCli::new(&runner);
	let summary = pipeline::store_repos(config, &vcs)?;
	log::info!("Cloned {} and updated {} repositories", summary.cloned.len(), summary.updated.len());
	for (repo, error) in &summary.failures {
		log::error!("Failed to store [ {} ]: {}", repo, error);
	}
	if summary.failures.is_empty() {
		Ok(())
	} else {
		Err(Error::Incomplete(summary.failures.len()))
	}
}

fn create_html_indexes(matches: &getopts::Matches) -> Result<(), Error> {
	let repo_dir = matches.opt_str("repo-dir").map(PathBuf::from).ok_or(Error::MissingArgument("--repo-dir"))?;
	let excludes: Vec<PathBuf> = list(matches, "dir-exclude").into_iter().map(PathBuf::from).collect();
	let written = pipeline::create_html_indexes(&repo_dir, &excludes)?;
	log::info!("Wrote {} index files", written.len());
	Ok(())
}

fn main() -> ExitCode {
	let opts = options();

	/* Parse console input */
	let args: Vec<String> = std::env::args().collect();
	let matches = match opts.parse(&args[1..]) {
		Ok(m) => m,
		Err(e) => {
			eprintln!("Unable to parse options: {}", e);
			return ExitCode::FAILURE;
		},
	};

	let brief = format!("Usage: yaprt [options] <command>\n\n{}", COMMANDS);
	if matches.opt_present("h") || matches.free.is_empty() {
		eprintln!("{}", opts.usage(&brief));
		return if matches.opt_present("h") { ExitCode::SUCCESS } else { ExitCode::FAILURE };
	}

	let level = if matches.opt_present("debug") {
		"debug"
	} else if matches.opt_present("quiet") {
		"error"
	} else {
		"info"
	};
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

	let mut config = yaprt::Config::load_from_disk();
	if let Err(e) = apply_overrides(&mut config, &matches) {
		log::error!("{}", e);
		return ExitCode::FAILURE;
	}

	let result = match matches.free[0].as_str() {
		"create-report" => create_report(&config, &matches),
		"build-wheels" => build_wheels(&config, &matches),
		"store-repos" => store_repos(&config),
		"create-html-indexes" => create_html_indexes(&matches),
		other => Err(Error::UnknownCommand(other.to_string())),
	};

	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			log::error!("{}", e);
			ExitCode::FAILURE
		},
	}
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("yaprt error: {0}")]
	Yaprt(#[from] yaprt::Error),
	#[error("Missing argument {0}")]
	MissingArgument(&'static str),
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("Unknown command `{0}`")]
	UnknownCommand(String),
	#[error("{0} item(s) failed")]
	Incomplete(usize),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn packages_keep_constraint_commas() {
		let values = vec!["six,pbr>=1.0,<2.0".to_string(), "requests  mock".to_string()];
		assert_eq!(split_packages(&values), vec!["six", "pbr>=1.0,<2.0", "requests", "mock"]);
	}

	#[test]
	fn list_flags_split_on_commas() {
		let matches = options().parse(["--dir-exclude", "/a,/b", "--dir-exclude", "/c"]).unwrap();
		assert_eq!(list(&matches, "dir-exclude"), vec!["/a", "/b", "/c"]);
	}
}
