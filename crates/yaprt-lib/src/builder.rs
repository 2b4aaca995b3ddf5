//! # Wheel building
//!
//! Drives `pip wheel` for requirements and git links and `setup.py bdist_wheel` for packages in a
//! repository subdirectory. Everything built is moved into the storage pool afterwards, see [`pool`].
//!
//! A failing `pip wheel` is retried once without the extra `--find-links` directories, the links
//! often hold a broken build of the same package. A package failing twice is recorded in the
//! [`BuildSummary`] and the remaining packages are still built.

pub mod pool;
pub mod source_build;

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Serialize, Deserialize};

use crate::git_link::GitLink;
use crate::partition::install_url_name;
use crate::process::{ProcessRunner, Shell};
use crate::reconciler::requirement_name;
use crate::retry::RetryPolicy;
use crate::vcs::Vcs;

/// File the packages of a bulk build are written to.
pub const BULK_REQUIREMENTS_FILE: &str = "build_reqs.txt";
const PIP_TIMEOUT: &str = "120";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipOptions {
	pub index: Option<String>,
	pub extra_index: Option<String>,
	pub no_deps: bool,
	pub no_index: bool,
	/// Passed as `--find-links`.
	pub extra_link_dirs: Vec<String>,
	pub verbose: bool,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
	/// Where pip and `bdist_wheel` write wheels to. Emptied into the pool after the build.
	pub build_output: PathBuf,
	/// Parent of scratch directories, the system temp directory when not set.
	pub build_dir: Option<PathBuf>,
	pub storage_pool: PathBuf,
	pub link_dir: PathBuf,
	pub pip: PipOptions,
	/// Build every plain package with a single pip invocation.
	pub bulk: bool,
	/// Remove linked artifacts of the packages about to be built first.
	pub force_clean: bool,
	pub retry: RetryPolicy,
	pub python: String,
	pub pip_command: String,
}

impl BuildOptions {
	pub fn new(build_output: impl Into<PathBuf>, storage_pool: impl Into<PathBuf>, link_dir: impl Into<PathBuf>) -> Self {
		Self {
			build_output: build_output.into(),
			build_dir: None,
			storage_pool: storage_pool.into(),
			link_dir: link_dir.into(),
			pip: PipOptions::default(),
			bulk: false,
			force_clean: false,
			retry: RetryPolicy::default(),
			python: "python".to_string(),
			pip_command: "pip".to_string(),
		}
	}
}

#[derive(Debug)]
pub struct BuildFailure {
	pub package: String,
	pub error: crate::Error,
}

#[derive(Debug, Default)]
pub struct BuildSummary {
	pub built: Vec<String>,
	/// Packages whose first attempt failed.
	pub warnings: Vec<String>,
	pub failures: Vec<BuildFailure>,
	pub pool: pool::PoolSummary,
}

impl BuildSummary {
	pub fn is_success(&self) -> bool {
		self.failures.is_empty()
	}

	/// Adds the results of a later build.
	pub fn absorb(&mut self, other: BuildSummary) {
		self.built.extend(other.built);
		self.warnings.extend(other.warnings);
		self.failures.extend(other.failures);
		self.pool.copied.extend(other.pool.copied);
		self.pool.unchanged.extend(other.pool.unchanged);
		self.pool.linked += other.pool.linked;
	}
}

/// The trusted host argument for an index url.
fn trusted_host(index: &str) -> Option<String> {
	match reqwest::Url::parse(index) {
		Ok(url) => url.host_str().map(str::to_string),
		Err(e) => {
			log::warn!("Can't find the host of index {}: {}", index, e);
			None
		},
	}
}

/// The package name of something passed to the builder, used to match link directory entries.
fn package_name(spec: &str) -> Option<String> {
	if spec.contains("git+") {
		Some(install_url_name(spec))
	} else {
		requirement_name(spec)
	}
}

pub struct WheelBuilder<'a> {
	vcs: &'a dyn Vcs,
	shell: Shell<'a>,
	options: BuildOptions,
	summary: BuildSummary,
}

impl<'a> WheelBuilder<'a> {
	pub fn new(vcs: &'a dyn Vcs, runner: &'a dyn ProcessRunner, options: BuildOptions) -> Self {
		Self {
			vcs,
			shell: Shell::new(runner),
			options,
			summary: BuildSummary::default(),
		}
	}

	pub fn options(&self) -> &BuildOptions {
		&self.options
	}

	/// The `pip wheel` command for `target`, which is either a package or `--requirement <file>`.
	pub fn pip_command(&self, target: &[&str], with_links: bool) -> Vec<String> {
		let pip = &self.options.pip;
		let mut command: Vec<String> = vec![
			self.options.pip_command.clone(),
			"wheel".into(),
			"--timeout".into(),
			PIP_TIMEOUT.into(),
			"--wheel-dir".into(),
			self.options.build_output.to_string_lossy().to_string(),
		];

		if with_links {
			for link in &pip.extra_link_dirs {
				command.extend(["--find-links".to_string(), link.clone()]);
			}
		}

		if pip.no_deps {
			command.push("--no-deps".into());
		} else {
			for (flag, index) in [("--index-url", &pip.index), ("--extra-index-url", &pip.extra_index)] {
				if let Some(index) = index {
					command.extend([flag.to_string(), index.clone()]);
					if let Some(host) = trusted_host(index) {
						command.extend(["--trusted-host".to_string(), host]);
					}
				}
			}
		}

		if pip.no_index {
			command.push("--no-index".into());
		}
		if pip.verbose {
			command.push("--verbose".into());
		}

		command.extend(target.iter().map(|t| t.to_string()));
		command
	}

	/// Runs pip, retrying once without `--find-links`.
	fn pip_build(&mut self, label: &str, target: &[&str]) -> crate::Result<()> {
		let first = self.shell.run(&self.pip_command(target, true));
		let first = match first {
			Ok(_) => return Ok(()),
			Err(e) => e,
		};

		log::warn!("Failed to build {}, trying again without link lookups: {}", label, first.output);
		self.summary.warnings.push(label.to_string());

		self.shell
			.run(&self.pip_command(target, false))
			.map(|_| ())
			.map_err(|e| crate::Error::Build { package: label.to_string(), output: e.output })
	}

	fn scratch_dir(&self) -> crate::Result<tempfile::TempDir> {
		let mut builder = tempfile::Builder::new();
		builder.prefix("yaprt-build-");
		Ok(match &self.options.build_dir {
			Some(dir) => {
				std::fs::create_dir_all(dir)?;
				builder.tempdir_in(dir)?
			},
			None => builder.tempdir()?,
		})
	}

	fn record(&mut self, package: &str, result: crate::Result<()>) {
		match result {
			Ok(()) => {
				log::info!("Built {}", package);
				self.summary.built.push(package.to_string());
			},
			Err(error) => {
				log::error!("{}", error);
				self.summary.failures.push(BuildFailure { package: package.to_string(), error });
			},
		}
	}

	fn source_build(&mut self, link: &GitLink) -> crate::Result<()> {
		let scratch = self.scratch_dir()?;
		let result = source_build::build(
			self.vcs,
			&self.shell,
			link,
			scratch.path(),
			&self.options.build_output,
			&self.options.python,
			&self.options.retry,
		);
		let path = scratch.path().to_path_buf();
		if let Err(e) = scratch.close() {
			log::warn!("Failed to remove scratch directory {}: {}", path.display(), e);
		}
		result
	}

	fn bulk_build(&mut self, packages: &[String]) -> crate::Result<()> {
		let scratch = self.scratch_dir()?;
		let file = scratch.path().join(BULK_REQUIREMENTS_FILE);
		std::fs::write(&file, packages.join("\n") + "\n")?;
		let file = file.to_string_lossy().to_string();
		log::info!("Building {} packages in bulk", packages.len());
		let result = self.pip_build(BULK_REQUIREMENTS_FILE, &["--requirement", file.as_str()]);
		if let Err(e) = scratch.close() {
			log::warn!("Failed to remove scratch directory: {}", e);
		}
		result
	}

	/// Builds every package of `packages` and pools the results.
	///
	/// Entries are requirements (`six>=1.9`) or git links. Links with a `subdirectory` are built from source.
	///
	/// # Errors
	/// Only for problems with the build environment itself, failed packages end up in [`BuildSummary::failures`].
	pub fn build<I, S>(mut self, packages: I) -> crate::Result<BuildSummary>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let packages: BTreeSet<String> = packages.into_iter().map(Into::into).collect();

		if self.options.force_clean {
			let names: BTreeSet<String> = packages.iter().filter_map(|p| package_name(p)).collect();
			let removed = pool::clean_links(&self.options.link_dir, &names)?;
			log::info!("Cleaned {} link(s) ahead of the build", removed);
		}

		std::fs::create_dir_all(&self.options.build_output)?;

		let mut plain = Vec::new();
		for package in packages {
			let link = if package.starts_with("git+") { GitLink::parse(&package).ok() } else { None };
			match link {
				Some(link) if link.subdirectory.is_some() => {
					log::info!("Building {} from source", link);
					let result = self.source_build(&link);
					self.record(&package, result);
				},
				_ => plain.push(package),
			}
		}

		if self.options.bulk && !plain.is_empty() {
			let result = self.bulk_build(&plain);
			match result {
				Ok(()) => {
					for package in &plain {
						self.summary.built.push(package.clone());
					}
				},
				Err(error) => self.summary.failures.push(BuildFailure { package: BULK_REQUIREMENTS_FILE.to_string(), error }),
			}
		} else {
			for package in plain {
				log::info!("Building {}", package);
				let result = self.pip_build(&package, &[package.as_str()]);
				self.record(&package, result);
			}
		}

		self.summary.pool = pool::store(&self.options.build_output, &self.options.storage_pool, &self.options.link_dir)?;
		Ok(self.summary)
	}
}

impl BuildOptions {
	/// Expands the link directory into `--find-links` so earlier builds are reused.
	pub fn link_dir_as_find_links(&mut self) {
		let link_dir = self.link_dir.to_string_lossy().to_string();
		if !self.pip.extra_link_dirs.contains(&link_dir) {
			self.pip.extra_link_dirs.insert(0, link_dir);
		}
	}
}
