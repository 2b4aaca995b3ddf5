//! Test doubles for the tools yaprt drives.
//!
//! functions in this module should use results and not use any panics to avoid confusion in callers

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use yaprt::process::{CommandOutput, ProcessRunner};
use yaprt::vcs::{Vcs, VcsError, FETCH_HEAD};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("copy failed: {0}")]
	Copy(#[from] fs_extra::error::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Writes `files` below `root`, creating parent directories.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) -> Result<()> {
	for (name, content) in files {
		let path = root.join(name);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(path, content)?;
	}
	Ok(())
}

/// A temporary directory with `files` written into it.
pub fn temp_tree(files: &[(&str, &str)]) -> Result<tempfile::TempDir> {
	let dir = tempfile::Builder::new().prefix("yaprt-test-").tempdir()?;
	write_tree(dir.path(), files)?;
	Ok(dir)
}

/// Names of the files directly inside `dir`, sorted.
pub fn file_names(dir: &Path) -> Result<Vec<String>> {
	let mut names = Vec::new();
	for entry in std::fs::read_dir(dir)? {
		names.push(entry?.file_name().to_string_lossy().to_string());
	}
	names.sort();
	Ok(names)
}

struct ScriptedFailure {
	needle: String,
	/// Only fail when this argument is present too.
	only_with: Option<String>,
}

type Hook = Box<dyn Fn(&[String], Option<&Path>)>;

/// A [`ProcessRunner`] which records every command and succeeds unless told otherwise.
#[derive(Default)]
pub struct ScriptedRunner {
	commands: RefCell<Vec<(Vec<String>, Option<PathBuf>)>>,
	failures: Vec<ScriptedFailure>,
	hooks: Vec<Hook>,
}

impl ScriptedRunner {
	pub fn new() -> Self {
		Self::default()
	}

	/// Commands with an argument starting with `needle` fail.
	pub fn fail_when(mut self, needle: &str) -> Self {
		self.failures.push(ScriptedFailure { needle: needle.to_string(), only_with: None });
		self
	}

	/// Commands with an argument starting with `needle` fail while `argument` is also passed.
	pub fn fail_when_with(mut self, needle: &str, argument: &str) -> Self {
		self.failures.push(ScriptedFailure { needle: needle.to_string(), only_with: Some(argument.to_string()) });
		self
	}

	/// Runs `hook` for every successful command.
	pub fn on_run(mut self, hook: impl Fn(&[String], Option<&Path>) + 'static) -> Self {
		self.hooks.push(Box::new(hook));
		self
	}

	/// Writes fake wheels for every pip or `bdist_wheel` command, see [`write_fake_wheels`].
	pub fn with_fake_wheels(self) -> Self {
		self.on_run(|command, dir| {
			if let Err(e) = write_fake_wheels(command, dir) {
				eprintln!("failed to write fake wheels: {}", e);
			}
		})
	}

	pub fn commands(&self) -> Vec<Vec<String>> {
		self.commands.borrow().iter().map(|(c, _)| c.clone()).collect()
	}

	/// Every command joined with spaces.
	pub fn command_lines(&self) -> Vec<String> {
		self.commands.borrow().iter().map(|(c, _)| c.join(" ")).collect()
	}

	pub fn working_dirs(&self) -> Vec<Option<PathBuf>> {
		self.commands.borrow().iter().map(|(_, d)| d.clone()).collect()
	}
}

impl ProcessRunner for ScriptedRunner {
	fn run(&self, command: &[String], working_dir: Option<&Path>) -> CommandOutput {
		self.commands.borrow_mut().push((command.to_vec(), working_dir.map(Path::to_path_buf)));

		let fails = self.failures.iter().any(|f| {
			command.iter().any(|a| a.starts_with(&f.needle))
				&& f.only_with.as_ref().map(|w| command.iter().any(|a| a == w)).unwrap_or(true)
		});
		if fails {
			return CommandOutput::failure(format!("scripted failure: {}", command.join(" ")));
		}

		for hook in &self.hooks {
			hook(command, working_dir);
		}
		CommandOutput::success("")
	}
}

fn argument_after<'c>(command: &'c [String], flag: &str) -> Option<&'c str> {
	command.iter().position(|a| a == flag).and_then(|i| command.get(i + 1)).map(String::as_str)
}

/// Name of the distribution a pip target builds.
fn target_name(target: &str) -> String {
	if target.starts_with("git+") {
		if let Ok(link) = yaprt::GitLink::parse_with_default_ref(target, yaprt::git_link::DEFAULT_REF) {
			return link.package_name().to_string();
		}
	}
	target
		.chars()
		.take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_' || *c == '.')
		.collect()
}

/// The wheel file a fake build of `name` produces.
pub fn fake_wheel_name(name: &str) -> String {
	format!("{}-1.0-py2.py3-none-any.whl", name.replace('-', "_"))
}

/// Writes the wheel a `pip wheel` or `setup.py bdist_wheel` command would have produced.
///
/// The package of a bulk build is read from its requirements file, a source build is named after its working directory.
pub fn write_fake_wheels(command: &[String], working_dir: Option<&Path>) -> Result<()> {
	let (output, names) = if let Some(output) = argument_after(command, "--wheel-dir") {
		let names = match argument_after(command, "--requirement") {
			Some(file) => std::fs::read_to_string(file)?.lines().map(target_name).filter(|n| !n.is_empty()).collect(),
			None => command.last().map(|t| vec![target_name(t)]).unwrap_or_default(),
		};
		(output, names)
	} else if let Some(output) = argument_after(command, "--dist-dir") {
		let name = working_dir.and_then(Path::file_name).map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
		(output, vec![name])
	} else {
		return Ok(());
	};

	std::fs::create_dir_all(output)?;
	for name in names {
		std::fs::write(Path::new(output).join(fake_wheel_name(&name)), format!("wheel of {}", name))?;
	}
	Ok(())
}

#[derive(Debug, Default)]
struct Fixture {
	refs: BTreeMap<String, PathBuf>,
	tags: Vec<String>,
	conflicts: BTreeSet<String>,
}

const MARKER_DIR: &str = ".git";
const ORIGIN_FILE: &str = "origin";

/// A [`Vcs`] serving repositories from directories on disk.
///
/// Every ref of a repository is a directory whose contents make up the tree at that ref. A checkout is
/// a copy of one of them plus a `.git` marker directory. Cherry-picking a ref copies its directory over the
/// checkout, unless the ref was declared conflicting.
#[derive(Default)]
pub struct FixtureVcs {
	repos: BTreeMap<String, Fixture>,
	clone_failures: RefCell<BTreeMap<String, u32>>,
	log: RefCell<Vec<String>>,
}

impl FixtureVcs {
	pub fn new() -> Self {
		Self::default()
	}

	/// Serves the contents of `tree` as `reference` of `url`.
	pub fn with_ref(mut self, url: &str, reference: &str, tree: &Path) -> Self {
		self.repos.entry(url.to_string()).or_default().refs.insert(reference.to_string(), tree.to_path_buf());
		self
	}

	/// Serves `tree` as the tag `tag` of `url`.
	pub fn with_tag(self, url: &str, tag: &str, tree: &Path) -> Self {
		let mut vcs = self.with_ref(url, tag, tree);
		vcs.repos.entry(url.to_string()).or_default().tags.push(tag.to_string());
		vcs
	}

	/// Cherry-picking `reference` of `url` fails.
	pub fn with_conflict(mut self, url: &str, reference: &str) -> Self {
		self.repos.entry(url.to_string()).or_default().conflicts.insert(reference.to_string());
		self
	}

	/// The next `times` clones of `url` fail.
	pub fn with_clone_failures(self, url: &str, times: u32) -> Self {
		self.clone_failures.borrow_mut().insert(url.to_string(), times);
		self
	}

	/// Every operation performed, as `<operation> <argument>`.
	pub fn log(&self) -> Vec<String> {
		self.log.borrow().clone()
	}

	fn record(&self, entry: String) {
		self.log.borrow_mut().push(entry);
	}

	fn error(operation: &'static str, path: &Path, output: impl Into<String>) -> VcsError {
		VcsError { operation, path: path.to_path_buf(), output: output.into() }
	}

	fn origin(&self, checkout: &Path) -> Option<&Fixture> {
		let url = std::fs::read_to_string(checkout.join(MARKER_DIR).join(ORIGIN_FILE)).ok()?;
		self.repos.get(url.trim())
	}

	fn resolve(&self, checkout: &Path, reference: &str) -> Option<PathBuf> {
		let reference = if reference == FETCH_HEAD {
			std::fs::read_to_string(checkout.join(MARKER_DIR).join(FETCH_HEAD)).ok()?.trim().to_string()
		} else {
			reference.to_string()
		};
		self.origin(checkout)?.refs.get(&reference).cloned()
	}

	/// Replaces everything but the marker directory with the contents of `tree`.
	fn materialize(checkout: &Path, tree: &Path, clear: bool) -> Result<()> {
		if clear {
			for entry in std::fs::read_dir(checkout)? {
				let entry = entry?;
				if entry.file_name() == MARKER_DIR {
					continue;
				}
				if entry.path().is_dir() {
					std::fs::remove_dir_all(entry.path())?;
				} else {
					std::fs::remove_file(entry.path())?;
				}
			}
		}
		let options = fs_extra::dir::CopyOptions::new().overwrite(true).content_only(true);
		fs_extra::dir::copy(tree, checkout, &options)?;
		Ok(())
	}
}

impl Vcs for FixtureVcs {
	fn clone_repo(&self, url: &str, destination: &Path) -> std::result::Result<(), VcsError> {
		self.record(format!("clone {}", url));
		if let Some(remaining) = self.clone_failures.borrow_mut().get_mut(url).filter(|r| **r > 0) {
			*remaining -= 1;
			return Err(Self::error("clone", destination, "connection reset"));
		}
		let fixture = self.repos.get(url).ok_or_else(|| Self::error("clone", destination, format!("repository {} not found", url)))?;

		let marker = destination.join(MARKER_DIR);
		std::fs::create_dir_all(&marker).map_err(|e| Self::error("clone", destination, e.to_string()))?;
		std::fs::write(marker.join(ORIGIN_FILE), url).map_err(|e| Self::error("clone", destination, e.to_string()))?;
		if let Some(tree) = fixture.refs.get("master") {
			Self::materialize(destination, tree, true).map_err(|e| Self::error("clone", destination, e.to_string()))?;
		}
		Ok(())
	}

	fn fetch(&self, checkout: &Path, reference: Option<&str>) -> std::result::Result<(), VcsError> {
		let fixture = self.origin(checkout).ok_or_else(|| Self::error("fetch", checkout, "not a fixture checkout"))?;
		let reference = match reference {
			Some(r) => r,
			None => return Ok(()),
		};
		self.record(format!("fetch {}", reference));
		if !fixture.refs.contains_key(reference) {
			return Err(Self::error("fetch", checkout, format!("couldn't find remote ref {}", reference)));
		}
		std::fs::write(checkout.join(MARKER_DIR).join(FETCH_HEAD), reference).map_err(|e| Self::error("fetch", checkout, e.to_string()))
	}

	fn checkout(&self, checkout: &Path, reference: &str, branch: Option<&str>) -> std::result::Result<(), VcsError> {
		self.record(match branch {
			Some(b) => format!("checkout {} as {}", reference, b),
			None => format!("checkout {}", reference),
		});
		let tree = self
			.resolve(checkout, reference)
			.ok_or_else(|| Self::error("checkout", checkout, format!("pathspec '{}' did not match", reference)))?;
		Self::materialize(checkout, &tree, true).map_err(|e| Self::error("checkout", checkout, e.to_string()))
	}

	fn cherry_pick(&self, checkout: &Path, reference: &str) -> std::result::Result<(), VcsError> {
		let name = if reference == FETCH_HEAD {
			std::fs::read_to_string(checkout.join(MARKER_DIR).join(FETCH_HEAD)).unwrap_or_default()
		} else {
			reference.to_string()
		};
		self.record(format!("cherry-pick {}", name));
		let fixture = self.origin(checkout).ok_or_else(|| Self::error("cherry-pick", checkout, "not a fixture checkout"))?;
		if fixture.conflicts.contains(&name) {
			return Err(Self::error("cherry-pick", checkout, format!("could not apply {}", name)));
		}
		let tree = self.resolve(checkout, reference).ok_or_else(|| Self::error("cherry-pick", checkout, "bad revision"))?;
		Self::materialize(checkout, &tree, false).map_err(|e| Self::error("cherry-pick", checkout, e.to_string()))
	}

	fn abort_cherry_pick(&self, _checkout: &Path) -> std::result::Result<(), VcsError> {
		self.record("cherry-pick --abort".to_string());
		Ok(())
	}

	fn delete_branch(&self, _checkout: &Path, branch: &str) -> std::result::Result<(), VcsError> {
		self.record(format!("branch -D {}", branch));
		Ok(())
	}

	fn is_checkout(&self, path: &Path) -> bool {
		path.join(MARKER_DIR).is_dir()
	}

	fn list_tags(&self, checkout: &Path) -> std::result::Result<Vec<String>, VcsError> {
		let fixture = self.origin(checkout).ok_or_else(|| Self::error("tag", checkout, "not a fixture checkout"))?;
		Ok(fixture.tags.clone())
	}

	fn file_exists_at(&self, checkout: &Path, reference: &str, file: &str) -> bool {
		self.resolve(checkout, reference).map(|tree| tree.join(file).exists()).unwrap_or(false)
	}
}
