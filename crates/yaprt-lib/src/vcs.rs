//! Version control operations needed by the walker, the builder and `store-repos`.

use std::path::{Path, PathBuf};

use crate::process::{ProcessRunner, Shell};

#[derive(Debug, thiserror::Error)]
#[error("git {operation} failed in {}: {output}", path.display())]
pub struct VcsError {
	pub operation: &'static str,
	pub path: PathBuf,
	pub output: String,
}

/// The reference name a fetched ref is available under until the next fetch.
pub const FETCH_HEAD: &str = "FETCH_HEAD";

pub trait Vcs {
	fn clone_repo(&self, url: &str, destination: &Path) -> Result<(), VcsError>;
	/// Fetches `reference` from `origin`, or every remote when `None`.
	fn fetch(&self, checkout: &Path, reference: Option<&str>) -> Result<(), VcsError>;
	/// Checks out `reference`. When `branch` is given it is (re)created to point at `reference`.
	fn checkout(&self, checkout: &Path, reference: &str, branch: Option<&str>) -> Result<(), VcsError>;
	/// Applies a single commit on top of `HEAD`. Does not abort on failure.
	fn cherry_pick(&self, checkout: &Path, reference: &str) -> Result<(), VcsError>;
	fn abort_cherry_pick(&self, checkout: &Path) -> Result<(), VcsError>;
	/// Deletes a local branch, detaching `HEAD` first when the branch is checked out.
	fn delete_branch(&self, checkout: &Path, branch: &str) -> Result<(), VcsError>;
	fn is_checkout(&self, path: &Path) -> bool;
	fn list_tags(&self, checkout: &Path) -> Result<Vec<String>, VcsError>;
	/// Checks if `file` exists in the tree of `reference` without checking it out.
	fn file_exists_at(&self, checkout: &Path, reference: &str, file: &str) -> bool;
}

/// [`Vcs`] backed by the `git` command line.
pub struct GitCli<'r> {
	shell: Shell<'r>,
}

impl<'r> GitCli<'r> {
	pub fn new(runner: &'r dyn ProcessRunner) -> Self {
		Self { shell: Shell::new(runner) }
	}

	fn git(&self, operation: &'static str, checkout: &Path, args: &[&str]) -> Result<String, VcsError> {
		let _dir = self.shell.enter(checkout);
		let mut command = vec!["git"];
		command.extend_from_slice(args);
		self.shell.run(&command).map_err(|e| VcsError {
			operation,
			path: checkout.to_path_buf(),
			output: e.output,
		})
	}
}

impl Vcs for GitCli<'_> {
	fn clone_repo(&self, url: &str, destination: &Path) -> Result<(), VcsError> {
		log::debug!("Cloning {} into {}", url, destination.display());
		let parent = destination.parent().unwrap_or_else(|| Path::new("."));
		std::fs::create_dir_all(parent).map_err(|e| VcsError {
			operation: "clone",
			path: parent.to_path_buf(),
			output: e.to_string(),
		})?;
		let destination = destination.to_string_lossy();
		self.git("clone", parent, &["clone", url, &destination]).map(|_| ())
	}

	fn fetch(&self, checkout: &Path, reference: Option<&str>) -> Result<(), VcsError> {
		match reference {
			Some(r) => self.git("fetch", checkout, &["fetch", "origin", r]),
			None => self.git("fetch", checkout, &["fetch", "--all", "--tags"]),
		}.map(|_| ())
	}

	fn checkout(&self, checkout: &Path, reference: &str, branch: Option<&str>) -> Result<(), VcsError> {
		match branch {
			Some(b) => self.git("checkout", checkout, &["checkout", "--force", "-B", b, reference]),
			None => self.git("checkout", checkout, &["checkout", "--force", reference]),
		}.map(|_| ())
	}

	fn cherry_pick(&self, checkout: &Path, reference: &str) -> Result<(), VcsError> {
		self.git("cherry-pick", checkout, &["cherry-pick", reference]).map(|_| ())
	}

	fn abort_cherry_pick(&self, checkout: &Path) -> Result<(), VcsError> {
		self.git("cherry-pick --abort", checkout, &["cherry-pick", "--abort"]).map(|_| ())
	}

	fn delete_branch(&self, checkout: &Path, branch: &str) -> Result<(), VcsError> {
		if let Err(e) = self.git("checkout --detach", checkout, &["checkout", "--force", "--detach"]) {
			log::debug!("{}", e);
		}
		self.git("branch -D", checkout, &["branch", "-D", branch]).map(|_| ())
	}

	fn is_checkout(&self, path: &Path) -> bool {
		path.join(".git").exists()
	}

	fn list_tags(&self, checkout: &Path) -> Result<Vec<String>, VcsError> {
		self.git("tag", checkout, &["tag", "-l"]).map(|s| {
			s.lines()
				.map(str::trim)
				.filter(|l| !l.is_empty())
				.map(str::to_string)
				.collect()
		})
	}

	fn file_exists_at(&self, checkout: &Path, reference: &str, file: &str) -> bool {
		let object = format!("{}:{}", reference, file);
		self.git("cat-file", checkout, &["cat-file", "-e", &object]).is_ok()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::process::CommandOutput;
	use std::cell::RefCell;

	#[derive(Default)]
	struct Recorder {
		commands: RefCell<Vec<(Vec<String>, Option<PathBuf>)>>,
	}

	impl ProcessRunner for Recorder {
		fn run(&self, command: &[String], working_dir: Option<&Path>) -> CommandOutput {
			self.commands.borrow_mut().push((command.to_vec(), working_dir.map(Path::to_path_buf)));
			if command.get(1).map(String::as_str) == Some("tag") {
				CommandOutput::success("1.0.0\n\n2.0.0\n")
			} else if command.get(1).map(String::as_str) == Some("cat-file") {
				CommandOutput::failure("fatal: path 'setup.py' does not exist")
			} else {
				CommandOutput::success("")
			}
		}
	}

	#[test]
	fn git_runs_in_checkout() {
		let runner = Recorder::default();
		let git = GitCli::new(&runner);
		git.checkout(Path::new("/repos/nova"), "FETCH_HEAD", Some("integration")).unwrap();

		let commands = runner.commands.borrow();
		assert_eq!(commands[0].0, vec!["git", "checkout", "--force", "-B", "integration", "FETCH_HEAD"]);
		assert_eq!(commands[0].1.as_deref(), Some(Path::new("/repos/nova")));
	}

	#[test]
	fn git_lists_tags_skipping_blank_lines() {
		let runner = Recorder::default();
		let git = GitCli::new(&runner);
		assert_eq!(git.list_tags(Path::new("/r")).unwrap(), vec!["1.0.0", "2.0.0"]);
		assert!(!git.file_exists_at(Path::new("/r"), "1.0.0", "setup.py"));
	}
}
