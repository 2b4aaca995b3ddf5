//! Running external commands.
//!
//! Everything that shells out (git, pip, python) goes through a [`ProcessRunner`] so callers never
//! inspect exit codes themselves and tests can substitute a scripted runner.
//!
//! Path sensitive commands are run through a [`Shell`] which keeps a stack of working directories.
//! [`Shell::enter`] pushes a directory and returns a guard that pops it again when dropped, so the
//! previous directory is restored on every exit path including `?` returns.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

/// Output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
	/// Combined stdout and stderr.
	pub output: String,
	pub success: bool,
}

impl CommandOutput {
	pub fn success(output: impl Into<String>) -> Self {
		Self { output: output.into(), success: true }
	}

	pub fn failure(output: impl Into<String>) -> Self {
		Self { output: output.into(), success: false }
	}
}

/// Executes argv style commands.
pub trait ProcessRunner {
	/// Runs `command` with `working_dir` as its current directory when given.
	///
	/// Failing to spawn the command is reported as an unsuccessful [`CommandOutput`].
	fn run(&self, command: &[String], working_dir: Option<&Path>) -> CommandOutput;
}

/// Runs commands on the host with [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
	fn run(&self, command: &[String], working_dir: Option<&Path>) -> CommandOutput {
		let (program, args) = match command.split_first() {
			Some(v) => v,
			None => return CommandOutput::failure("empty command"),
		};

		let mut cmd = std::process::Command::new(program);
		cmd.args(args);
		if let Some(dir) = working_dir {
			cmd.current_dir(dir);
		}

		log::trace!("Running command `{}`", command.join(" "));
		match cmd.output() {
			Ok(out) => {
				let mut output = String::from_utf8_lossy(&out.stdout).to_string();
				output.push_str(&String::from_utf8_lossy(&out.stderr));
				CommandOutput { output, success: out.status.success() }
			},
			Err(e) => CommandOutput::failure(format!("failed to spawn `{}`: {}", program, e)),
		}
	}
}

#[derive(Debug, thiserror::Error)]
#[error("command `{command}` failed: {output}")]
pub struct ProcessError {
	pub command: String,
	pub output: String,
}

/// A [`ProcessRunner`] paired with a stack of working directories.
pub struct Shell<'r> {
	runner: &'r dyn ProcessRunner,
	dirs: RefCell<Vec<PathBuf>>,
}

/// Restores the previous working directory of a [`Shell`] when dropped.
#[must_use = "the directory is left as soon as the guard is dropped"]
pub struct DirGuard<'s, 'r> {
	shell: &'s Shell<'r>,
	depth: usize,
}

impl Drop for DirGuard<'_, '_> {
	fn drop(&mut self) {
		let mut dirs = self.shell.dirs.borrow_mut();
		if let Some(dir) = dirs.get(self.depth) {
			log::trace!("Leaving directory {}", dir.display());
		}
		dirs.truncate(self.depth);
	}
}

impl<'r> Shell<'r> {
	pub fn new(runner: &'r dyn ProcessRunner) -> Self {
		Self { runner, dirs: RefCell::new(Vec::new()) }
	}

	pub fn runner(&self) -> &'r dyn ProcessRunner {
		self.runner
	}

	/// Makes `dir` the working directory of every command until the guard is dropped.
	pub fn enter(&self, dir: impl Into<PathBuf>) -> DirGuard<'_, 'r> {
		let dir = dir.into();
		log::trace!("Entering directory {}", dir.display());
		let mut dirs = self.dirs.borrow_mut();
		let depth = dirs.len();
		dirs.push(dir);
		DirGuard { shell: self, depth }
	}

	pub fn current_dir(&self) -> Option<PathBuf> {
		self.dirs.borrow().last().cloned()
	}

	/// Runs a command in the current directory and returns its output.
	///
	/// # Errors
	/// [`ProcessError`] when the command exits unsuccessfully or can't be spawned.
	pub fn run<S: AsRef<str>>(&self, command: &[S]) -> Result<String, ProcessError> {
		let command: Vec<String> = command.iter().map(|s| s.as_ref().to_string()).collect();
		let cwd = self.current_dir();
		let result = self.runner.run(&command, cwd.as_deref());
		if result.success {
			Ok(result.output)
		} else {
			Err(ProcessError { command: command.join(" "), output: result.output.trim().to_string() })
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Echo {
		seen: RefCell<Vec<(String, Option<PathBuf>)>>,
	}

	impl ProcessRunner for Echo {
		fn run(&self, command: &[String], working_dir: Option<&Path>) -> CommandOutput {
			self.seen.borrow_mut().push((command.join(" "), working_dir.map(Path::to_path_buf)));
			if command[0] == "false" { CommandOutput::failure("boom") } else { CommandOutput::success("ok") }
		}
	}

	#[test]
	fn shell_restores_directory_on_drop() {
		let runner = Echo { seen: Default::default() };
		let shell = Shell::new(&runner);
		{
			let _outer = shell.enter("/a");
			{
				let _inner = shell.enter("/a/b");
				shell.run(&["true"]).unwrap();
			}
			shell.run(&["true"]).unwrap();
		}
		shell.run(&["true"]).unwrap();

		let seen = runner.seen.borrow();
		assert_eq!(seen[0].1.as_deref(), Some(Path::new("/a/b")));
		assert_eq!(seen[1].1.as_deref(), Some(Path::new("/a")));
		assert_eq!(seen[2].1, None);
	}

	#[test]
	fn shell_restores_directory_on_error_path() {
		let runner = Echo { seen: Default::default() };
		let shell = Shell::new(&runner);

		fn failing(shell: &Shell) -> Result<String, ProcessError> {
			let _guard = shell.enter("/work");
			shell.run(&["false"])?;
			Ok("unreachable".into())
		}

		let err = failing(&shell).unwrap_err();
		assert_eq!(err.output, "boom");
		assert_eq!(shell.current_dir(), None);
	}

	#[test]
	fn system_runner_reports_spawn_failure() {
		let out = SystemRunner.run(&["yaprt-command-that-does-not-exist".to_string()], None);
		assert!(!out.success);
	}
}
