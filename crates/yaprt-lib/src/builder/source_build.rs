//! Building wheels of packages living in a repository subdirectory.
//!
//! pip can't build these from a link, so the repository is cloned into a scratch directory and the
//! package's own `setup.py bdist_wheel` is run.

use std::path::Path;

use crate::git_link::GitLink;
use crate::process::Shell;
use crate::retry::RetryPolicy;
use crate::vcs::Vcs;

/// Adds `import setuptools` to a setup script that doesn't mention setuptools, `bdist_wheel` needs it.
///
/// The import goes before the first statement that isn't an import, a comment or the module docstring.
/// Returns `None` when the script needs no change.
pub fn patch_setup_script(script: &str) -> Option<String> {
	if script.contains("setuptools") {
		return None;
	}

	let lines: Vec<&str> = script.lines().collect();
	let mut insert_at = lines.len();
	let mut in_docstring: Option<&str> = None;
	for (i, line) in lines.iter().enumerate() {
		let trimmed = line.trim();
		if let Some(quote) = in_docstring {
			if trimmed.contains(quote) {
				in_docstring = None;
			}
			continue;
		}
		if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("import ") || trimmed.starts_with("from ") {
			continue;
		}
		if let Some(quote) = ["\"\"\"", "'''"].into_iter().find(|q| trimmed.starts_with(q)) {
			if trimmed.len() < 6 || !trimmed[3..].contains(quote) {
				in_docstring = Some(quote);
			}
			continue;
		}
		insert_at = i;
		break;
	}

	let mut out = String::with_capacity(script.len() + 20);
	for (i, line) in lines.iter().enumerate() {
		if i == insert_at {
			out.push_str("import setuptools\n");
		}
		out.push_str(line);
		out.push('\n');
	}
	if insert_at == lines.len() {
		out.push_str("import setuptools\n");
	}
	Some(out)
}

/// Clones `link` into `scratch` and builds its subdirectory into `build_output`.
///
/// # Errors
/// [`Build`](crate::Error::Build) naming the package for anything going wrong after the clone.
pub fn build(
	vcs: &dyn Vcs,
	shell: &Shell<'_>,
	link: &GitLink,
	scratch: &Path,
	build_output: &Path,
	python: &str,
	retry: &RetryPolicy,
) -> crate::Result<()> {
	let failed = |output: String| crate::Error::Build { package: link.to_string(), output };
	let subdirectory = link.subdirectory.as_deref().ok_or_else(|| failed("link has no subdirectory".to_string()))?;

	let checkout = scratch.join(&link.name);
	retry.run_transient(&format!("clone {}", link.url), || vcs.clone_repo(&link.url, &checkout))?;
	vcs.checkout(&checkout, &link.reference, None).map_err(|e| failed(e.to_string()))?;

	let package_dir = checkout.join(subdirectory);
	let setup = package_dir.join("setup.py");
	let script = std::fs::read_to_string(&setup).map_err(|e| failed(format!("{}: {}", setup.display(), e)))?;
	if let Some(patched) = patch_setup_script(&script) {
		log::debug!("Adding setuptools import to {}", setup.display());
		std::fs::write(&setup, patched).map_err(|e| failed(format!("{}: {}", setup.display(), e)))?;
	}

	let _dir = shell.enter(&package_dir);
	let dist_dir = build_output.to_string_lossy();
	shell
		.run(&[python, "setup.py", "bdist_wheel", "--dist-dir", &*dist_dir])
		.map_err(|e| failed(e.output))?;
	log::debug!("Build success for {}", link);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn setup_patch_goes_after_imports() {
		let script = "#!/usr/bin/env python\n\"\"\"Setup.\n\nMore.\n\"\"\"\nimport os\nfrom distutils.core import setup\n\nsetup(name='x')\n";
		let patched = patch_setup_script(script).unwrap();
		assert_eq!(
			patched,
			"#!/usr/bin/env python\n\"\"\"Setup.\n\nMore.\n\"\"\"\nimport os\nfrom distutils.core import setup\n\nimport setuptools\nsetup(name='x')\n"
		);
	}

	#[test]
	fn setup_patch_skips_scripts_using_setuptools() {
		assert_eq!(patch_setup_script("import setuptools\nsetuptools.setup()\n"), None);
	}

	#[test]
	fn setup_patch_one_line_docstring() {
		let patched = patch_setup_script("'''Setup.'''\nfrom distutils.core import setup\nsetup()\n").unwrap();
		assert!(patched.ends_with("import setuptools\nsetup()\n"));
	}
}
