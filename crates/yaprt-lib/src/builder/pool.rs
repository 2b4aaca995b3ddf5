//! # Storage pool
//!
//! Built artifacts are kept in a pool sorted into one directory per package,
//! `<pool>/<package>/<file>`, and exposed through a flat link directory of relative symlinks
//! which pip can use with `--find-links`.
//!
//! Artifacts already in the pool with the same size are not copied again.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
	#[error("IO error on {}: {source}", path.display())]
	IO {
		path: PathBuf,
		source: std::io::Error,
	},
	#[error("error walking build output: {0}")]
	WalkDir(#[from] walkdir::Error),
	/// The artifact can't be linked relative to the link directory.
	#[error("no relative path from {} to {}", link_dir.display(), artifact.display())]
	Unlinkable {
		link_dir: PathBuf,
		artifact: PathBuf,
	},
}

trait IoContext<T> {
	fn at(self, path: &Path) -> Result<T, PoolError>;
}

impl<T> IoContext<T> for std::io::Result<T> {
	fn at(self, path: &Path) -> Result<T, PoolError> {
		self.map_err(|source| PoolError::IO { path: path.to_path_buf(), source })
	}
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolSummary {
	pub copied: Vec<PathBuf>,
	/// Artifacts already pooled with the same size.
	pub unchanged: Vec<PathBuf>,
	pub linked: usize,
}

/// The pool directory of an artifact, its leading `-` separated token as a normalized package name.
///
/// `Foo_Bar-1.0-py2.py3-none-any.whl` is pooled under `foo-bar`, `oslo.config-1.0.tar.gz` under `oslo-config`.
pub fn pool_dir_name(file_name: &str) -> String {
	let token = file_name.split('-').next().unwrap_or(file_name);
	crate::requirement::normalize_name(token)
}

fn absolute(path: &Path) -> Result<PathBuf, PoolError> {
	if path.is_absolute() {
		Ok(path.to_path_buf())
	} else {
		Ok(std::env::current_dir().at(path)?.join(path))
	}
}

/// Moves every artifact in `build_output` into the pool and links it from `link_dir`.
///
/// `build_output` is removed afterwards.
pub fn store(build_output: &Path, storage_pool: &Path, link_dir: &Path) -> Result<PoolSummary, PoolError> {
	let mut summary = PoolSummary::default();
	if !build_output.exists() {
		log::debug!("Nothing was built into {}", build_output.display());
		return Ok(summary);
	}

	let storage_pool = absolute(storage_pool)?;
	let link_dir = absolute(link_dir)?;
	std::fs::create_dir_all(&link_dir).at(&link_dir)?;

	for entry in walkdir::WalkDir::new(build_output).min_depth(1).sort_by_file_name() {
		let entry = entry?;
		if !entry.file_type().is_file() {
			continue;
		}
		let file_name = entry.file_name().to_string_lossy().to_string();
		let pool_dir = storage_pool.join(pool_dir_name(&file_name));
		let pooled = pool_dir.join(&file_name);

		let size = entry.metadata()?.len();
		let unchanged = std::fs::metadata(&pooled).map(|m| m.is_file() && m.len() == size).unwrap_or(false);
		if unchanged {
			log::debug!("{} is already pooled", file_name);
			summary.unchanged.push(pooled.clone());
		} else {
			std::fs::create_dir_all(&pool_dir).at(&pool_dir)?;
			std::fs::copy(entry.path(), &pooled).at(&pooled)?;
			log::info!("Pooled {}", pooled.display());
			summary.copied.push(pooled.clone());
		}

		link(&pooled, &link_dir)?;
		summary.linked += 1;
	}

	if let Err(e) = std::fs::remove_dir_all(build_output) {
		log::warn!("Failed to remove build output {}: {}", build_output.display(), e);
	}

	Ok(summary)
}

/// Links `artifact` into `link_dir` with a relative symlink, replacing stale or broken links.
pub fn link(artifact: &Path, link_dir: &Path) -> Result<(), PoolError> {
	let file_name = match artifact.file_name() {
		Some(f) => f,
		None => return Err(PoolError::Unlinkable { link_dir: link_dir.to_path_buf(), artifact: artifact.to_path_buf() }),
	};
	let link_path = link_dir.join(file_name);
	let target = pathdiff::diff_paths(artifact, link_dir)
		.ok_or_else(|| PoolError::Unlinkable { link_dir: link_dir.to_path_buf(), artifact: artifact.to_path_buf() })?;

	if let Ok(meta) = std::fs::symlink_metadata(&link_path) {
		let current = std::fs::read_link(&link_path).ok();
		if meta.file_type().is_symlink() && current.as_deref() == Some(target.as_path()) && link_path.exists() {
			return Ok(());
		}
		log::debug!("Replacing link {}", link_path.display());
		std::fs::remove_file(&link_path).at(&link_path)?;
	}

	symlink(&target, &link_path).at(&link_path)
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
	std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
	std::os::windows::fs::symlink_file(target, link)
}

/// Removes every entry of `link_dir` belonging to one of `packages`, so stale artifacts can't be picked up by a rebuild.
pub fn clean_links(link_dir: &Path, packages: &BTreeSet<String>) -> Result<usize, PoolError> {
	let entries = match std::fs::read_dir(link_dir) {
		Ok(e) => e,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
		Err(e) => return Err(PoolError::IO { path: link_dir.to_path_buf(), source: e }),
	};

	let mut removed = 0;
	for entry in entries {
		let entry = entry.at(link_dir)?;
		let file_name = entry.file_name().to_string_lossy().to_string();
		if packages.contains(&pool_dir_name(&file_name)) {
			log::info!("Cleaning {}", file_name);
			std::fs::remove_file(entry.path()).at(&entry.path())?;
			removed += 1;
		}
	}
	Ok(removed)
}
