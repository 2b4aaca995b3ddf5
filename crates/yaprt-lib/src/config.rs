use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};

use crate::builder::{BuildOptions, PipOptions};
use crate::reconciler::{DuplicateHandling, ReconcilerOptions};
use crate::retry::RetryPolicy;
use crate::walker::WalkerOptions;

const CONFIG_FILE: &str = "config.json";

fn home_dir() -> PathBuf {
	#[cfg(target_os = "windows")]
	let var = "USERPROFILE";
	#[cfg(not(target_os = "windows"))]
	let var = "HOME";

	match std::env::var(var) {
		Ok(home) => PathBuf::from(home),
		Err(_) => {
			log::warn!("{} environment variable not set, using the current directory", var);
			PathBuf::from(".")
		},
	}
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
	#[cfg(target_os = "windows")]
	let path = std::env::var("APPDATA").map(PathBuf::from).unwrap_or_else(|_| home_dir());

	#[cfg(not(target_os = "windows"))]
	let path = if let Ok(e) = std::env::var(var) {
		PathBuf::from(e)
	} else {
		home_dir().join(fallback)
	};

	path.join("yaprt")
}

fn data_dir() -> PathBuf {
	xdg_dir("XDG_DATA_HOME", ".local/share")
}

/// `$XDG_CONFIG_HOME/yaprt/config.json`
pub fn config_path() -> PathBuf {
	xdg_dir("XDG_CONFIG_HOME", ".config").join(CONFIG_FILE)
}

/// Settings shared by the commands, command line flags are applied on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	report_file: PathBuf,
	git_repo_path: PathBuf,
	build_output: PathBuf,
	build_dir: Option<PathBuf>,
	storage_pool: PathBuf,
	link_dir: PathBuf,
	pip: PipOptions,
	duplicate_handling: DuplicateHandling,
	version_sanity: bool,
	bulk: bool,
	force_clean: bool,
	retry: RetryPolicy,
	python: String,
	pip_command: String,
}

impl Default for Config {
	fn default() -> Self {
		let data = data_dir();
		Self {
			report_file: home_dir().join("repo-requirements.json"),
			git_repo_path: data.join("repos"),
			build_output: data.join("build-output"),
			build_dir: None,
			storage_pool: data.join("pool"),
			link_dir: data.join("links"),
			pip: PipOptions::default(),
			duplicate_handling: DuplicateHandling::Max,
			version_sanity: true,
			bulk: false,
			force_clean: false,
			retry: RetryPolicy::default(),
			python: "python".to_string(),
			pip_command: "pip".to_string(),
		}
	}
}

impl Config {
	/// Reads a config file.
	pub fn load(path: &Path) -> crate::Result<Self> {
		let file = std::fs::File::open(path)?;
		Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
	}

	/// Loads the user's config file, falling back to the defaults when it's missing or broken.
	pub fn load_from_disk() -> Self {
		let path = config_path();
		if !path.exists() {
			log::debug!("No config at {}, using defaults", path.display());
			return Self::default();
		}
		match Self::load(&path) {
			Ok(config) => {
				log::debug!("Loaded config from {}", path.display());
				config
			},
			Err(e) => {
				log::warn!("Failed to load config from {}, using defaults: {}", path.display(), e);
				Self::default()
			},
		}
	}

	pub fn save(&self, path: &Path) -> crate::Result<()> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(path, serde_json::to_string_pretty(self)?)?;
		Ok(())
	}

	pub fn walker_options(&self) -> WalkerOptions {
		WalkerOptions {
			git_repo_path: self.git_repo_path.clone(),
			discover_releases: false,
			retry: self.retry.clone(),
			python: self.python.clone(),
		}
	}

	pub fn build_options(&self) -> BuildOptions {
		BuildOptions {
			build_output: self.build_output.clone(),
			build_dir: self.build_dir.clone(),
			storage_pool: self.storage_pool.clone(),
			link_dir: self.link_dir.clone(),
			pip: self.pip.clone(),
			bulk: self.bulk,
			force_clean: self.force_clean,
			retry: self.retry.clone(),
			python: self.python.clone(),
			pip_command: self.pip_command.clone(),
		}
	}

	pub fn reconciler_options(&self) -> ReconcilerOptions {
		ReconcilerOptions {
			duplicate_handling: self.duplicate_handling,
			version_sanity: self.version_sanity,
		}
	}
}

impl Config {
	pub fn report_file(&self) -> &Path {
		&self.report_file
	}
	pub fn set_report_file(&mut self, report_file: PathBuf) {
		self.report_file = report_file;
	}

	pub fn git_repo_path(&self) -> &Path {
		&self.git_repo_path
	}
	pub fn set_git_repo_path(&mut self, git_repo_path: PathBuf) {
		self.git_repo_path = git_repo_path;
	}

	pub fn build_output(&self) -> &Path {
		&self.build_output
	}
	pub fn set_build_output(&mut self, build_output: PathBuf) {
		self.build_output = build_output;
	}

	pub fn build_dir(&self) -> Option<&Path> {
		self.build_dir.as_deref()
	}
	/// returns if the directory is valid or not.
	pub fn set_build_dir(&mut self, build_dir: PathBuf) -> bool {
		if build_dir.is_dir() {
			self.build_dir = Some(build_dir);
			true
		} else {
			false
		}
	}

	pub fn storage_pool(&self) -> &Path {
		&self.storage_pool
	}
	pub fn set_storage_pool(&mut self, storage_pool: PathBuf) {
		self.storage_pool = storage_pool;
	}

	pub fn link_dir(&self) -> &Path {
		&self.link_dir
	}
	pub fn set_link_dir(&mut self, link_dir: PathBuf) {
		self.link_dir = link_dir;
	}

	pub fn pip(&self) -> &PipOptions {
		&self.pip
	}
	pub fn pip_mut(&mut self) -> &mut PipOptions {
		&mut self.pip
	}

	pub fn duplicate_handling(&self) -> DuplicateHandling {
		self.duplicate_handling
	}
	pub fn set_duplicate_handling(&mut self, duplicate_handling: DuplicateHandling) {
		self.duplicate_handling = duplicate_handling;
	}

	pub fn version_sanity(&self) -> bool {
		self.version_sanity
	}
	pub fn set_version_sanity(&mut self, version_sanity: bool) {
		self.version_sanity = version_sanity;
	}

	pub fn bulk(&self) -> bool {
		self.bulk
	}
	pub fn set_bulk(&mut self, bulk: bool) {
		self.bulk = bulk;
	}

	pub fn force_clean(&self) -> bool {
		self.force_clean
	}
	pub fn set_force_clean(&mut self, force_clean: bool) {
		self.force_clean = force_clean;
	}

	pub fn retry(&self) -> &RetryPolicy {
		&self.retry
	}
	pub fn set_retry(&mut self, retry: RetryPolicy) {
		self.retry = retry;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn config_partial_file_keeps_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.json");
		std::fs::write(&path, r#"{ "link_dir": "/srv/links", "duplicate_handling": "min", "pip": { "no_deps": true } }"#).unwrap();

		let config = Config::load(&path).unwrap();
		assert_eq!(config.link_dir(), Path::new("/srv/links"));
		assert_eq!(config.duplicate_handling(), DuplicateHandling::Min);
		assert!(config.pip().no_deps);
		assert!(config.version_sanity());
		assert_eq!(config.retry(), &RetryPolicy::default());
	}

	#[test]
	fn config_save_then_load() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested/config.json");
		let mut config = Config::default();
		config.set_bulk(true);
		config.set_storage_pool(dir.path().join("pool"));
		config.save(&path).unwrap();
		assert_eq!(Config::load(&path).unwrap(), config);
	}

	#[test]
	fn config_feeds_component_options() {
		let mut config = Config::default();
		config.set_version_sanity(false);
		config.set_link_dir(PathBuf::from("/links"));
		assert!(!config.reconciler_options().version_sanity);
		assert_eq!(config.build_options().link_dir, PathBuf::from("/links"));
		assert_eq!(config.walker_options().git_repo_path, config.git_repo_path());
	}
}
