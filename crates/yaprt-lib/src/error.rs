//! Library error type.

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("reqwest error: {0}")]
	Reqwest(#[from] reqwest::Error),
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("JSON error: {0}")]
	SerdeJSON(#[from] serde_json::Error),
	#[error("error walking directory: {0}")]
	WalkDir(#[from] walkdir::Error),
	#[error("{0}")]
	Process(#[from] crate::process::ProcessError),
	#[error("{0}")]
	Vcs(#[from] crate::vcs::VcsError),
	#[error("storage pool error: {0}")]
	Pool(#[from] crate::builder::pool::PoolError),
	/// Malformed git link or requirement text.
	#[error("parsing error: {0}")]
	Parse(String),
	/// A report or configuration file does not have the expected shape.
	#[error("validation error: {0}")]
	Validation(String),
	/// The observed constraints for a package have no intersection.
	#[error("the package [ {package} ] is impossible to resolve, lower bound {lower} conflicts with upper bound {upper}")]
	Unsatisfiable {
		package: String,
		lower: String,
		upper: String,
	},
	/// Checkout or cherry-pick of a ref failed and needs a human to look at it.
	#[error("could not check out [ {repo} ] at [ {reference} ]: {message}")]
	VcsConflict {
		repo: String,
		reference: String,
		message: String,
	},
	/// An external build invocation failed, including its retry.
	#[error("failed to build [ {package} ]: {output}")]
	Build {
		package: String,
		output: String,
	},
	/// A network or lock bound operation kept failing after every retry.
	#[error("gave up after {attempts} attempts: {message}")]
	Transient {
		attempts: u32,
		message: String,
	},
}
