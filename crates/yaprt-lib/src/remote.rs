//! Scanning repositories through the GitHub API without cloning them.
//!
//! Branches and tags are listed over the API and requirement files are read from
//! `raw.githubusercontent.com`. The result has the same shape as a walked repository.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::git_link::GitLink;
use crate::report::{BranchEntry, RepoEntry, ResolvedBranch};
use crate::retry::RetryPolicy;
use crate::scanner::{self, ScanContext, ScannedRequirements};
use crate::walker::REQUIREMENT_FILES;

pub const RAW_CONTENT_BASE: &str = "https://raw.githubusercontent.com";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GithubRepo {
	pub name: String,
	/// `owner/name`
	pub full_name: String,
	pub clone_url: String,
	/// API url of the repository.
	pub url: String,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
	name: String,
}

/// A repository entry read from GitHub with the links found in its requirement files.
#[derive(Debug, Clone, Default)]
pub struct RemoteScan {
	pub name: String,
	pub entry: RepoEntry,
	pub sub_links: Vec<GitLink>,
}

pub struct GithubSource {
	client: reqwest::blocking::Client,
	auth: Option<(String, Option<String>)>,
	retry: RetryPolicy,
	raw_base: String,
	discover_releases: bool,
}

/// The url of the `rel="next"` page in a `Link` header.
pub fn next_page(link_header: &str) -> Option<String> {
	link_header.split(',').find_map(|part| {
		let (url, params) = part.split_once(';')?;
		let is_next = params.split(';').any(|p| p.trim().replace(' ', "") == "rel=\"next\"");
		is_next.then(|| url.trim().trim_start_matches('<').trim_end_matches('>').to_string())
	})
}

/// Url of `file` at `reference` of `owner/name`.
pub fn raw_file_url(raw_base: &str, full_name: &str, reference: &str, file: &str) -> String {
	format!("{}/{}/{}/{}", raw_base.trim_end_matches('/'), full_name, reference, file)
}

impl GithubSource {
	pub fn new(retry: RetryPolicy) -> crate::Result<Self> {
		let client = reqwest::blocking::Client::builder()
			.user_agent(concat!("yaprt/", env!("CARGO_PKG_VERSION")))
			.build()?;
		Ok(Self {
			client,
			auth: None,
			retry,
			raw_base: RAW_CONTENT_BASE.to_string(),
			discover_releases: false,
		})
	}

	pub fn with_auth(mut self, username: String, password: Option<String>) -> Self {
		self.auth = Some((username, password));
		self
	}

	pub fn with_raw_base(mut self, raw_base: String) -> Self {
		self.raw_base = raw_base;
		self
	}

	pub fn with_release_discovery(mut self, discover_releases: bool) -> Self {
		self.discover_releases = discover_releases;
		self
	}

	fn request(&self, method: reqwest::Method, url: &str) -> reqwest::blocking::RequestBuilder {
		let request = self.client.request(method, url);
		match &self.auth {
			Some((user, password)) => request.basic_auth(user, password.as_ref()),
			None => request,
		}
	}

	/// Gets `url` and every following page.
	fn get_paged<T: serde::de::DeserializeOwned>(&self, url: &str) -> crate::Result<Vec<T>> {
		let mut out = Vec::new();
		let mut next = Some(url.to_string());
		while let Some(url) = next.take() {
			log::debug!("Requesting {}", url);
			let response = self.retry.run_transient(&format!("GET {}", url), || {
				self.request(reqwest::Method::GET, &url).send().and_then(|r| r.error_for_status())
			})?;
			next = response
				.headers()
				.get(reqwest::header::LINK)
				.and_then(|h| h.to_str().ok())
				.and_then(next_page);
			let page: serde_json::Value = response.json()?;
			match page {
				serde_json::Value::Array(items) => {
					for item in items {
						out.push(serde_json::from_value(item)?);
					}
				},
				other => out.push(serde_json::from_value(other)?),
			}
		}
		Ok(out)
	}

	/// Text of a file, `None` when it doesn't exist.
	fn probe(&self, url: &str) -> crate::Result<Option<String>> {
		let status = self.retry.run_transient(&format!("HEAD {}", url), || {
			self.request(reqwest::Method::HEAD, url).send().map(|r| r.status())
		})?;
		log::debug!("Return code [ {} ] while looking for [ {} ]", status, url);
		if !status.is_success() {
			return Ok(None);
		}
		let text = self.retry.run_transient(&format!("GET {}", url), || {
			self.request(reqwest::Method::GET, url).send().and_then(|r| r.error_for_status()).and_then(|r| r.text())
		})?;
		Ok(Some(text))
	}

	fn exists(&self, url: &str) -> crate::Result<bool> {
		let status = self.retry.run_transient(&format!("HEAD {}", url), || {
			self.request(reqwest::Method::HEAD, url).send().map(|r| r.status())
		})?;
		Ok(status.is_success())
	}

	/// The repositories behind an API url, a user or organisation repository list or a single repository.
	pub fn repos(&self, url: &str) -> crate::Result<Vec<GithubRepo>> {
		self.get_paged(url)
	}

	/// Reads every branch of `repo`, or only `branch` when given.
	pub fn scan_repo(&self, repo: &GithubRepo, branch: Option<&str>) -> crate::Result<RemoteScan> {
		let mut scan = RemoteScan {
			name: repo.name.to_lowercase(),
			entry: RepoEntry { git_url: Some(repo.clone_url.clone()), ..Default::default() },
			sub_links: Vec::new(),
		};
		let api = repo.url.trim_end_matches('/');

		let branches: Vec<String> = match branch {
			Some(b) => vec![b.to_string()],
			None => self.get_paged::<NamedRef>(&format!("{}/branches", api))?.into_iter().map(|b| b.name).collect(),
		};

		if self.discover_releases && branch.is_none() {
			for tag in self.get_paged::<NamedRef>(&format!("{}/tags", api))? {
				if self.exists(&raw_file_url(&self.raw_base, &repo.full_name, &tag.name, "setup.py"))? {
					log::debug!("Discovered release {} for repo {}", tag.name, repo.name);
					scan.entry.releases.push(format!("git+{}@{}", repo.clone_url, tag.name));
				}
			}
			scan.entry.releases.sort();
		}

		for branch in branches {
			log::debug!("Discovered branch \"{}\" for repo \"{}\"", branch, repo.name);
			let parent = GitLink::parse(&format!("git+{}@{}", repo.clone_url, branch)).ok();
			let mut scanned = ScannedRequirements::default();
			for (section, file) in REQUIREMENT_FILES {
				if let Some(text) = self.probe(&raw_file_url(&self.raw_base, &repo.full_name, &branch, file))? {
					scanned.merge(scanner::scan(&text, ScanContext { default_section: section, parent: parent.as_ref() }));
				}
			}

			let has_setup = self.exists(&raw_file_url(&self.raw_base, &repo.full_name, &branch, "setup.py"))?;
			scan.sub_links.extend(std::mem::take(&mut scanned.sub_links));
			let requirements: BTreeMap<String, Vec<String>> =
				scanned.sections.into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect();
			scan.entry.branches.insert(branch.clone(), BranchEntry::Resolved(ResolvedBranch {
				requirements,
				pip_install_url: has_setup.then(|| format!("git+{}@{}", repo.clone_url, branch)),
				original_data: None,
				patched_from: None,
			}));
		}

		Ok(scan)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn remote_next_page_from_link_header() {
		let header = r#"<https://api.github.com/orgs/openstack/repos?page=2>; rel="next", <https://api.github.com/orgs/openstack/repos?page=9>; rel="last""#;
		assert_eq!(next_page(header).as_deref(), Some("https://api.github.com/orgs/openstack/repos?page=2"));
		assert_eq!(next_page(r#"<https://api.github.com/x?page=1>; rel="prev""#), None);
	}

	#[test]
	fn remote_raw_file_url() {
		assert_eq!(
			raw_file_url(RAW_CONTENT_BASE, "openstack/nova", "stable/kilo", "requirements.txt"),
			"https://raw.githubusercontent.com/openstack/nova/stable/kilo/requirements.txt"
		);
	}

	#[test]
	fn remote_repo_deserializes_from_api_shape() {
		let repo: GithubRepo = serde_json::from_str(r#"{
			"name": "Nova", "full_name": "openstack/nova", "clone_url": "https://github.com/openstack/nova.git",
			"url": "https://api.github.com/repos/openstack/nova", "private": false
		}"#).unwrap();
		assert_eq!(repo.full_name, "openstack/nova");
	}
}
