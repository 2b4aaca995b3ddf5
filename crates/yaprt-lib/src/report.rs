//! The packaging report.
//!
//! The report is written by `create-report` and read by `build-wheels`, it is the only state kept between
//! the two and is meant to be edited by hand in between. Adding a pending entry such as
//! `"stable": {"original_data": "git+https://host/org/repo@stable"}` makes the next scan resolve it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::git_link::GitLink;

/// Repository name holding packages given on the command line.
pub const USER_REPO: &str = "__user__";
const USER_BRANCH: &str = "master";
pub const BASE_SECTION: &str = "base_requirements";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Report {
	pub repos: BTreeMap<String, RepoEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoEntry {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub git_url: Option<String>,
	#[serde(default)]
	pub branches: BTreeMap<String, BranchEntry>,
	/// Install links of tags that can be built, `git+<url>@<tag>`.
	#[serde(default)]
	pub releases: Vec<String>,
}

/// The state of one ref of a repository.
///
/// Variants are told apart by their required key: `skipped`, `requirements` or `original_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BranchEntry {
	/// The ref could not be checked out.
	Skipped { skipped: String },
	Resolved(ResolvedBranch),
	/// A link waiting to be walked.
	Pending { original_data: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedBranch {
	/// Section name to requirements. Sections starting with `:` hold an environment marker.
	pub requirements: BTreeMap<String, Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pip_install_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub original_data: Option<String>,
	/// The refs an integration branch was assembled from.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub patched_from: Option<Vec<String>>,
}

impl ResolvedBranch {
	/// Requirements of every section, with the section's marker appended for `:` sections.
	pub fn requirement_strings(&self) -> impl Iterator<Item = String> + '_ {
		self.requirements.iter().flat_map(|(section, requirements)| {
			let marker = section.strip_prefix(':').filter(|m| !m.is_empty());
			requirements.iter().map(move |r| match marker {
				Some(m) => format!("{};{}", r, m),
				None => r.clone(),
			})
		})
	}
}

fn compiled_schema() -> crate::Result<jsonschema::JSONSchema> {
	let schema: serde_json::Value = serde_json::from_str(include_str!("report.schema.json"))?;
	jsonschema::JSONSchema::compile(&schema).map_err(|e| crate::Error::Validation(format!("report schema is invalid: {}", e)))
}

impl Report {
	pub fn new() -> Self {
		Self::default()
	}

	/// Reads and validates a report file.
	///
	/// # Errors
	/// - [`IO`](crate::Error::IO) when the file can't be read.
	/// - [`Validation`](crate::Error::Validation) naming every offending path when the file doesn't match the report schema.
	pub fn load(path: &Path) -> crate::Result<Self> {
		log::debug!("Loading report from {}", path.display());
		let text = std::fs::read_to_string(path)?;
		Self::from_json(&text)
	}

	/// Same as [`load`](Report::load) but a missing file is an empty report.
	pub fn load_or_default(path: &Path) -> crate::Result<Self> {
		if path.exists() {
			Self::load(path)
		} else {
			log::info!("No report at {}, starting a new one", path.display());
			Ok(Self::default())
		}
	}

	pub fn from_json(text: &str) -> crate::Result<Self> {
		let value: serde_json::Value = serde_json::from_str(text)?;

		let schema = compiled_schema()?;
		if let Err(errors) = schema.validate(&value) {
			let messages: Vec<String> = errors.map(|e| format!("{}: {}", e.instance_path, e)).collect();
			return Err(crate::Error::Validation(messages.join("; ")));
		}

		Ok(serde_json::from_value(value)?)
	}

	/// Indented JSON with sorted keys.
	pub fn to_json(&self) -> crate::Result<String> {
		/* Struct fields serialize in declaration order, a `Value` map is sorted. */
		let value = serde_json::to_value(self)?;
		let mut out = Vec::new();
		let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
		let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
		value.serialize(&mut ser)?;
		out.push(b'\n');
		String::from_utf8(out).map_err(|e| crate::Error::Validation(e.to_string()))
	}

	pub fn save(&self, path: &Path) -> crate::Result<()> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(path, self.to_json()?)?;
		log::info!("Wrote report to {}", path.display());
		Ok(())
	}

	/// Records packages named by the user, they are built as plain requirements.
	pub fn add_user_packages<I, S>(&mut self, packages: I)
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let entry = self.repos.entry(USER_REPO.to_string()).or_default();
		let branch = entry
			.branches
			.entry(USER_BRANCH.to_string())
			.or_insert_with(|| BranchEntry::Resolved(ResolvedBranch::default()));
		if let BranchEntry::Resolved(resolved) = branch {
			let section = resolved.requirements.entry(BASE_SECTION.to_string()).or_default();
			section.extend(packages.into_iter().map(Into::into).filter(|p: &String| !p.trim().is_empty()));
			section.sort();
			section.dedup();
		}
	}

	pub fn insert_branch(&mut self, repo: &str, git_url: Option<&str>, reference: &str, entry: BranchEntry) {
		let repo = self.repos.entry(repo.to_string()).or_default();
		if repo.git_url.is_none() {
			repo.git_url = git_url.map(str::to_string);
		}
		repo.branches.insert(reference.to_string(), entry);
	}

	pub fn add_release(&mut self, repo: &str, git_url: Option<&str>, release: String) {
		let repo = self.repos.entry(repo.to_string()).or_default();
		if repo.git_url.is_none() {
			repo.git_url = git_url.map(str::to_string);
		}
		if !repo.releases.contains(&release) {
			repo.releases.push(release);
			repo.releases.sort();
		}
	}

	pub fn resolved_branches(&self) -> impl Iterator<Item = (&str, &str, &ResolvedBranch)> {
		self.repos.iter().flat_map(|(name, repo)| {
			repo.branches.iter().filter_map(move |(reference, entry)| match entry {
				BranchEntry::Resolved(r) => Some((name.as_str(), reference.as_str(), r)),
				_ => None,
			})
		})
	}

	/// Every requirement of every resolved branch.
	pub fn requirement_strings(&self) -> BTreeSet<String> {
		self.resolved_branches().flat_map(|(_, _, b)| b.requirement_strings()).collect()
	}

	/// Every `pip_install_url` of every resolved branch.
	pub fn install_urls(&self) -> BTreeSet<String> {
		self.resolved_branches().filter_map(|(_, _, b)| b.pip_install_url.clone()).collect()
	}

	pub fn release_urls(&self) -> BTreeSet<String> {
		self.repos.values().flat_map(|r| r.releases.iter().cloned()).collect()
	}

	/// Links of pending entries. Unparseable entries are logged and left alone.
	pub fn pending_links(&self) -> Vec<GitLink> {
		let mut links = Vec::new();
		for (name, repo) in &self.repos {
			for (reference, entry) in &repo.branches {
				if let BranchEntry::Pending { original_data } = entry {
					match GitLink::parse_with_default_ref(original_data, reference) {
						Ok(l) => links.push(l),
						Err(e) => log::warn!("Pending entry {}@{} can't be resolved: {}", name, reference, e),
					}
				}
			}
		}
		links
	}

	/// Removes every pending entry that parses and returns their links, so walking them doesn't leave
	/// the pending entry behind under a different repository name.
	pub fn take_pending_links(&mut self) -> Vec<GitLink> {
		let links = self.pending_links();
		for repo in self.repos.values_mut() {
			repo.branches.retain(|reference, entry| match entry {
				BranchEntry::Pending { original_data } => GitLink::parse_with_default_ref(original_data, reference).is_err(),
				_ => true,
			});
		}
		self.repos.retain(|_, repo| repo.git_url.is_some() || !repo.branches.is_empty() || !repo.releases.is_empty());
		links
	}

	/// Git urls of every repository together with their first recorded ref.
	pub fn repositories(&self) -> impl Iterator<Item = (&str, &str, Option<&str>)> {
		self.repos.iter().filter_map(|(name, repo)| {
			let url = repo.git_url.as_deref()?;
			Some((name.as_str(), url, repo.branches.keys().next().map(String::as_str)))
		})
	}

	/// Adds every entry of `other`, replacing branches present in both.
	pub fn merge(&mut self, other: Report) {
		for (name, repo) in other.repos {
			let existing = self.repos.entry(name).or_default();
			if repo.git_url.is_some() {
				existing.git_url = repo.git_url;
			}
			existing.branches.extend(repo.branches);
			for release in repo.releases {
				if !existing.releases.contains(&release) {
					existing.releases.push(release);
				}
			}
			existing.releases.sort();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const SAMPLE: &str = r#"{
		"nova": {
			"git_url": "https://git.openstack.org/openstack/nova",
			"branches": {
				"stable/kilo": {
					"requirements": {
						"base_requirements": ["six>=1.9.0"],
						":python_version=='2.7'": ["futures"]
					},
					"pip_install_url": "git+https://git.openstack.org/openstack/nova@stable/kilo"
				},
				"broken": { "skipped": "conflict" },
				"master": { "original_data": "git+https://git.openstack.org/openstack/nova@master" }
			},
			"releases": ["git+https://git.openstack.org/openstack/nova@2015.1.0"]
		}
	}"#;

	#[test]
	fn report_loads_every_branch_kind() {
		let report = Report::from_json(SAMPLE).unwrap();
		let nova = &report.repos["nova"];
		assert!(matches!(nova.branches["broken"], BranchEntry::Skipped { .. }));
		assert!(matches!(nova.branches["stable/kilo"], BranchEntry::Resolved(_)));
		assert!(matches!(nova.branches["master"], BranchEntry::Pending { .. }));
		assert_eq!(report.pending_links()[0].reference, "master");
	}

	#[test]
	fn report_take_pending_links_removes_entries() {
		let mut report = Report::from_json(SAMPLE).unwrap();
		let links = report.take_pending_links();
		assert_eq!(links.len(), 1);
		assert!(!report.repos["nova"].branches.contains_key("master"));
		assert!(report.repos["nova"].branches.contains_key("broken"));
		assert!(report.pending_links().is_empty());
	}

	#[test]
	fn report_requirement_strings_carry_markers() {
		let report = Report::from_json(SAMPLE).unwrap();
		let reqs: Vec<_> = report.requirement_strings().into_iter().collect();
		assert_eq!(reqs, vec!["futures;python_version=='2.7'", "six>=1.9.0"]);
	}

	#[test]
	fn report_json_has_sorted_keys() {
		let report = Report::from_json(SAMPLE).unwrap();
		let json = report.to_json().unwrap();
		let branches = json.find("\"branches\"").unwrap();
		let git_url = json.find("\"git_url\"").unwrap();
		let releases = json.find("\"releases\"").unwrap();
		assert!(branches < git_url && git_url < releases);
		assert_eq!(Report::from_json(&json).unwrap(), report);
	}

	#[test]
	fn report_schema_rejects_bad_shape() {
		let err = Report::from_json(r#"{"nova": {"branches": {"master": {"requirements": "six"}}}}"#).unwrap_err();
		assert!(matches!(err, crate::Error::Validation(_)));
	}

	#[test]
	fn report_user_packages_are_deduplicated() {
		let mut report = Report::new();
		report.add_user_packages(["six", "pbr", "six"]);
		report.add_user_packages(vec!["  ".to_string()]);
		let reqs: Vec<_> = report.requirement_strings().into_iter().collect();
		assert_eq!(reqs, vec!["pbr", "six"]);
	}

	#[test]
	fn report_merge_replaces_branches() {
		let mut report = Report::from_json(SAMPLE).unwrap();
		let mut other = Report::new();
		other.insert_branch("nova", None, "master", BranchEntry::Resolved(ResolvedBranch::default()));
		other.add_release("nova", None, "git+https://git.openstack.org/openstack/nova@2015.1.1".into());
		report.merge(other);

		let nova = &report.repos["nova"];
		assert!(matches!(nova.branches["master"], BranchEntry::Resolved(_)));
		assert_eq!(nova.releases.len(), 2);
		assert!(nova.git_url.is_some());
		assert!(report.pending_links().is_empty());
	}

	#[test]
	fn report_schema_compiles() {
		compiled_schema().unwrap();
	}
}
