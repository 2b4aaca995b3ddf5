//! Splitting of requirement file text into sections.
//!
//! Understands the subset of the pip requirement file format found in the wild:
//! - `#` comments, either a whole line or trailing after whitespace.
//! - `[name]` section headers, as written by `setup.py egg_info` into `requires.txt`.
//! - `req ; a or b` environment markers, recorded under the derived sections `:a` and `:b`.
//! - `-e`/`--editable` and bare `git+` links, queued for the walker.
//! - `-r`/`--requirement` includes, returned for the walker to scan.
//!
//! Other pip options are ignored.

use std::collections::{BTreeMap, BTreeSet};

use crate::git_link::GitLink;
use crate::requirement::RequirementSpec;

/// Where the scanned text came from.
#[derive(Debug, Clone, Copy)]
pub struct ScanContext<'a> {
	/// Section used for lines before any `[section]` header.
	pub default_section: &'a str,
	/// The repository being scanned, needed to resolve local `-e <path>` plugin packages.
	pub parent: Option<&'a GitLink>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedRequirements {
	pub sections: BTreeMap<String, BTreeSet<String>>,
	/// Links found through `-e` and `git+` lines, in file order.
	pub sub_links: Vec<GitLink>,
	/// Paths of `-r` includes, relative to the scanned file.
	pub includes: Vec<String>,
}

impl ScannedRequirements {
	/// Adds the contents of another scan, keeping link order.
	pub fn merge(&mut self, other: ScannedRequirements) {
		for (section, requirements) in other.sections {
			self.sections.entry(section).or_default().extend(requirements);
		}
		for link in other.sub_links {
			if !self.sub_links.contains(&link) {
				self.sub_links.push(link);
			}
		}
		self.includes.extend(other.includes);
	}

	pub fn is_empty(&self) -> bool {
		self.sections.values().all(BTreeSet::is_empty) && self.sub_links.is_empty()
	}
}

pub fn scan(text: &str, context: ScanContext<'_>) -> ScannedRequirements {
	let mut scanned = ScannedRequirements::default();
	let mut section = context.default_section.to_string();

	for line in text.lines() {
		let line = strip_comment(line).trim();
		if line.is_empty() {
			continue;
		}

		if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
			section = name.trim().to_string();
			continue;
		}

		if let Some(target) = option_value(line, &["-e", "--editable"]) {
			if let Some(link) = editable_link(target, &context) {
				scanned.sub_links.push(link);
			}
			continue;
		}

		if line.starts_with("git+") {
			match GitLink::parse(line) {
				Ok(link) => scanned.sub_links.push(link),
				Err(e) => log::warn!("Skipping git requirement: {}", e),
			}
			continue;
		}

		if let Some(include) = option_value(line, &["-r", "--requirement"]) {
			scanned.includes.push(include.to_string());
			continue;
		}

		if line.starts_with('-') {
			log::debug!("Ignoring pip option `{}`", line);
			continue;
		}

		let (requirement, marker) = match line.split_once(';') {
			Some((r, m)) => (r, Some(m)),
			None => (line, None),
		};
		let requirement: String = requirement.chars().filter(|c| !c.is_whitespace()).collect();
		if let Err(e) = RequirementSpec::parse(&requirement) {
			log::warn!("Skipping malformed requirement `{}`: {}", line, e);
			continue;
		}

		match marker {
			Some(marker) => {
				for condition in marker.split(" or ") {
					let condition: String = condition.chars().filter(|c| !c.is_whitespace()).collect();
					if !condition.is_empty() {
						scanned.sections.entry(format!(":{}", condition)).or_default().insert(requirement.clone());
					}
				}
			},
			None => {
				scanned.sections.entry(section.clone()).or_default().insert(requirement);
			},
		}
	}

	scanned
}

/// Removes a `#` comment which starts the line or follows whitespace.
fn strip_comment(line: &str) -> &str {
	let bytes = line.as_bytes();
	for (i, b) in bytes.iter().enumerate() {
		if *b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
			return &line[..i];
		}
	}
	line
}

/// Returns the argument of `line` when it is one of `flags`, written as `-f value`, `--flag value` or `--flag=value`.
fn option_value<'l>(line: &'l str, flags: &[&str]) -> Option<&'l str> {
	flags.iter().find_map(|flag| {
		let rest = line.strip_prefix(flag)?;
		if let Some(value) = rest.strip_prefix('=') {
			Some(value.trim())
		} else if rest.starts_with(char::is_whitespace) {
			Some(rest.trim())
		} else {
			None
		}
	})
}

fn editable_link(target: &str, context: &ScanContext<'_>) -> Option<GitLink> {
	if target.ends_with('.') {
		log::debug!("Skipping editable install of the current directory `{}`", target);
		return None;
	}

	if target.contains("git+") {
		return match GitLink::parse(target) {
			Ok(link) => Some(link),
			Err(e) => {
				log::warn!("Skipping editable link: {}", e);
				None
			},
		};
	}

	let parent = match context.parent {
		Some(p) => p,
		None => {
			log::warn!("Skipping local editable `{}`, there is no repository to resolve it against", target);
			return None;
		},
	};
	match GitLink::for_subdirectory(&parent.url, &parent.reference, target) {
		Ok(link) => Some(link),
		Err(e) => {
			log::warn!("Skipping local editable `{}`: {}", target, e);
			None
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn base() -> ScanContext<'static> {
		ScanContext { default_section: "base_requirements", parent: None }
	}

	fn section<'s>(s: &'s ScannedRequirements, name: &str) -> Vec<&'s str> {
		s.sections.get(name).map(|v| v.iter().map(String::as_str).collect()).unwrap_or_default()
	}

	#[test]
	fn scanner_strips_comments_and_whitespace() {
		let s = scan("# header\n\nfoo >= 1.0  # pinned\nbar\n", base());
		assert_eq!(section(&s, "base_requirements"), vec!["bar", "foo>=1.0"]);
	}

	#[test]
	fn scanner_sections_and_markers() {
		let s = scan("six\n[test]\nmock\nfutures ; python_version=='2.7' or python_version=='2.6'\n", base());
		assert_eq!(section(&s, "base_requirements"), vec!["six"]);
		assert_eq!(section(&s, "test"), vec!["mock"]);
		assert_eq!(section(&s, ":python_version=='2.7'"), vec!["futures"]);
		assert_eq!(section(&s, ":python_version=='2.6'"), vec!["futures"]);
	}

	#[test]
	fn scanner_queues_links() {
		let s = scan("-e git+https://host/org/lib@main#egg=lib\ngit+https://host/org/other@v1\n-e .\n", base());
		let names: Vec<_> = s.sub_links.iter().map(|l| l.name.as_str()).collect();
		assert_eq!(names, vec!["lib", "other"]);
		assert!(s.sections.is_empty());
	}

	#[test]
	fn scanner_resolves_local_plugins_against_parent() {
		let parent = GitLink::parse("git+https://host/org/app@stable").unwrap();
		let s = scan("--editable plugins/auth\n", ScanContext { default_section: "base_requirements", parent: Some(&parent) });
		assert_eq!(s.sub_links[0].original, "git+https://host/org/app@stable#egg=auth&subdirectory=plugins/auth");
	}

	#[test]
	fn scanner_local_plugin_without_parent_is_skipped() {
		assert!(scan("-e plugins/auth\n", base()).sub_links.is_empty());
	}

	#[test]
	fn scanner_returns_includes_and_ignores_options() {
		let s = scan("-r other.txt\n--index-url https://pypi\n-c constraints.txt\nfoo\n", base());
		assert_eq!(s.includes, vec!["other.txt"]);
		assert_eq!(section(&s, "base_requirements"), vec!["foo"]);
	}

	#[test]
	fn scanner_hash_in_fragment_is_not_comment() {
		assert_eq!(strip_comment("git+https://h/o/r@m#egg=r # note"), "git+https://h/o/r@m#egg=r ");
	}

	#[test]
	fn scanner_merge_dedupes_links() {
		let mut a = scan("git+https://host/org/x@1\nfoo\n", base());
		a.merge(scan("git+https://host/org/x@1\nbar\n", base()));
		assert_eq!(a.sub_links.len(), 1);
		assert_eq!(section(&a, "base_requirements"), vec!["bar", "foo"]);
	}
}
