//! Parsing of pip style git links, `git+<url>@<ref>#egg=<name>&subdirectory=<path>`.

use serde::{Serialize, Deserialize};

/// Ref used by [`GitLink::parse_with_default_ref`] callers when none is specified.
pub const DEFAULT_REF: &str = "master";

/// Fragment key which turns off requirement discovery for a repository.
pub const IGNORE_REQUIREMENTS_KEY: &str = "yaprtignorerequirements";

/// A parsed git link.
///
/// The original text is kept verbatim so the link can be reproduced exactly in reports and install commands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitLink {
	/// Lowercased basename of the url without a `.git` suffix.
	pub name: String,
	pub reference: String,
	pub subdirectory: Option<String>,
	pub egg: Option<String>,
	/// The url without the `git+` prefix, ref and fragment.
	pub url: String,
	pub original: String,
}

impl GitLink {
	/// Parses a link which must specify a ref.
	///
	/// # Errors
	/// [`Parse`](crate::Error::Parse) when there is no `+` scheme prefix, no `@<ref>` or no url path.
	pub fn parse(text: &str) -> crate::Result<Self> {
		Self::parse_inner(text, None)
	}

	/// Parses a link, using `default_ref` when the link has no `@<ref>`.
	pub fn parse_with_default_ref(text: &str, default_ref: &str) -> crate::Result<Self> {
		Self::parse_inner(text, Some(default_ref))
	}

	fn parse_inner(text: &str, default_ref: Option<&str>) -> crate::Result<Self> {
		use crate::Error::Parse;

		let original = text.trim();
		let (_, rest) = original.split_once('+').ok_or_else(|| Parse(format!("git link [ {} ] has no `+` scheme prefix", original)))?;
		let (location, fragment) = match rest.split_once('#') {
			Some((l, f)) => (l, Some(f)),
			None => (rest, None),
		};

		/* The ref separator is the first `@` of the path, `git@host` style user info is not a ref. */
		let path_start = match location.find("://") {
			Some(i) => location[i + 3..].find('/').map(|j| i + 3 + j).unwrap_or(location.len()),
			None => location.find(':').unwrap_or(0),
		};
		let (url, reference) = match location[path_start..].find('@') {
			Some(i) => {
				let at = path_start + i;
				(&location[..at], location[at + 1..].to_string())
			},
			None => match default_ref {
				Some(d) => {
					log::debug!("git link [ {} ] has no ref, using `{}`", original, d);
					(location, d.to_string())
				},
				None => return Err(Parse(format!("git link [ {} ] has no `@<ref>`", original))),
			},
		};

		if reference.is_empty() {
			return Err(Parse(format!("git link [ {} ] has an empty ref", original)));
		}

		let name = url_basename(url);
		if name.is_empty() || !url.contains('/') {
			return Err(Parse(format!("git link [ {} ] has no repository path", original)));
		}

		let mut link = GitLink {
			name,
			reference,
			subdirectory: None,
			egg: None,
			url: url.to_string(),
			original: original.to_string(),
		};

		if let Some(fragment) = fragment {
			link.subdirectory = fragment_value(fragment, "subdirectory")
				.map(|s| s.trim_matches('/').to_string())
				.filter(|s| !s.is_empty());
			link.egg = fragment_value(fragment, "egg").map(str::to_string).filter(|s| !s.is_empty());
		}

		Ok(link)
	}

	/// Builds the link for a plugin package living in a subdirectory of the repository at `url`.
	pub fn for_subdirectory(url: &str, reference: &str, subdirectory: &str) -> crate::Result<Self> {
		let subdirectory = subdirectory.trim_start_matches("./").trim_matches('/');
		let egg = path_basename(subdirectory);
		Self::parse(&format!("git+{}@{}#egg={}&subdirectory={}", url, reference, egg, subdirectory))
	}

	/// The key this link's repository is stored under in a [`Report`](crate::report::Report).
	///
	/// Plugin packages get a `_plugin_pkg_<dir>` suffix so they don't collide with their parent repository.
	pub fn report_name(&self) -> String {
		match &self.subdirectory {
			Some(s) => format!("{}_plugin_pkg_{}", self.name, path_basename(s)),
			None => self.name.clone(),
		}
	}

	/// The name of the python package this link installs.
	///
	/// Uses the `egg=` fragment when present and the repository name otherwise.
	pub fn package_name(&self) -> &str {
		self.egg.as_deref().unwrap_or(&self.name)
	}

	/// Returns the value of a fragment key from the original text.
	pub fn fragment(&self, key: &str) -> Option<&str> {
		let (_, fragment) = self.original.split_once('#')?;
		fragment_value(fragment, key)
	}

	/// Checks for the `yaprtignorerequirements=true` escape hatch.
	pub fn ignores_requirements(&self) -> bool {
		self.fragment(IGNORE_REQUIREMENTS_KEY).map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false)
	}

	/// The same repository and subdirectory pinned to another ref.
	pub fn with_reference(&self, reference: &str) -> crate::Result<Self> {
		let mut text = format!("git+{}@{}", self.url, reference);
		if let Some((_, fragment)) = self.original.split_once('#') {
			text.push('#');
			text.push_str(fragment);
		}
		Self::parse(&text)
	}

	/// Links pointing at a gerrit change or a comma separated patch series need an integration branch.
	pub fn is_patch_series(&self) -> bool {
		self.reference.contains(',') || self.reference.contains("refs/changes/")
	}

	pub fn patch_refs(&self) -> Vec<&str> {
		self.reference.split(',').map(str::trim).filter(|r| !r.is_empty()).collect()
	}
}

impl std::str::FromStr for GitLink {
	type Err = crate::Error;
	fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl std::fmt::Display for GitLink {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.original)
	}
}

fn fragment_value<'a>(fragment: &'a str, key: &str) -> Option<&'a str> {
	fragment
		.split('&')
		.filter_map(|pair| pair.split_once('='))
		.find(|(k, _)| k.trim() == key)
		.map(|(_, v)| v.trim())
}

fn url_basename(url: &str) -> String {
	let base = path_basename(url.trim_end_matches('/'));
	base.strip_suffix(".git").unwrap_or(base).to_lowercase()
}

pub(crate) fn path_basename(path: &str) -> &str {
	let path = path.trim_end_matches('/');
	path.rsplit('/').next().unwrap_or(path)
}
