use serde::*;

/// A loosely ordered version string.
///
/// Versions are split into numeric and alphabetic components. Components are compared positionally,
/// numbers numerically (of any length) and text lexically. Trailing zeros of the leading release
/// numbers are ignored, so `1.0` and `1.0.0` compare equal and `1.0a1` equals `1.0.0a1`.
///
/// A text component sorts before a number or the end of the version (`1.0a1 < 1.0`). A post release
/// marker sorts after the end of the version but before any further number, so
/// `1.0 < 1.0.post1 < 1.0.1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LooseVersion {
	raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Component<'a> {
	/// Digits without leading zeros, empty for zero.
	Number(&'a str),
	Text(&'a str),
}

const POST_RELEASE_MARKERS: [&str; 3] = ["post", "rev", "r"];

impl LooseVersion {
	pub fn new(version: &str) -> Self {
		LooseVersion { raw: version.trim().to_string() }
	}

	pub fn as_str(&self) -> &str {
		&self.raw
	}

	fn components(&self) -> Vec<Component<'_>> {
		fn push_run<'a>(out: &mut Vec<Component<'a>>, run: &'a str, numeric: bool) {
			if run.is_empty() {
				return;
			}
			if numeric {
				out.push(Component::Number(run.trim_start_matches('0')))
			} else {
				out.push(Component::Text(run))
			}
		}

		let s = self.raw.strip_prefix(['v', 'V']).unwrap_or(&self.raw);
		let mut out = Vec::new();
		for part in s.split(['.', '-', '_', '+', '!']) {
			let mut start = 0;
			let mut numeric = None;
			for (i, c) in part.char_indices() {
				let is_digit = c.is_ascii_digit();
				match numeric {
					Some(n) if n != is_digit => {
						push_run(&mut out, &part[start..i], n);
						start = i;
					},
					_ => {},
				}
				numeric = Some(is_digit);
			}
			if let Some(n) = numeric {
				push_run(&mut out, &part[start..], n);
			}
		}

		let release = out.iter().take_while(|c| matches!(c, Component::Number(_))).count();
		let significant = out[..release].iter().rposition(|c| *c != Component::Number("")).map_or(0, |i| i + 1);
		out.drain(significant..release);
		out
	}
}

fn compare_text(lhs: &str, rhs: &str) -> std::cmp::Ordering {
	lhs.to_ascii_lowercase().cmp(&rhs.to_ascii_lowercase())
}

fn compare_numbers(lhs: &str, rhs: &str) -> std::cmp::Ordering {
	lhs.len().cmp(&rhs.len()).then_with(|| lhs.cmp(rhs))
}

fn is_post_release(text: &str) -> bool {
	POST_RELEASE_MARKERS.iter().any(|m| text.eq_ignore_ascii_case(m))
}

impl Ord for LooseVersion {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		use std::cmp::Ordering;

		let lhs = self.components();
		let rhs = other.components();

		for i in 0..lhs.len().max(rhs.len()) {
			let ord = match (lhs.get(i), rhs.get(i)) {
				(Some(Component::Number(a)), Some(Component::Number(b))) => compare_numbers(a, b),
				(Some(Component::Text(a)), Some(Component::Text(b))) => compare_text(a, b),
				(Some(Component::Number(_)), Some(Component::Text(_))) => Ordering::Greater,
				(Some(Component::Text(_)), Some(Component::Number(_))) => Ordering::Less,
				(Some(Component::Number(a)), None) => compare_numbers(a, ""),
				(None, Some(Component::Number(b))) => compare_numbers("", b),
				(Some(Component::Text(a)), None) => if is_post_release(a) { Ordering::Greater } else { Ordering::Less },
				(None, Some(Component::Text(b))) => if is_post_release(b) { Ordering::Less } else { Ordering::Greater },
				(None, None) => Ordering::Equal,
			};
			if ord != Ordering::Equal {
				return ord;
			}
		}
		Ordering::Equal
	}
}

impl PartialOrd for LooseVersion {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl PartialEq for LooseVersion {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == std::cmp::Ordering::Equal
	}
}

impl Eq for LooseVersion {}

impl std::fmt::Display for LooseVersion {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.raw)
	}
}

impl From<&str> for LooseVersion {
	fn from(s: &str) -> Self {
		Self::new(s)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn v(s: &str) -> LooseVersion { LooseVersion::new(s) }

	#[test] fn loose_version_are_not_compared_lexically() { assert!(v("1.9") < v("1.10")) }
	#[test] fn loose_version_prerelease_is_lt_release() { assert!(v("1.0a1") < v("1.0")) }
	#[test] fn loose_version_prereleases_are_ordered() { assert!(v("1.0a1") < v("1.0b2") && v("1.0b2") < v("1.0rc1")) }
	#[test] fn loose_version_prerelease_is_lt_next_patch() { assert!(v("1.0a1") < v("1.0.1")) }
	#[test] fn loose_version_short_version_is_lt() { assert!(v("1.2") < v("1.2.3")) }
	#[test] fn loose_version_trailing_zero_is_eq() { assert!(v("1.0") == v("1.0.0")) }
	#[test] fn loose_version_identical_are_eq() { assert!(v("2.3.4") == v("2.3.4")) }
	#[test] fn loose_version_post_release_is_gt() { assert!(v("1.0.post1") > v("1.0") && v("1.0.post1") < v("1.0.1")) }
	#[test] fn loose_version_prefix_is_supported() { assert!(v("v1.2.3") < v("v1.2.4")) }
	#[test] fn loose_version_huge_numbers_dont_panic() { assert!(v("99999999999999999999999") > v("1")) }
	#[test] fn loose_version_huge_numbers_are_ordered() { assert!(v("1.20150101000000000001") > v("1.20150101000000000000") && v("1.0099999999999999999999") < v("1.100000000000000000000")) }
	#[test] fn loose_version_leading_zeros_are_ignored() { assert!(v("1.01") == v("1.1") && v("2015.07") > v("2015.6")) }
	#[test] fn loose_version_post_release_is_lt_any_later_number() { assert!(v("1.0.post1") < v("1.0.5") && v("1.0.0.post2") > v("1.0.post1") && v("1.0.0.1") > v("1.0.post3")) }
	#[test] fn loose_version_padded_prerelease_is_eq() { assert!(v("1.0a1") == v("1.0.0a1") && v("1.0a1") < v("1.0.1")) }

	#[test]
	fn loose_version_sorts_like_a_package_index() {
		let mut versions: Vec<_> = ["1.10", "1.0", "1.9", "1.0a1", "1.0.post1", "0.9"].into_iter().map(v).collect();
		versions.sort();
		let sorted: Vec<_> = versions.iter().map(LooseVersion::as_str).collect();
		assert_eq!(sorted, vec!["0.9", "1.0a1", "1.0", "1.0.post1", "1.9", "1.10"]);
	}
}
