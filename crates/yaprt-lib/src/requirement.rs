//! Textual python requirements, `name[extras]<constraints>;<marker>`.

pub mod version;
pub use version::LooseVersion;

use std::sync::OnceLock;

use regex::Regex;

/// A version comparison operator.
///
/// The declaration order is the order constraints are written back out in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operator {
	/// `>=`
	Ge,
	/// `<=`
	Le,
	/// `>`
	Gt,
	/// `<`
	Lt,
	/// `==`
	Eq,
	/// `~=`
	Compatible,
	/// `!=`
	Ne,
}

impl Operator {
	/// Two character operators are checked before their one character prefixes.
	const PARSE_ORDER: [Operator; 7] = [
		Operator::Ge,
		Operator::Le,
		Operator::Eq,
		Operator::Ne,
		Operator::Compatible,
		Operator::Gt,
		Operator::Lt,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			Operator::Ge => ">=",
			Operator::Le => "<=",
			Operator::Gt => ">",
			Operator::Lt => "<",
			Operator::Eq => "==",
			Operator::Compatible => "~=",
			Operator::Ne => "!=",
		}
	}

	/// Splits a leading operator off `text`.
	fn strip(text: &str) -> Option<(Operator, &str)> {
		Self::PARSE_ORDER
			.iter()
			.find_map(|op| text.strip_prefix(op.as_str()).map(|rest| (*op, rest)))
	}
}

impl std::fmt::Display for Operator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
	pub operator: Operator,
	pub version: String,
}

impl std::fmt::Display for Constraint {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}{}", self.operator, self.version)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementSpec {
	/// The name as written.
	pub name: String,
	pub extras: Vec<String>,
	pub constraints: Vec<Constraint>,
	pub marker: Option<String>,
}

fn name_regex() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| {
		Regex::new(r"^(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)(?:\[(?P<extras>[^\]]*)\])?(?P<rest>.*)$")
			.unwrap_or_else(|e| unreachable!("requirement name pattern is valid: {}", e))
	})
}

fn version_regex() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| {
		Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.*+!_-]*$")
			.unwrap_or_else(|e| unreachable!("version pattern is valid: {}", e))
	})
}

impl RequirementSpec {
	/// Parses a single requirement. Whitespace outside of the marker is ignored.
	///
	/// # Errors
	/// [`Parse`](crate::Error::Parse) when the name is missing or a constraint has no operator or version.
	pub fn parse(text: &str) -> crate::Result<Self> {
		use crate::Error::Parse;

		let (requirement, marker) = match text.split_once(';') {
			Some((r, m)) => (r, Some(m.trim()).filter(|m| !m.is_empty()).map(str::to_string)),
			None => (text, None),
		};
		let requirement: String = requirement.chars().filter(|c| !c.is_whitespace()).collect();

		let captures = name_regex()
			.captures(&requirement)
			.ok_or_else(|| Parse(format!("requirement [ {} ] has no package name", text.trim())))?;

		let name = captures["name"].to_string();
		let extras = captures
			.name("extras")
			.map(|e| {
				e.as_str()
					.split(',')
					.filter(|x| !x.is_empty())
					.map(str::to_string)
					.collect()
			})
			.unwrap_or_default();

		let rest = &captures["rest"];
		let rest = rest.strip_prefix('(').and_then(|r| r.strip_suffix(')')).unwrap_or(rest);

		let mut constraints = Vec::new();
		if !rest.is_empty() {
			for piece in rest.split(',') {
				let (operator, version) = Operator::strip(piece)
					.ok_or_else(|| Parse(format!("requirement [ {} ] has a constraint without an operator: `{}`", text.trim(), piece)))?;
				if !version_regex().is_match(version) {
					return Err(Parse(format!("requirement [ {} ] has an invalid version: `{}`", text.trim(), piece)));
				}
				constraints.push(Constraint { operator, version: version.to_string() });
			}
		}

		Ok(RequirementSpec { name, extras, constraints, marker })
	}

	pub fn normalized_name(&self) -> String {
		normalize_name(&self.name)
	}
}

impl std::str::FromStr for RequirementSpec {
	type Err = crate::Error;
	fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl std::fmt::Display for RequirementSpec {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.name)?;
		if !self.extras.is_empty() {
			write!(f, "[{}]", self.extras.join(","))?;
		}
		let constraints: Vec<String> = self.constraints.iter().map(Constraint::to_string).collect();
		f.write_str(&constraints.join(","))?;
		if let Some(marker) = &self.marker {
			write!(f, ";{}", marker)?;
		}
		Ok(())
	}
}

/// Package names compare case insensitively with `_` and `.` equivalent to `-`.
pub fn normalize_name(name: &str) -> String {
	name.trim().to_lowercase().replace(['_', '.'], "-")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn requirement_parses_constraints() {
		let req = RequirementSpec::parse("Foo_Bar >= 1.0, <2.0").unwrap();
		assert_eq!(req.name, "Foo_Bar");
		assert_eq!(req.normalized_name(), "foo-bar");
		assert_eq!(req.constraints, vec![
			Constraint { operator: Operator::Ge, version: "1.0".into() },
			Constraint { operator: Operator::Lt, version: "2.0".into() },
		]);
		assert_eq!(req.to_string(), "Foo_Bar>=1.0,<2.0");
	}

	#[test]
	fn requirement_parses_extras_and_marker() {
		let req = RequirementSpec::parse("requests[security,socks]~=2.4;python_version<'3.0'").unwrap();
		assert_eq!(req.extras, vec!["security", "socks"]);
		assert_eq!(req.constraints[0].operator, Operator::Compatible);
		assert_eq!(req.marker.as_deref(), Some("python_version<'3.0'"));
	}

	#[test]
	fn requirement_parenthesized_constraints() {
		let req = RequirementSpec::parse("six (>=1.9.0)").unwrap();
		assert_eq!(req.constraints[0].to_string(), ">=1.9.0");
	}

	#[test]
	fn requirement_bare_name() {
		let req = RequirementSpec::parse("pbr").unwrap();
		assert!(req.constraints.is_empty());
		assert_eq!(req.marker, None);
	}

	#[test]
	fn requirement_longest_operator_wins() {
		let req = RequirementSpec::parse("a<=1,!=0.5,>0.1").unwrap();
		let ops: Vec<_> = req.constraints.iter().map(|c| c.operator).collect();
		assert_eq!(ops, vec![Operator::Le, Operator::Ne, Operator::Gt]);
	}

	#[test] fn requirement_missing_version_is_error() { assert!(RequirementSpec::parse("foo>=").is_err()) }
	#[test] fn requirement_missing_operator_is_error() { assert!(RequirementSpec::parse("foo>=1.0,2.0").is_err()) }
	#[test] fn requirement_missing_name_is_error() { assert!(RequirementSpec::parse(">=1.0").is_err()) }
	#[test] fn requirement_garbage_is_error() { assert!(RequirementSpec::parse("foo@1.0").is_err()) }
}
