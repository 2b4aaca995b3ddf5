//! Reconciles every version constraint observed for a package into one requirement.
//!
//! Constraints are bucketed by operator and each bucket is reduced to one value by the
//! [`DuplicateHandling`] policy, `!=` keeps all of its values. The reduced bounds are then checked
//! against each other:
//! - of `>=`/`>` and of `<=`/`<` only one survives,
//! - a lower bound above the upper bound is [`Unsatisfiable`](crate::Error::Unsatisfiable),
//! - equal inclusive bounds collapse into `==`.
//!
//! `==` wins outright, then `~=`. Otherwise the surviving constraints are joined in [`Operator`] order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Serialize, Deserialize};

use crate::requirement::{normalize_name, LooseVersion, Operator, RequirementSpec};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateHandling {
	/// Keep the tightest value of every operator.
	#[default]
	Max,
	/// Keep the loosest value of every operator.
	Min,
}

impl std::str::FromStr for DuplicateHandling {
	type Err = crate::Error;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_lowercase().as_str() {
			"max" => Ok(DuplicateHandling::Max),
			"min" => Ok(DuplicateHandling::Min),
			_ => Err(crate::Error::Parse(format!("unknown duplicate handling `{}`, expected `max` or `min`", s))),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerOptions {
	pub duplicate_handling: DuplicateHandling,
	/// When disabled requirements are only sorted and deduplicated.
	pub version_sanity: bool,
}

impl Default for ReconcilerOptions {
	fn default() -> Self {
		Self { duplicate_handling: DuplicateHandling::Max, version_sanity: true }
	}
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
	options: ReconcilerOptions,
}

/// Every occurrence of one package.
#[derive(Debug, Default)]
struct Occurrences {
	/// First spelling seen.
	name: String,
	extras: BTreeSet<String>,
	buckets: BTreeMap<Operator, Vec<LooseVersion>>,
	markers: BTreeSet<String>,
	unconditional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
	operator: Operator,
	version: LooseVersion,
}

impl Bound {
	fn inclusive(&self) -> bool {
		matches!(self.operator, Operator::Ge | Operator::Le)
	}
}

impl std::fmt::Display for Bound {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}{}", self.operator, self.version)
	}
}

impl Reconciler {
	pub fn new(options: ReconcilerOptions) -> Self {
		Self { options }
	}

	pub fn options(&self) -> &ReconcilerOptions {
		&self.options
	}

	/// Reduces `requirements` to one requirement per package, sorted.
	///
	/// # Errors
	/// - [`Parse`](crate::Error::Parse) for a malformed requirement.
	/// - [`Unsatisfiable`](crate::Error::Unsatisfiable) when the bounds of a package don't intersect.
	pub fn reconcile<I, S>(&self, requirements: I) -> crate::Result<Vec<String>>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		if !self.options.version_sanity {
			log::warn!("Version sanity checking has been disabled");
			let raw: BTreeSet<String> = requirements
				.into_iter()
				.map(|r| r.as_ref().trim().to_string())
				.filter(|r| !r.is_empty())
				.collect();
			return Ok(raw.into_iter().collect());
		}

		let mut packages = BTreeMap::<String, Occurrences>::new();
		for requirement in requirements {
			let requirement = requirement.as_ref();
			if requirement.trim().is_empty() {
				continue;
			}
			let spec = RequirementSpec::parse(requirement)?;
			let occurrences = packages.entry(spec.normalized_name()).or_default();
			if occurrences.name.is_empty() {
				occurrences.name = spec.name.clone();
			}
			occurrences.extras.extend(spec.extras);
			for c in spec.constraints {
				occurrences.buckets.entry(c.operator).or_default().push(LooseVersion::new(&c.version));
			}
			match spec.marker {
				Some(marker) => occurrences.markers.extend(split_marker(&marker)),
				None => occurrences.unconditional = true,
			}
		}

		let mut out = BTreeSet::new();
		for occurrences in packages.into_values() {
			let reconciled = self.reconcile_package(occurrences)?;
			log::debug!("Reconciled package: {}", reconciled);
			out.insert(reconciled);
		}
		Ok(out.into_iter().collect())
	}

	fn reduce(&self, operator: Operator, mut versions: Vec<LooseVersion>) -> Vec<LooseVersion> {
		versions.sort();
		versions.dedup();
		let tightest_is_max = matches!(operator, Operator::Ge | Operator::Gt | Operator::Compatible | Operator::Eq);
		let take_max = match self.options.duplicate_handling {
			DuplicateHandling::Max => tightest_is_max,
			DuplicateHandling::Min => !tightest_is_max,
		};
		match operator {
			Operator::Ne => {
				versions.reverse();
				versions
			},
			_ if take_max => versions.pop().into_iter().collect(),
			_ => versions.into_iter().take(1).collect(),
		}
	}

	/// Picks one of two bounds pointing the same way. `higher_is_tighter` is true for lower bounds.
	fn pick_bound(&self, a: Option<Bound>, b: Option<Bound>, higher_is_tighter: bool) -> Option<Bound> {
		let (a, b) = match (a, b) {
			(Some(a), Some(b)) => (a, b),
			(a, b) => return a.or(b),
		};

		/* On equal versions the strict bound is the tighter one. */
		let a_tighter = match a.version.cmp(&b.version) {
			std::cmp::Ordering::Equal => !a.inclusive(),
			std::cmp::Ordering::Greater => higher_is_tighter,
			std::cmp::Ordering::Less => !higher_is_tighter,
		};
		let keep_a = match self.options.duplicate_handling {
			DuplicateHandling::Max => a_tighter,
			DuplicateHandling::Min => !a_tighter,
		};
		if keep_a { Some(a) } else { Some(b) }
	}

	fn reconcile_package(&self, occurrences: Occurrences) -> crate::Result<String> {
		let Occurrences { name, extras, buckets, markers, unconditional } = occurrences;
		log::trace!("Constraints for package {}: {:?}", name, buckets);

		let mut reduced = BTreeMap::<Operator, Vec<LooseVersion>>::new();
		for (operator, versions) in buckets {
			reduced.insert(operator, self.reduce(operator, versions));
		}
		let single = |op: Operator| reduced.get(&op).and_then(|v| v.first()).map(|v| Bound { operator: op, version: v.clone() });

		let mut lower = self.pick_bound(single(Operator::Ge), single(Operator::Gt), true);
		let mut upper = self.pick_bound(single(Operator::Le), single(Operator::Lt), false);
		let mut exact = single(Operator::Eq);
		let compatible = single(Operator::Compatible);

		let mut collapse = false;
		if let (Some(l), Some(u)) = (&lower, &upper) {
			match l.version.cmp(&u.version) {
				std::cmp::Ordering::Greater => {
					return Err(crate::Error::Unsatisfiable { package: name, lower: l.to_string(), upper: u.to_string() });
				},
				std::cmp::Ordering::Equal if l.inclusive() && u.inclusive() => collapse = true,
				std::cmp::Ordering::Equal => {
					return Err(crate::Error::Unsatisfiable { package: name, lower: l.to_string(), upper: u.to_string() });
				},
				std::cmp::Ordering::Less => {},
			}
		}
		if collapse {
			if let Some(l) = lower.take() {
				exact.get_or_insert(Bound { operator: Operator::Eq, version: l.version });
			}
			upper = None;
		}

		let mut constraints = Vec::<String>::new();
		if let Some(exact) = exact {
			let violated = lower.iter().chain(upper.iter()).find(|b| !satisfies(&exact.version, b));
			if let Some(bound) = violated {
				log::warn!("Pin {}{} of package {} violates the bound {}, using the pin", exact.operator, exact.version, name, bound);
			}
			constraints.push(exact.to_string());
		} else if let Some(compatible) = compatible {
			constraints.push(compatible.to_string());
		} else {
			for bound in [&lower, &upper].into_iter().flatten().collect::<BTreeSet<_>>() {
				constraints.push(bound.to_string());
			}
			if let Some(excluded) = reduced.get(&Operator::Ne) {
				constraints.extend(excluded.iter().map(|v| format!("{}{}", Operator::Ne, v)));
			}
		}

		let mut out = name;
		if !extras.is_empty() {
			out.push('[');
			out.push_str(&extras.into_iter().collect::<Vec<_>>().join(","));
			out.push(']');
		}
		out.push_str(&constraints.join(","));
		/* One unconditional occurrence means the package is always needed, its markers are dropped. */
		if !unconditional && !markers.is_empty() {
			out.push(';');
			out.push_str(&markers.into_iter().collect::<Vec<_>>().join(" or "));
		}
		Ok(out)
	}
}

impl PartialOrd for Bound {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

/// Bounds order by operator, the order they are written out in.
impl Ord for Bound {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.operator.cmp(&other.operator).then_with(|| self.version.cmp(&other.version))
	}
}

fn satisfies(version: &LooseVersion, bound: &Bound) -> bool {
	match bound.operator {
		Operator::Ge => version >= &bound.version,
		Operator::Gt => version > &bound.version,
		Operator::Le => version <= &bound.version,
		Operator::Lt => version < &bound.version,
		_ => true,
	}
}

fn split_marker(marker: &str) -> impl Iterator<Item = String> + '_ {
	marker
		.split(" or ")
		.map(|m| m.chars().filter(|c| !c.is_whitespace()).collect::<String>())
		.filter(|m| !m.is_empty())
}

/// The normalized package name of a requirement, `None` when it can't be parsed.
pub fn requirement_name(requirement: &str) -> Option<String> {
	RequirementSpec::parse(requirement).ok().map(|r| normalize_name(&r.name))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn max() -> Reconciler { Reconciler::default() }
	fn min() -> Reconciler { Reconciler::new(ReconcilerOptions { duplicate_handling: DuplicateHandling::Min, version_sanity: true }) }

	#[test]
	fn reconcile_tightest_lower_bound() {
		assert_eq!(max().reconcile(["foo>=1.0", "foo>=1.2"]).unwrap(), vec!["foo>=1.2"]);
		assert_eq!(max().reconcile(["foo<3", "foo<2.0"]).unwrap(), vec!["foo<2.0"]);
	}

	#[test]
	fn reconcile_min_policy_keeps_loosest() {
		assert_eq!(min().reconcile(["foo>=1.0", "foo>=1.2"]).unwrap(), vec!["foo>=1.0"]);
		assert_eq!(min().reconcile(["foo<3", "foo<2.0"]).unwrap(), vec!["foo<3"]);
	}

	#[test]
	fn reconcile_joins_bounds_in_fixed_order() {
		assert_eq!(max().reconcile(["foo>=1.0", "foo>=1.2,<2.0"]).unwrap(), vec!["foo>=1.2,<2.0"]);
		assert_eq!(max().reconcile(["Foo_Bar<=3", "foo-bar>1"]).unwrap(), vec!["Foo_Bar<=3,>1"]);
	}

	#[test]
	fn reconcile_same_direction_bounds() {
		assert_eq!(max().reconcile(["a>=1.0", "a>1.0"]).unwrap(), vec!["a>1.0"]);
		assert_eq!(max().reconcile(["a>=1.5", "a>1.0"]).unwrap(), vec!["a>=1.5"]);
		assert_eq!(min().reconcile(["a>=1.0", "a>1.0"]).unwrap(), vec!["a>=1.0"]);
		assert_eq!(max().reconcile(["a<=2.0", "a<2.0"]).unwrap(), vec!["a<2.0"]);
	}

	#[test]
	fn reconcile_unsatisfiable() {
		match max().reconcile(["pkg>=2.0", "pkg<1.0"]).unwrap_err() {
			crate::Error::Unsatisfiable { package, lower, upper } => {
				assert_eq!(package, "pkg");
				assert_eq!(lower, ">=2.0");
				assert_eq!(upper, "<1.0");
			},
			e => panic!("unexpected error {:?}", e),
		}
		assert!(max().reconcile(["pkg>=1.0", "pkg<1.0"]).is_err());
	}

	#[test]
	fn reconcile_equal_inclusive_bounds_collapse() {
		assert_eq!(max().reconcile(["pkg>=1.0", "pkg<=1.0"]).unwrap(), vec!["pkg==1.0"]);
	}

	#[test]
	fn reconcile_exact_pin_wins() {
		assert_eq!(max().reconcile(["pkg==1.5", "pkg>=1.0,<2.0", "pkg!=1.4"]).unwrap(), vec!["pkg==1.5"]);
		assert_eq!(max().reconcile(["pkg==1.5", "pkg~=1.4"]).unwrap(), vec!["pkg==1.5"]);
		assert_eq!(max().reconcile(["pkg~=1.4", "pkg>=1.0"]).unwrap(), vec!["pkg~=1.4"]);
	}

	#[test]
	fn reconcile_pin_outside_bounds_is_kept() {
		assert_eq!(max().reconcile(["pkg==3.0", "pkg<2.0"]).unwrap(), vec!["pkg==3.0"]);
	}

	#[test]
	fn reconcile_exclusions_descending() {
		assert_eq!(max().reconcile(["a!=1.3", "a>=1.0", "a!=1.5", "a!=1.3"]).unwrap(), vec!["a>=1.0,!=1.5,!=1.3"]);
	}

	#[test]
	fn reconcile_max_compares_loosely() {
		assert_eq!(max().reconcile(["a>=1.9", "a>=1.10"]).unwrap(), vec!["a>=1.10"]);
	}

	#[test]
	fn reconcile_markers_and_extras() {
		assert_eq!(
			max().reconcile(["futures;python_version=='2.7'", "futures ; python_version=='2.6'"]).unwrap(),
			vec!["futures;python_version=='2.6' or python_version=='2.7'"]
		);
		assert_eq!(max().reconcile(["req[b]>=1", "req[a]"]).unwrap(), vec!["req[a,b]>=1"]);
	}

	#[test]
	fn reconcile_unconditional_occurrence_drops_markers() {
		assert_eq!(max().reconcile(["futures;python_version=='2.7'", "futures"]).unwrap(), vec!["futures"]);
		assert_eq!(max().reconcile(["futures>=3;python_version=='2.7'", "futures<4"]).unwrap(), vec!["futures>=3,<4"]);
	}

	#[test]
	fn reconcile_post_release_is_below_next_patch() {
		assert_eq!(max().reconcile(["a>=1.0.post1", "a<1.0.1"]).unwrap(), vec!["a>=1.0.post1,<1.0.1"]);
		assert_eq!(max().reconcile(["a>=1.0.post1", "a>=1.0.1"]).unwrap(), vec!["a>=1.0.1"]);
		assert_eq!(max().reconcile(["a>=1.0", "a>=1.0.post1"]).unwrap(), vec!["a>=1.0.post1"]);
	}

	#[test]
	fn reconcile_huge_versions_are_numeric() {
		assert_eq!(max().reconcile(["a>=2", "a>=20150101000000000000"]).unwrap(), vec!["a>=20150101000000000000"]);
		assert_eq!(max().reconcile(["a>=99999999999999999999999", "a<100000000000000000000000"]).unwrap(), vec!["a>=99999999999999999999999,<100000000000000000000000"]);
	}

	#[test]
	fn reconcile_is_idempotent() {
		let input = ["a>=1,<3", "a>1.5", "b!=2,!=3", "c==1", "d;x=='1' or y=='2'", "e[x]~=1.1"];
		let once = max().reconcile(input).unwrap();
		assert_eq!(max().reconcile(&once).unwrap(), once);
	}

	#[test]
	fn reconcile_is_deterministic() {
		let a = max().reconcile(["z>=1", "a<2", "m", "a<1.5"]).unwrap();
		let b = max().reconcile(["a<1.5", "m", "a<2", "z>=1"]).unwrap();
		assert_eq!(a, b);
		assert_eq!(a, vec!["a<1.5", "m", "z>=1"]);
	}

	#[test]
	fn reconcile_without_sanity_is_raw() {
		let r = Reconciler::new(ReconcilerOptions { version_sanity: false, ..Default::default() });
		assert_eq!(r.reconcile(["b", "a>=2", "a<1", "b"]).unwrap(), vec!["a<1", "a>=2", "b"]);
	}

	#[test]
	fn reconcile_malformed_is_parse_error() {
		assert!(matches!(max().reconcile(["a>="]).unwrap_err(), crate::Error::Parse(_)));
	}

	#[test]
	fn reconcile_bare_name() {
		assert_eq!(max().reconcile(["six", "SIX"]).unwrap(), vec!["six"]);
		assert_eq!(requirement_name("Six>=1").as_deref(), Some("six"));
	}
}
