use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// A validation target: `darwin-arm64`, `linux-x86_64`, or the fully
/// qualified `linux-<family>-<libc>-<arch>` form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlatformId {
    pub os: String,
    pub family: Option<String>,
    pub libc: Option<String>,
    pub arch: String,
}

impl PlatformId {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let invalid = |reason| CoreError::InvalidPlatform { id: s.to_string(), reason };
        let parts: Vec<&str> = s.split('-').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty component"));
        }
        match parts.as_slice() {
            [os, arch] => Ok(Self { os: os.to_string(), family: None, libc: None, arch: arch.to_string() }),
            ["linux", family, arch] => {
                Ok(Self { os: "linux".into(), family: Some(family.to_string()), libc: None, arch: arch.to_string() })
            }
            ["linux", family, libc, arch] => Ok(Self {
                os: "linux".into(),
                family: Some(family.to_string()),
                libc: Some(libc.to_string()),
                arch: arch.to_string(),
            }),
            [_, _, ..] => Err(invalid("family and libc are only meaningful for linux")),
            _ => Err(invalid("expected <os>-<arch>")),
        }
    }

    /// Exclusion string as recipes spell it: `darwin/arm64`,
    /// `linux/alpine/musl/x86_64`.
    pub fn exclusion(&self) -> String {
        let mut parts = vec![self.os.as_str()];
        parts.extend(self.family.as_deref());
        parts.extend(self.libc.as_deref());
        parts.push(&self.arch);
        parts.join("/")
    }
}

impl TryFrom<String> for PlatformId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<PlatformId> for String {
    fn from(p: PlatformId) -> Self {
        p.to_string()
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.os)?;
        for part in [&self.family, &self.libc].into_iter().flatten() {
            write!(f, "-{part}")?;
        }
        write!(f, "-{}", self.arch)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlatformStatus {
    Pass,
    Fail,
    /// Not tested; says nothing about support.
    Skipped,
}

/// One recipe's outcome on one validation target.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformResult {
    pub recipe: String,
    #[serde(rename = "platform_id")]
    pub platform: PlatformId,
    pub status: PlatformStatus,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub attempts: u32,
}

/// Minimal platform support statement for one recipe. All fields empty means
/// no constraint.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DerivedConstraint {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_os: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_libc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsupported_platforms: Vec<String>,
}

impl DerivedConstraint {
    pub fn is_unconstrained(&self) -> bool {
        self.supported_os.is_empty() && self.supported_libc.is_empty() && self.unsupported_platforms.is_empty()
    }
}

/// Derives the constraint for a single recipe's results.
///
/// Skipped platforms are ignored. A platform reported more than once passes if
/// any report passed. Cuts are tried broadest first: operating system, libc,
/// Linux family. A cut on dimension value `v` applies only when every failing
/// platform has `v` and no passing platform does. Otherwise each failing
/// platform is listed explicitly.
pub fn derive_constraint<'a>(results: impl IntoIterator<Item = &'a PlatformResult>) -> DerivedConstraint {
    let mut outcome: BTreeMap<&PlatformId, bool> = BTreeMap::new();
    for r in results {
        let passed = match r.status {
            PlatformStatus::Pass => true,
            PlatformStatus::Fail => false,
            PlatformStatus::Skipped => continue,
        };
        *outcome.entry(&r.platform).or_insert(passed) |= passed;
    }

    let failing: Vec<&PlatformId> = outcome.iter().filter(|&(_, &ok)| !ok).map(|(p, _)| *p).collect();
    let passing: Vec<&PlatformId> = outcome.iter().filter(|&(_, &ok)| ok).map(|(p, _)| *p).collect();
    if failing.is_empty() {
        return DerivedConstraint::default();
    }
    if passing.is_empty() {
        return explicit(&failing);
    }

    if let Some(os) = clean_cut(&failing, &passing, |p| Some(p.os.as_str())) {
        let supported_os = others(&passing, os, |p| Some(p.os.as_str()));
        return DerivedConstraint { supported_os, ..Default::default() };
    }
    if let Some(libc) = clean_cut(&failing, &passing, |p| p.libc.as_deref()) {
        let supported_libc = others(&passing, libc, |p| p.libc.as_deref());
        if !supported_libc.is_empty() {
            return DerivedConstraint { supported_libc, ..Default::default() };
        }
    }
    if let Some(family) = clean_cut(&failing, &passing, |p| p.family.as_deref()) {
        return DerivedConstraint { unsupported_platforms: vec![format!("linux/{family}")], ..Default::default() };
    }
    explicit(&failing)
}

/// Groups results by recipe and derives one constraint each.
pub fn derive_constraints(results: &[PlatformResult]) -> BTreeMap<String, DerivedConstraint> {
    let mut by_recipe: BTreeMap<&str, Vec<&PlatformResult>> = BTreeMap::new();
    for r in results {
        by_recipe.entry(r.recipe.as_str()).or_default().push(r);
    }
    by_recipe.into_iter().map(|(recipe, rs)| (recipe.to_string(), derive_constraint(rs))).collect()
}

fn clean_cut<'p, F>(failing: &[&'p PlatformId], passing: &[&'p PlatformId], dim: F) -> Option<&'p str>
where
    F: Fn(&'p PlatformId) -> Option<&'p str>,
{
    let values: BTreeSet<Option<&str>> = failing.iter().map(|p| dim(*p)).collect();
    let mut values = values.into_iter();
    match (values.next(), values.next()) {
        (Some(Some(v)), None) if passing.iter().all(|p| dim(*p) != Some(v)) => Some(v),
        _ => None,
    }
}

fn others<'p, F>(passing: &[&'p PlatformId], excluded: &str, dim: F) -> Vec<String>
where
    F: Fn(&'p PlatformId) -> Option<&'p str>,
{
    let values: BTreeSet<&str> = passing.iter().filter_map(|p| dim(*p)).filter(|v| *v != excluded).collect();
    values.into_iter().map(str::to_string).collect()
}

fn explicit(failing: &[&PlatformId]) -> DerivedConstraint {
    DerivedConstraint {
        unsupported_platforms: failing.iter().map(|p| p.exclusion()).collect(),
        ..Default::default()
    }
}
