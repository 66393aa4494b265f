// SPDX-License-Identifier: Apache-2.0

//! Queue DDL attribute grammar (spec.md §6 "Configuration" table) and its
//! field-level validation (spec.md §4.3 "DDL surface").

use crate::error::RmError;
use crate::policy::AllocatePolicy;
use crate::quantity::{CoreQuantity, MemoryQuantity};
use std::collections::HashSet;

/// `vsegment_resource_quota`: mutually exclusive memory-per-segment or
/// core-per-segment quota.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VsegResourceQuota {
    /// `mem:<int>{MB,GB}`.
    MemoryMb(u64),
    /// `core:<decimal>`.
    Core(f64),
}

impl VsegResourceQuota {
    /// Parses a `mem:...` or `core:...` value.
    pub fn parse(raw: &str) -> Result<Self, RmError> {
        let raw = raw.trim();
        if let Some(mem) = raw.strip_prefix("mem:") {
            let q = MemoryQuantity::parse(mem)?;
            match q {
                MemoryQuantity::AbsoluteMb(mb) => Ok(VsegResourceQuota::MemoryMb(mb)),
                MemoryQuantity::Percent(_) => Err(RmError::WrongAttrValue {
                    attr: "vsegment_resource_quota".to_string(),
                    value: raw.to_string(),
                }),
            }
        } else if let Some(core) = raw.strip_prefix("core:") {
            let core_value: f64 = core.trim().parse().map_err(|_| RmError::WrongAttrValue {
                attr: "vsegment_resource_quota".to_string(),
                value: raw.to_string(),
            })?;
            if core_value <= 0.0 {
                return Err(RmError::WrongAttrValue {
                    attr: "vsegment_resource_quota".to_string(),
                    value: raw.to_string(),
                });
            }
            Ok(VsegResourceQuota::Core(core_value))
        } else {
            Err(RmError::WrongAttrValue {
                attr: "vsegment_resource_quota".to_string(),
                value: raw.to_string(),
            })
        }
    }
}

/// The fully parsed, typed attribute set of a `CREATE`/`ALTER RESOURCE
/// QUEUE` statement. Mirrors `REQUEST_QD_DDL_MANIPULATERESQUEUE`'s
/// `(key, val)` attribute pairs (spec.md §6).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueAttrs {
    /// `parent`: the name of an existing queue.
    pub parent: Option<String>,
    /// `active_statements`: positive int.
    pub active_statements: Option<u32>,
    /// `memory_limit_cluster`.
    pub memory_limit_cluster: Option<MemoryQuantity>,
    /// `core_limit_cluster`.
    pub core_limit_cluster: Option<CoreQuantity>,
    /// `vsegment_resource_quota`.
    pub vsegment_resource_quota: Option<VsegResourceQuota>,
    /// `allocation_policy`.
    pub allocation_policy: Option<AllocatePolicy>,
    /// `resource_upper_factor`: decimal >= 1.0.
    pub resource_upper_factor: Option<f64>,
    /// `vsegment_upper_limit`: positive int.
    pub vsegment_upper_limit: Option<u32>,
}

const KNOWN_ATTRS: &[&str] = &[
    "parent",
    "active_statements",
    "memory_limit_cluster",
    "core_limit_cluster",
    "vsegment_resource_quota",
    "allocation_policy",
    "resource_upper_factor",
    "vsegment_upper_limit",
];

impl QueueAttrs {
    /// Parses the raw `(key, val)` pairs carried on the DDL wire message
    /// into a typed attribute set.
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, RmError> {
        let mut seen = HashSet::new();
        let mut attrs = QueueAttrs::default();
        for (key, val) in pairs {
            if !KNOWN_ATTRS.contains(&key.as_str()) {
                return Err(RmError::WrongAttrName { attr: key.clone() });
            }
            if !seen.insert(key.clone()) {
                return Err(RmError::DuplicateAttrName { attr: key.clone() });
            }
            match key.as_str() {
                "parent" => attrs.parent = Some(val.clone()),
                "active_statements" => {
                    let n: u32 = val.parse().map_err(|_| RmError::WrongAttrValue {
                        attr: key.clone(),
                        value: val.clone(),
                    })?;
                    if n == 0 {
                        return Err(RmError::WrongAttrValue {
                            attr: key.clone(),
                            value: val.clone(),
                        });
                    }
                    attrs.active_statements = Some(n);
                }
                "memory_limit_cluster" => {
                    attrs.memory_limit_cluster = Some(MemoryQuantity::parse(val)?);
                }
                "core_limit_cluster" => {
                    attrs.core_limit_cluster = Some(CoreQuantity::parse(val)?);
                }
                "vsegment_resource_quota" => {
                    attrs.vsegment_resource_quota = Some(VsegResourceQuota::parse(val)?);
                }
                "allocation_policy" => {
                    attrs.allocation_policy = Some(match val.to_ascii_lowercase().as_str() {
                        "even" => AllocatePolicy::Even,
                        "fifo" => AllocatePolicy::Fifo,
                        _ => {
                            return Err(RmError::WrongAttrValue {
                                attr: key.clone(),
                                value: val.clone(),
                            });
                        }
                    });
                }
                "resource_upper_factor" => {
                    let f: f64 = val.parse().map_err(|_| RmError::WrongAttrValue {
                        attr: key.clone(),
                        value: val.clone(),
                    })?;
                    attrs.resource_upper_factor = Some(f);
                }
                "vsegment_upper_limit" => {
                    let n: u32 = val.parse().map_err(|_| RmError::WrongAttrValue {
                        attr: key.clone(),
                        value: val.clone(),
                    })?;
                    if n == 0 {
                        return Err(RmError::WrongAttrValue {
                            attr: key.clone(),
                            value: val.clone(),
                        });
                    }
                    attrs.vsegment_upper_limit = Some(n);
                }
                _ => unreachable!("filtered by KNOWN_ATTRS above"),
            }
        }
        Ok(attrs)
    }

    /// Field-level validation shared by `CREATE` and `ALTER` (spec.md
    /// §4.3): percent memory must equal percent core when either is a
    /// percent expression; `resource_upper_factor >= 1.0`.
    ///
    /// Checks that require cluster/sibling context (unique name, sibling
    /// percent sum <= 100, `pg_default` parent rejection, percent-queue
    /// parent-of-percent-or-root) live in `rm-queue`, which owns the tree.
    pub fn validation_errors(&self, name: &str) -> Vec<String> {
        let mut errors = Vec::new();

        match (self.memory_limit_cluster, self.core_limit_cluster) {
            (Some(mem), Some(core)) => {
                if mem.is_percent() != core.is_percent() {
                    errors.push(format!(
                        "queue `{name}`: memory_limit_cluster and core_limit_cluster must both be percentages or both be absolute"
                    ));
                } else if let (MemoryQuantity::Percent(m), CoreQuantity::Percent(c)) = (mem, core) {
                    if m != c {
                        errors.push(format!(
                            "queue `{name}`: percent memory_limit_cluster ({m}%) must equal percent core_limit_cluster ({c}%)"
                        ));
                    }
                }
            }
            (Some(_), None) | (None, Some(_)) => {
                errors.push(format!(
                    "queue `{name}`: memory_limit_cluster and core_limit_cluster must be supplied together"
                ));
            }
            (None, None) => {}
        }

        if let Some(factor) = self.resource_upper_factor {
            if factor < 1.0 {
                errors.push(format!(
                    "queue `{name}`: resource_upper_factor must be >= 1.0, got {factor}"
                ));
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(v: &[(&str, &str)]) -> Vec<(String, String)> {
        v.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_a_full_attribute_set() {
        let attrs = QueueAttrs::from_pairs(&pairs(&[
            ("parent", "pg_root"),
            ("active_statements", "20"),
            ("memory_limit_cluster", "50%"),
            ("core_limit_cluster", "50%"),
            ("vsegment_resource_quota", "mem:256MB"),
            ("allocation_policy", "fifo"),
            ("resource_upper_factor", "1.5"),
            ("vsegment_upper_limit", "100"),
        ]))
        .unwrap();
        assert_eq!(attrs.parent.as_deref(), Some("pg_root"));
        assert_eq!(attrs.active_statements, Some(20));
        assert_eq!(attrs.allocation_policy, Some(AllocatePolicy::Fifo));
        assert!(attrs.validation_errors("q1").is_empty());
    }

    #[test]
    fn rejects_unknown_attribute() {
        let err = QueueAttrs::from_pairs(&pairs(&[("bogus", "1")])).unwrap_err();
        assert!(matches!(err, RmError::WrongAttrName { .. }));
    }

    #[test]
    fn rejects_duplicate_attribute() {
        let err = QueueAttrs::from_pairs(&pairs(&[
            ("active_statements", "1"),
            ("active_statements", "2"),
        ]))
        .unwrap_err();
        assert!(matches!(err, RmError::DuplicateAttrName { .. }));
    }

    #[test]
    fn percent_memory_and_core_must_match() {
        let attrs = QueueAttrs::from_pairs(&pairs(&[
            ("memory_limit_cluster", "50%"),
            ("core_limit_cluster", "40%"),
        ]))
        .unwrap();
        let errors = attrs.validation_errors("q1");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn upper_factor_below_one_is_rejected() {
        let attrs = QueueAttrs::from_pairs(&pairs(&[("resource_upper_factor", "0.5")])).unwrap();
        assert_eq!(attrs.validation_errors("q1").len(), 1);
    }
}
