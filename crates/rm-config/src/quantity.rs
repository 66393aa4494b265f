// SPDX-License-Identifier: Apache-2.0

//! Parsing helpers for the queue DDL attribute grammar (spec.md §6):
//! `<int>%`, `<int>{MB,GB}`, and bare decimals for core counts.

use crate::error::RmError;

/// A memory limit expressed either as a percentage of cluster capacity or
/// an absolute number of megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryQuantity {
    /// `<int>%`, `0 < p <= 100`.
    Percent(u32),
    /// `<int>{MB,GB}`, stored normalized to megabytes.
    AbsoluteMb(u64),
}

impl MemoryQuantity {
    /// Parses `memory_limit_cluster` / `vsegment_resource_quota mem:` values.
    pub fn parse(raw: &str) -> Result<Self, RmError> {
        let raw = raw.trim();
        if let Some(pct) = raw.strip_suffix('%') {
            let value: u32 = pct
                .trim()
                .parse()
                .map_err(|_| wrong_value("memory_limit", raw))?;
            if value == 0 || value > 100 {
                return Err(RmError::WrongAttrValue {
                    attr: "memory_limit".to_string(),
                    value: raw.to_string(),
                });
            }
            return Ok(MemoryQuantity::Percent(value));
        }
        if let Some(gb) = raw.strip_suffix("GB").or_else(|| raw.strip_suffix("gb")) {
            let value: u64 = gb
                .trim()
                .parse()
                .map_err(|_| wrong_value("memory_limit", raw))?;
            return Ok(MemoryQuantity::AbsoluteMb(value * 1024));
        }
        if let Some(mb) = raw.strip_suffix("MB").or_else(|| raw.strip_suffix("mb")) {
            let value: u64 = mb
                .trim()
                .parse()
                .map_err(|_| wrong_value("memory_limit", raw))?;
            return Ok(MemoryQuantity::AbsoluteMb(value));
        }
        Err(RmError::WrongAttrValue {
            attr: "memory_limit".to_string(),
            value: raw.to_string(),
        })
    }

    /// True if this is a percentage expression.
    #[must_use]
    pub fn is_percent(&self) -> bool {
        matches!(self, MemoryQuantity::Percent(_))
    }
}

/// A core limit, either a percentage or a decimal core count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoreQuantity {
    /// `<int>%`.
    Percent(u32),
    /// A decimal core count (fractional cores are legal; a container's
    /// `memory/core` ratio need not be an integer core count at the queue
    /// level, only at the container level).
    Absolute(f64),
}

impl CoreQuantity {
    /// Parses `core_limit_cluster` / `vsegment_resource_quota core:` values.
    pub fn parse(raw: &str) -> Result<Self, RmError> {
        let raw = raw.trim();
        if let Some(pct) = raw.strip_suffix('%') {
            let value: u32 = pct
                .trim()
                .parse()
                .map_err(|_| wrong_value("core_limit", raw))?;
            if value == 0 || value > 100 {
                return Err(RmError::WrongAttrValue {
                    attr: "core_limit".to_string(),
                    value: raw.to_string(),
                });
            }
            return Ok(CoreQuantity::Percent(value));
        }
        let value: f64 = raw.parse().map_err(|_| wrong_value("core_limit", raw))?;
        if value <= 0.0 {
            return Err(RmError::WrongAttrValue {
                attr: "core_limit".to_string(),
                value: raw.to_string(),
            });
        }
        Ok(CoreQuantity::Absolute(value))
    }

    /// True if this is a percentage expression.
    #[must_use]
    pub fn is_percent(&self) -> bool {
        matches!(self, CoreQuantity::Percent(_))
    }
}

fn wrong_value(attr: &str, value: &str) -> RmError {
    RmError::WrongAttrValue {
        attr: attr.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_percent_memory() {
        assert_eq!(MemoryQuantity::parse("50%").unwrap(), MemoryQuantity::Percent(50));
    }

    #[test]
    fn rejects_zero_and_over_100_percent() {
        assert!(MemoryQuantity::parse("0%").is_err());
        assert!(MemoryQuantity::parse("101%").is_err());
    }

    #[test]
    fn parses_absolute_memory_units() {
        assert_eq!(MemoryQuantity::parse("512MB").unwrap(), MemoryQuantity::AbsoluteMb(512));
        assert_eq!(MemoryQuantity::parse("2GB").unwrap(), MemoryQuantity::AbsoluteMb(2048));
    }

    #[test]
    fn parses_core_quantities() {
        assert_eq!(CoreQuantity::parse("100%").unwrap(), CoreQuantity::Percent(100));
        assert!(matches!(CoreQuantity::parse("1.5").unwrap(), CoreQuantity::Absolute(v) if (v - 1.5).abs() < f64::EPSILON));
        assert!(CoreQuantity::parse("0").is_err());
    }
}
