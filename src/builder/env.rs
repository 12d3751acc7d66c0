//! The environment a build runs in: process variables plus the
//! command-line overrides, and what the tool reads from them.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};

use super::error::BuildError;

#[derive(Debug, Clone, Default)]
pub struct BuildEnv {
    vars: BTreeMap<String, String>,
    overrides: Vec<(String, String)>,
}

/// Build metadata from GitHub Actions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CiInfo {
    pub owner: Option<String>,
    pub run_number: Option<u16>,
    /// Commit hash cut to seven characters.
    pub short_sha: Option<String>,
}

impl BuildEnv {
    /// Snapshot of the process environment. Non-UTF-8 variables are skipped.
    pub fn from_process() -> Self {
        Self::from_vars(
            std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
        )
    }

    pub fn from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            overrides: Vec::new(),
        }
    }

    /// Apply `KEY=VALUE` overrides; later ones win.
    pub fn apply_overrides(&mut self, overrides: &[(String, String)]) {
        for (key, value) in overrides {
            self.vars.insert(key.clone(), value.clone());
            self.overrides.push((key.clone(), value.clone()));
        }
    }

    /// Overrides to set on every child process.
    pub fn overrides(&self) -> &[(String, String)] {
        &self.overrides
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// The cargo executable: `$CARGO` when set, else `cargo`.
    pub fn cargo(&self) -> &str {
        self.non_empty("CARGO").unwrap_or("cargo")
    }

    /// Build time: `SOURCE_DATE_EPOCH` when set, else now. A variable that is
    /// set but empty is malformed.
    pub fn build_time(&self) -> Result<DateTime<Utc>, BuildError> {
        let Some(value) = self.get("SOURCE_DATE_EPOCH") else {
            return Ok(Utc::now());
        };
        let err = |reason: &str| BuildError::SourceDateEpoch {
            value: value.to_string(),
            reason: reason.to_string(),
        };
        let secs = parse_int(value).map_err(err)?;
        DateTime::from_timestamp(secs, 0).ok_or_else(|| err("value out of range"))
    }

    /// GitHub Actions metadata, if running under it.
    pub fn ci(&self) -> Option<CiInfo> {
        self.non_empty("GITHUB_ACTION")?;
        Some(CiInfo {
            owner: self.non_empty("GITHUB_REPOSITORY_OWNER").map(str::to_string),
            run_number: self
                .non_empty("GITHUB_RUN_NUMBER")
                .and_then(|v| v.parse::<i16>().ok())
                .and_then(|n| u16::try_from(n).ok()),
            short_sha: self
                .non_empty("GITHUB_SHA")
                .map(|sha| sha.chars().take(7).collect()),
        })
    }
}

/// Date part of the file version.
pub fn date_version(time: DateTime<Utc>) -> (u16, u16, u16) {
    // Years past 65535 do not fit a version resource.
    let year = u16::try_from(time.year()).unwrap_or(0);
    (year, time.month() as u16, time.day() as u16)
}

/// Parse an integer with an optional sign and a `0x`, `0o`, `0b` or
/// leading-`0` (octal) prefix. Underscores between digits are ignored.
pub fn parse_int(s: &str) -> Result<i64, &'static str> {
    let (negative, unsigned) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let lower = unsigned.to_ascii_lowercase();
    let (radix, digits) = if let Some(d) = lower.strip_prefix("0x") {
        (16, d)
    } else if let Some(d) = lower.strip_prefix("0o") {
        (8, d)
    } else if let Some(d) = lower.strip_prefix("0b") {
        (2, d)
    } else if lower.len() > 1 && lower.starts_with('0') {
        (8, &lower[1..])
    } else {
        (10, lower.as_str())
    };

    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__")
    {
        return Err("invalid syntax");
    }
    let digits = digits.replace('_', "");
    if !digits.chars().all(|c| c.is_digit(radix)) {
        return Err("invalid syntax");
    }
    let magnitude = u64::from_str_radix(&digits, radix).map_err(|_| "value out of range")?;
    if negative {
        0i64.checked_sub_unsigned(magnitude).ok_or("value out of range")
    } else {
        i64::try_from(magnitude).map_err(|_| "value out of range")
    }
}
