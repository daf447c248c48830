//! `$(name)` naming templates for data files and output frames.
//!
//! Built-in placeholders are resolved from a [`TimeStep`]:
//!
//! | placeholder | value |
//! |---|---|
//! | `$(yyyy)` | four-digit year |
//! | `$(mm)` | two-digit month |
//! | `$(dd)` | two-digit first day of the step |
//! | `$(mdekad)` | two-digit dekad of the month (01-03) |
//! | `$(doy)` | three-digit day of year |
//!
//! Any other name (e.g. `$(tile)`, `$(dataset)`) must be bound by the caller.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use crate::error::{SeriesError, SeriesResult};
use crate::time::TimeStep;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Placeholder {
    Year,
    Month,
    Day,
    MonthDekad,
    DayOfYear,
    Custom(String),
}

impl Placeholder {
    fn from_name(name: &str) -> Self {
        match name {
            "yyyy" => Placeholder::Year,
            "mm" => Placeholder::Month,
            "dd" => Placeholder::Day,
            "mdekad" => Placeholder::MonthDekad,
            "doy" => Placeholder::DayOfYear,
            other => Placeholder::Custom(other.to_string()),
        }
    }

    fn name(&self) -> &str {
        match self {
            Placeholder::Year => "yyyy",
            Placeholder::Month => "mm",
            Placeholder::Day => "dd",
            Placeholder::MonthDekad => "mdekad",
            Placeholder::DayOfYear => "doy",
            Placeholder::Custom(name) => name,
        }
    }

    fn pattern(&self) -> &'static str {
        match self {
            Placeholder::Year => r"\d{4}",
            Placeholder::Month | Placeholder::Day | Placeholder::MonthDekad => r"\d{2}",
            Placeholder::DayOfYear => r"\d{3}",
            Placeholder::Custom(_) => r"[^/]+?",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// A parsed naming template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl NamingTemplate {
    pub fn parse(raw: &str) -> SeriesResult<Self> {
        let mut segments = Vec::new();
        let mut rest = raw;

        while let Some(open) = rest.find("$(") {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let close = after
                .find(')')
                .ok_or_else(|| SeriesError::invalid_template(raw, "unclosed '$('"))?;
            let name = &after[..close];
            let valid_name = !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit());
            if !valid_name {
                return Err(SeriesError::invalid_template(
                    raw,
                    format!("invalid placeholder name '{}'", name),
                ));
            }
            segments.push(Segment::Placeholder(Placeholder::from_name(name)));
            rest = &after[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        if segments.is_empty() {
            return Err(SeriesError::invalid_template(raw, "template is empty"));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Names of all placeholders, in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Placeholder(p) if seen.insert(p.name()) => Some(p.name()),
                _ => None,
            })
            .collect()
    }

    /// Substitute all placeholders. Custom names are looked up in `vars`.
    pub fn resolve(&self, step: &TimeStep, vars: &[(&str, &str)]) -> SeriesResult<String> {
        let start = step.start();
        let mut out = String::with_capacity(self.raw.len() + 8);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(Placeholder::Year) => out.push_str(&format!("{:04}", start.year())),
                Segment::Placeholder(Placeholder::Month) => out.push_str(&format!("{:02}", start.month())),
                Segment::Placeholder(Placeholder::Day) => out.push_str(&format!("{:02}", start.day())),
                Segment::Placeholder(Placeholder::MonthDekad) => {
                    out.push_str(&format!("{:02}", step.dekad_of_month()))
                }
                Segment::Placeholder(Placeholder::DayOfYear) => {
                    out.push_str(&format!("{:03}", start.ordinal()))
                }
                Segment::Placeholder(Placeholder::Custom(name)) => {
                    let value = vars
                        .iter()
                        .find(|(key, _)| key == name)
                        .map(|(_, value)| *value)
                        .ok_or_else(|| {
                            SeriesError::invalid_template(&self.raw, format!("unbound placeholder '{}'", name))
                        })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    /// Compile the template into a pattern that recognizes resolved names.
    ///
    /// Custom placeholders bound in `fixed` match only their value; unbound
    /// ones match any run of characters without a path separator.
    pub fn pattern(&self, fixed: &[(&str, &str)]) -> SeriesResult<TemplatePattern> {
        let mut expr = String::from("^");
        let mut named = HashSet::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => expr.push_str(&regex::escape(text)),
                Segment::Placeholder(Placeholder::Custom(name))
                    if fixed.iter().any(|(key, _)| key == name) =>
                {
                    let value = fixed
                        .iter()
                        .find(|(key, _)| key == name)
                        .map(|(_, value)| *value)
                        .unwrap_or_default();
                    expr.push_str(&regex::escape(value));
                }
                Segment::Placeholder(p) => {
                    // The regex crate rejects duplicate group names, so only
                    // the first occurrence captures.
                    if named.insert(p.name().to_string()) {
                        expr.push_str(&format!("(?P<{}>{})", p.name(), p.pattern()));
                    } else {
                        expr.push_str(&format!("(?:{})", p.pattern()));
                    }
                }
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr)
            .map_err(|e| SeriesError::invalid_template(&self.raw, e.to_string()))?;
        Ok(TemplatePattern { regex })
    }
}

impl fmt::Display for NamingTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Compiled matcher for names produced by a [`NamingTemplate`].
#[derive(Debug, Clone)]
pub struct TemplatePattern {
    regex: Regex,
}

/// A name recognized by a [`TemplatePattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateMatch {
    pub date: NaiveDate,
    pub vars: BTreeMap<String, String>,
}

impl TemplatePattern {
    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// Recover the date encoded in `name` plus any custom placeholder values.
    ///
    /// The day comes from `$(dd)`, else `$(mdekad)`, else `$(doy)`, else the
    /// first of the month. Returns `None` if the name does not match or has
    /// no year.
    pub fn parse(&self, name: &str) -> Option<TemplateMatch> {
        let caps = self.regex.captures(name)?;
        let number = |key: &str| caps.name(key).and_then(|m| m.as_str().parse::<u32>().ok());

        let year = caps.name("yyyy")?.as_str().parse::<i32>().ok()?;
        let date = match (number("mm"), number("dd"), number("mdekad"), number("doy")) {
            (month, Some(day), _, _) => NaiveDate::from_ymd_opt(year, month.unwrap_or(1), day)?,
            (month, None, Some(dekad), _) if (1..=3).contains(&dekad) => {
                NaiveDate::from_ymd_opt(year, month.unwrap_or(1), (dekad - 1) * 10 + 1)?
            }
            (None, None, None, Some(doy)) => NaiveDate::from_yo_opt(year, doy)?,
            (month, None, None, _) => NaiveDate::from_ymd_opt(year, month.unwrap_or(1), 1)?,
            _ => return None,
        };

        let vars = self
            .regex
            .capture_names()
            .flatten()
            .filter(|name| !matches!(*name, "yyyy" | "mm" | "dd" | "mdekad" | "doy"))
            .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
            .collect();

        Some(TemplateMatch { date, vars })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Cadence;

    fn dekad(y: i32, m: u32, index: u32) -> TimeStep {
        TimeStep::new(y, m, index, Cadence::Dekad).unwrap()
    }

    #[test]
    fn test_resolve_default_output_naming() {
        let template = NamingTemplate::parse("_CGLS_NDVI_$(yyyy)_$(mm)_d$(mdekad)").unwrap();
        assert_eq!(template.resolve(&dekad(2020, 6, 3), &[]).unwrap(), "_CGLS_NDVI_2020_06_d03");
    }

    #[test]
    fn test_resolve_datafile_with_repeated_placeholders() {
        let template = NamingTemplate::parse(
            "$(yyyy)/$(yyyy)$(mm)$(dd)/c_gls_NDVI300_$(yyyy)$(mm)$(dd)0000_GLOBE_OLCI_V2.0.1.tif",
        )
        .unwrap();
        let name = template.resolve(&dekad(2021, 1, 2), &[]).unwrap();
        assert_eq!(name, "2021/20210111/c_gls_NDVI300_202101110000_GLOBE_OLCI_V2.0.1.tif");
        assert_eq!(template.placeholders(), vec!["yyyy", "mm", "dd"]);
    }

    #[test]
    fn test_resolve_custom_placeholders() {
        let template = NamingTemplate::parse("$(dataset)/$(tile)_$(doy).tif").unwrap();
        let step = TimeStep::new(2020, 2, 1, Cadence::Daily).unwrap();
        let name = template
            .resolve(&step, &[("dataset", "NDVI"), ("tile", "X18Y03")])
            .unwrap();
        assert_eq!(name, "NDVI/X18Y03_032.tif");

        let unbound = template.resolve(&step, &[("dataset", "NDVI")]);
        assert!(matches!(unbound, Err(SeriesError::InvalidTemplate { .. })));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(NamingTemplate::parse("out_$(yyyy").is_err());
        assert!(NamingTemplate::parse("out_$()").is_err());
        assert!(NamingTemplate::parse("out_$(a-b)").is_err());
        assert!(NamingTemplate::parse("").is_err());
    }

    #[test]
    fn test_pattern_recovers_date() {
        let template = NamingTemplate::parse("$(yyyy)/$(yyyy)$(mm)$(dd)/ndvi_$(yyyy)$(mm)$(dd).tif").unwrap();
        let pattern = template.pattern(&[]).unwrap();

        let found = pattern.parse("2020/20200621/ndvi_20200621.tif").unwrap();
        assert_eq!(found.date, NaiveDate::from_ymd_opt(2020, 6, 21).unwrap());
        assert!(pattern.parse("2020/20200621/ndvi_20200621.tif.partial").is_none());
        assert!(!pattern.is_match("other.tif"));
    }

    #[test]
    fn test_pattern_with_dekad_and_tiles() {
        let template = NamingTemplate::parse("$(tile)/NDVI_$(yyyy)_$(mm)_d$(mdekad).tif").unwrap();
        let pattern = template.pattern(&[]).unwrap();
        let found = pattern.parse("X01Y02/NDVI_2019_12_d03.tif").unwrap();
        assert_eq!(found.date, NaiveDate::from_ymd_opt(2019, 12, 21).unwrap());
        assert_eq!(found.vars.get("tile").map(String::as_str), Some("X01Y02"));

        let fixed = template.pattern(&[("tile", "X09Y09")]).unwrap();
        assert!(fixed.parse("X01Y02/NDVI_2019_12_d03.tif").is_none());
    }
}
