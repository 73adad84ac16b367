//! Elastix parameter files.
//!
//! Elastix is configured through plain-text parameter files with one
//! `(Name value value ...)` entry per line. Strings are double quoted, numbers
//! are bare, and `//` starts a comment. This module parses that format, lets a
//! caller override a handful of scalar options and renders the result back out
//! so it can be handed to `elastix -p`.

mod kind;

pub use kind::TransformKind;

use crate::validation::validate_positive;
use crate::{RegistrationError, RegistrationResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Scalar options that may replace the defaults of a parameter file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterOverrides {
    pub maximum_iterations: Option<u32>,
    pub metric: Option<String>,
    /// B-spline control point spacing in millimetres.
    pub final_grid_spacing: Option<f64>,
    pub number_of_resolutions: Option<u32>,
}

impl ParameterOverrides {
    pub fn is_empty(&self) -> bool {
        self.maximum_iterations.is_none()
            && self.metric.is_none()
            && self.final_grid_spacing.is_none()
            && self.number_of_resolutions.is_none()
    }
}

/// A single value of a parameter entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Text(String),
    Number(f64),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Text(s) => write!(f, "\"{s}\""),
            ParameterValue::Number(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterEntry {
    pub name: String,
    pub values: Vec<ParameterValue>,
}

/// An ordered elastix parameter map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElastixParameters {
    entries: Vec<ParameterEntry>,
}

impl ElastixParameters {
    /// Parses elastix parameter-file text. Line numbers in errors are 1-based.
    pub fn parse(text: &str) -> RegistrationResult<Self> {
        let mut entries = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if let Some(entry) = parse_line(line, index + 1)? {
                entries.push(entry);
            }
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> RegistrationResult<Self> {
        if !path.is_file() {
            return Err(RegistrationError::ParameterFileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(RegistrationError::FileRead)?;
        Self::parse(&text)
    }

    pub fn entries(&self) -> &[ParameterEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&[ParameterValue]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.values.as_slice())
    }

    /// First value of `name` when it is a string.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name)?.first()? {
            ParameterValue::Text(s) => Some(s),
            ParameterValue::Number(_) => None,
        }
    }

    /// First value of `name` when it is a number.
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.get(name)?.first()? {
            ParameterValue::Number(n) => Some(*n),
            ParameterValue::Text(_) => None,
        }
    }

    /// Replaces the values of `name`, or appends a new entry.
    pub fn set(&mut self, name: &str, values: Vec<ParameterValue>) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.values = values,
            None => self.entries.push(ParameterEntry {
                name: name.to_string(),
                values,
            }),
        }
    }

    pub fn set_text(&mut self, name: &str, value: impl Into<String>) {
        self.set(name, vec![ParameterValue::Text(value.into())]);
    }

    pub fn set_number(&mut self, name: &str, value: f64) {
        self.set(name, vec![ParameterValue::Number(value)]);
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        self.entries.len() != before
    }

    /// Applies scalar overrides for a registration of the given kind.
    pub fn apply_overrides(
        &mut self,
        overrides: &ParameterOverrides,
        kind: TransformKind,
    ) -> RegistrationResult<()> {
        if overrides.final_grid_spacing.is_some() && kind != TransformKind::BSpline {
            return Err(RegistrationError::InvalidInput(format!(
                "final grid spacing only applies to bspline registration, not {kind}"
            )));
        }

        if let Some(iterations) = overrides.maximum_iterations {
            validate_positive("maximum_iterations", iterations)?;
            self.set_number("MaximumNumberOfIterations", f64::from(iterations));
        }

        if let Some(metric) = &overrides.metric {
            let metric = metric.trim();
            if metric.is_empty() {
                return Err(RegistrationError::InvalidInput(
                    "metric cannot be empty".into(),
                ));
            }
            self.set_text("Metric", metric);
        }

        if let Some(spacing) = overrides.final_grid_spacing {
            if !(spacing.is_finite() && spacing > 0.0) {
                return Err(RegistrationError::InvalidInput(format!(
                    "final grid spacing must be positive, got {spacing}"
                )));
            }
            self.set_number("FinalGridSpacingInPhysicalUnits", spacing);
        }

        if let Some(levels) = overrides.number_of_resolutions {
            validate_positive("number_of_resolutions", levels)?;
            self.set_number("NumberOfResolutions", f64::from(levels));
            // Schedules hold one group of values per level.
            self.remove("ImagePyramidSchedule");
            self.remove("GridSpacingSchedule");
        }

        Ok(())
    }

    /// Canonical text form, one entry per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push('(');
            out.push_str(&entry.name);
            for value in &entry.values {
                out.push(' ');
                out.push_str(&value.to_string());
            }
            out.push_str(")\n");
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> RegistrationResult<()> {
        std::fs::write(path, self.render()).map_err(RegistrationError::FileWrite)
    }
}

fn parse_error(line: usize, message: impl Into<String>) -> RegistrationError {
    RegistrationError::ParameterParse {
        line,
        message: message.into(),
    }
}

enum Token<'a> {
    Bare(&'a str),
    Quoted(&'a str),
}

fn parse_line(line: &str, number: usize) -> RegistrationResult<Option<ParameterEntry>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with("//") {
        return Ok(None);
    }
    let body = trimmed
        .strip_prefix('(')
        .ok_or_else(|| parse_error(number, "expected '(' at start of entry"))?;

    let mut tokens = Vec::new();
    let mut rest = None;
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            ')' => {
                rest = Some(&body[i + 1..]);
                break;
            }
            '"' => {
                let start = i + 1;
                let end = body[start..]
                    .find('"')
                    .map(|offset| start + offset)
                    .ok_or_else(|| parse_error(number, "unterminated string"))?;
                tokens.push(Token::Quoted(&body[start..end]));
                while chars.peek().is_some_and(|(j, _)| *j <= end) {
                    chars.next();
                }
            }
            _ => {
                let mut end = body.len();
                while let Some((j, next)) = chars.peek() {
                    if next.is_whitespace() || *next == ')' || *next == '"' {
                        end = *j;
                        break;
                    }
                    chars.next();
                }
                tokens.push(Token::Bare(&body[i..end]));
            }
        }
    }

    let rest = rest.ok_or_else(|| parse_error(number, "missing ')'"))?.trim();
    if !(rest.is_empty() || rest.starts_with("//")) {
        return Err(parse_error(number, format!("unexpected text after ')': {rest}")));
    }

    let mut tokens = tokens.into_iter();
    let name = match tokens.next() {
        Some(Token::Bare(name))
            if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
        {
            name.to_string()
        }
        Some(Token::Bare(name)) => {
            return Err(parse_error(number, format!("invalid parameter name '{name}'")))
        }
        Some(Token::Quoted(_)) | None => {
            return Err(parse_error(number, "entry must start with a parameter name"))
        }
    };

    let values = tokens
        .map(|token| match token {
            Token::Quoted(s) => Ok(ParameterValue::Text(s.to_string())),
            Token::Bare(s) => s.parse::<f64>().map(ParameterValue::Number).map_err(|_| {
                parse_error(
                    number,
                    format!("expected a number or quoted string, found '{s}'"),
                )
            }),
        })
        .collect::<RegistrationResult<Vec<_>>>()?;

    if values.is_empty() {
        return Err(parse_error(number, format!("parameter '{name}' has no value")));
    }

    Ok(Some(ParameterEntry { name, values }))
}
