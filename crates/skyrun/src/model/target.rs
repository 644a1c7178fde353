//! Target descriptors and the validated per-target request.
//!
//! Data from text sources (CLI arguments, schedule files) enters as a
//! [`RawTarget`] of untyped JSON values. [`TargetRequest::try_from`] is the
//! only way to obtain a typed request, so nothing past that boundary can
//! hold a malformed target.

use crate::error::{ScopeError, ScopeResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Untyped per-target invocation, as read from text.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTarget {
    #[serde(default)]
    pub name: Value,
    #[serde(default)]
    pub coords: Value,
    #[serde(default)]
    pub exposure: Value,
    #[serde(default)]
    pub total: Value,
}

/// Validated per-target invocation: `(name, [ra, dec], exposure, total)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetRequest {
    name: String,
    coords: [f64; 2],
    exposure_secs: f64,
    total_secs: f64,
}

impl TargetRequest {
    /// Build a request from typed values.
    pub fn new(
        name: impl Into<String>,
        coords: [f64; 2],
        exposure_secs: f64,
        total_secs: f64,
    ) -> ScopeResult<Self> {
        let name = name.into();
        let mut problems = Vec::new();
        if name.trim().is_empty() {
            problems.push("target name is empty".to_string());
        }
        if !coords.iter().all(|value| value.is_finite()) {
            problems.push("coords must be finite numbers".to_string());
        }
        if !exposure_secs.is_finite() || exposure_secs <= 0.0 {
            problems.push(format!("exposure must be a positive number of seconds, got {exposure_secs}"));
        }
        if !total_secs.is_finite() || total_secs < 0.0 {
            problems.push(format!("total time must be a non-negative number of seconds, got {total_secs}"));
        }
        if let Some(first) = problems.first() {
            return Err(ScopeError::validation(
                first.clone(),
                serde_json::json!({ "problems": problems, "target": name }),
            ));
        }
        Ok(Self {
            name,
            coords,
            exposure_secs,
            total_secs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coords(&self) -> [f64; 2] {
        self.coords
    }

    pub fn ra(&self) -> f64 {
        self.coords[0]
    }

    pub fn dec(&self) -> f64 {
        self.coords[1]
    }

    pub fn exposure_secs(&self) -> f64 {
        self.exposure_secs
    }

    pub fn total_secs(&self) -> f64 {
        self.total_secs
    }

    /// Same target pointed elsewhere; used when the device reports its own pointing.
    #[must_use]
    pub fn with_coords(mut self, coords: [f64; 2]) -> Self {
        self.coords = coords;
        self
    }
}

impl TryFrom<RawTarget> for TargetRequest {
    type Error = ScopeError;

    fn try_from(raw: RawTarget) -> ScopeResult<Self> {
        let mut problems = Vec::new();

        let name = raw.name.as_str();
        if name.is_none() {
            problems.push("target name is not text".to_string());
        }

        let coords = match raw.coords.as_array() {
            None => {
                problems.push("coords is not a list".to_string());
                None
            }
            Some(items) if items.len() != 2 => {
                problems.push(format!("coords must have two elements, got {}", items.len()));
                None
            }
            Some(items) => {
                let ra = items.first().and_then(Value::as_f64);
                let dec = items.get(1).and_then(Value::as_f64);
                if ra.is_none() {
                    problems.push("first element of coords is not a number".to_string());
                }
                if dec.is_none() {
                    problems.push("second element of coords is not a number".to_string());
                }
                ra.zip(dec).map(|(ra, dec)| [ra, dec])
            }
        };

        let exposure = raw.exposure.as_f64();
        if exposure.is_none() {
            problems.push("exposure is not a number".to_string());
        }
        let total = raw.total.as_f64();
        if total.is_none() {
            problems.push("total time is not a number".to_string());
        }

        match (name, coords, exposure, total) {
            (Some(name), Some(coords), Some(exposure), Some(total)) if problems.is_empty() => {
                Self::new(name, coords, exposure, total)
            }
            _ => {
                let message = problems
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "invalid target".to_string());
                Err(ScopeError::validation(
                    message,
                    serde_json::json!({
                        "problems": problems,
                        "received": raw,
                    }),
                ))
            }
        }
    }
}

/// One entry of a schedule: a raw target plus sequencing hints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub name: Value,
    /// Decimal number or sexagesimal text (`"13:29:52.7"`).
    #[serde(default)]
    pub ra: Value,
    /// Decimal number or sexagesimal text (`"-05:23:28"`).
    #[serde(default)]
    pub dec: Value,
    /// Sub-exposure time in seconds.
    #[serde(default)]
    pub exposure: Value,
    /// Total stacking time in seconds.
    #[serde(default)]
    pub total: Value,
    /// Pause after this target, seconds.
    #[serde(default)]
    pub pause: f64,
    /// Extra attempts after a failed one.
    #[serde(default)]
    pub retries: u32,
    /// Wait between attempts, seconds.
    #[serde(default = "default_retry_wait")]
    pub retry_wait: f64,
}

fn default_retry_wait() -> f64 {
    10.0
}

impl Target {
    /// Convenience constructor for fully numeric targets.
    pub fn numeric(name: &str, ra: f64, dec: f64, exposure: f64, total: f64) -> Self {
        Self {
            name: Value::from(name),
            ra: Value::from(ra),
            dec: Value::from(dec),
            exposure: Value::from(exposure),
            total: Value::from(total),
            pause: 0.0,
            retries: 0,
            retry_wait: default_retry_wait(),
        }
    }

    /// Display label, even for entries whose name is malformed.
    pub fn label(&self) -> String {
        match &self.name {
            Value::String(name) => name.clone(),
            Value::Null => "<unnamed>".to_string(),
            other => other.to_string(),
        }
    }

    /// Raw invocation form; sexagesimal coordinates are converted here.
    pub fn to_raw(&self) -> RawTarget {
        RawTarget {
            name: self.name.clone(),
            coords: Value::Array(vec![coordinate_value(&self.ra), coordinate_value(&self.dec)]),
            exposure: self.exposure.clone(),
            total: self.total.clone(),
        }
    }
}

fn coordinate_value(value: &Value) -> Value {
    match value {
        Value::String(text) => parse_coordinate(text)
            .map(Value::from)
            .unwrap_or_else(|| value.clone()),
        other => other.clone(),
    }
}

/// Parse a decimal (`"202.47"`) or sexagesimal (`"13:29:52.7"`, `"-5:23:28"`) coordinate.
///
/// Sexagesimal values keep the unit of their leading field: hours for
/// right ascension written as `h:m:s`, degrees for declination.
pub fn parse_coordinate(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Ok(value) = text.parse::<f64>() {
        return value.is_finite().then_some(value);
    }

    let (sign, body) = match text.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, text.strip_prefix('+').unwrap_or(text)),
    };
    let mut fields = body.split(':').map(|field| field.trim().parse::<f64>());
    let whole = fields.next()?.ok()?;
    let minutes = fields.next()?.ok()?;
    let seconds = fields.next().unwrap_or(Ok(0.0)).ok()?;
    if fields.next().is_some() || whole < 0.0 || !(0.0..60.0).contains(&minutes) || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    Some(sign * (whole + minutes / 60.0 + seconds / 3600.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn raw(name: Value, coords: Value, exposure: Value, total: Value) -> RawTarget {
        RawTarget {
            name,
            coords,
            exposure,
            total,
        }
    }

    #[test]
    fn accepts_well_formed_target() {
        let request =
            TargetRequest::try_from(raw(json!("M51"), json!([190.9, 47.2]), json!(10), json!(60)));
        let request = request.ok();
        assert_eq!(request.as_ref().map(TargetRequest::name), Some("M51"));
        assert_eq!(request.map(|r| r.coords()), Some([190.9, 47.2]));
    }

    #[test]
    fn rejects_each_bad_shape() {
        let cases = [
            raw(json!(42), json!([1.0, 2.0]), json!(10), json!(60)),
            raw(json!("M1"), json!("1,2"), json!(10), json!(60)),
            raw(json!("M1"), json!([1.0]), json!(10), json!(60)),
            raw(json!("M1"), json!(["a", 2.0]), json!(10), json!(60)),
            raw(json!("M1"), json!([1.0, null]), json!(10), json!(60)),
            raw(json!("M1"), json!([1.0, 2.0]), json!("ten"), json!(60)),
            raw(json!("M1"), json!([1.0, 2.0]), json!(10), json!(false)),
            raw(json!(null), json!(null), json!(null), json!(null)),
        ];
        for case in cases {
            let err = TargetRequest::try_from(case.clone()).err();
            assert_eq!(err.map(|e| e.code), Some(ErrorCode::Validation), "{case:?}");
        }
    }

    #[test]
    fn combined_problems_are_all_reported() {
        let err = TargetRequest::try_from(raw(json!(1), json!({}), json!("x"), json!("y"))).err();
        let problems = err
            .and_then(|e| e.context)
            .and_then(|ctx| ctx.get("problems").cloned())
            .and_then(|p| p.as_array().map(Vec::len));
        assert_eq!(problems, Some(4));
    }

    #[test]
    fn sexagesimal_coordinates() {
        let ra = parse_coordinate("13:29:52.7").unwrap_or_default();
        assert!((ra - 13.497_972).abs() < 1e-5);
        let dec = parse_coordinate("-05:23:28").unwrap_or_default();
        assert!((dec + 5.391_111).abs() < 1e-5);
        assert_eq!(parse_coordinate("47.2"), Some(47.2));
        assert_eq!(parse_coordinate("12:75:00"), None);
        assert_eq!(parse_coordinate("north"), None);
    }

    #[test]
    fn schedule_entry_converts_text_coordinates() {
        let mut target = Target::numeric("M42", 0.0, 0.0, 10.0, 60.0);
        target.ra = json!("05:35:17");
        target.dec = json!("-05:23:28");
        let request = TargetRequest::try_from(target.to_raw()).ok();
        assert!(request.is_some_and(|r| r.ra() > 5.5 && r.dec() < -5.0));
    }
}
