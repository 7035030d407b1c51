use serde_json::{json, Value};

pub const WRITTEN_WEIGHT: f64 = 0.30;
pub const PERFORMANCE_WEIGHT: f64 = 0.50;
pub const QUARTERLY_WEIGHT: f64 = 0.20;

/// 1-decimal rounding as the portal has always displayed it:
/// `Math.round(10*x) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    (10.0 * x).round() / 10.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalcError {
    pub code: String,
    pub message: String,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CalcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CalcError {}

fn check_component(name: &str, value: f64) -> Result<(), CalcError> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(CalcError::new(
            "bad_params",
            format!("{} score must be between 0 and 100", name),
        ));
    }
    Ok(())
}

/// Final quarter grade: 30% Written Works, 50% Performance Tasks,
/// 20% Quarterly Assessment, rounded to one decimal.
pub fn compute_final(written: f64, performance: f64, quarterly: f64) -> Result<f64, CalcError> {
    check_component("written", written)?;
    check_component("performance", performance)?;
    check_component("quarterly", quarterly)?;
    Ok(round_off_1_decimal(
        written * WRITTEN_WEIGHT + performance * PERFORMANCE_WEIGHT + quarterly * QUARTERLY_WEIGHT,
    ))
}

/// One subject as resolved from storage. Older workspaces stored a single
/// overall grade per subject; newer rows carry the component breakdown.
#[derive(Debug, Clone, PartialEq)]
pub enum SubjectScore {
    Legacy(f64),
    Breakdown {
        written: f64,
        performance: f64,
        quarterly: f64,
        final_score: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectView {
    pub title: String,
    pub quarter: Option<String>,
    pub score: SubjectScore,
}

impl SubjectView {
    pub fn final_score(&self) -> f64 {
        match self.score {
            SubjectScore::Legacy(v) => v,
            SubjectScore::Breakdown { final_score, .. } => final_score,
        }
    }

    pub fn to_json(&self) -> Value {
        match &self.score {
            SubjectScore::Legacy(v) => json!({
                "title": self.title,
                "quarter": self.quarter,
                "final": v,
            }),
            SubjectScore::Breakdown {
                written,
                performance,
                quarterly,
                final_score,
            } => json!({
                "title": self.title,
                "quarter": self.quarter,
                "written": written,
                "performance": performance,
                "quarterly": quarterly,
                "final": final_score,
            }),
        }
    }
}

/// Accepts both numbers and numeric strings; the original frontend saved
/// scores as strings.
pub fn score_value(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn str_field<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| raw.get(*k).and_then(|v| v.as_str()))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// The single read-boundary translation from a stored subject blob to a typed
/// view. Rows that carry none of the recognized score fields are dropped.
pub fn resolve_subject(raw: &Value) -> Option<SubjectView> {
    let title = str_field(raw, &["title", "subject", "name"])?.to_string();
    let quarter = str_field(raw, &["quarter", "quarterLabel"]).map(str::to_string);

    let written = raw.get("written").and_then(score_value);
    let performance = raw.get("performance").and_then(score_value);
    let quarterly = raw.get("quarterly").and_then(score_value);

    if let (Some(written), Some(performance), Some(quarterly)) = (written, performance, quarterly) {
        let final_score = raw
            .get("final")
            .and_then(score_value)
            .or_else(|| compute_final(written, performance, quarterly).ok())?;
        return Some(SubjectView {
            title,
            quarter,
            score: SubjectScore::Breakdown {
                written,
                performance,
                quarterly,
                final_score,
            },
        });
    }

    let single = raw
        .get("final")
        .and_then(score_value)
        .or_else(|| raw.get("grade").and_then(score_value))?;
    Some(SubjectView {
        title,
        quarter,
        score: SubjectScore::Legacy(single),
    })
}

/// Resolves a stored `subjects` JSON array, skipping malformed entries.
pub fn resolve_subjects(stored: &str) -> Vec<SubjectView> {
    let parsed: Value = match serde_json::from_str(stored) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    parsed
        .as_array()
        .map(|items| items.iter().filter_map(resolve_subject).collect())
        .unwrap_or_default()
}

/// Informational overall average: final score of every subject, excluding
/// scores <= 0 as "not yet entered". `None` when nothing contributes.
pub fn compute_average(subjects: &[SubjectView]) -> Option<f64> {
    let entered: Vec<f64> = subjects
        .iter()
        .map(SubjectView::final_score)
        .filter(|v| *v > 0.0)
        .collect();
    if entered.is_empty() {
        return None;
    }
    Some(round_off_1_decimal(
        entered.iter().sum::<f64>() / entered.len() as f64,
    ))
}
