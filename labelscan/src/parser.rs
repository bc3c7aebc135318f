use serde::Deserialize;

use crate::basic_models::{ScanResult, NO_ANALYSIS_DATA, UNKNOWN_PRODUCT};

/// What the parser made of the model output.
///
/// Both variants carry a usable result; the tag only tells whether the model
/// actually answered in the requested format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedScan {
    /// The output was a JSON object. Missing fields were filled with defaults.
    Parsed(ScanResult),
    /// The output was not a JSON object, so the raw text became the summary.
    Fallback(ScanResult),
}

impl ParsedScan {
    pub fn result(&self) -> &ScanResult {
        match self {
            ParsedScan::Parsed(result) | ParsedScan::Fallback(result) => result,
        }
    }

    pub fn into_result(self) -> ScanResult {
        match self {
            ParsedScan::Parsed(result) | ParsedScan::Fallback(result) => result,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ParsedScan::Fallback(_))
    }
}

/// The lenient shape we accept from the model before normalizing it.
#[derive(Deserialize)]
struct WireResult {
    #[serde(default, rename = "productName", alias = "product_name")]
    product_name: Option<String>,
    #[serde(default)]
    warnings: Option<Warnings>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default, rename = "voiceResponse", alias = "voice_response")]
    voice_response: Option<String>,
}

/// Models occasionally collapse a one-item list into a bare string.
#[derive(Deserialize)]
#[serde(untagged)]
enum Warnings {
    Many(Vec<String>),
    One(String),
}

impl From<WireResult> for ScanResult {
    fn from(wire: WireResult) -> Self {
        Self {
            product_name: wire
                .product_name
                .unwrap_or_else(|| UNKNOWN_PRODUCT.to_string()),
            warnings: match wire.warnings {
                Some(Warnings::Many(warnings)) => warnings,
                Some(Warnings::One(warning)) if !warning.trim().is_empty() => vec![warning],
                Some(Warnings::One(_)) | None => vec![],
            },
            summary: wire.summary.unwrap_or_else(|| NO_ANALYSIS_DATA.to_string()),
            voice_response: wire.voice_response.unwrap_or_default(),
        }
    }
}

/// Remove a markdown code fence (with optional language tag) around the payload.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
    else {
        return trimmed;
    };
    match body.split_once('\n') {
        Some((tag, rest)) if !tag.trim_start().starts_with('{') => rest.trim(),
        _ => body.trim(),
    }
}

/// Normalize the raw text returned by the vision model into a [`ScanResult`].
///
/// This never fails: anything that isn't a JSON object becomes a fallback result.
pub fn parse(raw_text: Option<&str>) -> ParsedScan {
    let Some(raw) = raw_text.filter(|t| !t.trim().is_empty()) else {
        return ParsedScan::Fallback(ScanResult::fallback(None));
    };
    let object = match serde_json::from_str::<serde_json::Value>(strip_code_fence(raw)) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        _ => return ParsedScan::Fallback(ScanResult::fallback(Some(raw))),
    };
    match serde_json::from_value::<WireResult>(object) {
        Ok(wire) => ParsedScan::Parsed(wire.into()),
        Err(_) => ParsedScan::Fallback(ScanResult::fallback(Some(raw))),
    }
}
