use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Product name used whenever the model could not identify the product.
pub const UNKNOWN_PRODUCT: &str = "Unknown Product";

/// Summary used when there is nothing at all to show.
pub const NO_ANALYSIS_DATA: &str = "No analysis data available.";

/// The outcome of one scan, as shown on the breakdown page.
///
/// The field names on the wire are the ones the vision model is asked to produce,
/// so this struct doubles as the output schema of the analysis prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub product_name: String,
    pub warnings: Vec<String>,
    pub summary: String,
    pub voice_response: String,
}

impl ScanResult {
    /// The result shown when the model output could not be understood.
    ///
    /// The raw text becomes the summary, so the user at least sees what came back.
    pub fn fallback(raw_text: Option<&str>) -> Self {
        let summary = match raw_text {
            Some(text) if !text.trim().is_empty() => text.to_string(),
            _ => NO_ANALYSIS_DATA.to_string(),
        };
        Self {
            product_name: UNKNOWN_PRODUCT.to_string(),
            warnings: vec![],
            summary,
            voice_response: String::new(),
        }
    }

    /// The text to narrate, if there is any worth sending to a speech service.
    pub fn narration(&self) -> Option<&str> {
        let text = self.voice_response.trim();
        (!text.is_empty()).then_some(text)
    }
}

/// The health context of a user, as collected during onboarding.
///
/// Every field is free text as the user entered it. `allergies` may also hold a
/// JSON list of [`Allergy`] objects when it was filled in by the structured picker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub allergies: Option<String>,
    pub chronic_conditions: Option<String>,
    pub dietary_preferences: Option<String>,
    pub medications: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allergy {
    pub name: String,
    /// Usually a word like "Severe", but some pickers store a number.
    pub severity: serde_json::Value,
}

impl std::fmt::Display for Allergy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.severity {
            serde_json::Value::String(severity) => write!(f, "{} ({})", self.name, severity),
            severity => write!(f, "{} ({})", self.name, severity),
        }
    }
}

impl UserProfile {
    /// Render the allergies for a prompt, e.g. `"Peanuts (Severe), Gluten (Mild)"`.
    ///
    /// Anything that is not a JSON list of allergies is passed through verbatim.
    pub fn formatted_allergies(&self) -> Option<String> {
        self.allergies.as_deref().map(format_allergies)
    }
}

/// Format a stored allergy field, falling back to the raw text if it isn't a JSON list.
pub fn format_allergies(raw: &str) -> String {
    if !raw.trim_start().starts_with('[') {
        return raw.to_string();
    }
    match serde_json::from_str::<Vec<Allergy>>(raw) {
        Ok(allergies) => allergies.iter().join(", "),
        Err(_) => raw.to_string(),
    }
}
