pub mod basic_models;
pub mod parser;

pub use basic_models::{Allergy, ScanResult, UserProfile};
pub use parser::{parse, ParsedScan};
