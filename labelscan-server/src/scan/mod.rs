//! The scan pipeline: one uploaded photo in, one breakdown record out.
//!
//! Only the first two steps can fail the request. Once the image is stored, vendor
//! failures degrade the result (fallback text, no audio) instead of aborting, so a
//! user always lands on a breakdown page after a successful upload.

use base64::Engine;
use labelscan::{ScanResult, UserProfile};
use strum::IntoStaticStr;

use crate::errors::ApiError;
use crate::media::{MediaKind, MediaRef, MediaStore, StorageError};

pub mod speech;
pub mod store;
pub mod vision;

use speech::SpeechSynthesizer;
use store::{ScanSessionRecord, ScanSessionStore};
use vision::VisionAnalyzer;

#[derive(thiserror::Error, Debug)]
pub enum ScanFailure {
    #[error("No image data provided")]
    MissingPayload,
    #[error("Image data is not valid base64: {0}")]
    InvalidPayload(#[from] base64::DecodeError),
    #[error("Failed to save image: {0}")]
    Storage(#[from] StorageError),
}

impl From<ScanFailure> for ApiError {
    fn from(failure: ScanFailure) -> Self {
        match &failure {
            ScanFailure::MissingPayload | ScanFailure::InvalidPayload(_) => {
                ApiError::BadRequest(failure.to_string())
            }
            ScanFailure::Storage(e) if e.is_bad_input() => ApiError::BadRequest(failure.to_string()),
            ScanFailure::Storage(_) => ApiError::Internal("Failed to save image".into()),
        }
    }
}

/// The states of one scan. Each carries exactly what the next step needs.
#[derive(Debug, IntoStaticStr)]
pub enum ScanStage {
    ReceivingUpload { payload: Option<String> },
    StoringImage { image: Vec<u8> },
    Analyzing { image: Vec<u8>, image_ref: MediaRef },
    ParsingResult { image_ref: MediaRef, raw_text: String },
    SynthesizingAudio { image_ref: MediaRef, result: ScanResult },
    Persisting { record: ScanSessionRecord },
    Done(ScanSessionRecord),
    Failed(ScanFailure),
}

impl ScanStage {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    fn is_terminal(&self) -> bool {
        matches!(self, ScanStage::Done(_) | ScanStage::Failed(_))
    }
}

/// How a scan ended, and the states it went through to get there.
#[derive(Debug)]
pub struct ScanOutcome {
    pub trail: Vec<&'static str>,
    pub result: Result<ScanSessionRecord, ScanFailure>,
}

/// Strip an optional `data:...;base64,` prefix and decode the rest.
fn decode_payload(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let encoded = match payload.split_once(',') {
        Some((_header, data)) => data,
        None => payload,
    };
    let encoded: String = encoded.split_whitespace().collect();
    base64::engine::general_purpose::STANDARD.decode(encoded)
}

pub struct ScanPipeline<'a> {
    pub media: &'a MediaStore,
    pub vision: &'a dyn VisionAnalyzer,
    pub speech: &'a dyn SpeechSynthesizer,
}

impl ScanPipeline<'_> {
    /// Run one scan to completion and record it in the given session.
    pub async fn run(
        &self,
        payload: Option<String>,
        profile: &UserProfile,
        session: &dyn ScanSessionStore,
    ) -> ScanOutcome {
        let mut stage = ScanStage::ReceivingUpload { payload };
        let mut trail = vec![];
        loop {
            trail.push(stage.name());
            tracing::debug!(stage = stage.name(), "Scan stage");
            if stage.is_terminal() {
                break;
            }
            stage = self.advance(stage, profile, session).await;
        }
        let result = match stage {
            ScanStage::Done(record) => {
                tracing::info!(image = %record.image_ref, "Scan complete");
                Ok(record)
            }
            ScanStage::Failed(failure) => {
                tracing::warn!("Scan failed: {}", failure);
                Err(failure)
            }
            _ => unreachable!("the loop only exits on a terminal stage"),
        };
        ScanOutcome { trail, result }
    }

    async fn advance(
        &self,
        stage: ScanStage,
        profile: &UserProfile,
        session: &dyn ScanSessionStore,
    ) -> ScanStage {
        match stage {
            ScanStage::ReceivingUpload { payload } => {
                match payload.as_deref().filter(|p| !p.trim().is_empty()) {
                    None => ScanStage::Failed(ScanFailure::MissingPayload),
                    Some(payload) => match decode_payload(payload) {
                        Ok(image) => ScanStage::StoringImage { image },
                        Err(e) => ScanStage::Failed(e.into()),
                    },
                }
            }
            ScanStage::StoringImage { image } => {
                match self.media.store(&image, MediaKind::Image).await {
                    Ok(image_ref) => ScanStage::Analyzing { image, image_ref },
                    Err(e) => ScanStage::Failed(e.into()),
                }
            }
            ScanStage::Analyzing { image, image_ref } => {
                let raw_text = match self.vision.analyze(&image, profile).await {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("Analysis unavailable, continuing with fallback: {}", e);
                        e.user_message().to_string()
                    }
                };
                ScanStage::ParsingResult {
                    image_ref,
                    raw_text,
                }
            }
            ScanStage::ParsingResult {
                image_ref,
                raw_text,
            } => {
                let parsed = labelscan::parse(Some(&raw_text));
                if parsed.is_fallback() {
                    tracing::warn!("Vision output was not a JSON object; using fallback result");
                }
                ScanStage::SynthesizingAudio {
                    image_ref,
                    result: parsed.into_result(),
                }
            }
            ScanStage::SynthesizingAudio { image_ref, result } => {
                let audio_ref = match result.narration() {
                    Some(text) => self.narrate(text).await,
                    None => {
                        tracing::info!("No narration text, skipping speech synthesis");
                        None
                    }
                };
                ScanStage::Persisting {
                    record: ScanSessionRecord {
                        image_ref,
                        result,
                        audio_ref,
                    },
                }
            }
            ScanStage::Persisting { record } => {
                session.save(record.clone());
                ScanStage::Done(record)
            }
            terminal @ (ScanStage::Done(_) | ScanStage::Failed(_)) => terminal,
        }
    }

    /// Synthesize and store the narration. Any failure just means no audio.
    async fn narrate(&self, text: &str) -> Option<MediaRef> {
        let audio = match self.speech.synthesize(text).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!("Speech unavailable, continuing without audio: {}", e);
                return None;
            }
        };
        match self.media.store(&audio, MediaKind::Audio).await {
            Ok(audio_ref) => Some(audio_ref),
            Err(e) => {
                tracing::warn!("Could not store narration audio: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::speech::SynthesisError;
    use super::vision::{AnalysisError, ANALYSIS_UNAVAILABLE};
    use super::*;
    use async_trait::async_trait;
    use labelscan::basic_models::UNKNOWN_PRODUCT;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeVision {
        reply: Option<String>,
        calls: AtomicUsize,
    }

    impl FakeVision {
        fn replying(text: &str) -> Self {
            Self {
                reply: Some(text.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VisionAnalyzer for FakeVision {
        async fn analyze(&self, _: &[u8], _: &UserProfile) -> Result<String, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().ok_or(AnalysisError::EmptyResponse)
        }
    }

    struct FakeSpeech {
        works: bool,
        calls: AtomicUsize,
    }

    impl FakeSpeech {
        fn new(works: bool) -> Self {
            Self {
                works,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSpeech {
        async fn synthesize(&self, _: &str) -> Result<Vec<u8>, SynthesisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.works {
                Ok(b"ID3narration".to_vec())
            } else {
                Err(SynthesisError::Status {
                    status: reqwest::StatusCode::UNAUTHORIZED,
                    body: "bad key".into(),
                })
            }
        }
    }

    #[derive(Default)]
    struct MemoryScanStore(Mutex<Option<ScanSessionRecord>>);

    impl ScanSessionStore for MemoryScanStore {
        fn save(&self, record: ScanSessionRecord) {
            *self.0.lock().unwrap() = Some(record);
        }

        fn load(&self) -> Option<ScanSessionRecord> {
            self.0.lock().unwrap().clone()
        }
    }

    const GOOD_REPLY: &str = r#"{"productName": "Salted Peanuts", "warnings": ["Contains peanuts"], "summary": "Avoid.", "voiceResponse": "Please avoid these peanuts."}"#;

    fn encoded_png() -> String {
        base64::engine::general_purpose::STANDARD.encode(crate::media::tests::png_bytes(8, 8))
    }

    const FULL_TRAIL: [&str; 7] = [
        "ReceivingUpload",
        "StoringImage",
        "Analyzing",
        "ParsingResult",
        "SynthesizingAudio",
        "Persisting",
        "Done",
    ];

    #[tokio::test]
    async fn successful_scan_records_everything() {
        let dir = tempfile::tempdir().unwrap();
        let media = MediaStore::new(dir.path());
        let vision = FakeVision::replying(GOOD_REPLY);
        let speech = FakeSpeech::new(true);
        let session = MemoryScanStore::default();
        let pipeline = ScanPipeline {
            media: &media,
            vision: &vision,
            speech: &speech,
        };

        let payload = format!("data:image/png;base64,{}", encoded_png());
        let outcome = pipeline
            .run(Some(payload), &UserProfile::default(), &session)
            .await;
        assert_eq!(outcome.trail, FULL_TRAIL);
        let record = outcome.result.unwrap();
        assert_eq!(record.result.product_name, "Salted Peanuts");
        assert_eq!(record.result.warnings, vec!["Contains peanuts".to_string()]);
        let audio_ref = record.audio_ref.clone().unwrap();
        assert!(media.path_of(MediaKind::Image, &record.image_ref).exists());
        assert!(media.path_of(MediaKind::Audio, &audio_ref).exists());
        assert_eq!(session.load(), Some(record));
        assert_eq!(speech.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_or_undecodable_payload_fails_early() {
        let dir = tempfile::tempdir().unwrap();
        let media = MediaStore::new(dir.path());
        let vision = FakeVision::replying(GOOD_REPLY);
        let speech = FakeSpeech::new(true);
        let session = MemoryScanStore::default();
        let pipeline = ScanPipeline {
            media: &media,
            vision: &vision,
            speech: &speech,
        };

        let outcome = pipeline.run(None, &UserProfile::default(), &session).await;
        assert_eq!(outcome.trail, ["ReceivingUpload", "Failed"]);
        assert!(matches!(outcome.result, Err(ScanFailure::MissingPayload)));

        let outcome = pipeline
            .run(Some("   ".into()), &UserProfile::default(), &session)
            .await;
        assert!(matches!(outcome.result, Err(ScanFailure::MissingPayload)));

        let outcome = pipeline
            .run(Some("data:image/png;base64,@@@".into()), &UserProfile::default(), &session)
            .await;
        assert!(matches!(outcome.result, Err(ScanFailure::InvalidPayload(_))));

        assert_eq!(vision.calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.load(), None);
    }

    #[tokio::test]
    async fn non_image_bytes_fail_at_storage() {
        let dir = tempfile::tempdir().unwrap();
        let media = MediaStore::new(dir.path());
        let vision = FakeVision::replying(GOOD_REPLY);
        let speech = FakeSpeech::new(true);
        let session = MemoryScanStore::default();
        let pipeline = ScanPipeline {
            media: &media,
            vision: &vision,
            speech: &speech,
        };

        let payload = base64::engine::general_purpose::STANDARD.encode("not a picture");
        let outcome = pipeline
            .run(Some(payload), &UserProfile::default(), &session)
            .await;
        assert_eq!(outcome.trail, ["ReceivingUpload", "StoringImage", "Failed"]);
        let failure = outcome.result.unwrap_err();
        assert!(matches!(failure, ScanFailure::Storage(StorageError::Decode(_))));
        assert!(matches!(ApiError::from(failure), ApiError::BadRequest(_)));
        assert_eq!(vision.calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.load(), None);
    }

    #[tokio::test]
    async fn failed_analysis_still_persists_a_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let media = MediaStore::new(dir.path());
        let vision = FakeVision::failing();
        let speech = FakeSpeech::new(true);
        let session = MemoryScanStore::default();
        let pipeline = ScanPipeline {
            media: &media,
            vision: &vision,
            speech: &speech,
        };

        let outcome = pipeline
            .run(Some(encoded_png()), &UserProfile::default(), &session)
            .await;
        assert_eq!(outcome.trail, FULL_TRAIL);
        let record = outcome.result.unwrap();
        assert_eq!(record.result.product_name, UNKNOWN_PRODUCT);
        assert_eq!(record.result.summary, ANALYSIS_UNAVAILABLE);
        assert!(record.result.warnings.is_empty());
        // A fallback has nothing to narrate
        assert_eq!(record.audio_ref, None);
        assert_eq!(speech.calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.load(), Some(record));
    }

    #[tokio::test]
    async fn non_json_reply_becomes_the_summary() {
        let dir = tempfile::tempdir().unwrap();
        let media = MediaStore::new(dir.path());
        let vision = FakeVision::replying("This looks like a granola bar.");
        let speech = FakeSpeech::new(true);
        let session = MemoryScanStore::default();
        let pipeline = ScanPipeline {
            media: &media,
            vision: &vision,
            speech: &speech,
        };

        let record = pipeline
            .run(Some(encoded_png()), &UserProfile::default(), &session)
            .await
            .result
            .unwrap();
        assert_eq!(record.result.product_name, UNKNOWN_PRODUCT);
        assert_eq!(record.result.summary, "This looks like a granola bar.");
        assert!(record.result.warnings.is_empty());
    }

    #[tokio::test]
    async fn failed_speech_only_drops_the_audio() {
        let dir = tempfile::tempdir().unwrap();
        let media = MediaStore::new(dir.path());
        let vision = FakeVision::replying(GOOD_REPLY);
        let speech = FakeSpeech::new(false);
        let session = MemoryScanStore::default();
        let pipeline = ScanPipeline {
            media: &media,
            vision: &vision,
            speech: &speech,
        };

        let outcome = pipeline
            .run(Some(encoded_png()), &UserProfile::default(), &session)
            .await;
        assert_eq!(outcome.trail, FULL_TRAIL);
        let record = outcome.result.unwrap();
        assert_eq!(record.audio_ref, None);
        assert_eq!(record.result.product_name, "Salted Peanuts");
        assert!(media.path_of(MediaKind::Image, &record.image_ref).exists());
        assert_eq!(speech.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.load(), Some(record));
        assert_eq!(std::fs::read_dir(dir.path().join("audio")).map(|d| d.count()).unwrap_or(0), 0);
    }

    #[tokio::test]
    async fn each_scan_replaces_the_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let media = MediaStore::new(dir.path());
        let vision = FakeVision::replying(GOOD_REPLY);
        let speech = FakeSpeech::new(true);
        let session = MemoryScanStore::default();
        let pipeline = ScanPipeline {
            media: &media,
            vision: &vision,
            speech: &speech,
        };

        let first = pipeline
            .run(Some(encoded_png()), &UserProfile::default(), &session)
            .await
            .result
            .unwrap();
        let second = pipeline
            .run(Some(encoded_png()), &UserProfile::default(), &session)
            .await
            .result
            .unwrap();
        assert_ne!(first.image_ref, second.image_ref);
        assert_eq!(session.load(), Some(second));
    }
}
