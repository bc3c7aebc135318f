use labelscan::ScanResult;
use serde::{Deserialize, Serialize};

use crate::media::MediaRef;

/// Everything a finished scan left behind, as shown on the breakdown page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSessionRecord {
    pub image_ref: MediaRef,
    pub result: ScanResult,
    pub audio_ref: Option<MediaRef>,
}

/// The one scan slot of a session. Each save replaces whatever was there.
pub trait ScanSessionStore: Send + Sync {
    fn save(&self, record: ScanSessionRecord);
    fn load(&self) -> Option<ScanSessionRecord>;
}
