use serde::{Deserialize, Serialize};

use crate::media::types::{AudioCodec, Container, TranscodeRequest, VideoCodec};

/// Request option key a caller sets to `true`/`1` to require a
/// hardware-accelerated provider.
pub const OPTION_REQUIRE_HW_ACCEL: &str = "require_hw_accel";

/// Identity and selection weight of a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub display_name: String,
    /// Higher priority wins during selection.
    pub priority: i32,
}

/// Capability set advertised by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub containers: Vec<Container>,
    pub video_codecs: Vec<VideoCodec>,
    pub audio_codecs: Vec<AudioCodec>,
    pub hw_accel: bool,
    /// Concurrency cap reported by the provider itself. Participates in
    /// selection only; admission enforces the global cap.
    #[serde(default)]
    pub max_concurrent: Option<u32>,
}

impl ProviderCapabilities {
    /// Whether this capability set satisfies every explicit constraint of
    /// the request. `copy` codecs pass through any backend.
    pub fn supports(&self, request: &TranscodeRequest) -> bool {
        if !self.containers.contains(&request.container) {
            return false;
        }
        if request.video_codec != VideoCodec::Copy
            && !self.video_codecs.contains(&request.video_codec)
        {
            return false;
        }
        if request.audio_codec != AudioCodec::Copy
            && !self.audio_codecs.contains(&request.audio_codec)
        {
            return false;
        }
        let requires_hw = request
            .options
            .get(OPTION_REQUIRE_HW_ACCEL)
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        if requires_hw && !self.hw_accel {
            return false;
        }
        true
    }
}

/// Registry snapshot of one provider, as exposed to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderDescriptor {
    pub info: ProviderInfo,
    pub capabilities: ProviderCapabilities,
    /// Sessions currently running on this provider.
    pub in_flight: u32,
    /// Whether the provider is inside a launch-failure cool-down.
    pub quarantined: bool,
}
