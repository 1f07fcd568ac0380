//! Deterministic content fingerprinting for transcode requests.
//!
//! Two requests with the same hash produce interchangeable output
//! artifacts, which is what makes deduplication and the content-addressed
//! store layout work.

use sha2::{Digest, Sha256};

use crate::media::types::TranscodeRequest;

/// Computes the content hash for a request as a lowercase hex string.
///
/// The digest covers exactly the parameters that determine the output
/// bytes: media identity, container, codecs, quality, preset and the two
/// caps. Start offset and free-form options are excluded. The fingerprint
/// is derived from request parameters only, so the same file indexed twice
/// under different media identifiers will not dedup against itself.
pub fn content_hash(request: &TranscodeRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.media_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(request.container.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(request.video_codec.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(request.audio_codec.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(request.quality.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(request.preset.as_str().as_bytes());
    hasher.update(b"\n");
    match request.max_height {
        Some(h) => hasher.update(h.to_string().as_bytes()),
        None => hasher.update(b"-"),
    }
    hasher.update(b"\n");
    match request.max_bitrate_kbps {
        Some(b) => hasher.update(b.to_string().as_bytes()),
        None => hasher.update(b"-"),
    }
    hex::encode(hasher.finalize())
}
