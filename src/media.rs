//! Media domain model: transcode requests, content hashing, and the
//! metadata probe collaborator.

pub mod content_hash;
pub mod probe;
pub mod types;

pub use content_hash::content_hash;
pub use probe::{FfprobeMetadataService, MediaMetadataService};
pub use types::{AudioCodec, Container, MediaInfo, Preset, TranscodeRequest, VideoCodec};
