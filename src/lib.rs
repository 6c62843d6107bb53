pub mod config;
pub mod detector;
pub mod enumerator;
pub mod error;
pub mod frame;
pub mod metadata;
pub mod naming;
pub mod processor;
pub mod slate_classifier;
pub mod video_processor;
pub mod writer;

pub use config::{CliOverrides, ConfigLoader, ExtendedConfig};
pub use detector::{detect_video, Candidate, Detection, DetectorState, SlateDetector};
pub use enumerator::{find_videos, Enumeration, VideoEntry, VIDEO_EXTENSIONS};
pub use error::{DecodeError, ScanError, ScanResult};
pub use frame::{Frame, FrameSource};
pub use metadata::{DetectionResult, MappingEntry, RunMetadata, SlateMapping};
pub use processor::{scan_folder, scan_folder_with, ScanConfig, ScanOutput, MAX_WORKERS};
pub use slate_classifier::{ClassificationScore, ClassifierConfig, SlateClassifier};
pub use video_processor::{FfmpegSource, FrameSampler, VideoProcessor};
pub use writer::{ResultWriter, VideoOutcome, MAPPING_FILENAME, METADATA_FILENAME};
