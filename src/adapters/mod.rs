//! Concrete collaborator implementations behind the port traits: a
//! directory-watching frame source, HTTP clients for the detector
//! sidecar and the OpenAI-compatible reasoning backend, and narrators
//! for the console and a TTS service.

pub mod detector;
pub mod frames;
pub mod narrator;
pub mod reasoning;

pub use detector::HttpDetector;
pub use frames::DirectoryFrameSource;
pub use narrator::{ConsoleNarrator, HttpNarrator};
pub use reasoning::HttpReasoning;
