//! Configuration management for Viten.

mod prompts;
mod settings;

pub use prompts::{render_instructions, AnalyzerPrompts, Prompts, RagPrompts};
pub use settings::{
    EmbeddingSettings, GeneralSettings, MediaChunkSizes, MediaSettings, OcrParserMode,
    ProcessingSettings, RagSettings, RateSettings, SearchSettings, Settings, VideoSamplingMode,
    VideoSettings,
};
