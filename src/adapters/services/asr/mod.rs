//! ASR and diarization provider adapters

mod assemblyai;
mod dashscope;
mod dashscope_async;
mod deepgram;

pub use assemblyai::AssemblyAiService;
pub use dashscope::DashScopeAsr;
pub use dashscope_async::DashScopeTranscription;
pub use deepgram::DeepgramService;
