pub mod openai;
pub mod provider;
pub mod scripted;

pub use openai::OpenAiCompatibleProvider;
pub use provider::{
    ChatMessage, CompletionRequest, ContentPart, LlmProvider, MessageRole, ProviderContent,
    ProviderError,
};
pub use scripted::{ScriptedProvider, ScriptedReply, role_marker};
