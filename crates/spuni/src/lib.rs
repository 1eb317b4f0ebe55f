//! Batched autoregressive text generation over an opaque transformer
//! forward pass.
//!
//! The crate owns the decode loop: the fixed-size token buffer, the lockstep
//! position cursor, per-row EOS tracking and the sampling strategies that
//! turn next-token distributions into discrete choices. The transformer's
//! layer math, tokenization and dialog formatting stay behind the
//! collaborator traits in [`traits`].

pub mod chat;
pub mod common;
pub mod completion;
pub mod decoder;
pub mod traits;

pub use chat::{Dialog, Message, Role};
pub use common::{EngineConfig, EngineError, EngineResult, GenerationConfig};
pub use completion::{ChatPrediction, CompletionPrediction};
pub use decoder::{GenerationEngine, GenerationOutput};
pub use traits::{CausalModel, PromptBuilder, Tokenizer};

// Prelude for easy imports
pub mod prelude {
    pub use crate::chat::{Dialog, Message, Role};
    pub use crate::common::{EngineConfig, EngineError, EngineResult, GenerationConfig};
    pub use crate::completion::{ChatPrediction, CompletionPrediction};
    pub use crate::decoder::{GenerationEngine, GenerationOutput};
    pub use crate::traits::{CausalModel, PromptBuilder, Tokenizer};
}
