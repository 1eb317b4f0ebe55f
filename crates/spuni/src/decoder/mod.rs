pub mod buffer;
pub mod cursor;
pub mod engine;

pub use buffer::TokenBuffer;
pub use cursor::{DecodeCursor, DecodePhase, DecodeStep};
pub use engine::{GenerationEngine, GenerationOutput};

#[cfg(test)]
mod test_engine;
