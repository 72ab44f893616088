pub mod llm;
pub mod usage;
