pub mod jsonl;

pub use jsonl::JsonlReader;
