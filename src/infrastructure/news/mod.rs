pub mod sentiment;

pub use sentiment::SentimentAnalyzer;
