//! Headline sentiment scoring using VADER
//!
//! Turns news headlines and bodies into the `[-1, 1]` advice scores the
//! decision engine fuses. VADER's general lexicon is boosted with
//! equity-market keywords it would otherwise miss.

use vader_sentiment::SentimentIntensityAnalyzer;

const BULLISH_KEYWORDS: &[(&str, f64)] = &[
    ("surge", 0.4),
    ("surges", 0.4),
    ("rally", 0.4),
    ("rallies", 0.4),
    ("soar", 0.5),
    ("soars", 0.5),
    ("beats estimates", 0.5),
    ("beat estimates", 0.5),
    ("raises guidance", 0.5),
    ("record revenue", 0.4),
    ("all-time high", 0.5),
    ("breakout", 0.3),
    ("upgrade", 0.3),
    ("upgraded", 0.3),
    ("fda approval", 0.6),
    ("approval", 0.2),
    ("partnership", 0.2),
    ("buyback", 0.3),
    ("dividend increase", 0.3),
    ("breakthrough", 0.4),
    ("outperform", 0.3),
];

const BEARISH_KEYWORDS: &[(&str, f64)] = &[
    ("crash", -0.5),
    ("crashes", -0.5),
    ("plunge", -0.5),
    ("plunges", -0.5),
    ("misses estimates", -0.5),
    ("missed estimates", -0.5),
    ("cuts guidance", -0.5),
    ("lawsuit", -0.4),
    ("investigation", -0.3),
    ("downgrade", -0.3),
    ("downgraded", -0.3),
    ("recall", -0.4),
    ("bankruptcy", -0.6),
    ("default", -0.4),
    ("sell-off", -0.4),
    ("selloff", -0.4),
    ("fraud", -0.5),
    ("restatement", -0.4),
    ("halted", -0.3),
    ("delisting", -0.5),
];

/// Sentiment analyzer combining VADER's compound score with equity
/// keyword boosting.
pub struct SentimentAnalyzer {
    analyzer: SentimentIntensityAnalyzer<'static>,
}

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self {
            analyzer: SentimentIntensityAnalyzer::new(),
        }
    }

    fn keyword_boost(&self, text: &str) -> f64 {
        let text_lower = text.to_lowercase();
        let mut boost = 0.0;

        for (keyword, score) in BULLISH_KEYWORDS {
            if text_lower.contains(keyword) {
                boost += score;
            }
        }
        for (keyword, score) in BEARISH_KEYWORDS {
            if text_lower.contains(keyword) {
                boost += score; // score is already negative
            }
        }
        boost
    }

    /// Scores one text in [-1, 1].
    pub fn analyze(&self, text: &str) -> f64 {
        if text.trim().is_empty() {
            return 0.0;
        }

        let scores = self.analyzer.polarity_scores(text);
        let vader_score = scores["compound"];
        let boost = self.keyword_boost(text);

        (vader_score + boost * 0.5).clamp(-1.0, 1.0)
    }

    /// Scores a news item. The headline carries most of the signal, so it
    /// is weighted 70/30 over the body.
    pub fn analyze_news(&self, headline: &str, body: &str) -> f64 {
        let headline_score = self.analyze(headline);
        let body_score = self.analyze(body);
        (headline_score * 0.7) + (body_score * 0.3)
    }
}

impl Default for SentimentAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
