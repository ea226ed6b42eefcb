//! YouTube-flavoured WebVTT cleaning and word-timed span extraction.
//!
//! Auto-generated captions carry one `<HH:MM:SS.mmm>` tag per spoken word.
//! Once the styling tags are stripped and cue timings are rewritten as tags,
//! the text between two consecutive timestamp tags is the span of one word.

use crate::domain::timestamp;
use crate::domain::video::{Occurrence, OccurrenceData};
use regex::Regex;

/// Word pattern, anchored at the start of the trimmed span text.
#[derive(Debug, Clone)]
pub struct WordMatcher {
    pattern: Regex,
}

impl WordMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(&format!("^(?:{pattern})"))?,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

#[derive(Debug, Clone)]
pub struct CaptionsParser {
    matcher: WordMatcher,
    styling: Regex,
    tag: Regex,
    time: Regex,
}

impl CaptionsParser {
    pub fn new(word_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            matcher: WordMatcher::new(word_pattern)?,
            styling: Regex::new(r"</c>|<c(\.color\w+)?>")?,
            tag: Regex::new(r"<(\d{2}:\d{2}:\d{2}\.\d{3})>")?,
            time: Regex::new(r"\d{2}:\d{2}:\d{2}\.\d{3}")?,
        })
    }

    /// Strip styling, keep tagged lines, turn cue timings into tags, join.
    pub fn clean(&self, raw: &str) -> String {
        let mut content = String::with_capacity(raw.len());
        for line in raw.lines() {
            let line = self.styling.replace_all(line, "");
            if !line.contains('>') {
                continue;
            }
            if line.contains("-->") {
                let start = line.get(..12).unwrap_or(&line);
                content.push('<');
                content.push_str(start);
                content.push('>');
            } else {
                content.push_str(&line);
            }
        }
        content
    }

    /// Every `(start, text, end)` span in cleaned content, in order.
    pub fn spans(&self, content: &str) -> Vec<Occurrence> {
        let tags: Vec<_> = self.tag.captures_iter(content).collect();
        tags.windows(2)
            .filter_map(|pair| {
                let (open, close) = (pair[0].get(0)?, pair[1].get(0)?);
                let between = &content[open.end()..close.start()];
                if between.is_empty() || between.contains('<') {
                    return None;
                }
                Some(Occurrence {
                    start: timestamp::parse(&pair[0][1])?,
                    text: between.trim().to_string(),
                    end: timestamp::parse(&pair[1][1])?,
                })
            })
            .collect()
    }

    /// Spans whose text matches the word, plus the duration estimate.
    pub fn extract(&self, raw: &str) -> OccurrenceData {
        let content = self.clean(raw);
        let occurrences = self
            .spans(&content)
            .into_iter()
            .filter(|span| self.matcher.is_match(&span.text))
            .collect();
        let duration = self
            .time
            .find_iter(&content)
            .last()
            .and_then(|m| timestamp::parse(m.as_str()));
        OccurrenceData {
            occurrences,
            duration,
        }
    }
}
