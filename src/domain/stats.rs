use crate::domain::video::Video;
use std::collections::HashMap;
use std::fmt;

const TOP_SPELLINGS: usize = 10;
const TOP_VIDEOS: usize = 5;

/// Summary of the cached occurrence data of a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStats {
    pub videos: usize,
    pub videos_with_data: usize,
    pub occurrences: usize,
    /// `(spelling, count)`, most frequent first
    pub spellings: Vec<(String, usize)>,
    /// `(video id, title, count)`, most occurrences first
    pub top_videos: Vec<(String, String, usize)>,
}

impl ChannelStats {
    pub fn compute(videos: &[Video]) -> Self {
        let mut spellings: HashMap<&str, usize> = HashMap::new();
        let mut top_videos = Vec::new();
        let mut videos_with_data = 0;
        let mut occurrences = 0;

        for video in videos {
            let Some(data) = &video.data else { continue };
            videos_with_data += 1;
            occurrences += data.occurrences.len();
            for occurrence in &data.occurrences {
                *spellings.entry(occurrence.text.as_str()).or_default() += 1;
            }
            if !data.occurrences.is_empty() {
                top_videos.push((video.id.clone(), video.title.clone(), data.occurrences.len()));
            }
        }

        let mut spellings: Vec<(String, usize)> =
            spellings.into_iter().map(|(s, n)| (s.to_string(), n)).collect();
        spellings.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        spellings.truncate(TOP_SPELLINGS);

        // stable: ties keep publish order
        top_videos.sort_by(|a, b| b.2.cmp(&a.2));
        top_videos.truncate(TOP_VIDEOS);

        Self {
            videos: videos.len(),
            videos_with_data,
            occurrences,
            spellings,
            top_videos,
        }
    }

    pub fn average(&self) -> f64 {
        if self.videos_with_data == 0 {
            0.0
        } else {
            self.occurrences as f64 / self.videos_with_data as f64
        }
    }
}

impl fmt::Display for ChannelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} Statistics {}", "=".repeat(21), "=".repeat(21))?;
        writeln!(f, "Videos listed: {}", self.videos)?;
        writeln!(f, "Videos with data: {}", self.videos_with_data)?;
        writeln!(f, "Occurrences: {}", self.occurrences)?;
        writeln!(f, "Average per video: {:.2}", self.average())?;
        let spellings: Vec<String> = self
            .spellings
            .iter()
            .map(|(word, n)| format!("{word} ({n} times)"))
            .collect();
        writeln!(f, "Most frequent spellings: {}", spellings.join(", "))?;
        for (id, title, n) in &self.top_videos {
            writeln!(f, "  {n:>4}  {id}  {title}")?;
        }
        Ok(())
    }
}
