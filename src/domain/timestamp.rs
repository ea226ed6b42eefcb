//! `HH:MM:SS.mmm` caption timestamps.

/// Parse `HH:MM:SS.mmm` (fraction optional) into seconds.
pub fn parse(raw: &str) -> Option<f64> {
    let mut parts = raw.trim().splitn(3, ':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    Some((hours * 3600 + minutes * 60) as f64 + seconds)
}

/// Format seconds back to `HH:MM:SS.mmm`.
pub fn format(seconds: f64) -> String {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let (secs, millis) = (millis / 1000, millis % 1000);
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        millis
    )
}
