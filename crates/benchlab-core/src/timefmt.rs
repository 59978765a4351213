//! Small duration-formatting helpers for progress logs and result-file
//! comments.

/// Render a duration in seconds as `[D day(s), ]H:MM:SS[.ffffff]`.
pub fn seconds_pretty(seconds: f64) -> String {
    let total_micros = (seconds * 1_000_000.0).round() as i64;
    let micros = (total_micros % 1_000_000).unsigned_abs();
    let total_secs = total_micros / 1_000_000;

    let days = total_secs / 86_400;
    let rem = total_secs % 86_400;
    let hours = rem / 3_600;
    let minutes = (rem % 3_600) / 60;
    let secs = rem % 60;

    let mut out = String::new();
    if days != 0 {
        let plural = if days == 1 { "day" } else { "days" };
        out.push_str(&format!("{days} {plural}, "));
    }
    out.push_str(&format!("{hours}:{minutes:02}:{secs:02}"));
    if micros != 0 {
        out.push_str(&format!(".{micros:06}"));
    }
    out
}
