//! Argument assembly: priority-bucketed token lists and value converters.
//!
//! Each node of the job tree registers its tokens into an [`ArgumentList`]
//! through an explicit `write_args` schema (see `compile.rs`); this module
//! owns ordering and textual conversion only.

use std::time::Duration;

/// Global placement class for an argument. Buckets render in declaration
/// order of this enum; within a bucket, insertion order is preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArgPriority {
    /// Global flags emitted before `-i` (`-y`, `-hide_banner`, `-ss`).
    PreInput,
    /// The input file flag itself.
    Input,
    /// Everything else, in declaration order.
    Default,
    /// The output file, always last.
    End,
}

const BUCKETS: usize = 4;

/// Ordered argument accumulator with four priority buckets.
#[derive(Debug, Default)]
pub struct ArgumentList {
    buckets: [Vec<String>; BUCKETS],
}

impl ArgumentList {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&mut self, priority: ArgPriority) -> &mut Vec<String> {
        &mut self.buckets[priority as usize]
    }

    /// A flag with no value (`-y`).
    pub fn push_flag(&mut self, priority: ArgPriority, flag: &str) {
        self.bucket(priority).push(flag.to_string());
    }

    /// A `flag value` pair.
    pub fn push_pair(&mut self, priority: ArgPriority, flag: &str, value: impl Into<String>) {
        let bucket = self.bucket(priority);
        bucket.push(flag.to_string());
        bucket.push(value.into());
    }

    /// A positional value with no flag (the output file).
    pub fn push_value(&mut self, priority: ArgPriority, value: impl Into<String>) {
        self.bucket(priority).push(value.into());
    }

    /// Join every bucket in priority order into the final argument string.
    pub fn render(&self) -> String {
        let mut tokens = Vec::new();
        for bucket in &self.buckets {
            tokens.extend(bucket.iter().map(String::as_str));
        }
        tokens.join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }
}

/// Quote a file name for interpolation into the argument string.
///
/// Embedded double quotes are escaped and a trailing backslash is doubled so
/// it cannot swallow the closing quote on Windows-style command lines.
pub fn escape_filename(name: &str) -> String {
    let mut escaped = name.replace('"', "\\\"");
    if escaped.ends_with('\\') {
        escaped.push('\\');
    }
    format!("\"{escaped}\"")
}

/// Render a time span in ffmpeg's clock form, `H:MM:SS.mmm`.
pub fn format_clock(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = total_secs / 3600;
    format!("{hours}:{mins:02}:{secs:02}.{ms:03}")
}

/// Binary boolean conversion: always emits a textual true/false.
pub fn format_binary(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Fixed-point CRF rendering, invariant of locale: integers render bare,
/// fractional values keep one decimal place.
pub fn format_crf(crf: f32) -> String {
    if (crf - crf.trunc()).abs() < f32::EPSILON {
        format!("{}", crf.trunc() as i64)
    } else {
        format!("{crf:.1}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_render_in_priority_order() {
        let mut args = ArgumentList::new();
        args.push_value(ArgPriority::End, "out.mkv");
        args.push_pair(ArgPriority::Default, "-t", "10");
        args.push_pair(ArgPriority::Input, "-i", "in.mkv");
        args.push_flag(ArgPriority::PreInput, "-y");

        assert_eq!(args.render(), "-y -i in.mkv -t 10 out.mkv");
    }

    #[test]
    fn insertion_order_preserved_within_bucket() {
        let mut args = ArgumentList::new();
        args.push_flag(ArgPriority::PreInput, "-hide_banner");
        args.push_flag(ArgPriority::PreInput, "-y");
        assert_eq!(args.render(), "-hide_banner -y");
    }

    #[test]
    fn filename_escaping() {
        assert_eq!(escape_filename("plain.mkv"), "\"plain.mkv\"");
        assert_eq!(
            escape_filename("with \"quotes\".mkv"),
            "\"with \\\"quotes\\\".mkv\""
        );
        assert_eq!(escape_filename("C:\\media\\"), "\"C:\\media\\\\\"");
    }

    #[test]
    fn clock_format() {
        assert_eq!(format_clock(Duration::from_secs(0)), "0:00:00.000");
        assert_eq!(format_clock(Duration::from_millis(90_500)), "0:01:30.500");
        assert_eq!(
            format_clock(Duration::from_secs(2 * 3600 + 5 * 60 + 7)),
            "2:05:07.000"
        );
    }

    #[test]
    fn crf_rendering() {
        assert_eq!(format_crf(23.0), "23");
        assert_eq!(format_crf(22.5), "22.5");
    }
}
