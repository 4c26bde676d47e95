//! The job tree: everything the compiler needs to emit one ffmpeg invocation.
//!
//! Polymorphic hierarchies from the configuration layer (codecs, inputs,
//! filters) are tagged variants here; compilation dispatches on the tag.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::geometry::{Dimensions, Range};

/// One `key=value` (or bare-key) option inside an encoder parameter string
/// such as `-x265-params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecOption {
    pub name: String,
    pub value: String,
}

impl CodecOption {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Encoder selection for a mapped stream.
///
/// `Named` covers everything configured by name only (aac, flac, copy).
/// The x26x family adds preset/CRF, and x265 additionally carries its
/// ordered `-x265-params` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Codec {
    Named {
        name: String,
    },
    X264 {
        preset: String,
        crf: f32,
    },
    X265 {
        preset: String,
        crf: f32,
        #[serde(default)]
        options: Vec<CodecOption>,
    },
}

impl Codec {
    pub fn name(&self) -> &str {
        match self {
            Codec::Named { name } => name,
            Codec::X264 { .. } => "libx264",
            Codec::X265 { .. } => "libx265",
        }
    }

    /// Valid CRF bounds for the x26x encoders.
    pub fn crf_range() -> Range<f32> {
        Range::new(Some(0.0), Some(51.0))
    }

    /// True when the codec carries no out-of-range quality value.
    pub fn is_valid(&self) -> bool {
        match self {
            Codec::Named { .. } => true,
            Codec::X264 { crf, .. } | Codec::X265 { crf, .. } => {
                Self::crf_range().contains(*crf)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Audio,
    Video,
}

impl StreamKind {
    /// The stream-type letter ffmpeg uses in per-stream flags (`-c:v`, `-b:a`).
    pub fn specifier(&self) -> char {
        match self {
            StreamKind::Audio => 'a',
            StreamKind::Video => 'v',
        }
    }
}

/// Source of a mapped stream or filter input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Input {
    /// A concrete stream of an input file, rendered `file:stream`.
    Stream { file_index: u32, stream_index: u32 },
    /// A label produced earlier in the filter graph.
    Labeled { label: String },
}

impl Input {
    pub fn stream(file_index: u32, stream_index: u32) -> Self {
        Input::Stream {
            file_index,
            stream_index,
        }
    }

    pub fn labeled(label: impl Into<String>) -> Self {
        Input::Labeled {
            label: label.into(),
        }
    }

    pub fn specifier(&self) -> String {
        match self {
            Input::Stream {
                file_index,
                stream_index,
            } => format!("{file_index}:{stream_index}"),
            Input::Labeled { label } => label.clone(),
        }
    }
}

/// One `-map`ped output stream with its codec settings.
///
/// `channels` is only meaningful for audio streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedStream {
    pub kind: StreamKind,
    pub input: Input,
    pub codec: Codec,
    #[serde(default)]
    pub bitrate_k: Option<u32>,
    #[serde(default)]
    pub channels: Option<u32>,
}

impl MappedStream {
    pub fn video(input: Input, codec: Codec) -> Self {
        Self {
            kind: StreamKind::Video,
            input,
            codec,
            bitrate_k: None,
            channels: None,
        }
    }

    pub fn audio(input: Input, codec: Codec, channels: Option<u32>) -> Self {
        Self {
            kind: StreamKind::Audio,
            input,
            codec,
            bitrate_k: None,
            channels,
        }
    }
}

/// One option inside a filter segment. All three ffmpeg forms are supported:
/// `name=value`, bare `name`, and bare positional `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOption {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl FilterOption {
    pub fn pair(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            value: Some(value.into()),
        }
    }

    pub fn name_only(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            value: None,
        }
    }

    pub fn value_only(value: impl Into<String>) -> Self {
        Self {
            name: None,
            value: Some(value.into()),
        }
    }
}

/// One node of the filter graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    Graph {
        name: String,
        #[serde(default)]
        inputs: Vec<Input>,
        #[serde(default)]
        output_labels: Vec<String>,
        #[serde(default)]
        options: Vec<FilterOption>,
        /// Consume the previous filter's first output label instead of the
        /// declared inputs, so chains like crop -> scale -> tonemap need no
        /// manual relabeling.
        #[serde(default)]
        chain_to_previous: bool,
    },
    /// Emitted verbatim; never chains.
    Custom { raw: String },
}

impl Filter {
    pub fn graph(name: impl Into<String>) -> Self {
        Filter::Graph {
            name: name.into(),
            inputs: Vec::new(),
            output_labels: Vec::new(),
            options: Vec::new(),
            chain_to_previous: false,
        }
    }

    pub fn custom(raw: impl Into<String>) -> Self {
        Filter::Custom { raw: raw.into() }
    }
}

/// A complete transcode job, compiled into one ffmpeg command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FfmpegJob {
    pub input_file: String,
    pub output_file: String,
    #[serde(default)]
    pub hide_banner: bool,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default, with = "opt_duration_secs")]
    pub start_time: Option<Duration>,
    #[serde(default, with = "opt_duration_secs")]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub frame_count: Option<u64>,
    #[serde(default)]
    pub canvas_size: Option<Dimensions>,
    #[serde(default)]
    pub forced_subtitles_only: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub streams: Vec<MappedStream>,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

impl FfmpegJob {
    pub fn new(input_file: impl Into<String>, output_file: impl Into<String>) -> Self {
        Self {
            input_file: input_file.into(),
            output_file: output_file.into(),
            hide_banner: false,
            overwrite: false,
            start_time: None,
            duration: None,
            frame_count: None,
            canvas_size: None,
            forced_subtitles_only: None,
            format: None,
            streams: Vec::new(),
            filters: Vec::new(),
        }
    }
}

/// Durations serialize as fractional seconds in job files.
mod opt_duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs_f64))
    }
}
