//! Deterministic job-tree to command-line compilation.
//!
//! Every node type registers its tokens through an explicit `write_args`
//! schema: ordering comes from the four global priority buckets plus the
//! declaration order inside each node, so compiling the same tree twice
//! yields byte-identical output. The compiler only assembles text; graph
//! validation (undeclared labels and the like) belongs to the caller.

use tracing::debug;

use super::args::{
    ArgPriority, ArgumentList, escape_filename, format_binary, format_clock, format_crf,
};
use super::model::{Codec, FfmpegJob, Filter, FilterOption, MappedStream};

pub const FFMPEG_EXECUTABLE: &str = "ffmpeg";

/// The compiled invocation: an executable path and a single argument string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledCommand {
    pub executable: String,
    pub arguments: String,
}

/// Compile a job tree into its ffmpeg command line.
pub fn compile(job: &FfmpegJob) -> CompiledCommand {
    let mut args = ArgumentList::new();
    job.write_args(&mut args);

    let command = CompiledCommand {
        executable: FFMPEG_EXECUTABLE.to_string(),
        arguments: args.render(),
    };
    debug!(executable = %command.executable, arguments = %command.arguments, "compiled job");
    command
}

impl FfmpegJob {
    fn write_args(&self, args: &mut ArgumentList) {
        if self.hide_banner {
            args.push_flag(ArgPriority::PreInput, "-hide_banner");
        }
        if self.overwrite {
            args.push_flag(ArgPriority::PreInput, "-y");
        }
        if let Some(start) = self.start_time {
            args.push_pair(ArgPriority::PreInput, "-ss", format_clock(start));
        }

        args.push_pair(ArgPriority::Input, "-i", escape_filename(&self.input_file));

        if let Some(duration) = self.duration {
            args.push_pair(ArgPriority::Default, "-t", format_clock(duration));
        }
        if let Some(frames) = self.frame_count {
            args.push_pair(ArgPriority::Default, "-frames:v", frames.to_string());
        }
        if let Some(canvas) = self.canvas_size {
            args.push_pair(
                ArgPriority::Default,
                "-canvas_size",
                format!("{}x{}", canvas.width, canvas.height),
            );
        }
        if let Some(forced) = self.forced_subtitles_only {
            args.push_pair(ArgPriority::Default, "-forced_subs_only", format_binary(forced));
        }
        if let Some(format) = &self.format {
            args.push_pair(ArgPriority::Default, "-f", format.clone());
        }

        for stream in &self.streams {
            stream.write_args(args);
        }

        if !self.filters.is_empty() {
            args.push_pair(
                ArgPriority::Default,
                "-filter_complex",
                render_filter_graph(&self.filters),
            );
        }

        args.push_value(ArgPriority::End, escape_filename(&self.output_file));
    }
}

impl MappedStream {
    fn write_args(&self, args: &mut ArgumentList) {
        let kind = self.kind.specifier();

        args.push_pair(ArgPriority::Default, "-map", self.input.specifier());
        args.push_pair(
            ArgPriority::Default,
            &format!("-c:{kind}"),
            self.codec.name().to_string(),
        );
        self.codec.write_args(args);
        if let Some(bitrate) = self.bitrate_k {
            args.push_pair(ArgPriority::Default, &format!("-b:{kind}"), format!("{bitrate}k"));
        }
        if let Some(channels) = self.channels {
            args.push_pair(ArgPriority::Default, "-ac", channels.to_string());
        }
    }
}

impl Codec {
    /// Codec sub-arguments. Preset and CRF rank before the remaining fields.
    fn write_args(&self, args: &mut ArgumentList) {
        match self {
            Codec::Named { .. } => {}
            Codec::X264 { preset, crf } => {
                args.push_pair(ArgPriority::Default, "-preset", preset.clone());
                args.push_pair(ArgPriority::Default, "-crf", format_crf(*crf));
            }
            Codec::X265 {
                preset,
                crf,
                options,
            } => {
                args.push_pair(ArgPriority::Default, "-preset", preset.clone());
                args.push_pair(ArgPriority::Default, "-crf", format_crf(*crf));
                if !options.is_empty() {
                    let params = options
                        .iter()
                        .map(|o| format!("{}={}", o.name, o.value))
                        .collect::<Vec<_>>()
                        .join(":");
                    args.push_pair(ArgPriority::Default, "-x265-params", params);
                }
            }
        }
    }
}

/// Render the full `-filter_complex` graph: `;`-joined segments of the form
/// `[in...]name=opt:...[out...]`.
pub fn render_filter_graph(filters: &[Filter]) -> String {
    let mut segments = Vec::with_capacity(filters.len());
    // First output label of the previous filter, consumed by chained filters.
    let mut previous_output: Option<String> = None;

    for filter in filters {
        match filter {
            Filter::Custom { raw } => {
                segments.push(raw.clone());
                previous_output = None;
            }
            Filter::Graph {
                name,
                inputs,
                output_labels,
                options,
                chain_to_previous,
            } => {
                let mut segment = String::new();

                if *chain_to_previous {
                    if let Some(label) = &previous_output {
                        segment.push_str(&format!("[{label}]"));
                    }
                } else {
                    for input in inputs {
                        segment.push_str(&format!("[{}]", input.specifier()));
                    }
                }

                segment.push_str(name);

                if !options.is_empty() {
                    segment.push('=');
                    segment.push_str(
                        &options
                            .iter()
                            .map(render_filter_option)
                            .collect::<Vec<_>>()
                            .join(":"),
                    );
                }

                for label in output_labels {
                    segment.push_str(&format!("[{label}]"));
                }

                previous_output = output_labels.first().cloned();
                segments.push(segment);
            }
        }
    }

    segments.join(";")
}

fn render_filter_option(option: &FilterOption) -> String {
    match (&option.name, &option.value) {
        (Some(name), Some(value)) => format!("{name}={value}"),
        (Some(name), None) => name.clone(),
        (None, Some(value)) => value.clone(),
        (None, None) => String::new(),
    }
}
