// Job model and command compilation - independent of process execution

pub mod args;
pub mod compile;
pub mod model;

pub use args::{ArgPriority, ArgumentList};
pub use compile::{CompiledCommand, FFMPEG_EXECUTABLE, compile, render_filter_graph};
pub use model::{
    Codec, CodecOption, FfmpegJob, Filter, FilterOption, Input, MappedStream, StreamKind,
};
