mod encoder_locator;
mod ffprobe_info;
mod path_validator;
mod video_scanner;

pub use encoder_locator::{ENCODER_BINARY, PROBE_BINARY, locate_encoder, locate_tool};
pub use ffprobe_info::{
    FfprobeProbe, MetadataProbe, ProbeError, VideoInfo, parse_ffprobe_output,
    pixel_format_has_alpha,
};
pub use path_validator::{ensure_output_parent, validate_directory_exists, validate_input_file};
pub use video_scanner::{VIDEO_EXTENSIONS, VideoFileInfo, is_video_file, scan_video_files};
