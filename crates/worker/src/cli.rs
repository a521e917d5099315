use std::path::PathBuf;

use argh::FromArgs;
use cropscan_core::types::AnalysisType;

/// Crop-health analysis of an image or a video file. Prints the result as JSON.
#[derive(FromArgs, Debug)]
pub struct Args {
    #[argh(subcommand)]
    pub command: Command,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
pub enum Command {
    Image(ImageCommand),
    Video(VideoCommand),
}

/// Analyse a single image.
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "image")]
pub struct ImageCommand {
    /// image file (PNG, JPEG or WebP)
    #[argh(positional)]
    pub path: PathBuf,

    /// disease, nutrient or both
    #[argh(option, default = "AnalysisType::Both")]
    pub analysis_type: AnalysisType,
}

/// Analyse sampled frames of a video.
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "video")]
pub struct VideoCommand {
    /// video file
    #[argh(positional)]
    pub path: PathBuf,

    /// analyse every Nth frame (defaults to FRAME_INTERVAL)
    #[argh(option)]
    pub frame_interval: Option<u32>,

    /// disease, nutrient or both
    #[argh(option, default = "AnalysisType::Both")]
    pub analysis_type: AnalysisType,

    /// overall budget in seconds (defaults to VIDEO_DEADLINE_SECS)
    #[argh(option)]
    pub deadline_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, argh::EarlyExit> {
        Args::from_args(&["cropscan-worker"], args)
    }

    #[test]
    fn parses_video_options() {
        let args = parse(&[
            "video",
            "field.mp4",
            "--frame-interval",
            "15",
            "--analysis-type",
            "disease",
            "--deadline-secs",
            "90",
        ])
        .unwrap();
        let Command::Video(video) = args.command else {
            panic!("expected video subcommand");
        };
        assert_eq!(video.path, PathBuf::from("field.mp4"));
        assert_eq!(video.frame_interval, Some(15));
        assert_eq!(video.analysis_type, AnalysisType::Disease);
        assert_eq!(video.deadline_secs, Some(90));
    }

    #[test]
    fn image_defaults_to_both() {
        let args = parse(&["image", "leaf.png"]).unwrap();
        let Command::Image(image) = args.command else {
            panic!("expected image subcommand");
        };
        assert_eq!(image.analysis_type, AnalysisType::Both);
    }

    #[test]
    fn rejects_unknown_analysis_type() {
        assert!(parse(&["image", "leaf.png", "--analysis-type", "pests"]).is_err());
    }
}
