use crate::config::load_config;
use crate::placement_dump::write_placement_dump;
use crate::render::{render_svg, write_output_png, write_output_svg};
use crate::scene::Scene;
use crate::session::PlacementSession;
use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "symplace",
    version,
    about = "Place map symbol labels, resolve collisions and animate fades"
)]
pub struct Args {
    /// Scene file (JSON or JSON5) or '-' for stdin
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Output file. Defaults to stdout for SVG and JSON if omitted.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short = 'e', long = "outputFormat", value_enum, default_value = "svg")]
    pub output_format: OutputFormat,

    /// Config file (placement and render sections)
    #[arg(short = 'c', long = "configFile")]
    pub config: Option<PathBuf>,

    /// Viewport width, overriding the scene camera
    #[arg(short = 'w', long = "width")]
    pub width: Option<f32>,

    /// Viewport height, overriding the scene camera
    #[arg(short = 'H', long = "height")]
    pub height: Option<f32>,

    /// Keep collision debug geometry for every bucket
    #[arg(long = "showCollisionBoxes")]
    pub show_collision_boxes: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Svg,
    Png,
    Json,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

pub fn run() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    if args.show_collision_boxes {
        config.placement.show_collision_boxes = true;
    }

    let input = read_input(args.input.as_deref())?;
    let mut scene = Scene::parse(&input)?;
    let width = args.width.unwrap_or(scene.transform.width);
    let height = args.height.unwrap_or(scene.transform.height);
    scene.set_viewport(width, height);
    config.render.width = width;
    config.render.height = height;
    debug!(
        layers = scene.layers.len(),
        tiles = scene.tiles.len(),
        frames = scene.frames().len(),
        "scene loaded"
    );

    let mut session = PlacementSession::new(config.placement.clone());
    let placement = session
        .run_scene(&mut scene)
        .ok_or_else(|| anyhow::anyhow!("Scene produced no placement"))?;

    match args.output_format {
        OutputFormat::Json => {
            write_placement_dump(args.output.as_deref(), placement)?;
        }
        OutputFormat::Svg => {
            let svg = render_svg(placement, &scene.layers, &scene.tiles, &config.render);
            write_output_svg(&svg, args.output.as_deref())?;
        }
        OutputFormat::Png => {
            let output = ensure_output(&args.output, "png")?;
            let svg = render_svg(placement, &scene.layers, &scene.tiles, &config.render);
            write_output_png(&svg, &output, &config.render)?;
        }
    }
    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => Ok(std::fs::read_to_string(path)?),
        _ => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn ensure_output(output: &Option<PathBuf>, ext: &str) -> Result<PathBuf> {
    if let Some(path) = output {
        return Ok(path.clone());
    }
    Err(anyhow::anyhow!("Output path required for {} output", ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_camel_case_flags() {
        let args = Args::try_parse_from([
            "symplace",
            "-i",
            "scene.json",
            "-e",
            "json",
            "-w",
            "640",
            "--showCollisionBoxes",
        ])
        .expect("arguments parse");
        assert_eq!(args.input, Some(PathBuf::from("scene.json")));
        assert_eq!(args.output_format, OutputFormat::Json);
        assert_eq!(args.width, Some(640.0));
        assert_eq!(args.height, None);
        assert!(args.show_collision_boxes);
    }

    #[test]
    fn png_requires_output_path() {
        assert!(ensure_output(&None, "png").is_err());
        let path = PathBuf::from("out.png");
        assert_eq!(ensure_output(&Some(path.clone()), "png").expect("path given"), path);
    }
}
