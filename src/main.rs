use anyhow::Result;
use lipsync_shorts::generator::{run_chunk_plan, run_generation, run_list_voices};
use lipsync_shorts::init;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage:
  lipsync-shorts <script.txt> <scene-image-url> [output-name]
  lipsync-shorts voices
  lipsync-shorts chunks <script.txt>";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let code = match args.as_slice() {
        [cmd] if cmd == "voices" => run_list_voices().await?,
        [cmd, script] if cmd == "chunks" => run_chunk_plan(&PathBuf::from(script)).await?,
        [script, scene_url] => {
            init::preflight().await;
            run_generation(&PathBuf::from(script), scene_url, None).await?
        }
        [script, scene_url, name] => {
            init::preflight().await;
            run_generation(&PathBuf::from(script), scene_url, Some(name.as_str())).await?
        }
        _ => {
            eprintln!("{}", USAGE);
            1
        }
    };
    std::process::exit(code);
}
