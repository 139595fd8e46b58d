use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use mcskin_render::validate::{parse_dimension, validate_skin_hash};
use mcskin_render::{render_face, RenderConfig, TextureHost};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mcskin-render", version, about = "Render Minecraft skin heads and face icons")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Flat 16x16 face icon
    Face {
        #[command(flatten)]
        source: SkinSource,
        /// Where to write the PNG
        #[arg(short, long)]
        output: PathBuf,
    },
    /// 3D head portrait rendered in headless Chrome
    Head {
        #[command(flatten)]
        source: SkinSource,
        /// Where to write the PNG
        #[arg(short, long)]
        output: PathBuf,
        /// Viewport width (64..=1024, default 1024)
        #[arg(long)]
        width: Option<String>,
        /// Viewport height (64..=1024, default 1024)
        #[arg(long)]
        height: Option<String>,
        /// Chrome executable
        #[arg(long)]
        chrome: Option<PathBuf>,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SkinSource {
    /// Skin PNG on disk
    #[arg(short, long)]
    skin: Option<PathBuf>,
    /// Texture hash to download from the texture host
    #[arg(long)]
    hash: Option<String>,
}

impl SkinSource {
    async fn load(&self) -> Result<Vec<u8>> {
        if let Some(path) = &self.skin {
            return std::fs::read(path).with_context(|| format!("reading {}", path.display()));
        }
        let hash = self.hash.as_deref().context("no skin source given")?;
        let hash = validate_skin_hash(hash)?;
        let host = TextureHost::new(Duration::from_secs(10))?;
        Ok(host.fetch_skin(hash).await?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();
    match cli.command {
        Command::Face { source, output } => {
            let skin = source.load().await?;
            let icon = render_face(&skin)?;
            std::fs::write(&output, icon).with_context(|| format!("writing {}", output.display()))?;
            info!("wrote face icon to {}", output.display());
        }
        Command::Head {
            source,
            output,
            width,
            height,
            chrome,
        } => {
            let width = parse_dimension(width.as_deref())?;
            let height = parse_dimension(height.as_deref())?;
            let skin = source.load().await?;

            let mut config = RenderConfig::from_env()?;
            if chrome.is_some() {
                config.browser.chrome_path = chrome;
            }
            let renderer = mcskin_render::cdp_renderer(config)?;

            let outcome = tokio::select! {
                res = renderer.render_head(&skin, width as i64, height as i64) => Some(res),
                _ = tokio::signal::ctrl_c() => None,
            };

            if let Err(e) = renderer.pages().shutdown().await {
                warn!("failed to close browser: {}", e);
            }

            match outcome {
                Some(res) => {
                    let image = res?;
                    std::fs::write(&output, image.as_bytes())
                        .with_context(|| format!("writing {}", output.display()))?;
                    info!("wrote {}x{} head render to {}", width, height, output.display());
                }
                None => warn!("interrupted; browser closed"),
            }
        }
    }
    Ok(())
}
