mod image_panel;
mod model_panel;
mod notice;

use clap::{Parser, Subcommand};
use image_panel::{ImagePanel, ResultView};
use model_panel::ModelPanel;
use notice::Notice;
use relay_client::DetectClient;
use relay_common::config::Config;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "relay-console")]
#[command(about = "Still-image detection and model management for a detection service")]
#[command(version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the models and classes files the service offers
    Models,

    /// Switch the service to another model
    Switch {
        /// Model file name (from 'relay-console models')
        #[arg(short, long)]
        model: String,

        /// Classes file name (from 'relay-console models')
        #[arg(short = 'k', long)]
        classes: String,
    },

    /// Run detection on one image
    Detect {
        /// Image file to upload
        image: PathBuf,

        /// Save the annotated result here (file or directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let client = match DetectClient::new(&config.server) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to create detection client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let notice = match cli.command {
        Commands::Models => list_models(&client).await,
        Commands::Switch { model, classes } => {
            let mut panel = ModelPanel::new();
            panel.load(&client).await;
            panel.select_model(&model);
            panel.select_classes(&classes);
            println!(
                "switching to {} with {}",
                panel.selected_model(),
                panel.selected_classes()
            );
            panel.switch(&client).await
        }
        Commands::Detect { image, output } => detect(&client, image, output).await,
    };

    if notice.is_error() {
        eprintln!("{notice}");
        ExitCode::FAILURE
    } else {
        println!("{notice}");
        ExitCode::SUCCESS
    }
}

async fn list_models(client: &DetectClient) -> Notice {
    let mut panel = ModelPanel::new();
    panel.load(client).await;
    if panel.models().is_empty() && panel.classes().is_empty() {
        return Notice::Error("the service offered no models or classes files".into());
    }

    // '*' marks the entry a bare switch would pick
    println!("models:");
    for model in panel.models() {
        println!("{} {model}", marker(model == panel.selected_model()));
    }
    println!("classes:");
    for classes in panel.classes() {
        println!("{} {classes}", marker(classes == panel.selected_classes()));
    }
    Notice::Info(format!(
        "{} models, {} classes files",
        panel.models().len(),
        panel.classes().len()
    ))
}

async fn detect(client: &DetectClient, image: PathBuf, output: Option<PathBuf>) -> Notice {
    let mut panel = ImagePanel::new();
    if let Err(e) = panel.select_file(&image) {
        return Notice::Error(e.to_string());
    }
    println!("{}", panel.label());
    if let Some(preview) = panel.preview() {
        println!("preview: {}", abbreviate(preview, 48));
    }
    if !panel.can_detect() {
        return Notice::Error("no image selected".into());
    }

    panel.detect(client).await;
    match panel.result() {
        ResultView::Image { src } => println!("result: {}", abbreviate(src, 96)),
        ResultView::Failed { message } => {
            return Notice::Error(format!("Detection failed: {message}"))
        }
        ResultView::Placeholder | ResultView::Detecting => {
            return Notice::Error("detection did not run".into())
        }
    }

    match output {
        Some(dest) => match panel.download(client, &dest).await {
            Ok(path) => Notice::Info(format!("saved {}", path.display())),
            Err(e) => Notice::Error(e.to_string()),
        },
        None => Notice::Info("detection finished".into()),
    }
}

fn marker(selected: bool) -> &'static str {
    if selected {
        " *"
    } else {
        "  "
    }
}

/// Shorten long data URLs for terminal output.
fn abbreviate(src: &str, max_chars: usize) -> String {
    if src.chars().count() <= max_chars {
        return src.to_string();
    }
    let head: String = src.chars().take(max_chars).collect();
    format!("{head}... ({} bytes)", src.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviate_keeps_short_sources() {
        assert_eq!(abbreviate("IMG:xyz", 96), "IMG:xyz");
    }

    #[test]
    fn abbreviate_truncates_data_urls() {
        let src = format!("data:image/jpeg;base64,{}", "A".repeat(200));
        let short = abbreviate(&src, 30);
        assert!(short.starts_with("data:image/jpeg;base64,AAAAAAA..."));
        assert!(short.ends_with(&format!("({} bytes)", src.len())));
    }

    #[test]
    fn cli_parses_switch() {
        let cli = Cli::try_parse_from([
            "relay-console",
            "--config",
            "relay.toml",
            "switch",
            "--model",
            "helmet.onnx",
            "-k",
            "helmet.txt",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("relay.toml"));
        assert!(matches!(
            cli.command,
            Commands::Switch { ref model, ref classes } if model == "helmet.onnx" && classes == "helmet.txt"
        ));
    }
}
