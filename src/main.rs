use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use ova_core::config::{self, Config};
use ova_core::types::{AudioRequest, ChatRequest, ImageRequest};
use ova_core::util::mask_secret;
use ova_core::Gateway;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "ova-gateway",
    about = "OVA - resilient multi-provider inference gateway",
    version = ova_core::VERSION,
)]
struct Cli {
    /// Config file (default: ~/.ova/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a chat message (or omit it for interactive mode)
    Chat {
        message: Vec<String>,
        /// Override the default system prompt
        #[arg(long)]
        system: Option<String>,
        /// Maximum tokens to generate
        #[arg(long)]
        max_tokens: Option<u32>,
    },
    /// Recognize a sign language letter in an image
    Sign {
        image: PathBuf,
    },
    /// Detect objects and caption an image
    Analyze {
        image: PathBuf,
    },
    /// Transcribe an audio file
    Transcribe {
        audio: PathBuf,
    },
    /// Synthesize speech to a file
    Speak {
        text: Vec<String>,
        /// Output audio file
        #[arg(short, long, default_value = "speech.wav")]
        out: PathBuf,
    },
    /// Show configuration and breaker health
    Status,
    /// Close a circuit breaker (all of them when no class is given)
    ResetBreaker {
        class: Option<String>,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ova=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Chat {
            message,
            system,
            max_tokens,
        } => cmd_chat(config_path, message, system, max_tokens).await?,
        Commands::Sign { image } => cmd_sign(config_path, &image).await?,
        Commands::Analyze { image } => cmd_analyze(config_path, &image).await?,
        Commands::Transcribe { audio } => cmd_transcribe(config_path, &audio).await?,
        Commands::Speak { text, out } => cmd_speak(config_path, text, &out).await?,
        Commands::Status => cmd_status(config_path)?,
        Commands::ResetBreaker { class } => cmd_reset_breaker(config_path, class)?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => cmd_config_show(config_path)?,
            ConfigCommands::Init { force } => cmd_config_init(config_path, force)?,
        },
    }

    Ok(())
}

// ====== Helpers ======

fn build_gateway(config_path: Option<&Path>) -> Result<Gateway> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::get_config_path);
    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using defaults");
    }
    let cfg = config::load_config_from_env(config_path);
    if !cfg.has_token() {
        warn!("No Hugging Face token configured; raw models may reject requests");
    }
    Gateway::from_config(cfg).context("failed to build gateway")
}

/// Run `fut` behind a terminal spinner.
async fn with_spinner<F: Future>(message: &str, fut: F) -> Result<F::Output> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    let output = fut.await;
    spinner.finish_and_clear();
    Ok(output)
}

fn content_type_for(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    let ct = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "webm" => "audio/webm",
        "m4a" => "audio/mp4",
        _ => bail!("unsupported file type: {}", path.display()),
    };
    Ok(ct)
}

fn read_image(path: &Path) -> Result<ImageRequest> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(ImageRequest::new(bytes, content_type_for(path)?)?)
}

// ====== Commands ======

async fn cmd_chat(
    config_path: Option<&Path>,
    message: Vec<String>,
    system: Option<String>,
    max_tokens: Option<u32>,
) -> Result<()> {
    let gateway = build_gateway(config_path)?;
    let build_request = |text: &str| -> Result<ChatRequest> {
        let mut request = ChatRequest::new(text)?;
        if let Some(ref prompt) = system {
            request = request.with_system_prompt(prompt.clone());
        }
        if let Some(n) = max_tokens {
            request = request.with_max_tokens(n);
        }
        Ok(request)
    };

    if !message.is_empty() {
        let request = build_request(&message.join(" "))?;
        let reply = with_spinner("Thinking...", gateway.chat_request(&request)).await?;
        println!("{}", reply.text);
        if reply.source.is_fallback() {
            eprintln!("(local fallback after {} attempt(s))", reply.attempts);
        }
        return Ok(());
    }

    println!("OVA chat (Ctrl+D to exit, /status for breakers, /reset [class] to close them)\n");
    loop {
        use std::io::Write;
        print!("You: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if input == "/status" {
            println!("{}\n", serde_json::to_string_pretty(&gateway.health())?);
            continue;
        }
        if let Some(rest) = input.strip_prefix("/reset") {
            let class = rest.trim();
            if class.is_empty() {
                gateway.reset_all_breakers();
                println!("All breakers reset.\n");
            } else if gateway.reset_breaker(class) {
                println!("Breaker '{}' reset.\n", class);
            } else {
                println!("Unknown breaker '{}'.\n", class);
            }
            continue;
        }

        let request = build_request(input)?;
        let reply = with_spinner("Thinking...", gateway.chat_request(&request)).await?;
        println!("OVA [{}]: {}\n", reply.source, reply.text);
    }

    Ok(())
}

async fn cmd_sign(config_path: Option<&Path>, image: &Path) -> Result<()> {
    let gateway = build_gateway(config_path)?;
    let image = read_image(image)?;
    let result = with_spinner("Recognizing sign...", gateway.recognize_sign(&image)).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_analyze(config_path: Option<&Path>, image: &Path) -> Result<()> {
    let gateway = build_gateway(config_path)?;
    let image = read_image(image)?;
    let result = with_spinner("Analyzing image...", gateway.analyze_image(&image)).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_transcribe(config_path: Option<&Path>, audio: &Path) -> Result<()> {
    let gateway = build_gateway(config_path)?;
    let bytes = std::fs::read(audio).with_context(|| format!("failed to read {}", audio.display()))?;
    let request = AudioRequest::new(bytes, content_type_for(audio)?)?;
    let result = with_spinner("Transcribing...", gateway.transcribe(request)).await?;
    if result.success {
        println!("{}", result.text);
    } else {
        bail!(
            "transcription failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

async fn cmd_speak(config_path: Option<&Path>, text: Vec<String>, out: &Path) -> Result<()> {
    let gateway = build_gateway(config_path)?;
    let text = text.join(" ");
    let audio = with_spinner("Synthesizing...", gateway.synthesize(&text)).await?;
    match audio {
        Some(bytes) => {
            std::fs::write(out, &bytes).with_context(|| format!("failed to write {}", out.display()))?;
            println!("Wrote {} bytes to {}", bytes.len(), out.display());
            Ok(())
        }
        None => bail!("speech synthesis unavailable"),
    }
}

fn cmd_status(config_path: Option<&Path>) -> Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::get_config_path);
    let gateway = build_gateway(config_path)?;
    let cfg = gateway.config();

    println!("OVA gateway v{} ({})\n", ova_core::VERSION, ova_core::GIT_HASH);
    println!(
        "Config: {} {}",
        path.display(),
        if path.exists() { "✓" } else { "✗ (defaults)" }
    );
    println!("Environment: {}", cfg.environment);
    println!("HF token: {}", if cfg.has_token() { "✓" } else { "not set" });
    println!("Raw models first: {}", cfg.prefers_raw_models());
    println!(
        "Chat providers: {}",
        cfg.providers
            .chat
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "Sign providers: {}",
        cfg.providers
            .sign
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();
    println!("{}", serde_json::to_string_pretty(&gateway.health())?);
    Ok(())
}

fn cmd_reset_breaker(config_path: Option<&Path>, class: Option<String>) -> Result<()> {
    let gateway = build_gateway(config_path)?;
    match class {
        Some(class) => {
            if !gateway.reset_breaker(&class) {
                bail!("unknown breaker '{}'", class);
            }
            println!("Breaker '{}' reset.", class);
        }
        None => {
            gateway.reset_all_breakers();
            println!("All breakers reset.");
        }
    }
    println!("{}", serde_json::to_string_pretty(&gateway.breaker_status())?);
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let mut cfg = config::load_config_from_env(config_path);
    cfg.huggingface.token = mask_secret(&cfg.huggingface.token);
    println!("{}", serde_json::to_string_pretty(&cfg)?);
    Ok(())
}

fn cmd_config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::get_config_path);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    config::save_config(&Config::default(), Some(&path))?;
    info!(path = %path.display(), "Default config written");
    println!("Created config at {}", path.display());
    Ok(())
}
