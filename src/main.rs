use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use evolvd::config;

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = PathBuf::from("config.toml");

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "--version" | "-V" => {
                println!("evolvd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                println!("evolvd {}", env!("CARGO_PKG_VERSION"));
                println!("{}\n", env!("CARGO_PKG_DESCRIPTION"));
                println!("Usage: evolvd\n");
                println!("Reads config.toml from the working directory.");
                println!("\nOptions:");
                println!("  -h, --help       Print help");
                println!("  -V, --version    Print version");
                return Ok(());
            }
            other => {
                eprintln!("Unknown argument: '{}'. Try --help.", other);
                std::process::exit(2);
            }
        }
    }

    // Load config — if corrupted, try restoring from .bak before giving up.
    let config = match config::AppConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config load failed: {}", e);

            let backup = config_path.with_extension("toml.bak");
            let mut restored = None;
            if backup.exists() {
                eprintln!("Trying restore from {}...", backup.display());
                if std::fs::copy(&backup, &config_path).is_ok() {
                    if let Ok(c) = config::AppConfig::load(&config_path) {
                        eprintln!("Restored config from {}", backup.display());
                        restored = Some(c);
                    }
                }
            }

            match restored {
                Some(c) => c,
                None => return Err(e),
            }
        }
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(evolvd::core::run(config))
}
