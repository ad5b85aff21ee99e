#![cfg_attr(not(test), deny(clippy::unwrap_used))]
//! `burrow <file>`: print the layout of an environment file.
//!
//! Opens the file read-only, so a file with a pending journal is reported
//! as needing recovery instead of being modified.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use burrow::{EnvFlags, Environment, EnvironmentConfig, KeyType, Severity};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "burrow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("usage: burrow <environment file>");
        return ExitCode::from(2);
    };

    let config = match EnvironmentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    config.diagnostics.install(|severity, message| {
        if severity >= Severity::Error {
            eprintln!("{severity}: {message}");
        }
    });

    match inspect(&path, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.code().as_i32(), "{e}");
            ExitCode::FAILURE
        }
    }
}

fn inspect(path: &Path, config: EnvironmentConfig) -> burrow::Result<()> {
    let config = config.with_flags(EnvFlags::READ_ONLY);
    let env = Environment::open(Some(path), config)?;
    let params = env.parameters()?;

    println!("{}", path.display());
    println!("  engine version   {}", burrow::version());
    println!("  page size        {}", params.page_size);
    println!("  cache size       {}", params.cache_size);
    println!("  max databases    {}", params.max_databases);

    for name in env.database_names()? {
        let db = env.open_database(name)?;
        let params = db.parameters()?;

        println!("database {name}");
        println!("  key type         {:?}", params.key_type);
        println!("  key size         {}", params.key_size);
        println!("  record size      {}", params.record_size);
        println!("  flags            {:?}", params.flags);
        println!("  max keys/page    {}", params.max_keys_per_page);
        println!("  records          {}", params.record_count);
        // Custom keys cannot be ordered without the application's comparator.
        if params.key_type == KeyType::Custom {
            continue;
        }

        let stats = db.check_integrity()?;
        println!("  keys             {}", stats.keys);
        println!("  depth            {}", stats.depth);
        println!(
            "  nodes            {} internal, {} leaves",
            stats.internal_nodes, stats.leaves
        );
    }
    Ok(())
}
