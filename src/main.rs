use anyhow::{Context, Result};
use clap::Parser;
use hbtpl::{DiskCache, Engine, EngineOptions, FilesystemLoader, Value};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

/// 使用 JSON 数据渲染模板文件
#[derive(Parser, Debug)]
#[command(name = "hbtpl", version, about)]
struct Args {
    /// Template file to render
    template: PathBuf,

    /// JSON data file; renders against an empty object when omitted
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Directory holding partials as `<name>.hbs`
    #[arg(short, long)]
    partials: Option<PathBuf>,

    /// Directory for the compiled-template cache
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Enable @key/@first/@last data variables
    #[arg(long)]
    data_variables: bool,
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let source = fs::read_to_string(&args.template)
        .with_context(|| format!("Failed to read template: {}", args.template.display()))?;
    let data: serde_json::Value = match &args.data {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read data file: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Data file is not valid JSON: {}", path.display()))?
        }
        None => serde_json::Value::Object(Default::default()),
    };

    let mut options = EngineOptions::new().enable_data_variables(args.data_variables);
    if let Some(dir) = &args.partials {
        options = options.partials_loader(FilesystemLoader::new(dir));
    }
    if let Some(dir) = &args.cache_dir {
        options = options.cache(DiskCache::new(dir));
    }
    let engine = Engine::new(options);

    let value: Value = hbtpl::to_value(&data)?;
    let output = engine
        .render_value(&source, &value)
        .with_context(|| format!("Failed to render {}", args.template.display()))?;
    info!("Rendered {} ({} bytes)", args.template.display(), output.len());
    print!("{}", output);
    Ok(())
}
