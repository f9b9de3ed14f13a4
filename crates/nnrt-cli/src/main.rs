use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use nnrt_core::{FileStorage, KvStorage, Timer, WallClockTimer};
use nnrt_opencl::{
    DeviceSession, GpuPerfHint, GpuPriorityHint, OpenClRuntime, RuntimeConfig,
};

#[derive(Parser)]
#[command(
    name = "nnrt",
    about = "nnrt device runtime CLI",
    long_about = "Inspect the OpenCL device nnrt would run on, warm its kernel cache,\nand list cached program binaries.",
    version
)]
struct Cli {
    /// JSON runtime config; NNRT_* environment variables apply on top
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show the selected platform, device and its capabilities
    Info,
    /// Build one kernel through the cache and report where it came from
    Build {
        /// Program name (source file `<program>.cl` under the kernel dir)
        #[arg(long)]
        program: String,
        /// Kernel entry point
        #[arg(long)]
        kernel: String,
        /// Build option, e.g. -D DATA_TYPE=float (repeatable)
        #[arg(short = 'D', value_name = "DEFINE")]
        defines: Vec<String>,
        /// Directory of `.cl` sources
        #[arg(long)]
        kernel_dir: Option<PathBuf>,
        /// Persisted kernel cache file
        #[arg(long)]
        cache: Option<PathBuf>,
        /// GPU perf hint
        #[arg(long, value_enum, default_value_t = HintLevel::Default)]
        perf: HintLevel,
        /// GPU priority hint
        #[arg(long, value_enum, default_value_t = HintLevel::Default)]
        priority: HintLevel,
    },
    /// List the entries of a persisted kernel cache
    Cache {
        /// Cache file
        #[arg(long)]
        path: PathBuf,
    },
}

/// Level accepted by `--perf` and `--priority`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum HintLevel {
    Default,
    Low,
    Normal,
    High,
}

impl From<HintLevel> for GpuPerfHint {
    fn from(level: HintLevel) -> Self {
        match level {
            HintLevel::Default => GpuPerfHint::Default,
            HintLevel::Low => GpuPerfHint::Low,
            HintLevel::Normal => GpuPerfHint::Normal,
            HintLevel::High => GpuPerfHint::High,
        }
    }
}

impl From<HintLevel> for GpuPriorityHint {
    fn from(level: HintLevel) -> Self {
        match level {
            HintLevel::Default => GpuPriorityHint::Default,
            HintLevel::Low => GpuPriorityHint::Low,
            HintLevel::Normal => GpuPriorityHint::Normal,
            HintLevel::High => GpuPriorityHint::High,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Info => cmd_info(config),
        Commands::Build { program, kernel, defines, kernel_dir, cache, perf, priority } => {
            let mut config = config.with_hints(perf.into(), priority.into());
            if kernel_dir.is_some() {
                config.kernel_dir = kernel_dir;
            }
            if cache.is_some() {
                config.kernel_cache_path = cache;
            }
            cmd_build(config, &program, &kernel, &defines)
        }
        Commands::Cache { path } => cmd_cache(&path),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<RuntimeConfig> {
    let base = match path {
        Some(path) => RuntimeConfig::from_json_file(path)?,
        None => RuntimeConfig::default(),
    };
    Ok(base.overlay(|name| std::env::var(name).ok()))
}

fn cmd_info(config: RuntimeConfig) -> Result<()> {
    println!("nnrt v{}\n", env!("CARGO_PKG_VERSION"));
    println!("Host");
    println!("  OS:        {}", std::env::consts::OS);
    println!("  Arch:      {}", std::env::consts::ARCH);
    println!("  Alignment: {} bytes", nnrt_core::ALIGNMENT);

    let session = DeviceSession::open(config)?;
    let Some(rt) = session.runtime() else {
        println!("\nGPU\n  none (CPU only)");
        return Ok(());
    };

    let platform = rt.platform_info();
    println!("\nPlatform");
    println!("  Name:    {}", platform.name);
    println!("  Vendor:  {}", platform.vendor);
    println!("  Version: {}", platform.version);
    println!("  Profile: {}", platform.profile);

    let device = rt.device_info();
    println!("\nDevice");
    println!("  Name:           {}", device.name);
    println!("  Vendor:         {}", device.vendor);
    println!("  GPU type:       {}", rt.gpu_type());
    println!("  OpenCL:         {}", rt.opencl_version());
    println!("  Compute units:  {}", rt.device_compute_units());
    println!("  Max work-group: {}", rt.device_max_work_group_size());
    println!("  Global cache:   {} KiB", rt.device_global_mem_cache_size() / 1024);

    println!("\nFeatures");
    let flag = |on: bool| if on { "[x]" } else { "[ ]" };
    println!("  Non-uniform work-groups: {}", flag(rt.is_non_uniform_workgroups_supported()));
    println!("  Out-of-range checks:     {}", flag(rt.is_out_of_range_check_enabled()));
    println!("  Profiling:               {}", flag(rt.is_profiling_enabled()));

    session.shutdown()?;
    Ok(())
}

fn cmd_build(config: RuntimeConfig, program: &str, kernel: &str, defines: &[String]) -> Result<()> {
    let options: Vec<String> = defines
        .iter()
        .map(|d| if d.starts_with('-') { d.clone() } else { format!("-D{d}") })
        .collect();
    tracing::debug!("building {}::{} with {:?}", program, kernel, options);

    let rt = OpenClRuntime::new(config).context("OpenCL runtime unavailable")?;
    let mut timer = WallClockTimer::new();
    timer.start_timing();
    let built = rt.build_kernel(program, kernel, &options)?;
    timer.stop_timing();

    println!("kernel:     {}", built.name());
    println!("program:    {}", built.program().key());
    println!("origin:     {}", built.program().origin());
    println!("latency:    {:.3} ms", timer.elapsed_micros() / 1000.0);
    println!("work-group: {}", rt.kernel_max_work_group_size(&built)?);
    println!("wave size:  {}", rt.kernel_wave_size(&built)?);

    drop(built);
    rt.save_built_programs()?;
    Ok(())
}

fn cmd_cache(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("no kernel cache at {}", path.display());
    }
    let mut storage = FileStorage::new(path);
    storage.load()?;

    println!("{} ({} programs)\n", path.display(), storage.len());
    println!("{:<60} {:>10}", "Key", "Bytes");
    println!("{}", "-".repeat(71));
    let mut total = 0usize;
    for (key, value) in storage.entries() {
        println!("{:<60} {:>10}", key, value.len());
        total += value.len();
    }
    println!("{}", "-".repeat(71));
    println!("{:<60} {:>10}", "total", total);
    Ok(())
}
