use clap::{Parser, Subcommand};
use pagewright::build::{self, BuildOptions};
use pagewright::{config, output};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pagewright")]
#[command(about = "Static site generator: fetched data, templated pages, shell asset pipelines")]
#[command(long_about = "\
Static site generator: fetched data, templated pages, shell asset pipelines

One site.toml describes the whole site. Directories default to siblings of it:

  site/
  ├── site.toml                    # Pages, data, fetch sources, pipelines
  ├── templates/
  │   ├── _layout.html             # Shared (_*.html): layouts and partials
  │   ├── _nav.html
  │   └── index.html               # Page template
  ├── static/                      # Copied or piped into the output
  │   └── css/style.css
  └── public/                      # Generated site

Build phases (each stops the build on the first error):
  1. fetch every distinct source (files or http(s) URLs) once
  2. render every page in parallel
  3. run static pipelines / copy static files in parallel

Run 'pagewright gen-config' to generate a documented site.toml.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Clone)]
struct ConfigArg {
    /// Path to the site configuration
    #[arg(long, short, default_value = "site.toml")]
    config: PathBuf,
}

#[derive(clap::Args, Clone)]
struct BuildArgs {
    #[command(flatten)]
    config: ConfigArg,

    /// Template directory [default: <config dir>/templates]
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Static asset directory [default: <config dir>/static]
    #[arg(long = "static")]
    static_dir: Option<PathBuf>,

    /// Output directory [default: <config dir>/public]
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Build deadline in seconds
    #[arg(long, default_value_t = build::DEFAULT_TIMEOUT.as_secs())]
    timeout: u64,

    /// Remove the output directory before building
    #[arg(long)]
    clean: bool,

    /// Parallel workers [default: processing.max_processes, else CPU cores]
    #[arg(long, short)]
    jobs: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Build the site
    Build(BuildArgs),
    /// Validate site.toml without building
    Check(ConfigArg),
    /// Print a stock site.toml with all options documented
    GenConfig,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli.command) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Build(args) => {
            let options = BuildOptions {
                config_path: args.config.config,
                template_dir: args.templates,
                static_dir: args.static_dir,
                output_dir: args.output,
                timeout: Some(Duration::from_secs(args.timeout)),
                clean: args.clean,
                jobs: args.jobs,
            };

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_build_event(&event) {
                        println!("{}", line);
                    }
                }
            });
            let result = build::build(&options, Some(&tx));
            drop(tx);
            printer.join().ok();
            result?;
        }
        Command::Check(args) => {
            println!("==> Checking {}", args.config.display());
            let site = config::load_config(&args.config)?;
            println!(
                "    {} pages, {} fetch sources, {} static pipelines",
                site.pages.len(),
                build::collect_sources(&site).len(),
                site.assets.pipelines.len()
            );
            println!("==> Config is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}
