use clap::builder::{styling::AnsiColor, Styles};
use clap::ColorChoice;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use commands::{extract_rom, pack_rom, ExtractRomArgs, PackRomArgs};
use miette::Result;
use tracing_subscriber::EnvFilter;

mod commands;
mod errors;
mod rules;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract a ROM image into its sections, overlays and data tree
    Extract {
        /// The path to the ROM image file
        #[arg(short, long)]
        file_path: String,

        /// The directory to extract the ROM image to
        #[arg(short, long)]
        output_dir: Option<String>,
    },
    /// Pack extracted sections back into a ROM image using a build rule file
    Pack {
        /// The path to the build rule file
        #[arg(short, long)]
        rule_path: String,

        /// The resulting ROM image file
        #[arg(short, long, default_value = "out.nds")]
        output: String,
    },
}

fn parse_args() -> Args {
    // Configure colored/styled help output
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default())
        .placeholder(AnsiColor::Blue.on_default());

    let matches = Args::command()
        .styles(styles)
        .color(ColorChoice::Auto)
        .get_matches();

    Args::from_arg_matches(&matches).expect("failed to parse arguments")
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    init_tracing();

    let args = parse_args();

    match args.command {
        Commands::Extract {
            file_path,
            output_dir,
        } => extract_rom(ExtractRomArgs {
            file_path,
            output_dir,
        }),
        Commands::Pack { rule_path, output } => pack_rom(PackRomArgs { rule_path, output }),
    }
}
