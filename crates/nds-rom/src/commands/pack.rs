use std::fs;
use std::path::{Path, PathBuf};

use colored::Colorize;
use miette::{IntoDiagnostic, Result};

use crate::rules::BuildRules;

pub struct PackRomArgs {
    pub rule_path: String,
    pub output: String,
}

pub fn pack_rom(args: PackRomArgs) -> Result<()> {
    let rule_path = Path::new(&args.rule_path);

    println!(
        "{} {}",
        "📖 Reading build rules from:".bright_blue().bold(),
        args.rule_path.bright_cyan().bold()
    );

    let rules = BuildRules::load(rule_path)?;

    println!(
        "{}",
        "🔧 Starting rebuild with the following parameters:".bright_yellow()
    );
    for (name, value) in rules.iter() {
        println!(
            "   - {}: {}",
            name.bright_white().bold(),
            value.to_string().bright_white()
        );
    }

    let config = rules.to_config()?;
    let rom = nitrofs::build(&config).into_diagnostic()?;

    let output_path = PathBuf::from(&args.output);
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            println!("Creating output directory: {}", parent.display());
            fs::create_dir_all(parent).into_diagnostic()?;
        }
    }
    fs::write(&output_path, rom.as_bytes()).into_diagnostic()?;

    println!(
        "{}\n{} {}",
        "✅ ROM image created successfully!".bright_green().bold(),
        "📍 Path:".bright_green(),
        output_path.display().to_string().bright_white().bold()
    );

    Ok(())
}
