use std::path::{Path, PathBuf};

use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use nitrofs::RomExtractor;

pub struct ExtractRomArgs {
    pub file_path: String,
    pub output_dir: Option<String>,
}

/// Compute the default output directory: parent folder + file stem
fn default_output_dir(file_path: &Path) -> PathBuf {
    let file_stem = file_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "extracted".to_owned());
    match file_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(file_stem),
        _ => PathBuf::from(file_stem),
    }
}

pub fn extract_rom(args: ExtractRomArgs) -> Result<()> {
    let file_path = Path::new(&args.file_path);

    // Check if file exists first for better error messages
    if !file_path.exists() {
        return Err(miette::miette!(
            "File not found: {}\n\nMake sure the path is correct and the file exists.",
            file_path.display()
        ));
    }

    println!(
        "{} {}",
        "📦 Extracting ROM:".bright_blue().bold(),
        args.file_path.bright_cyan().bold()
    );

    let extractor = RomExtractor::open(file_path).into_diagnostic()?;

    let output_dir = args
        .output_dir
        .map(PathBuf::from)
        .unwrap_or_else(|| default_output_dir(file_path));

    println!(
        "{} {}",
        "📁 Extracting to:".bright_yellow(),
        output_dir.display().to_string().bright_white().bold()
    );
    extractor.extract_to(&output_dir).into_diagnostic()?;

    write_default_rules(&output_dir)?;

    println!("{}", "✅ Extraction complete!".bright_green().bold());

    Ok(())
}

/// Drops a starter build rule file next to the extracted sections so the
/// output can be repacked as-is. `ovt_repl_flag` defaults to FF, which
/// matches no real flag byte; set it to the game's marker before editing
/// overlays.
fn write_default_rules(output_dir: &Path) -> Result<()> {
    let path = output_dir.join("buildrules.txt");
    if path.exists() {
        return Ok(());
    }

    let rules = "\
header header.bin
arm9 arm9.bin
arm7 arm7.bin
arm9ovt arm9ovt.bin
arm7ovt arm7ovt.bin
fnt fnt.bin
icon banner.bin
rsa_sig rsasig.bin
data root
ov9 overlay9
ov7 overlay7
ovt_repl_flag FF
file_mode ADJUST
arm9_entry KEEP
arm9_load KEEP
arm7_entry KEEP
arm7_load KEEP
";
    std::fs::write(&path, rules).into_diagnostic()?;

    println!(
        "{} {}",
        "📝 Wrote build rules to:".bright_cyan(),
        path.display().to_string().bright_white()
    );
    Ok(())
}
