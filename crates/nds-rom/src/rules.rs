//! Build rule files drive packing: one `name value` pair per line,
//! whitespace separated. Each rule accepts a fixed set of argument shapes
//! and the first shape the argument satisfies wins, tried in the order
//! file, directory, `KEEP`, `CALC`, `ADJUST`, hex value. Relative paths
//! are resolved against the rule file's own directory.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use nitrofs::{BuildConfig, BuildMode};
use tracing::debug;

use crate::errors::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accept {
    File,
    Dir,
    Keep,
    Calc,
    Adjust,
    Hex,
}

impl Accept {
    fn describe(self) -> &'static str {
        match self {
            Accept::File => "an existing file",
            Accept::Dir => "an existing directory",
            Accept::Keep => "KEEP",
            Accept::Calc => "CALC",
            Accept::Adjust => "ADJUST",
            Accept::Hex => "a hexadecimal value",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleValue {
    File(PathBuf),
    Dir(PathBuf),
    Keep,
    Calc,
    Adjust,
    Hex(u32),
}

impl fmt::Display for RuleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleValue::File(path) | RuleValue::Dir(path) => write!(f, "{}", path.display()),
            RuleValue::Keep => write!(f, "KEEP"),
            RuleValue::Calc => write!(f, "CALC"),
            RuleValue::Adjust => write!(f, "ADJUST"),
            RuleValue::Hex(value) => write!(f, "0x{value:08X}"),
        }
    }
}

/// Every known rule, the shapes it accepts, and its default (if any).
/// Rules without a default must appear in the file.
const RULES: &[(&str, &[Accept], Option<RuleValue>)] = &[
    ("header", &[Accept::File], None),
    ("arm9", &[Accept::File], None),
    ("arm7", &[Accept::File], None),
    ("arm9ovt", &[Accept::File], None),
    ("arm7ovt", &[Accept::File], None),
    ("fnt", &[Accept::File], None),
    ("icon", &[Accept::File], None),
    ("rsa_sig", &[Accept::File], None),
    ("data", &[Accept::Dir], None),
    ("ov9", &[Accept::Dir], None),
    ("ov7", &[Accept::Dir], None),
    ("ovt_repl_flag", &[Accept::Hex], None),
    (
        "file_mode",
        &[Accept::Keep, Accept::Adjust, Accept::Calc],
        Some(RuleValue::Adjust),
    ),
    (
        "arm9_entry",
        &[Accept::Keep, Accept::Hex],
        Some(RuleValue::Keep),
    ),
    (
        "arm9_load",
        &[Accept::Keep, Accept::Hex],
        Some(RuleValue::Keep),
    ),
    (
        "arm7_entry",
        &[Accept::Keep, Accept::Hex],
        Some(RuleValue::Keep),
    ),
    (
        "arm7_load",
        &[Accept::Keep, Accept::Hex],
        Some(RuleValue::Keep),
    ),
];

#[derive(Debug)]
pub struct BuildRules {
    values: HashMap<&'static str, RuleValue>,
}

impl BuildRules {
    /// Parses a build rule file. Unknown rule names and rules left without
    /// a value are both fatal.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        if !path.is_file() {
            return Err(CliError::RuleFileNotFound {
                path: path.to_owned(),
            });
        }

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let text = fs::read_to_string(path)?;

        let mut values: HashMap<&'static str, RuleValue> = RULES
            .iter()
            .filter_map(|(name, _, default)| default.clone().map(|value| (*name, value)))
            .collect();

        for line in text.lines() {
            let mut parts = line.split_whitespace();
            let (Some(name), Some(arg)) = (parts.next(), parts.next()) else {
                continue;
            };

            let Some(&(key, accepts, _)) = RULES.iter().find(|(known, ..)| *known == name) else {
                return Err(CliError::UnknownRule {
                    name: name.to_owned(),
                });
            };

            let value = resolve(key, accepts, arg, base_dir)?;
            debug!(rule = key, %value, "resolved build rule");
            values.insert(key, value);
        }

        for &(name, _, _) in RULES {
            if !values.contains_key(name) {
                return Err(CliError::MissingRuleValue { name });
            }
        }

        Ok(Self { values })
    }

    /// Rules and their resolved values, in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &RuleValue)> + '_ {
        RULES
            .iter()
            .filter_map(|(name, ..)| self.values.get(name).map(|value| (*name, value)))
    }

    pub fn to_config(&self) -> Result<BuildConfig, CliError> {
        Ok(BuildConfig {
            mode: self.mode(),
            header: self.path("header")?,
            arm9: self.path("arm9")?,
            arm7: self.path("arm7")?,
            arm9_overlay_table: self.path("arm9ovt")?,
            arm7_overlay_table: self.path("arm7ovt")?,
            arm9_overlay_dir: self.path("ov9")?,
            arm7_overlay_dir: self.path("ov7")?,
            fnt: self.path("fnt")?,
            data_dir: self.path("data")?,
            icon: self.path("icon")?,
            rsa_signature: self.path("rsa_sig")?,
            overlay_update_flag: self.hex("ovt_repl_flag")? as u8,
            arm9_entry: self.hex_or_keep("arm9_entry"),
            arm9_load: self.hex_or_keep("arm9_load"),
            arm7_entry: self.hex_or_keep("arm7_entry"),
            arm7_load: self.hex_or_keep("arm7_load"),
        })
    }

    fn mode(&self) -> BuildMode {
        match self.values.get("file_mode") {
            Some(RuleValue::Keep) => BuildMode::Keep,
            Some(RuleValue::Calc) => BuildMode::Calculate,
            _ => BuildMode::Adjust,
        }
    }

    fn path(&self, name: &'static str) -> Result<PathBuf, CliError> {
        match self.values.get(name) {
            Some(RuleValue::File(path)) | Some(RuleValue::Dir(path)) => Ok(path.clone()),
            _ => Err(CliError::MissingRuleValue { name }),
        }
    }

    fn hex(&self, name: &'static str) -> Result<u32, CliError> {
        match self.values.get(name) {
            Some(RuleValue::Hex(value)) => Ok(*value),
            _ => Err(CliError::MissingRuleValue { name }),
        }
    }

    fn hex_or_keep(&self, name: &'static str) -> Option<u32> {
        match self.values.get(name) {
            Some(RuleValue::Hex(value)) => Some(*value),
            _ => None,
        }
    }
}

fn resolve(
    name: &str,
    accepts: &[Accept],
    arg: &str,
    base_dir: &Path,
) -> Result<RuleValue, CliError> {
    // Fixed candidate order, filtered to the shapes this rule accepts.
    for accept in [
        Accept::File,
        Accept::Dir,
        Accept::Keep,
        Accept::Calc,
        Accept::Adjust,
        Accept::Hex,
    ] {
        if !accepts.contains(&accept) {
            continue;
        }
        match accept {
            Accept::File => {
                let path = base_dir.join(arg);
                if path.is_file() {
                    return Ok(RuleValue::File(path));
                }
            }
            Accept::Dir => {
                let path = base_dir.join(arg);
                if path.is_dir() {
                    return Ok(RuleValue::Dir(path));
                }
            }
            Accept::Keep if arg == "KEEP" => return Ok(RuleValue::Keep),
            Accept::Calc if arg == "CALC" => return Ok(RuleValue::Calc),
            Accept::Adjust if arg == "ADJUST" => return Ok(RuleValue::Adjust),
            Accept::Hex => {
                let digits = arg.strip_prefix("0x").unwrap_or(arg);
                if let Ok(value) = u32::from_str_radix(digits, 16) {
                    return Ok(RuleValue::Hex(value));
                }
            }
            _ => {}
        }
    }

    let expected = accepts
        .iter()
        .map(|accept| accept.describe())
        .collect::<Vec<_>>()
        .join(", ");
    Err(CliError::InvalidRuleValue {
        name: name.to_owned(),
        value: arg.to_owned(),
        expected,
    })
}
