// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with clap.
// All work is delegated to Layer 2 (application).
//
//   1. `parity`   — runs the student/oracle parity checks
//   2. `map-keys` — prints the external → from-scratch names

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, MapKeysArgs, ParityArgs};

#[derive(Parser, Debug)]
#[command(
    name = "bert-parity",
    version = "0.1.0",
    about = "Check a from-scratch BERT encoder against a reference implementation."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Route the subcommand to its use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Parity(args)  => run_parity(args),
            Commands::MapKeys(args) => run_map_keys(args),
        }
    }
}

fn run_parity(args: ParityArgs) -> Result<()> {
    use crate::application::parity_use_case::ParityUseCase;

    let report = ParityUseCase::new(args.into()).execute()?;

    println!();
    for check in &report.checks {
        let mark = if check.passed { "PASS" } else { "FAIL" };
        match check.max_abs_diff {
            Some(diff) => println!("  {mark}  {:<24} max |Δ| = {diff:.3e}", check.name),
            None       => println!("  {mark}  {}", check.name),
        }
        if let Some(detail) = &check.detail {
            println!("        {detail}");
        }
    }
    println!("\nPrimitive calls: {:?}", report.primitive_calls);

    if !report.passed() {
        anyhow::bail!("{} parity check(s) failed", report.failed().count());
    }
    println!("All {} checks passed.", report.checks.len());
    Ok(())
}

fn run_map_keys(args: MapKeysArgs) -> Result<()> {
    use crate::application::keymap_use_case::KeyMapUseCase;

    for mapping in KeyMapUseCase::new(args.input).execute()? {
        println!("{mapping}");
    }
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::parity_use_case::ParityOptions;

    #[test]
    fn parity_defaults() {
        let cli = Cli::try_parse_from(["bert-parity", "parity"]).unwrap();
        let Commands::Parity(args) = cli.command else { panic!("expected parity") };
        let options: ParityOptions = args.into();
        assert_eq!(options.seed, 0);
        assert_eq!(options.batch, 1);
        assert_eq!(options.seq_len, 8);
        assert_eq!(options.transplant_sequences, 10);
        assert!(options.config_path.is_none());
        assert_eq!(options.report_dir, std::path::PathBuf::from("reports"));
    }

    #[test]
    fn text_requires_tokenizer() {
        assert!(Cli::try_parse_from(["bert-parity", "parity", "--text", "hi"]).is_err());
        assert!(Cli::try_parse_from(
            ["bert-parity", "parity", "--text", "hi", "--tokenizer", "tok.json"]
        ).is_ok());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        for flag in ["--batch", "--seq-len", "--transplant-sequences"] {
            assert!(Cli::try_parse_from(["bert-parity", "parity", flag, "0"]).is_err(), "{flag} 0");
        }
        let cli = Cli::try_parse_from(["bert-parity", "parity", "--batch", "3"]).unwrap();
        let Commands::Parity(args) = cli.command else { panic!("expected parity") };
        assert_eq!(args.batch, 3);
    }

    #[test]
    fn map_keys_needs_input() {
        assert!(Cli::try_parse_from(["bert-parity", "map-keys"]).is_err());
        let cli = Cli::try_parse_from(["bert-parity", "map-keys", "--input", "keys.txt"]).unwrap();
        assert!(matches!(cli.command, Commands::MapKeys(_)));
    }
}
