// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `parity` and `map-keys`, and
// their flags. clap's derive macros generate the help text,
// missing-argument errors and string → number conversion.

use clap::{builder::RangedU64ValueParser, Args, Subcommand};
use std::path::PathBuf;

use crate::application::parity_use_case::ParityOptions;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compare the from-scratch BERT against the reference tree
    Parity(ParityArgs),

    /// Show how external parameter names map onto the from-scratch tree
    MapKeys(MapKeysArgs),
}

/// All arguments for the `parity` command
#[derive(Args, Debug)]
pub struct ParityArgs {
    /// JSON model config; bert-base-cased shape when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Seed shared by both trees' initialisation and the random ids
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Text to encode instead of random ids (needs --tokenizer)
    #[arg(long, requires = "tokenizer")]
    pub text: Option<String>,

    /// HuggingFace tokenizer.json used to encode --text
    #[arg(long)]
    pub tokenizer: Option<PathBuf>,

    /// Rows of random ids for the seeded checks
    #[arg(long, default_value_t = 1, value_parser = at_least_one())]
    pub batch: usize,

    /// Length of each random id row
    #[arg(long, default_value_t = 8, value_parser = at_least_one())]
    pub seq_len: usize,

    /// Random sequences fed through the transplanted weights
    #[arg(long, default_value_t = 10, value_parser = at_least_one())]
    pub transplant_sequences: usize,

    /// Where parity_report.json and parity_history.csv are written
    #[arg(long, default_value = "reports")]
    pub report_dir: PathBuf,
}

/// Counts and lengths; zero would build an empty batch.
fn at_least_one() -> RangedU64ValueParser<usize> {
    RangedU64ValueParser::<usize>::new().range(1..)
}

/// Layer 1 → Layer 2 boundary; the use case never sees clap types.
impl From<ParityArgs> for ParityOptions {
    fn from(a: ParityArgs) -> Self {
        ParityOptions {
            config_path:          a.config,
            seed:                 a.seed,
            text:                 a.text,
            tokenizer_path:       a.tokenizer,
            batch:                a.batch,
            seq_len:              a.seq_len,
            transplant_sequences: a.transplant_sequences,
            report_dir:           a.report_dir,
        }
    }
}

/// All arguments for the `map-keys` command
#[derive(Args, Debug)]
pub struct MapKeysArgs {
    /// File with one external parameter name per line
    #[arg(long)]
    pub input: PathBuf,
}
