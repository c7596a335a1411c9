//! Tool options
//!
//! Valgrind-style flags: booleans are spelled `--flag=yes|no`. Unknown
//! flags fail parsing.

use crate::consts::DEFAULT_PRECISION;

use clap::Parser;

/// Engine configuration, parsed from the host's tool command line.
#[derive(Debug, Clone, Parser)]
#[command(name = "shadowfp")]
pub struct Options {
    /// Precision of the shadow value channel, in bits
    #[arg(long, default_value_t = DEFAULT_PRECISION, value_parser = precision_in_range)]
    pub precision: u32,

    /// Maintain per-origin mean/max error accumulators
    #[arg(long = "mean-error", default_value = "yes", value_parser = yes_no, action = clap::ArgAction::Set)]
    pub mean_error: bool,

    /// Skip instrumentation of library code
    #[arg(long = "ignore-libraries", default_value = "no", value_parser = yes_no, action = clap::ArgAction::Set)]
    pub ignore_libraries: bool,

    /// Suppress zero-error entries from shadow value reports
    #[arg(long = "ignore-accurate", default_value = "yes", value_parser = yes_no, action = clap::ArgAction::Set)]
    pub ignore_accurate: bool,

    /// Compute the shadow value channel at guest precision
    #[arg(long = "sim-original", default_value = "no", value_parser = yes_no, action = clap::ArgAction::Set)]
    pub sim_original: bool,

    /// Analyze from program start instead of waiting for a BEGIN request
    #[arg(long = "analyze-all", default_value = "yes", value_parser = yes_no, action = clap::ArgAction::Set)]
    pub analyze_all: bool,

    /// Ignore END requests
    #[arg(long = "ignore-end", default_value = "no", value_parser = yes_no, action = clap::ArgAction::Set)]
    pub ignore_end: bool,

    /// Record operand origins and enable dependency-graph dumps
    #[arg(long = "error-localization", default_value = "no", value_parser = yes_no, action = clap::ArgAction::Set)]
    pub error_localization: bool,

    /// Log every nonzero relative error as it is observed
    #[arg(long = "print-every-error", default_value = "no", value_parser = yes_no, action = clap::ArgAction::Set)]
    pub print_every_error: bool,

    /// Detect precision-specific operations and fix detected sites
    #[arg(long = "detect-pso", default_value = "no", value_parser = yes_no, action = clap::ArgAction::Set)]
    pub detect_pso: bool,

    /// Let the shadow comparison win divergent CmpF64 branches
    #[arg(long = "goto-shadow-branch", default_value = "no", value_parser = yes_no, action = clap::ArgAction::Set)]
    pub goto_shadow_branch: bool,

    /// Propagate shadow values through float-to-integer conversions
    #[arg(long = "track-int", default_value = "no", value_parser = yes_no, action = clap::ArgAction::Set)]
    pub track_int: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self::parse_from(["shadowfp"])
    }
}

fn yes_no(s: &str) -> Result<bool, String> {
    match s {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => Err(format!("expected yes or no, got `{other}`")),
    }
}

fn precision_in_range(s: &str) -> Result<u32, String> {
    let requested: u32 = s.parse().map_err(|e| format!("{e}"))?;
    let min = rug::float::prec_min();
    let max = rug::float::prec_max();

    if (min..=max).contains(&requested) {
        Ok(requested)
    } else {
        Err(format!(
            "precision {requested} outside supported range {min}..={max}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = Options::default();

        assert_eq!(opts.precision, DEFAULT_PRECISION);
        assert!(opts.mean_error);
        assert!(opts.analyze_all);
        assert!(opts.ignore_accurate);
        assert!(!opts.detect_pso);
        assert!(!opts.track_int);
    }

    #[test]
    fn yes_no_flags_parse() {
        let opts = Options::parse_from([
            "shadowfp",
            "--precision=256",
            "--mean-error=no",
            "--detect-pso=yes",
            "--goto-shadow-branch=yes",
        ]);

        assert_eq!(opts.precision, 256);
        assert!(!opts.mean_error);
        assert!(opts.detect_pso);
        assert!(opts.goto_shadow_branch);
    }

    #[test]
    fn unknown_flags_fail() {
        assert!(Options::try_parse_from(["shadowfp", "--frobnicate=yes"]).is_err());
    }

    #[test]
    fn bad_boolean_fails() {
        assert!(Options::try_parse_from(["shadowfp", "--mean-error=maybe"]).is_err());
    }

    #[test]
    fn out_of_range_precision_fails() {
        assert!(Options::try_parse_from(["shadowfp", "--precision=0"]).is_err());
    }
}
