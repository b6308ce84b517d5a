//! The `stepcode check` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use stepcode_core::verifier::{normalize, verify};

pub fn execute(actual: PathBuf, expected: PathBuf) -> Result<()> {
    let actual_text = std::fs::read_to_string(&actual)
        .with_context(|| format!("failed to read {}", actual.display()))?;
    let expected_text = std::fs::read_to_string(&expected)
        .with_context(|| format!("failed to read {}", expected.display()))?;

    if verify(&actual_text, &expected_text).matches {
        println!("Output matches.");
        return Ok(());
    }

    println!("Output does not match.");
    println!("  expected: {}", normalize(&expected_text));
    println!("  actual:   {}", normalize(&actual_text));
    anyhow::bail!("output mismatch")
}
