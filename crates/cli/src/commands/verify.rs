// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use anyhow::bail;
use std::path::Path;

use crate::scan::{scan_file, Scan};

/// Outcome of a full verification pass.
#[derive(Debug, PartialEq, Eq)]
pub enum Verdict {
    Verified,
    /// Signatures hold, but the recording was never finalised.
    VerifiedLive,
    Corrupted(String),
}

pub fn check(scan: &Scan) -> Verdict {
    if let Some((kind, message)) = &scan.failure {
        return Verdict::Corrupted(format!("{}: {}", kind, message));
    }
    let Some(header) = &scan.header else {
        return Verdict::Corrupted("file ends before the header".into());
    };
    if scan.meta_data.is_none() {
        return Verdict::Corrupted("file ends before the meta-data".into());
    }
    if header.is_live() {
        return Verdict::VerifiedLive;
    }
    if header.num_ticks as usize != scan.ticks.len() {
        return Verdict::Corrupted(format!(
            "header declares {} ticks but {} are present",
            header.num_ticks,
            scan.ticks.len()
        ));
    }
    if scan.trailing_bytes > 0 {
        return Verdict::Corrupted(format!("{} bytes after the final chunk", scan.trailing_bytes));
    }
    Verdict::Verified
}

pub fn run(path: &Path, public_key: &str) -> anyhow::Result<()> {
    if public_key.trim().is_empty() {
        bail!("A public key is required to verify signatures");
    }
    let scan = scan_file(path, Some(public_key))?;

    match check(&scan) {
        Verdict::Verified => {
            println!("\n✅ VERIFIED\n");
            println!("Ticks:       {}", scan.ticks.len());
            println!("Chunks:      {} ({} signatures checked)", scan.num_chunks, scan.num_chunks_verified);
            println!("Confidence:  STRONG (SHA-256 + Ed25519)\n");
            Ok(())
        }
        Verdict::VerifiedLive => {
            println!("\n✅ VERIFIED (live recording)\n");
            println!("Ticks:       {}", scan.ticks.len());
            println!("Chunks:      {} ({} signatures checked)", scan.num_chunks, scan.num_chunks_verified);
            if scan.trailing_bytes > 0 {
                println!("Pending:     {} bytes of an unfinished chunk", scan.trailing_bytes);
            }
            println!();
            Ok(())
        }
        Verdict::Corrupted(reason) => {
            println!("\n❌ CORRUPTED\n");
            println!("Reason:        {}", reason);
            println!("Valid Ticks:   {}", scan.ticks.len());
            println!("Verified To:   byte {} of {}\n", scan.verified_to, scan.file_len);
            bail!("{}: {}", path.display(), reason)
        }
    }
}
