// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use anyhow::{bail, Context};
use std::path::{Path, PathBuf};

use tickvault::checksum::generate_key_pair;

/// Writes a new key pair to `<prefix>.key` (private seed) and
/// `<prefix>.pub`, or prints it when no prefix is given. Existing files
/// are never overwritten.
pub fn run(out_prefix: Option<&Path>) -> anyhow::Result<(String, String)> {
    let (private_hex, public_hex) = generate_key_pair();

    match out_prefix {
        Some(prefix) => {
            let private_path = with_suffix(prefix, "key");
            let public_path = with_suffix(prefix, "pub");
            for path in [&private_path, &public_path] {
                if path.exists() {
                    bail!("Refusing to overwrite {}", path.display());
                }
            }
            std::fs::write(&private_path, format!("{}\n", private_hex))
                .with_context(|| format!("Failed to write {}", private_path.display()))?;
            std::fs::write(&public_path, format!("{}\n", public_hex))
                .with_context(|| format!("Failed to write {}", public_path.display()))?;
            println!("\n🔑 Key pair written\n");
            println!("Private: {}", private_path.display());
            println!("Public:  {}\n", public_path.display());
        }
        None => {
            println!("private {}", private_hex);
            println!("public  {}", public_hex);
        }
    }

    Ok((private_hex, public_hex))
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Reads a key given either inline as hex or as a path to a key file.
pub fn resolve_key(value: &str) -> anyhow::Result<String> {
    let path = Path::new(value);
    if path.is_file() {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read key file {}", value))?;
        return Ok(text.trim().to_string());
    }
    Ok(value.trim().to_string())
}
