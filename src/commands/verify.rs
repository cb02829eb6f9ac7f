use anyhow::Context;
use base58::FromBase58;
use owo_colors::{OwoColorize, Stream::Stdout};

use crate::cli::VerifyArgs;
use hmvault::error::VerifyError;
use hmvault::principal::MULTIBASE_BASE58BTC;
use hmvault::util::b64url_decode;
use hmvault::verify;

pub fn run_verify(args: VerifyArgs) -> anyhow::Result<()> {
    let key = decode_multibase_key(&args.key)?;
    let signature = b64url_decode(args.sig.trim())
        .map_err(|e| anyhow::anyhow!("Invalid signature encoding: {}", e))?;
    let message = match (&args.message, &args.file) {
        (Some(text), _) => text.as_bytes().to_vec(),
        (None, Some(path)) => std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => anyhow::bail!("Provide --message or --file"),
    };

    match verify::verify_compressed_checked(&key, &message, &signature) {
        Ok(()) => {
            println!("{}", "Signature valid.".if_supports_color(Stdout, |t| t.green()));
            Ok(())
        }
        Err(VerifyError::BadSignature) => {
            eprintln!("{}", "Signature invalid.".if_supports_color(Stdout, |t| t.red()));
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Cannot verify: {}", e)),
    }
}

fn decode_multibase_key(text: &str) -> anyhow::Result<Vec<u8>> {
    let encoded = text
        .trim()
        .strip_prefix(MULTIBASE_BASE58BTC)
        .ok_or_else(|| anyhow::anyhow!("Key must be multibase base58btc (starting with 'z')"))?;
    encoded
        .from_base58()
        .map_err(|e| anyhow::anyhow!("Invalid base58 key: {:?}", e))
}
