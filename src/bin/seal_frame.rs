//! Wrap a JSON payload into an encrypted envelope
//!
//! Usage:
//!   seal_frame '{"code":3053,"data":{...}}'
//!   cat payload.json | seal_frame
//!
//! Uses `CIPHER_KEY` (default: the platform key) and a random IV. The output
//! line is a valid frame for the `birdflow` runtime.

use birdflow::config::PipelineConfig;
use dotenv::dotenv;
use env_logger::Env;
use std::io::Read;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let payload = if args.is_empty() {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        args.join(" ")
    };

    // Reject non-JSON early and normalize whitespace
    let value: serde_json::Value = serde_json::from_str(payload.trim())?;
    let cipher = PipelineConfig::from_env()?.cipher()?;
    let envelope = cipher.seal_random(&value.to_string());

    log::debug!("sealed {} bytes with iv {}", payload.len(), envelope.iv);
    println!("{}", serde_json::to_string(&envelope)?);
    Ok(())
}
