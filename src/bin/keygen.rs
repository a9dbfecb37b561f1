//! ML-DSA-65 Key Generation Tool for roll signers
//!
//! Creates:
//! - Public key (1952 bytes)
//! - Secret key (4000 bytes), keep it out of version control
//!
//! Usage:
//!   cargo run --bin keygen -- --name alice --output ./keys/
//!
//! The printed address (SHA3-256 of the public key) is the identity the engine
//! compares against coupon ownership and commitment signers.

use clap::Parser;
use std::fs;
use std::path::PathBuf;
use variant_roll::crypto::{MLDSA65_PUBKEY_SIZE, recover_signer};
use variant_roll::{Keypair, roll_message};

/// ML-DSA-65 secret key size (4000 bytes)
const MLDSA65_SECRET_SIZE: usize = 4000;

#[derive(Parser)]
#[command(name = "keygen", version, about = "Variant Roll ML-DSA-65 Key Generator")]
struct Args {
    /// Key name, used for file names
    #[arg(short, long)]
    name: String,

    /// Output directory for keys
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
}

fn main() {
    let args = Args::parse();

    println!("════════════════════════════════════════════════════════════");
    println!("  Variant Roll ML-DSA-65 Keypair Generator");
    println!("════════════════════════════════════════════════════════════");
    println!();
    println!("Generating keypair for: {}", args.name);
    println!();

    let keypair = Keypair::generate();
    let secret_bytes = keypair.secret_bytes();

    // Informational: library versions may differ slightly
    if keypair.public.len() != MLDSA65_PUBKEY_SIZE {
        eprintln!("Note: Public key size {} differs from expected {}", keypair.public.len(), MLDSA65_PUBKEY_SIZE);
    }
    if secret_bytes.len() != MLDSA65_SECRET_SIZE {
        eprintln!("Note: Secret key size {} differs from expected {}", secret_bytes.len(), MLDSA65_SECRET_SIZE);
    }

    fs::create_dir_all(&args.output).expect("Failed to create output directory");

    let secret_path = args.output.join(format!("{}_secret.key", args.name));
    fs::write(&secret_path, &secret_bytes).expect("Failed to write secret key");
    println!("Secret key saved to: {}", secret_path.display());
    println!("  Size: {} bytes", secret_bytes.len());
    println!();

    let pubkey_path = args.output.join(format!("{}_public.key", args.name));
    fs::write(&pubkey_path, &keypair.public).expect("Failed to write public key");
    println!("Public key saved to: {}", pubkey_path.display());
    println!("  Size: {} bytes", keypair.public.len());
    println!();

    println!("════════════════════════════════════════════════════════════");
    println!("  Address");
    println!("════════════════════════════════════════════════════════════");
    println!();
    println!("0x{}", hex::encode(keypair.address()));
    println!();

    println!("════════════════════════════════════════════════════════════");
    println!("  Verification Test");
    println!("════════════════════════════════════════════════════════════");
    println!();

    let message = roll_message(&[0u8; 32], 0);
    let commitment = keypair.sign_message(&message);
    match recover_signer(&message, &commitment) {
        Ok((address, _)) if address == keypair.address() => println!("  Commitment recovery: PASSED"),
        _ => {
            println!("  Commitment recovery: FAILED");
            std::process::exit(1);
        }
    }
    println!();
    println!("Generated: {}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
}
