// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Node key-pair generator.
//!
//! With no arguments a fresh mnemonic is generated and the node key derived
//! from it. `--mnemonic` restores the key of an existing phrase and
//! `--private-key` just prints the public key of a hex private key.

use std::process::ExitCode;

use clap::Parser;
use gig_gossip_node::crypto::{derive_key_from_mnemonic, generate_mnemonic, PrivateKey};

#[derive(Parser)]
#[command(name = "keypair-gen")]
#[command(about = "Generate or restore a gossip node key pair", long_about = None)]
struct Cli {
    /// BIP-39 phrase to derive the key from
    #[arg(short, long, conflicts_with = "private_key")]
    mnemonic: Option<String>,

    /// Hex-encoded private key
    #[arg(short, long)]
    private_key: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (mnemonic, key) = match (cli.mnemonic, cli.private_key) {
        (_, Some(hex)) => (None, PrivateKey::from_hex(&hex)),
        (Some(phrase), None) => (None, derive_key_from_mnemonic(&phrase)),
        (None, None) => {
            let phrase = generate_mnemonic();
            let key = derive_key_from_mnemonic(&phrase);
            (Some(phrase), key)
        }
    };

    let key = match key {
        Ok(key) => key,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(phrase) = mnemonic {
        println!("mnemonic:    {phrase}");
    }
    println!("private key: {}", key.to_hex());
    println!("public key:  {}", key.public_key().to_hex());
    ExitCode::SUCCESS
}
