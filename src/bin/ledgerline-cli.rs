#![forbid(unsafe_code)]
//! ledgerline client: key generation and transaction submission

use clap::{Parser, Subcommand};
use colored::*;
use ledgerline::crypto::Keypair;
use ledgerline::miner::{POW_PREFIX_BYTE, TRANSACTION_POW_COMPLEXITY};
use ledgerline::sync::PeerChain;
use ledgerline::transaction::Transaction;
use std::sync::atomic::AtomicBool;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prints a fresh keypair
    Genkeys,
    /// Signs a payment and submits it to a node
    Submit {
        /// Base URL of the node
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        node: String,
        /// Hex private key of the payer
        #[arg(long)]
        private_key: String,
        /// Hex public key of the payee
        #[arg(long)]
        to: String,
        /// Value to transfer
        #[arg(long)]
        amount: i64,
        /// Free-form payload carried with the transaction
        #[arg(long, default_value = "")]
        payload: String,
        /// Leading zero bytes the transaction hash must have
        #[arg(long, default_value_t = TRANSACTION_POW_COMPLEXITY)]
        difficulty: usize,
    },
    /// Shows an account's chain length and balance
    Balance {
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        node: String,
        /// Hex public key; the node's own account when omitted
        #[arg(long)]
        pk: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Genkeys => genkeys(),
        Commands::Submit {
            node,
            private_key,
            to,
            amount,
            payload,
            difficulty,
        } => submit(&node, &private_key, &to, amount, payload, difficulty).await?,
        Commands::Balance { node, pk } => balance(&node, pk).await?,
    }

    Ok(())
}

fn genkeys() {
    let keypair = Keypair::generate();
    println!("{}", "New keypair".bright_cyan());
    println!("public:  {}", String::from_utf8_lossy(&keypair.public).bright_yellow());
    println!("private: {}", String::from_utf8_lossy(&keypair.private).bright_red());
}

async fn submit(
    node: &str,
    private_key: &str,
    to: &str,
    amount: i64,
    payload: String,
    difficulty: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let payer = Keypair::from_private(private_key.trim().as_bytes())?;
    let mut tx = Transaction::payment(
        payer.public.clone(),
        to.trim().as_bytes().to_vec(),
        amount,
        payload.into_bytes(),
    )?;

    println!("{}", "Mining transaction nonce...".bright_cyan());
    let nonce = tx.mine(&vec![POW_PREFIX_BYTE; difficulty], &AtomicBool::new(false))?;
    tx.sign(&payer)?;
    println!("nonce {} found", nonce.to_string().bright_yellow());

    let url = format!("{}/transactions/new", node.trim_end_matches('/'));
    let response = reqwest::Client::new().post(url).json(&tx).send().await?;
    let status = response.status();
    let body: serde_json::Value = response.json().await?;

    if status.is_success() {
        println!("{} {}", "Accepted".bright_green(), status);
    } else {
        println!("{} {}", "Rejected".bright_red(), status);
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn balance(node: &str, pk: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("{}/chain", node.trim_end_matches('/'));
    let mut request = reqwest::Client::new().get(url);
    if let Some(pk) = pk {
        request = request.query(&[("pk", pk)]);
    }
    let chain: PeerChain = request.send().await?.error_for_status()?.json().await?;
    println!("length:  {}", chain.length.to_string().bright_yellow());
    println!("balance: {}", chain.balance.to_string().bright_green());
    Ok(())
}
