//! dark-market CLI
//!
//! Operator and wallet tooling for confidential prediction-market bets.
//!
//! ## Usage
//!
//! ```bash
//! # Generate a network key pair (and a config file for it)
//! dark-market keygen --config network.toml
//!
//! # Encrypt a bet for the network
//! dark-market encrypt-bet --config network.toml --market-id 1 --amount 5000000000 --prediction 1
//!
//! # Open a receipt returned by the network
//! dark-market decode-receipt --network-key <hex> --private-key <hex> --nonce <hex> --ciphertext <hex>
//!
//! # Payout arithmetic
//! dark-market payout --total 17500000000 --winning 12200000000 --amount 5000000000
//!
//! # Run a whole market against an in-process network
//! dark-market simulate --bets 10000000000:1,2200000000:1,5300000000:0 --winning-side 1
//!
//! # Nobody on the declared side: void the market and refund
//! dark-market simulate --bets 500:0,700:0 --winning-side 1 --void-failed
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use dark_market::payout::{payout_for, payout_ratio};
use dark_market::{
    decode_receipt, encode_bet, AccountId, BetInput, ComputationNetwork, Ledger, LocalCluster,
    MarketRequest, NetworkConfig, NetworkKeyPair, NetworkPublicKey, PublicKey, ResolveRequest,
    ZeroWinnerPolicy,
};

#[derive(Parser)]
#[command(name = "dark-market")]
#[command(about = "Confidential prediction-market bets: keys, encryption, receipts, payouts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a network key pair
    Keygen {
        /// Also write a network config for the new key
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Namespace for the written config
        #[arg(long, default_value = "dark-market")]
        namespace: String,
    },

    /// Encrypt a bet for the computation network
    EncryptBet {
        /// Network config file (alternative to --network-key)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Network public key (hex)
        #[arg(long)]
        network_key: Option<String>,

        #[arg(long)]
        market_id: u64,

        /// Stake in the smallest currency unit
        #[arg(long)]
        amount: u64,

        /// 0 = no, 1 = yes
        #[arg(long)]
        prediction: u8,

        /// Client tag for matching the receipt later
        #[arg(long, default_value = "0")]
        user_nonce: u64,
    },

    /// Open an encrypted bet receipt
    DecodeReceipt {
        /// Network public key (hex)
        #[arg(long)]
        network_key: String,

        /// Bettor's ephemeral private key (hex)
        #[arg(long)]
        private_key: String,

        /// Receipt nonce (hex, 16 bytes)
        #[arg(long)]
        nonce: String,

        /// Receipt ciphertext (hex, 96 bytes)
        #[arg(long)]
        ciphertext: String,
    },

    /// Compute payout ratio and, optionally, one bet's payout
    Payout {
        #[arg(long)]
        total: u64,

        #[arg(long)]
        winning: u64,

        /// Winning stake to pay out
        #[arg(long)]
        amount: Option<u64>,
    },

    /// Run a full market against an in-process network
    Simulate {
        /// Bets as amount:side, comma separated
        #[arg(long, value_delimiter = ',', value_parser = parse_bet)]
        bets: Vec<(u64, u8)>,

        /// Declared outcome, 0 or 1
        #[arg(long)]
        winning_side: u8,

        /// What to do when nobody bet on the winning side
        #[arg(long, value_enum, default_value = "fail")]
        policy: Policy,

        /// Void the market as its creator if the resolution fails
        #[arg(long)]
        void_failed: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Fail,
    Refund,
}

impl From<Policy> for ZeroWinnerPolicy {
    fn from(p: Policy) -> Self {
        match p {
            Policy::Fail => ZeroWinnerPolicy::Fail,
            Policy::Refund => ZeroWinnerPolicy::Refund,
        }
    }
}

fn parse_bet(s: &str) -> std::result::Result<(u64, u8), String> {
    let (amount, side) = s
        .split_once(':')
        .ok_or_else(|| format!("expected amount:side, got {:?}", s))?;
    let amount = amount.parse().map_err(|e| format!("amount: {}", e))?;
    let side = side.parse().map_err(|e| format!("side: {}", e))?;
    Ok((amount, side))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("dark_market={}", level))
        .init();

    match cli.command {
        Commands::Keygen { config, namespace } => run_keygen(config, namespace),
        Commands::EncryptBet {
            config,
            network_key,
            market_id,
            amount,
            prediction,
            user_nonce,
        } => run_encrypt_bet(config, network_key, market_id, amount, prediction, user_nonce),
        Commands::DecodeReceipt {
            network_key,
            private_key,
            nonce,
            ciphertext,
        } => run_decode_receipt(network_key, private_key, nonce, ciphertext),
        Commands::Payout {
            total,
            winning,
            amount,
        } => run_payout(total, winning, amount),
        Commands::Simulate {
            bets,
            winning_side,
            policy,
            void_failed,
        } => run_simulate(bets, winning_side, policy.into(), void_failed),
    }
}

#[derive(Serialize)]
struct KeygenOutput {
    public_key: String,
    private_key: String,
}

fn run_keygen(config: Option<PathBuf>, namespace: String) -> Result<()> {
    let keypair = NetworkKeyPair::generate();

    if let Some(path) = config {
        let mut cfg = NetworkConfig::new(keypair.public_key);
        cfg.namespace = namespace;
        cfg.validate()?;
        std::fs::write(&path, cfg.to_toml_string()?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("wrote network config to {}", path.display());
    }

    let out = KeygenOutput {
        public_key: keypair.public_key.to_hex(),
        private_key: hex::encode(keypair.private_key.to_bytes().as_slice()),
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn network_key(config: Option<PathBuf>, key: Option<String>) -> Result<NetworkPublicKey> {
    match (config, key) {
        (_, Some(key)) => PublicKey::from_hex(&key).context("parsing --network-key"),
        (Some(path), None) => Ok(NetworkConfig::load(&path)
            .with_context(|| format!("loading {}", path.display()))?
            .network_public_key),
        (None, None) => bail!("either --config or --network-key is required"),
    }
}

#[derive(Serialize)]
struct SubmissionJson {
    ciphertext_amount: String,
    ciphertext_prediction: String,
    ephemeral_public_key: String,
    nonce: String,
}

#[derive(Serialize)]
struct SecretsJson {
    private_key: String,
    nonce: String,
    user_nonce: u64,
}

#[derive(Serialize)]
struct EncryptBetOutput {
    market_id: u64,
    submission: SubmissionJson,
    /// keep locally, needed to open the receipt
    secrets: SecretsJson,
}

fn run_encrypt_bet(
    config: Option<PathBuf>,
    key: Option<String>,
    market_id: u64,
    amount: u64,
    prediction: u8,
    user_nonce: u64,
) -> Result<()> {
    let network = network_key(config, key)?;
    let input = BetInput::new(market_id, amount, prediction, user_nonce)?;
    let (data, secrets) = encode_bet(&input, &network)?;

    let out = EncryptBetOutput {
        market_id,
        submission: SubmissionJson {
            ciphertext_amount: hex::encode(data.ciphertext_amount),
            ciphertext_prediction: hex::encode(data.ciphertext_prediction),
            ephemeral_public_key: data.ephemeral_public_key.to_hex(),
            nonce: hex::encode(data.nonce.as_bytes()),
        },
        secrets: SecretsJson {
            private_key: hex::encode(secrets.private_key.to_bytes().as_slice()),
            nonce: hex::encode(secrets.nonce.as_bytes()),
            user_nonce: secrets.user_nonce,
        },
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[derive(Serialize)]
struct ReceiptOutput {
    bet_id: u64,
    amount: u64,
    prediction: u8,
}

fn run_decode_receipt(
    network_key: String,
    private_key: String,
    nonce: String,
    ciphertext: String,
) -> Result<()> {
    let network = PublicKey::from_hex(&network_key).context("parsing --network-key")?;
    let private_key = hex::decode(private_key).context("--private-key is not hex")?;
    let nonce = hex::decode(nonce).context("--nonce is not hex")?;
    let ciphertext = hex::decode(ciphertext).context("--ciphertext is not hex")?;

    let receipt = decode_receipt(&ciphertext, &private_key, &nonce, &network)?;
    let out = ReceiptOutput {
        bet_id: receipt.bet_id,
        amount: receipt.amount,
        prediction: receipt.prediction.as_u8(),
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[derive(Serialize)]
struct PayoutOutput {
    payout_ratio: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    payout: Option<u64>,
}

fn run_payout(total: u64, winning: u64, amount: Option<u64>) -> Result<()> {
    let ratio = payout_ratio(total, winning)?;
    let payout = amount.map(|a| payout_for(a, ratio)).transpose()?;
    let out = PayoutOutput {
        payout_ratio: ratio,
        payout,
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[derive(Serialize)]
struct SimulatedBet {
    bet_id: u64,
    amount: u64,
    prediction: u8,
    paid: u64,
}

#[derive(Serialize)]
struct SimulateOutput {
    status: String,
    total_pool: Option<u64>,
    winning_pool: Option<u64>,
    payout_ratio: Option<u64>,
    bets: Vec<SimulatedBet>,
}

fn run_simulate(
    bets: Vec<(u64, u8)>,
    winning_side: u8,
    policy: ZeroWinnerPolicy,
    void_failed: bool,
) -> Result<()> {
    const MARKET_ID: u64 = 1;
    const START: u64 = 1_000;
    const END: u64 = START + 3_600;
    let creator: AccountId = [0xff; 32];

    let cluster = LocalCluster::generate();
    let config = NetworkConfig::new(cluster.public_key()).with_zero_winner_policy(policy);
    let ledger = Ledger::new(Arc::new(config));
    ledger.create_market(
        creator,
        MarketRequest {
            market_id: MARKET_ID,
            question: "simulated market".into(),
            end_time_unix: END,
        },
        START,
    )?;

    let mut placed = Vec::with_capacity(bets.len());
    for (i, (amount, side)) in bets.into_iter().enumerate() {
        let mut bettor: AccountId = [0u8; 32];
        bettor[..8].copy_from_slice(&(i as u64).to_le_bytes());

        let input = BetInput::new(MARKET_ID, amount, side, i as u64)?;
        let (data, secrets) = encode_bet(&input, &cluster.public_key())?;
        let offset = ledger.place_bet(
            MARKET_ID,
            bettor,
            data.to_submission(ledger.generate_offset()),
            START,
        )?;
        let receipt = ledger.complete_place_bet(offset, &cluster)?;
        let opened = secrets.open_receipt(&receipt, &cluster.public_key())?;
        info!("bet {} stored", opened.bet_id);
        placed.push((bettor, opened));
    }

    let offset = ledger.resolve_market(
        MARKET_ID,
        creator,
        ResolveRequest {
            computation_offset: ledger.generate_offset(),
            winning_side,
        },
        END,
    )?;

    let mut out = SimulateOutput {
        status: String::new(),
        total_pool: None,
        winning_pool: None,
        payout_ratio: None,
        bets: Vec::new(),
    };

    match ledger.complete_resolution(offset, &cluster, END) {
        Ok(record) => {
            out.total_pool = Some(record.total_pool);
            out.winning_pool = Some(record.winning_pool);
            out.payout_ratio = Some(record.payout_ratio);
        }
        Err(dark_market::Error::NoWinningBets) => {
            info!("no bets on the winning side");
        }
        Err(e) if e.is_circuit_failure() => {
            info!("resolution circuit failed: {}", e);
        }
        Err(e) => return Err(e).context("resolving market"),
    }

    if void_failed
        && matches!(
            ledger.market(MARKET_ID)?.status,
            dark_market::MarketStatus::Failed { .. }
        )
    {
        ledger.void_market(MARKET_ID, creator)?;
        info!("failed market voided by its creator");
    }

    let status = ledger.market(MARKET_ID)?.status;
    out.status = format!("{:?}", status);

    for (bettor, receipt) in placed {
        let paid = match status {
            dark_market::MarketStatus::Resolved => {
                ledger.claim(MARKET_ID, receipt.bet_id, bettor, &cluster)?
            }
            dark_market::MarketStatus::Voided => {
                ledger.refund(MARKET_ID, receipt.bet_id, bettor, &cluster)?
            }
            _ => 0,
        };
        out.bets.push(SimulatedBet {
            bet_id: receipt.bet_id,
            amount: receipt.amount,
            prediction: receipt.prediction.as_u8(),
            paid,
        });
    }

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
