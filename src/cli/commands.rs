use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ember-chain",
    about = "Account-model blockchain node with proof-of-work consensus"
)]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the node; pass --mine to produce blocks
    StartNode {
        /// Enable the mining loop
        #[arg(long)]
        mine: bool,
        /// Address credited as the block coinbase
        #[arg(long)]
        coinbase: Option<String>,
    },
    /// Generate a new wallet keypair
    CreateWallet,
    /// Show the balance and nonce of an address
    GetBalance {
        /// Hex address, 0x-prefixed
        address: String,
    },
    /// Show a summary of the local chain
    Status,
    /// Print recent blocks, newest first
    PrintChain {
        /// How many blocks to print
        #[arg(long, default_value_t = 10)]
        count: u64,
    },
}
