// Entry point for the node CLI
use clap::Parser;
use ember_chain::crypto::is_hex_address;
use ember_chain::{Address, Command, Node, NodeEvent, Opt, Settings, Wallet};
use log::{error, info, LevelFilter};
use std::process;
use std::sync::Arc;
use std::thread;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::StartNode { mine, coinbase } => {
            let mut settings = Settings::from_env()?;
            if mine {
                settings.mining_enabled = true;
            }
            if let Some(addr) = coinbase {
                settings.coinbase = Address::from_hex(&addr)
                    .map_err(|e| format!("Invalid coinbase address: {e}"))?;
            }

            let mining = settings.mining_enabled;
            let p2p_port = settings.p2p_port;
            let rpc_port = settings.rpc_port;
            let node = Arc::new(Node::new(settings)?);

            info!("- Chain ID: {}", node.chain_id());
            info!("- P2P port (adapter): {p2p_port}");
            info!("- RPC port (adapter): {rpc_port}");
            info!("- Mining enabled: {mining}");

            // Adapters subscribe to the node's event stream; until a real
            // P2P transport is wired in, announce to the log
            if let Some(events) = node.take_event_receiver() {
                thread::spawn(move || {
                    for event in events {
                        match event {
                            NodeEvent::BlockAppended(block) => info!(
                                "Announcing block #{} {} to peers",
                                block.get_header().get_number(),
                                block.get_hash()
                            ),
                            NodeEvent::TransactionAccepted(hash) => {
                                info!("Announcing transaction {hash} to peers")
                            }
                        }
                    }
                });
            }

            if mining {
                node.start_mining();
            }

            // The node runs until the process is killed
            loop {
                thread::park();
            }
        }
        Command::CreateWallet => {
            let wallet = Wallet::random();
            println!("Address:     {}", wallet.address());
            println!("Private key: {}", wallet.private_key_hex());
        }
        Command::GetBalance { address } => {
            if !is_hex_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            let addr = Address::from_hex(&address)?;

            let node = Node::new(Settings::from_env()?)?;
            println!("Balance of {}: {}", addr, node.get_balance(&addr));
            println!("Nonce: {}", node.get_nonce(&addr));
        }
        Command::Status => {
            let node = Node::new(Settings::from_env()?)?;
            let head = node.get_current_block();
            println!("Chain ID:     {}", node.chain_id());
            println!("Block height: {}", node.get_block_number());
            println!("Head hash:    {}", head.get_hash());
            println!("Mempool size: {}", node.mempool_size());
        }
        Command::PrintChain { count } => {
            let node = Node::new(Settings::from_env()?)?;
            let mut block = node.get_current_block();
            for _ in 0..count {
                println!(
                    "#{} {} ({} transaction(s), timestamp {})",
                    block.get_header().get_number(),
                    block.get_hash(),
                    block.get_transactions().len(),
                    block.get_header().get_timestamp()
                );
                if block.get_header().get_number() == 0 {
                    break;
                }
                block = node.get_block_by_hash(block.get_header().get_previous_hash())?;
            }
        }
    }
    Ok(())
}
