//! `LedgerOps` - contract lifecycle orchestration
//!
//! Single binary with subcommands:
//!   ledgerops deploy <name>     - Deploy a contract version
//!   ledgerops upgrade <id>      - Upgrade a proxied contract
//!   ledgerops rollback <id>     - Repoint a proxy at an older version
//!   ledgerops --help            - Everything else

mod cli;

use console::style;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        None | Some("--help" | "-h" | "help") => {
            print_help();
        }
        Some("--version" | "-V") => {
            println!("ledgerops {}", ledgerops::VERSION);
        }
        Some(_) => {
            // Skip the binary name; the subcommand is parsed with its options
            if let Err(e) = cli::run(args[1..].to_vec()) {
                eprintln!("{} {e:#}", style("error:").red().bold());
                std::process::exit(1);
            }
        }
    }
}

fn print_help() {
    println!("LedgerOps v{}", ledgerops::VERSION);
    println!("Smart-contract lifecycle orchestration");
    println!();
    println!("USAGE:");
    println!("    ledgerops <COMMAND> [ARGS] [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    deploy <name>               Deploy a contract");
    println!("                  --version <v>    Version label (default 1.0.0)");
    println!("                  --params <p>     Constructor parameters (JSON or comma-separated)");
    println!("                  --source <file>  Compile from this source file");
    println!("                  --upgradeable    Deploy behind a proxy");
    println!("                  --preview        Estimate cost without deploying");
    println!("    call <contract> <method>    Call a contract method");
    println!("                  --params <p>     Method parameters");
    println!("                  --no-wait        Do not wait for confirmation");
    println!("    upgrade <contract>          Deploy a new version and repoint its proxy");
    println!("                  --version <v>    New version (default: next patch)");
    println!("                  --source <file>  New contract source");
    println!("                  --migration <f>  Script to run after the upgrade");
    println!("    rollback <contract>         Repoint the proxy at an older version");
    println!("                  --version <v>    Target version (default: previous)");
    println!("    status <contract>           Show a contract and its recent transactions");
    println!("    compile <source> <name>     Compile and store an artifact");
    println!("                  --version <v>    Version label (default 1.0.0)");
    println!("    test <name>                 Deploy a throwaway version and check it");
    println!("    watch                       Redeploy contracts when their sources change");
    println!("                  --interval <ms>  Poll interval");
    println!("    balance [address]           Account balance (default account if omitted)");
    println!("    reconcile                   Check proxies against their implementations");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <path>     Config file (default ~/.ledgerops/config.toml)");
    println!("    -n, --network <name>    Network to use (default from config)");
    println!("        --from <address>    Sender address");
    println!("        --gas-limit <gas>   Fixed gas limit");
    println!("        --timeout <secs>    Confirmation timeout");
    println!("        --json              Machine-readable output");
    println!("    -y, --yes               Skip confirmation prompts");
    println!("    -h, --help              Print help");
    println!("    -V, --version           Print version");
    println!();
    println!("EXAMPLES:");
    println!("    ledgerops deploy Token --params '[\"Token\", \"TKN\"]'");
    println!("    ledgerops call Token balanceOf --params 0xabc...");
    println!("    ledgerops upgrade Token@1.0.0 --source contracts/Token.sol");
    println!("    ledgerops rollback Token --version 1.0.0 --yes");
}
