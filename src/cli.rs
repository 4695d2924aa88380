//! Subcommand parsing and execution for the `ledgerops` binary.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use console::style;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use ledgerops::config::default_config_path;
use ledgerops::contracts::{format_return_value, increment_version, parse_parameters, reconcile};
use ledgerops::manager::{StatusReport, TestReport};
use ledgerops::{
    CallOptions, CallOutcome, ContractSource, ContractVersion, DeploymentPreview, Interactor,
    LedgerDriver, LifecycleConfig, LifecycleManager, Migration, RollbackOptions, TxOutcome,
    UpgradeOptions,
};

/// Version label when none is given
const DEFAULT_VERSION: &str = "1.0.0";

/// Options valid for every command
#[derive(Debug, Default)]
struct GlobalOptions {
    config: Option<PathBuf>,
    network: Option<String>,
    json: bool,
    yes: bool,
}

/// Per-command options; each command reads the ones it understands
#[derive(Debug, Default)]
struct Options {
    params: Option<String>,
    from: Option<String>,
    source: Option<PathBuf>,
    version: Option<String>,
    gas_limit: Option<u64>,
    timeout: Option<Duration>,
    migration: Option<PathBuf>,
    interval: Option<Duration>,
    upgradeable: bool,
    preview: bool,
    no_wait: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Deploy { name: String },
    Call { contract: String, method: String },
    Upgrade { contract: String },
    Rollback { contract: String },
    Status { contract: String },
    Compile { source: PathBuf, name: String },
    Test { name: String },
    Watch,
    Balance { address: Option<String> },
    Reconcile,
}

#[derive(Debug)]
struct Invocation {
    command: Command,
    global: GlobalOptions,
    options: Options,
}

fn take_value(args: &[String], i: &mut usize) -> Result<String, String> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn take_number(args: &[String], i: &mut usize) -> Result<u64, String> {
    let flag = args[*i].clone();
    let value = take_value(args, i)?;
    value
        .parse()
        .map_err(|_| format!("{flag} expects a number, got '{value}'"))
}

fn parse_args(args: &[String]) -> Result<Invocation, String> {
    let mut global = GlobalOptions::default();
    let mut options = Options::default();
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => global.config = Some(PathBuf::from(take_value(args, &mut i)?)),
            "--network" | "-n" => global.network = Some(take_value(args, &mut i)?),
            "--json" => global.json = true,
            "--yes" | "-y" => global.yes = true,
            "--params" | "-p" => options.params = Some(take_value(args, &mut i)?),
            "--from" => options.from = Some(take_value(args, &mut i)?),
            "--source" | "-s" => options.source = Some(PathBuf::from(take_value(args, &mut i)?)),
            "--version" => options.version = Some(take_value(args, &mut i)?),
            "--gas-limit" => options.gas_limit = Some(take_number(args, &mut i)?),
            "--timeout" => options.timeout = Some(Duration::from_secs(take_number(args, &mut i)?)),
            "--migration" => options.migration = Some(PathBuf::from(take_value(args, &mut i)?)),
            "--interval" => {
                options.interval = Some(Duration::from_millis(take_number(args, &mut i)?));
            }
            "--upgradeable" => options.upgradeable = true,
            "--preview" => options.preview = true,
            "--no-wait" => options.no_wait = true,
            flag if flag.starts_with('-') && flag.len() > 1 => {
                return Err(format!("unknown option '{flag}'"));
            }
            _ => positional.push(args[i].clone()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let name = positional.next().ok_or("no command given")?;
    let mut arg = |what: &str| {
        positional
            .next()
            .ok_or_else(|| format!("{name}: missing <{what}>"))
    };

    let command = match name.as_str() {
        "deploy" => Command::Deploy { name: arg("name")? },
        "call" => Command::Call {
            contract: arg("contract")?,
            method: arg("method")?,
        },
        "upgrade" => Command::Upgrade {
            contract: arg("contract")?,
        },
        "rollback" => Command::Rollback {
            contract: arg("contract")?,
        },
        "status" => Command::Status {
            contract: arg("contract")?,
        },
        "compile" => Command::Compile {
            source: PathBuf::from(arg("source")?),
            name: arg("name")?,
        },
        "test" => Command::Test { name: arg("name")? },
        "watch" => Command::Watch,
        "balance" => Command::Balance {
            address: arg("address").ok(),
        },
        "reconcile" => Command::Reconcile,
        other => return Err(format!("unknown command '{other}' (see --help)")),
    };

    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument '{extra}'"));
    }

    Ok(Invocation {
        command,
        global,
        options,
    })
}

#[tokio::main]
pub async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let Invocation {
        command,
        global,
        options,
    } = parse_args(&args).map_err(|e| anyhow!(e))?;

    // Initialize logging with EnvFilter to support RUST_LOG; stdout stays
    // reserved for command output
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = global.config.clone().unwrap_or_else(default_config_path);
    let config = LifecycleConfig::load_or_default(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    let manager = LifecycleManager::from_config(config, global.network.as_deref())?;

    match command {
        Command::Deploy { name } => deploy(&manager, &name, options, &global).await,
        Command::Call { contract, method } => call(&manager, &contract, &method, options, &global).await,
        Command::Upgrade { contract } => upgrade(&manager, &contract, options, &global).await,
        Command::Rollback { contract } => rollback(&manager, &contract, options, &global).await,
        Command::Status { contract } => {
            let report = manager.status(&contract)?;
            output(&global, &report, || print_status(&report))
        }
        Command::Compile { source, name } => compile(&manager, &source, &name, options, &global).await,
        Command::Test { name } => {
            let spinner = spinner(&global, "Running test deployment...");
            let report = manager
                .test_deployment(&name, options.source.map(ContractSource::File))
                .await;
            spinner.finish_and_clear();
            let report = report?;
            output(&global, &report, || print_test(&report))?;
            if !report.passed() {
                bail!("test deployment of {name} failed");
            }
            Ok(())
        }
        Command::Watch => watch_sources(&manager, options).await,
        Command::Balance { address } => {
            let address = address
                .or_else(|| manager.driver().default_account())
                .ok_or_else(|| anyhow!("no address given and {} has no default account", manager.network()))?;
            let balance = manager.driver().get_balance(&address).await?;
            let value = json!({ "address": &address, "balance": &balance });
            output(&global, &value, || println!("{address}: {}", style(&balance).green()))
        }
        Command::Reconcile => {
            let findings = reconcile(manager.registry())?;
            output(&global, &findings, || {
                if findings.is_empty() {
                    println!("{}", style("Registry is consistent").green());
                }
                for finding in &findings {
                    println!("{} {finding}", style("!").yellow().bold());
                }
            })?;
            if !findings.is_empty() {
                bail!("{} inconsistencies found", findings.len());
            }
            Ok(())
        }
    }
}

async fn deploy(
    manager: &LifecycleManager,
    name: &str,
    options: Options,
    global: &GlobalOptions,
) -> anyhow::Result<()> {
    let version = options
        .version
        .unwrap_or_else(|| DEFAULT_VERSION.to_string());
    let mut params = manager
        .deploy_params(name, &version)
        .upgradeable(options.upgradeable)
        .constructor_params(options.params.as_deref().map(parse_parameters).unwrap_or_default());
    if let Some(from) = options.from {
        params = params.from(from);
    }
    if let Some(source) = options.source {
        params = params.source(ContractSource::File(source));
    }
    if let Some(gas_limit) = options.gas_limit {
        params = params.gas_limit(gas_limit);
    }

    if options.preview {
        let preview = manager.deployer().preview_deployment(&params).await?;
        return output(global, &preview, || print_preview(&preview));
    }
    if needs_confirmation(global) {
        let preview = manager.deployer().preview_deployment(&params).await?;
        print_preview(&preview);
        if !confirm(global, &format!("Deploy {name}@{version} to {}?", manager.network()))? {
            println!("Deployment cancelled");
            return Ok(());
        }
    }

    let spinner = spinner(global, &format!("Deploying {name}@{version}..."));
    if params.is_upgradeable {
        let pair = manager.upgrader().create_upgradeable_contract(params).await;
        spinner.finish_and_clear();
        let pair = pair?;
        info!(proxy = ?pair.proxy.address, "upgradeable contract deployed");
        output(global, &pair, || {
            print_contract("Implementation", &pair.implementation);
            print_contract("Proxy", &pair.proxy);
        })
    } else {
        let deployment = manager.deployer().deploy(params).await;
        spinner.finish_and_clear();
        let deployment = deployment?;
        output(global, &deployment, || print_contract("Deployed", &deployment.contract))
    }
}

async fn call(
    manager: &LifecycleManager,
    identifier: &str,
    method: &str,
    options: Options,
    global: &GlobalOptions,
) -> anyhow::Result<()> {
    let contract = manager.resolve(identifier)?;
    let params = options
        .params
        .as_deref()
        .map(parse_parameters)
        .unwrap_or_default();
    let call_options = CallOptions {
        from: options.from,
        gas_limit: options.gas_limit,
        wait: !options.no_wait,
        timeout: options.timeout,
    };

    let function = Interactor::resolve_method(&contract, method, params.len())?;
    let writes = function.is_state_changing();
    if writes
        && !confirm(
            global,
            &format!("Send {method} to {}?", contract.full_identifier()),
        )?
    {
        println!("Call cancelled");
        return Ok(());
    }

    let message = if writes && call_options.wait {
        "Waiting for confirmation..."
    } else {
        "Calling..."
    };
    let spinner = spinner(global, message);
    let outcome = manager
        .interactor()
        .call(&contract, method, params, &call_options)
        .await;
    spinner.finish_and_clear();

    match outcome? {
        CallOutcome::Value(value) => {
            println!("{}", format_return_value(&value, global.json));
            Ok(())
        }
        CallOutcome::Transaction(tx) => {
            output(global, &tx, || print_tx(&tx))?;
            if tx.succeeded() == Some(false) {
                bail!("transaction {} reverted", tx.transaction_hash());
            }
            Ok(())
        }
    }
}

async fn upgrade(
    manager: &LifecycleManager,
    identifier: &str,
    options: Options,
    global: &GlobalOptions,
) -> anyhow::Result<()> {
    let current = manager.resolve(identifier)?;
    let new_version = options
        .version
        .unwrap_or_else(|| increment_version(&current.version));

    let prompt = format!(
        "Upgrade {} from v{} to v{new_version}?",
        current.name, current.version
    );
    if !confirm(global, &prompt)? {
        println!("Upgrade cancelled");
        return Ok(());
    }

    let upgrade_options = UpgradeOptions {
        from: options.from,
        constructor_params: options
            .params
            .as_deref()
            .map(parse_parameters)
            .unwrap_or_default(),
        source: options.source.map(ContractSource::File),
        gas_limit: options.gas_limit,
        timeout: options.timeout,
        migration: options.migration.map(Migration::Script),
    };

    let spinner = spinner(global, "Upgrading...");
    let outcome = manager
        .upgrader()
        .upgrade(&current, &new_version, upgrade_options)
        .await;
    spinner.finish_and_clear();
    let outcome = outcome?;

    output(global, &outcome, || {
        println!(
            "{} {} -> {}",
            style("Upgraded").green().bold(),
            outcome.old_contract.full_identifier(),
            outcome.new_contract.full_identifier()
        );
        print_contract("Implementation", &outcome.new_contract);
        print_contract("Proxy", &outcome.proxy);
        print_tx(&outcome.transaction);
        if let Some(error) = &outcome.migration_error {
            println!("{} migration failed: {error}", style("warning:").yellow().bold());
        }
    })
}

async fn rollback(
    manager: &LifecycleManager,
    identifier: &str,
    options: Options,
    global: &GlobalOptions,
) -> anyhow::Result<()> {
    let current = manager.resolve(identifier)?;
    let target = manager
        .upgrader()
        .find_rollback_target(&current, options.version.as_deref())?;

    let prompt = format!(
        "Roll back {} from v{} to v{}?",
        current.name, current.version, target.version
    );
    if !confirm(global, &prompt)? {
        println!("Rollback cancelled");
        return Ok(());
    }

    let rollback_options = RollbackOptions {
        from: options.from,
        gas_limit: options.gas_limit,
        timeout: options.timeout,
    };
    let spinner = spinner(global, "Rolling back...");
    let outcome = manager
        .upgrader()
        .rollback(&current, Some(&target.version), &rollback_options)
        .await;
    spinner.finish_and_clear();
    let outcome = outcome?;

    output(global, &outcome, || {
        println!(
            "{} {} -> {}",
            style("Rolled back").green().bold(),
            outcome.rolled_back_from.full_identifier(),
            outcome.restored_contract.full_identifier()
        );
        print_contract("Proxy", &outcome.proxy);
        print_tx(&outcome.transaction);
    })
}

async fn compile(
    manager: &LifecycleManager,
    source: &std::path::Path,
    name: &str,
    options: Options,
    global: &GlobalOptions,
) -> anyhow::Result<()> {
    let version = options
        .version
        .unwrap_or_else(|| DEFAULT_VERSION.to_string());
    let spinner = spinner(global, &format!("Compiling {}...", source.display()));
    let artifact = manager.compiler().compile_file(source, name, &version).await;
    spinner.finish_and_clear();
    let artifact = artifact?;
    let path = manager.compiler().store_artifact(&artifact)?;

    let functions = artifact.abi.as_array().map_or(0, Vec::len);
    let bytecode_size = artifact.bytecode.trim_start_matches("0x").len() / 2;
    let summary = json!({
        "name": &artifact.name,
        "version": &artifact.version,
        "compiler_version": &artifact.compiler_version,
        "abi_entries": functions,
        "bytecode_size": bytecode_size,
        "path": &path,
    });
    output(global, &summary, || {
        println!("{} {name}@{version}", style("Compiled").green().bold());
        println!("  ABI entries:   {functions}");
        println!("  Bytecode size: {bytecode_size} bytes");
        println!("  Artifact:      {}", path.display());
    })
}

async fn watch_sources(manager: &LifecycleManager, options: Options) -> anyhow::Result<()> {
    let config = &manager.config().hot_reload;
    if !config.enabled {
        bail!("hot reload is disabled; set hot_reload.enabled = true in the config");
    }

    let mut reloader = manager.hot_reloader();
    if let Some(interval) = options.interval {
        reloader = reloader.with_interval(interval);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    println!(
        "Watching {} for changes on {} (Ctrl-C to stop)",
        config
            .watch_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
        style(manager.network()).cyan()
    );
    let redeployed = reloader.run(shutdown_rx).await;
    println!("Stopped after {redeployed} redeployment(s)");
    Ok(())
}

// ── output helpers ─────────────────────────────────────────────────────

fn output<T: Serialize>(global: &GlobalOptions, value: &T, human: impl FnOnce()) -> anyhow::Result<()> {
    if global.json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human();
    }
    Ok(())
}

const fn needs_confirmation(global: &GlobalOptions) -> bool {
    !(global.yes || global.json)
}

fn confirm(global: &GlobalOptions, prompt: &str) -> anyhow::Result<bool> {
    if !needs_confirmation(global) {
        return Ok(true);
    }
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(true)
        .interact()?)
}

fn spinner(global: &GlobalOptions, message: &str) -> ProgressBar {
    if global.json {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn print_contract(label: &str, contract: &ContractVersion) {
    println!("{} {}", style(label).bold(), style(contract.full_identifier()).cyan());
    println!("  Address:  {}", contract.address.as_deref().unwrap_or("-"));
    println!("  Network:  {}", contract.network);
    println!("  Status:   {}", contract.status);
    if let Some(hash) = &contract.transaction_hash {
        println!("  Tx hash:  {hash}");
    }
    if let Some(gas) = contract.resource_used {
        println!("  Gas used: {gas}");
    }
}

fn print_tx(tx: &TxOutcome) {
    match tx {
        TxOutcome::Submitted {
            transaction_hash, ..
        } => println!("{} {transaction_hash}", style("Submitted").yellow()),
        TxOutcome::Confirmed { receipt, .. } => {
            let label = if receipt.status {
                style("Confirmed").green()
            } else {
                style("Reverted").red()
            };
            println!("{label} {}", receipt.transaction_hash);
            if let Some(block) = receipt.block_number {
                println!("  Block:    {block}");
            }
            if let Some(gas) = receipt.resource_used {
                println!("  Gas used: {gas}");
            }
        }
    }
}

fn print_preview(preview: &DeploymentPreview) {
    println!(
        "{} {}@{} on {}",
        style("Deployment preview").bold(),
        preview.contract_name,
        preview.version,
        preview.network
    );
    println!("  From:           {}", preview.from.as_deref().unwrap_or("-"));
    println!("  Bytecode size:  {} bytes", preview.bytecode_size);
    println!("  Gas limit:      {}", preview.gas_limit);
    println!("  Gas price:      {} wei", preview.gas_price);
    println!("  Estimated cost: {}", style(&preview.estimated_cost_native).yellow());
}

fn print_status(report: &StatusReport) {
    print_contract("Contract", &report.contract);
    if report.contract.is_upgradeable {
        println!("  Upgradeable: yes");
    }
    if let Some(proxy) = &report.proxy {
        print_contract("Proxy", proxy);
    }
    if report.transactions.is_empty() {
        return;
    }
    println!("{}", style("Recent transactions").bold());
    for tx in &report.transactions {
        println!(
            "  {} {:<12} {} {}",
            tx.created_at.format("%Y-%m-%d %H:%M:%S"),
            tx.method_name,
            tx.status,
            tx.transaction_hash
        );
    }
}

fn print_test(report: &TestReport) {
    println!("{} {}", style("Test deployment").bold(), report.contract.full_identifier());
    for check in &report.checks {
        let mark = if check.passed {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!("  {mark} {}", check.name);
    }
}
