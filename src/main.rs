use clap::Parser;
use skyscan::cache::ResultCache;
use skyscan::cli::{Cli, Command, DiffArgs, QueryArgs, ReportArgs, ScanArgs, ServeArgs, ServicesArgs};
use skyscan::config::Config;
use skyscan::insight::{InsightService, OpenAiChat};
use skyscan::logging;
use skyscan::report;
use skyscan::scan::aws::AWS;
use skyscan::scan::azure::AZURE;
use skyscan::scan::cli_api::CliConnector;
use skyscan::scan::coordinator::{AccountContext, Coordinator};
use skyscan::scan::provider::{Provider, Reach};
use skyscan::scan::ProviderKind;
use skyscan::server::{self, Accounts, AppState};
use skyscan::store::{diff, Store};
use std::sync::Arc;
use tracing::warn;

type CmdResult = Result<(), Box<dyn std::error::Error>>;

fn open_store(config: &Config) -> Result<Store, skyscan::error::StoreError> {
    match &config.database {
        Some(path) => Store::open(path),
        None => Store::open_default(),
    }
}

fn account(config: &Config, provider: ProviderKind) -> AccountContext {
    match provider {
        ProviderKind::Aws => AccountContext::new(
            &AWS,
            Arc::new(CliConnector::aws(&config.aws.cli, config.aws.profile.clone())),
            config.aws.profile.clone(),
        ),
        ProviderKind::Azure => AccountContext::new(
            &AZURE,
            Arc::new(CliConnector::azure(&config.azure.cli)),
            config.azure.subscription.clone(),
        ),
    }
}

fn coordinator(config: &Config) -> Result<Coordinator, Box<dyn std::error::Error>> {
    let pool = Coordinator::build_pool(config.max_workers)?;
    let cache = Arc::new(ResultCache::new(config.cache_ttl));
    Ok(Coordinator::new(pool, cache, config.scope_timeout))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_id(raw: &str) -> Result<i64, String> {
    raw.parse()
        .map_err(|_| format!("Invalid snapshot ID: '{raw}'. Must be a number."))
}

fn run_scan(mut config: Config, args: ScanArgs) -> CmdResult {
    if let Some(profile) = non_blank(args.profile) {
        config.aws.profile = Some(profile);
    }
    if let Some(subscription) = non_blank(args.subscription) {
        config.azure.subscription = Some(subscription);
    }
    if let Some(max_workers) = args.max_workers {
        config.max_workers = max_workers;
        config.validate()?;
    }

    let coordinator = coordinator(&config)?;
    let outcome = coordinator.scan(&account(&config, args.provider), &args.services)?;

    let saved = if args.no_save {
        None
    } else {
        match open_store(&config).and_then(|store| store.put(args.provider, &outcome.result)) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "failed to save snapshot");
                None
            }
        }
    };

    report::print(&outcome.result, outcome.cached, args.json);
    if let (Some(id), false) = (saved, args.json) {
        println!("snapshot: {id}");
    }
    Ok(())
}

fn run_report(config: &Config, args: ReportArgs) -> CmdResult {
    let store = open_store(config)?;

    if args.list {
        let snapshots = store.list(args.provider)?;
        if args.json {
            println!("{}", report::json::render_snapshots(&snapshots));
        } else {
            print!("{}", report::table::render_snapshots(&snapshots));
        }
        return Ok(());
    }

    let snapshot = if let Some(id_str) = &args.id {
        store.get(parse_id(id_str)?)?
    } else if let Some(provider) = args.provider {
        store.get_latest(provider)?
    } else {
        match store.list(None)?.first() {
            Some(info) => store.get(info.id)?,
            None => None,
        }
    };

    let Some(snapshot) = snapshot else {
        return Err("No snapshots found. Run 'skyscan scan' to create one.".into());
    };

    if args.json {
        println!("{}", report::json::render(&snapshot.data));
    } else {
        print!("{}", report::table::render(&snapshot.data));
        println!(
            "\nsnapshot: {} ({})",
            snapshot.info.id,
            report::format_timestamp(snapshot.info.timestamp)
        );
        println!("scan duration: {:.2}s", snapshot.info.duration_ms as f64 / 1000.0);
    }
    Ok(())
}

fn run_diff(config: &Config, args: DiffArgs) -> CmdResult {
    if args.from.is_some() != args.to.is_some() {
        return Err("Both --from and --to must be specified together.".into());
    }

    let store = open_store(config)?;

    let (from_id, to_id) = if let (Some(from_str), Some(to_str)) = (&args.from, &args.to) {
        (parse_id(from_str)?, parse_id(to_str)?)
    } else {
        let snapshots = store.list(Some(args.provider))?;
        if snapshots.len() < 2 {
            return Err(format!(
                "Need at least 2 {} snapshots to compare. Run 'skyscan scan {}' a few times.",
                args.provider.display_name(),
                args.provider
            )
            .into());
        }
        (snapshots[1].id, snapshots[0].id)
    };

    let from = store.get(from_id)?.ok_or_else(|| format!("Snapshot {from_id} not found"))?;
    let to = store.get(to_id)?.ok_or_else(|| format!("Snapshot {to_id} not found"))?;
    if from.info.provider != to.info.provider {
        return Err(format!(
            "Snapshots {from_id} ({}) and {to_id} ({}) belong to different providers",
            from.info.provider, to.info.provider
        )
        .into());
    }

    let result = diff::compare(&from, &to);
    if args.json {
        println!("{}", report::json::render_diff(&result));
    } else {
        print!("{}", report::table::render_diff(&result));
    }
    Ok(())
}

fn run_query(config: &Config, args: QueryArgs) -> CmdResult {
    let store = open_store(config)?;
    let service = InsightService::new(Box::new(OpenAiChat::from_config(&config.llm)?));
    let answer = service.ask(&store, &args.question.join(" "), args.provider)?;

    if args.json {
        println!("{}", report::json::pretty(&answer));
    } else {
        println!("{}", answer.answer);
    }
    Ok(())
}

fn run_services(args: ServicesArgs) -> CmdResult {
    let providers: [&dyn Provider; 2] = [&AWS, &AZURE];

    for provider in providers {
        if args.provider.is_some_and(|p| p != provider.kind()) {
            continue;
        }

        println!("{}:", provider.kind().display_name());
        for def in provider.services() {
            let default = if provider.default_services().contains(&def.tag) { "*" } else { " " };
            let reach = match def.reach {
                Reach::Global => " (account-wide)",
                Reach::Scoped => "",
            };
            let categories: Vec<&str> = def.categories.iter().map(|c| c.name).collect();
            println!("  {default} {:<12} {}{reach}", def.tag, categories.join(", "));
        }
        println!();
    }

    println!("* scanned by default");
    Ok(())
}

fn run_serve(config: &Config, args: ServeArgs) -> CmdResult {
    let insight = match OpenAiChat::from_config(&config.llm) {
        Ok(model) => Some(InsightService::new(Box::new(model))),
        Err(e) => {
            warn!(error = %e, "query endpoints disabled");
            None
        }
    };

    let accounts = Accounts {
        aws: account(config, ProviderKind::Aws),
        azure: account(config, ProviderKind::Azure),
    };
    let state = AppState::new(coordinator(config)?, accounts, open_store(config)?, insight);

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(server::serve(state, args.addr))?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}");
        std::process::exit(1);
    });
    if cli.database.is_some() {
        config.database = cli.database;
    }
    if cli.verbose {
        config.log.level = "debug".to_string();
    }

    if let Err(e) = logging::init(&config.log) {
        eprintln!("warning: {e}");
    }

    let result = match cli.command {
        Command::Scan(args) => run_scan(config, args),
        Command::Report(args) => run_report(&config, args),
        Command::Diff(args) => run_diff(&config, args),
        Command::Query(args) => run_query(&config, args),
        Command::Services(args) => run_services(args),
        Command::Serve(args) => run_serve(&config, args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
