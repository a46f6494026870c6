use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use fastilybot_core::bots;
use fastilybot_core::cache::{Cache, DiskCache};
use fastilybot_core::client::{
    MediaWikiClient, MediaWikiClientConfig, WikiReadApi, WikiWriteApi,
};
use fastilybot_core::query::QueryCache;
use fastilybot_core::report::ReportFetcher;
use fastilybot_core::reports::DATABASE_REPORTS;
use fastilybot_core::resolve::{DEFAULT_NAMESPACES, Resolver, Specifier};
use fastilybot_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedRuntime, normalize_for_display, resolve_runtime,
};
use fastilybot_core::tasks::{RunSummary, TaskContext, TaskKind, WikiFactory, run_tasks, sorted};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(
    name = "fastilybot",
    version,
    about = "Maintenance bot tasks and database reports for English Wikipedia"
)]
struct Cli {
    #[arg(short = 'u', value_name = "USERNAME", help = "The username to use")]
    user: Option<String>,
    #[arg(short = 'b', value_name = "IDS", help = "Comma-separated ids of bot tasks to run")]
    bots: Option<String>,
    #[arg(short = 'r', value_name = "IDS", help = "Comma-separated ids of report tasks to run")]
    reports: Option<String>,
    #[arg(long, help = "Run every report task")]
    all_reports: bool,
    #[arg(long, help = "Delete all cached files and exit")]
    purge_cache: bool,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    cache_root: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, help = "Enable debug logging")]
    debug: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the titles each specifier resolves to
    Resolve(SpecArgs),
    /// Print the first specifier's titles minus those of all later ones
    Difference(SpecArgs),
    Cache(CacheArgs),
}

#[derive(Debug, Args)]
struct SpecArgs {
    /// Report id or Category:/Template:/User:/Wikipedia: title, optionally suffixed with
    /// `@ns1,ns2` or `@*`
    #[arg(required = true, value_name = "SPEC")]
    specs: Vec<String>,
}

#[derive(Debug, Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheSubcommand,
}

#[derive(Debug, Subcommand)]
enum CacheSubcommand {
    Stats,
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("fastilybot=debug,fastilybot_core=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("fastilybot=info,fastilybot_core=info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    dotenvy::dotenv().ok();

    let runtime = resolve_runtime(
        &ResolutionContext::from_process()?,
        &PathOverrides {
            config: cli.config.clone(),
            cache_root: cli.cache_root.clone(),
        },
    )?;
    if cli.diagnostics {
        println!("{}", runtime.diagnostics());
    }

    if cli.purge_cache {
        return run_purge_cache(&runtime);
    }

    match cli.command {
        Some(Commands::Resolve(args)) => run_resolve(&runtime, &args),
        Some(Commands::Difference(args)) => run_difference(&runtime, &args),
        Some(Commands::Cache(CacheArgs {
            command: CacheSubcommand::Stats,
        })) => run_cache_stats(&runtime),
        None => {
            let bot_ids = determine_tasks(cli.bots.as_deref(), false, TaskKind::Bot)?;
            let report_ids =
                determine_tasks(cli.reports.as_deref(), cli.all_reports, TaskKind::Report)?;
            if bot_ids.is_empty() && report_ids.is_empty() {
                if !cli.diagnostics {
                    Cli::command().print_help()?;
                    println!();
                }
                return Ok(());
            }
            run_scheduled(&runtime, cli.user.as_deref(), &bot_ids, &report_ids)
        }
    }
}

/// Parse a comma-separated id list. `all` takes precedence over `individual`.
fn determine_tasks(individual: Option<&str>, all: bool, kind: TaskKind) -> Result<Vec<u32>> {
    if all {
        return Ok(kind.all_ids());
    }
    let Some(individual) = individual else {
        return Ok(Vec::new());
    };
    individual
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            value
                .parse::<u32>()
                .with_context(|| format!("invalid {} task id: {value}", kind.as_str()))
        })
        .collect()
}

fn run_purge_cache(runtime: &ResolvedRuntime) -> Result<()> {
    let cache = DiskCache::new(&runtime.cache_root);
    cache.purge()?;
    info!(
        "purged cache root {}",
        normalize_for_display(&runtime.cache_root)
    );
    Ok(())
}

fn run_cache_stats(runtime: &ResolvedRuntime) -> Result<()> {
    let stats = DiskCache::new(&runtime.cache_root).stats()?;
    println!("cache_root: {}", normalize_for_display(&runtime.cache_root));
    println!("entries: {}", stats.entries);
    println!("report_entries: {}", stats.report_entries);
    println!("query_entries: {}", stats.query_entries);
    println!("total_bytes: {}", stats.total_bytes);
    Ok(())
}

struct Services {
    reports: ReportFetcher,
    queries: QueryCache,
}

fn build_services(runtime: &ResolvedRuntime) -> Result<Services> {
    let cache: Arc<dyn Cache> = Arc::new(DiskCache::new(&runtime.cache_root));
    let reports = ReportFetcher::new(
        runtime.config.reports_url(),
        runtime.config.user_agent(),
        Arc::clone(&cache),
        runtime.config.report_ttl(),
    )?;
    let queries = QueryCache::new(cache, runtime.config.query_ttl());
    Ok(Services { reports, queries })
}

fn parse_specs(args: &SpecArgs) -> Result<Vec<Specifier>> {
    args.specs
        .iter()
        .map(|raw| Specifier::parse_cli(raw).with_context(|| format!("bad specifier '{raw}'")))
        .collect()
}

fn run_resolve(runtime: &ResolvedRuntime, args: &SpecArgs) -> Result<()> {
    let specs = parse_specs(args)?;
    let mut wiki = MediaWikiClient::new(MediaWikiClientConfig::from_config(&runtime.config))?;
    let mut services = build_services(runtime)?;
    let mut resolver = Resolver::new(&mut wiki, &mut services.reports, &services.queries);

    for (raw, spec) in args.specs.iter().zip(specs) {
        let titles = sorted(resolver.resolve(spec, DEFAULT_NAMESPACES)?.into_vec());
        if args.specs.len() > 1 {
            println!("# {raw} ({})", titles.len());
        }
        for title in titles {
            println!("{title}");
        }
    }
    Ok(())
}

fn run_difference(runtime: &ResolvedRuntime, args: &SpecArgs) -> Result<()> {
    let specs = parse_specs(args)?;
    let mut wiki = MediaWikiClient::new(MediaWikiClientConfig::from_config(&runtime.config))?;
    let mut services = build_services(runtime)?;
    let mut resolver = Resolver::new(&mut wiki, &mut services.reports, &services.queries);

    for title in sorted(resolver.difference_of(specs, DEFAULT_NAMESPACES)?) {
        println!("{title}");
    }
    Ok(())
}

fn run_scheduled(
    runtime: &ResolvedRuntime,
    user: Option<&str>,
    bot_ids: &[u32],
    report_ids: &[u32],
) -> Result<()> {
    let username = user
        .map(ToString::to_string)
        .or_else(|| env_nonempty("WIKI_BOT_USER"))
        .unwrap_or_else(|| runtime.config.username());
    let Some(password) = env_nonempty("WIKI_BOT_PASS") else {
        bail!("WIKI_BOT_PASS must be set to run bot or report tasks as {username}");
    };

    let mut wiki = MediaWikiClient::new(MediaWikiClientConfig::from_config(&runtime.config))?;
    wiki.login(&username, &password)?;
    info!("logged in to {} as {username}", wiki.domain());

    let Services {
        mut reports,
        queries,
    } = build_services(runtime)?;
    let commons_config = MediaWikiClientConfig::commons_from_config(&runtime.config);
    let commons_factory: WikiFactory<'_> =
        Box::new(move || -> Result<Box<dyn WikiReadApi>> {
            Ok(Box::new(MediaWikiClient::new(commons_config.clone())?))
        });
    let mut context = TaskContext::new(&mut wiki, &mut reports, queries, commons_factory);

    let mut totals = RunSummary::default();
    if !bot_ids.is_empty() {
        let summary = run_tasks(
            &mut context,
            TaskKind::Bot,
            bot_ids,
            Some(bots::config_prefix(&username)),
        );
        merge_summary(&mut totals, summary);
    }
    if !report_ids.is_empty() {
        let summary = run_tasks(
            &mut context,
            TaskKind::Report,
            report_ids,
            Some(DATABASE_REPORTS.to_string()),
        );
        merge_summary(&mut totals, summary);
    }
    drop(context);

    info!(
        "finished: {} succeeded, {} failed, {} skipped, {} API requests",
        totals.succeeded.len(),
        totals.failed.len(),
        totals.skipped.len(),
        wiki.request_count()
    );
    if !totals.failed.is_empty() {
        warn!("failed task ids: {:?}", totals.failed);
    }
    Ok(())
}

fn merge_summary(totals: &mut RunSummary, summary: RunSummary) {
    totals.succeeded.extend(summary.succeeded);
    totals.failed.extend(summary.failed);
    totals.skipped.extend(summary.skipped);
}

fn env_nonempty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use fastilybot_core::tasks::TaskKind;

    use super::{Cli, Commands, determine_tasks};

    #[test]
    fn all_reports_takes_precedence() {
        let ids = determine_tasks(Some("3"), true, TaskKind::Report).expect("ids");
        assert_eq!(ids, TaskKind::Report.all_ids());
    }

    #[test]
    fn individual_ids_are_comma_separated() {
        assert_eq!(
            determine_tasks(Some("5, 10,"), false, TaskKind::Bot).expect("ids"),
            vec![5, 10]
        );
        assert!(determine_tasks(None, false, TaskKind::Bot)
            .expect("ids")
            .is_empty());
        assert!(determine_tasks(Some("5,x"), false, TaskKind::Bot).is_err());
    }

    #[test]
    fn cli_parses_flags_and_subcommands() {
        let cli = Cli::try_parse_from(["fastilybot", "-u", "ExampleBot", "-b", "5", "--debug"])
            .expect("parse");
        assert_eq!(cli.user.as_deref(), Some("ExampleBot"));
        assert_eq!(cli.bots.as_deref(), Some("5"));
        assert!(cli.debug);
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["fastilybot", "difference", "1", "Template:Keep local@*"])
            .expect("parse");
        match cli.command {
            Some(Commands::Difference(args)) => assert_eq!(args.specs.len(), 2),
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(Cli::try_parse_from(["fastilybot", "resolve"]).is_err());
    }
}
