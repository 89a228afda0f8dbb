//! reqstate — inspect and produce request-state records
//!
//! A small tool around the request-state container. `capture` seats
//! identities by id and prints the flat record a request would hand to a
//! background job; `inspect` hydrates such a record in a fresh task scope
//! and prints what the job would see.
//!
//! Usage:
//!   reqstate --fixtures entities.json capture --site 123 --user 7 --locale nl
//!   reqstate --fixtures entities.json --preset extended capture --slot target_site=9
//!   reqstate --fixtures entities.json inspect --record job.json
//!   reqstate --fixtures entities.json --registry registry.json inspect < job.json

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqstate_core::handoff;
use reqstate_core::{
    EitherKind, Entity, FixtureSet, IdentityId, IdentityRef, Locale, RegistryConfig,
    RegistryPreset, RequestState, RepositorySet, Slots, StateRecord, TaskStore,
};
use reqstate_protocol::downcast_identity;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "reqstate", about = "Request-state records — capture and inspect")]
struct Cli {
    /// Built-in registry shape (standard, extended, restricted)
    #[arg(long, default_value = "standard")]
    preset: String,

    /// Registry configuration file (JSON); overrides --preset
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Entity fixtures backing the repositories (JSON, keyed by kind)
    #[arg(long)]
    fixtures: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seat identities by id and print the resulting record
    Capture(CaptureArgs),
    /// Hydrate a record and print the resolved state
    Inspect(InspectArgs),
}

#[derive(clap::Args, Debug)]
struct CaptureArgs {
    /// Current site id
    #[arg(long)]
    site: Option<IdentityId>,

    /// Current tenant id (defaults to the site's default tenant)
    #[arg(long)]
    tenant: Option<IdentityId>,

    /// Current workspace id (defaults to the site's default workspace)
    #[arg(long)]
    workspace: Option<IdentityId>,

    /// Current user id
    #[arg(long)]
    user: Option<IdentityId>,

    /// Current admin id
    #[arg(long)]
    admin: Option<IdentityId>,

    /// Current root id
    #[arg(long)]
    root: Option<IdentityId>,

    /// Any registry slot, as `slot=id` (repeatable)
    #[arg(long = "slot", value_parser = parse_slot_assignment)]
    slots: Vec<(String, IdentityId)>,

    /// Language tag, e.g. `nl` or `en-GB`
    #[arg(long)]
    locale: Option<Locale>,

    /// Request id (a UUID is generated when omitted)
    #[arg(long)]
    request_id: Option<String>,
}

#[derive(clap::Args, Debug)]
struct InspectArgs {
    /// Record file; reads stdin when omitted
    #[arg(long)]
    record: Option<PathBuf>,
}

fn parse_slot_assignment(raw: &str) -> Result<(String, IdentityId), String> {
    let (slot, id) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected slot=id, got {raw:?}"))?;
    if slot.is_empty() || id.is_empty() {
        return Err(format!("expected slot=id, got {raw:?}"));
    }
    let id: IdentityId = id.parse().unwrap_or_else(|never| match never {});
    Ok((slot.to_string(), id))
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    if let Some(ref log_path) = cli.log_file {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("failed to open log file {}", log_path.display()))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

/// Build the container described by the global flags.
fn build_state(cli: &Cli) -> anyhow::Result<RequestState<TaskStore>> {
    let config = match &cli.registry {
        Some(path) => RegistryConfig::load(path)?,
        None => RegistryConfig::from_preset(cli.preset.parse::<RegistryPreset>()?),
    };
    let registry = config.build()?;

    let repositories = match &cli.fixtures {
        Some(path) => FixtureSet::load(path)?.into_repositories()?,
        None => RepositorySet::new(),
    };
    debug!(slots = registry.len(), repositories = ?repositories.kinds(), "container configured");

    Ok(RequestState::new(
        Arc::new(registry),
        Arc::new(repositories),
        TaskStore,
    ))
}

fn describe(identity: &IdentityRef) -> Value {
    match downcast_identity::<Entity>(identity).and_then(|e| e.label.as_deref()) {
        Some(label) => json!({ "id": identity.id(), "label": label }),
        None => json!({ "id": identity.id() }),
    }
}

fn describe_opt(identity: Option<IdentityRef>) -> Value {
    identity.as_ref().map(describe).unwrap_or(Value::Null)
}

fn capture(state: &RequestState<TaskStore>, args: CaptureArgs) -> anyhow::Result<StateRecord> {
    match args.site {
        Some(site_id) => {
            let site = resolve_required(state, Slots::CURRENT_SITE, site_id)?;
            let tenant = args
                .tenant
                .map(|id| resolve_required(state, Slots::CURRENT_TENANT, id))
                .transpose()?;
            let workspace = args
                .workspace
                .map(|id| resolve_required(state, Slots::CURRENT_WORKSPACE, id))
                .transpose()?;
            state.with_current(site, tenant, workspace, |_| ())?;
        }
        None => {
            for (slot, id) in [
                (Slots::CURRENT_TENANT, args.tenant),
                (Slots::CURRENT_WORKSPACE, args.workspace),
            ] {
                if id.is_some() {
                    state.set_id(slot, id)?;
                }
            }
        }
    }

    for (slot, id) in [
        (Slots::CURRENT_USER, args.user),
        (Slots::CURRENT_ADMIN, args.admin),
        (Slots::CURRENT_ROOT, args.root),
    ] {
        if id.is_some() {
            state.set_id(slot, id)?;
        }
    }
    for (slot, id) in args.slots {
        if state.set_id(&slot, Some(id.clone()))?.is_none() {
            info!(%slot, %id, "id did not resolve, slot left empty");
        }
    }

    state.set_locale(args.locale);
    match args.request_id {
        Some(request_id) => state.set_request_id(Some(request_id)),
        None => {
            state.ensure_request_id();
        }
    }

    Ok(state.to_record())
}

/// Look `id` up through `slot`'s repository without seating it.
fn resolve_required(
    state: &RequestState<TaskStore>,
    slot: &str,
    id: IdentityId,
) -> anyhow::Result<IdentityRef> {
    let spec = state.registry().require(slot)?;
    match state.repositories().find(&spec.repository, &id)? {
        Some(identity) => Ok(identity),
        None => bail!("{slot} {id} not found"),
    }
}

fn summarize(state: &RequestState<TaskStore>) -> Value {
    let mut slots = Map::new();
    for spec in state.registry().specs() {
        slots.insert(spec.name.clone(), describe_opt(state.get(&spec.name)));
    }

    let mut either = Map::new();
    for kind in [EitherKind::Site, EitherKind::Tenant, EitherKind::Workspace] {
        if let Ok(identity) = state.either(kind) {
            either.insert(kind.to_string(), describe_opt(identity));
        }
    }

    json!({
        "request_id": state.request_id(),
        "started": reqstate_core::serializer::format_started(state.started()),
        "duration_seconds": state.duration(),
        "locale": state.locale().map(|l| l.to_string()),
        "slots": slots,
        "either": either,
        "either_admin": describe_opt(state.either_admin()),
        "current_login": describe_opt(state.current_login()),
        "highest_privilege": describe_opt(state.highest_privilege()),
        "privilege_level": format!("{:?}", state.privilege_level()),
    })
}

fn read_record(args: &InspectArgs) -> anyhow::Result<StateRecord> {
    let raw = match &args.record {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read record {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read record from stdin")?;
            buf
        }
    };
    Ok(StateRecord::from_json(&raw)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let state = build_state(&cli)?;

    let output = match cli.command {
        Command::Capture(args) => {
            let record = TaskStore::scope(async { capture(&state, args) }).await?;
            info!(request_id = ?record.request_id, "record captured");
            record.to_value()?
        }
        Command::Inspect(args) => {
            let record = read_record(&args)?;
            handoff::run_with_record(state, record, |state| async move { summarize(&state) })
                .await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
