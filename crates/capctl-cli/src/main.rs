//! capctl - capability promotion control plane CLI
//!
//! Operates directly on a capability store (a directory by default) so it
//! works with or without a running `capctld`.
//!
//! ## Commands
//!
//! - `register`: Register a capability manifest
//! - `get` / `query` / `delete`: Inspect and remove capabilities
//! - `deps` / `dependents` / `compat`: Dependency graph and compatibility
//! - `scorecard`: Show, set and evaluate scorecards
//! - `policy` / `budget`: Promotion policies and cost-center budgets
//! - `promote` / `approve` / `cancel` / `execution`: Promotion lifecycle
//! - `stats` / `cleanup`: Counters and retention

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use capctl_core::promotion::load_policy_file;
use capctl_core::{
    Approval, CapabilityFilter, CapabilityManifest, CapabilityScorecard, CapabilityStatus,
    ControlPlane, ControlPlaneConfig, Dimension, ExecutionFilter, ExecutionStatus,
    PromotionExecution, PromotionRequest, RegistrationRequest, SignalSnapshot, Stage,
    StoreBackend,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, Level};

const DEFAULT_STORE_DIR: &str = ".capctl";

#[derive(Parser)]
#[command(name = "capctl")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Capability promotion control plane", long_about = None)]
struct Cli {
    /// Control plane configuration file (TOML)
    #[arg(short, long, global = true, env = "CAPCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Store directory; overrides the configured backend
    #[arg(long, global = true, env = "CAPCTL_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a capability from a JSON manifest or registration request
    Register {
        /// Path to the JSON document
        file: PathBuf,

        /// Register despite conflicts or a changed payload at the same version
        #[arg(long)]
        force: bool,
    },

    /// Show a capability
    Get {
        id: String,

        /// Expected version (only the latest is addressable)
        #[arg(long)]
        version: Option<String>,
    },

    /// List capabilities matching a filter
    Query {
        #[arg(long = "type")]
        capability_type: Option<String>,

        #[arg(long)]
        status: Option<String>,

        /// Required tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long)]
        depends_on: Option<String>,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete a capability and its scorecards
    Delete { id: String },

    /// Direct dependencies of a capability
    Deps { id: String },

    /// Capabilities that depend on this one
    Dependents {
        id: String,

        /// Follow dependents transitively
        #[arg(long)]
        transitive: bool,
    },

    /// Compatibility between two capabilities
    Compat { a: String, b: String },

    /// Scorecard operations
    Scorecard {
        #[command(subcommand)]
        action: ScorecardAction,
    },

    /// Promotion policy operations
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Cost-center budget operations
    Budget {
        #[command(subcommand)]
        action: BudgetAction,
    },

    /// Request a promotion and drive it until it finishes or pauses
    Promote {
        id: String,
        version: String,

        #[arg(short, long)]
        policy: String,

        #[arg(long, default_value = "staging")]
        from: String,

        #[arg(long, default_value = "production")]
        to: String,

        #[arg(long)]
        cost_center: Option<String>,

        #[arg(long, env = "USER", default_value = "capctl")]
        requested_by: String,

        #[arg(long)]
        reason: Option<String>,

        /// Only enqueue; leave execution to the daemon
        #[arg(long)]
        no_run: bool,
    },

    /// Approve (or reject) the open manual gate of an execution
    Approve {
        execution_id: String,

        /// Gate name; defaults to the currently open gate
        #[arg(long)]
        gate: Option<String>,

        #[arg(long = "as", env = "USER")]
        approver: String,

        #[arg(long)]
        reject: bool,

        #[arg(long)]
        comment: Option<String>,

        /// Only record the decision; leave execution to the daemon
        #[arg(long)]
        no_run: bool,
    },

    /// Cancel a promotion
    Cancel {
        execution_id: String,

        #[arg(long, default_value = "cancelled by operator")]
        reason: String,
    },

    /// Inspect promotion executions
    Execution {
        #[command(subcommand)]
        action: ExecutionAction,
    },

    /// Counters and component sizes
    Stats,

    /// Remove executions past the retention window
    Cleanup,
}

#[derive(Subcommand)]
enum ScorecardAction {
    /// Show the scorecard of a capability version
    Show {
        id: String,
        #[arg(long)]
        version: Option<String>,
    },
    /// Set one dimension score directly
    Set {
        id: String,
        version: String,
        /// performance, safety, quality, cost or constitutional
        dimension: String,
        value: f64,
    },
    /// Apply a JSON signal snapshot
    Metrics {
        id: String,
        /// Path to the signal snapshot JSON
        file: PathBuf,
        #[arg(long)]
        version: Option<String>,
    },
    /// Collect signals and re-score now
    Evaluate {
        id: String,
        #[arg(long)]
        version: Option<String>,
    },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// List active policies
    List,
    /// Show one policy
    Show { id: String },
    /// Validate a policy document without loading it
    Check { file: PathBuf },
}

#[derive(Subcommand)]
enum BudgetAction {
    /// Create or resize a cost-center budget
    Set { cost_center: String, total: f64 },
    /// Show one budget
    Show { cost_center: String },
    /// List every budget
    List,
}

#[derive(Subcommand)]
enum ExecutionAction {
    /// Show one execution
    Show { id: String },
    /// List executions, newest first
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        capability: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    capctl_core::init_tracing(cli.log_json, level);

    let config = resolve_config(cli.config.as_deref(), cli.store_dir.as_deref())?;
    let cp = open_plane(config).await?;
    run(&cp, cli.command, cli.json).await
}

/// Load the config file (if any) and point the store at a directory unless
/// the file selects a durable backend itself.
fn resolve_config(config: Option<&Path>, store_dir: Option<&Path>) -> Result<ControlPlaneConfig> {
    let mut config = match config {
        Some(path) => ControlPlaneConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ControlPlaneConfig::default(),
    };
    if let Some(dir) = store_dir {
        config.store.backend = StoreBackend::Fs;
        config.store.path = Some(dir.to_path_buf());
    } else if config.store.backend == StoreBackend::Memory {
        config.store.backend = StoreBackend::Fs;
        config.store.path = Some(PathBuf::from(DEFAULT_STORE_DIR));
    }
    Ok(config)
}

async fn open_plane(config: ControlPlaneConfig) -> Result<ControlPlane> {
    let cp = ControlPlane::builder(config)
        .build()
        .await
        .context("Failed to build control plane")?;
    let report = cp.hydrate().await.context("Failed to load store")?;
    debug!(?report, "store loaded");
    Ok(cp)
}

async fn run(cp: &ControlPlane, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Register { file, force } => cmd_register(cp, &file, force, json).await,
        Commands::Get { id, version } => {
            let cap = cp.get_capability(&id, version.as_deref()).await?;
            print_json(&cap)
        }
        Commands::Query {
            capability_type,
            status,
            tags,
            depends_on,
            offset,
            limit,
        } => {
            let filter = CapabilityFilter {
                capability_type,
                status: status.map(|s| s.parse::<CapabilityStatus>()).transpose()?,
                tags,
                depends_on,
                offset,
                limit,
                ..Default::default()
            };
            cmd_query(cp, &filter, json).await
        }
        Commands::Delete { id } => {
            let removed = cp.delete(&id).await?;
            output(json, &removed, || format!("Deleted {}@{}", removed.id(), removed.version()))
        }
        Commands::Deps { id } => {
            let deps = cp.registry().dependencies(&id).await?;
            output(json, &deps, || lines(&deps, "no dependencies"))
        }
        Commands::Dependents { id, transitive } => {
            let deps = if transitive {
                cp.registry().transitive_dependents(&id).await?
            } else {
                cp.registry().dependents(&id).await?
            };
            output(json, &deps, || lines(&deps, "no dependents"))
        }
        Commands::Compat { a, b } => {
            let entry = cp.registry().check_compatibility(&a, &b).await?;
            output(json, &entry, || {
                let verdict = if entry.compatible { "compatible" } else { "incompatible" };
                let mut out = format!("{a} / {b}: {verdict} (confidence {:.2})", entry.confidence);
                for r in &entry.reasons {
                    out.push_str(&format!("\n  - {r}"));
                }
                out
            })
        }
        Commands::Scorecard { action } => cmd_scorecard(cp, action, json).await,
        Commands::Policy { action } => cmd_policy(cp, action, json).await,
        Commands::Budget { action } => cmd_budget(cp, action, json).await,
        Commands::Promote {
            id,
            version,
            policy,
            from,
            to,
            cost_center,
            requested_by,
            reason,
            no_run,
        } => {
            let mut request = PromotionRequest::new(id, version, policy)
                .with_stages(from.parse::<Stage>()?, to.parse::<Stage>()?)
                .requested_by(requested_by);
            if let Some(cc) = cost_center {
                request = request.with_cost_center(cc);
            }
            request.reason = reason;
            cmd_promote(cp, request, no_run, json).await
        }
        Commands::Approve {
            execution_id,
            gate,
            approver,
            reject,
            comment,
            no_run,
        } => {
            let gate = match gate {
                Some(g) => g,
                None => open_gate(&cp.execution(&execution_id).await?)?,
            };
            let mut approval = if reject {
                Approval::reject(approver, gate, comment.clone().unwrap_or_default())
            } else {
                Approval::approve(approver, gate)
            };
            approval.comment = comment;
            cp.approve(&execution_id, approval).await?;
            if !no_run {
                cp.run_pending().await;
            }
            let exec = cp.execution(&execution_id).await?;
            output(json, &exec, || render_execution(&exec))
        }
        Commands::Cancel {
            execution_id,
            reason,
        } => {
            let exec = cp.cancel(&execution_id, &reason).await?;
            output(json, &exec, || render_execution(&exec))
        }
        Commands::Execution { action } => match action {
            ExecutionAction::Show { id } => {
                let exec = cp.execution(&id).await?;
                output(json, &exec, || render_execution(&exec))
            }
            ExecutionAction::List { status, capability } => {
                let filter = ExecutionFilter {
                    status: status.map(|s| s.parse::<ExecutionStatus>()).transpose()?,
                    capability_id: capability,
                };
                let execs = cp.executions(&filter).await;
                output(json, &execs, || {
                    if execs.is_empty() {
                        return "No executions".to_string();
                    }
                    execs
                        .iter()
                        .map(|e| {
                            format!(
                                "{}  {:<17} {}@{} via {}",
                                e.id, e.status.as_str(), e.request.capability_id, e.request.version, e.policy.id
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                })
            }
        },
        Commands::Stats => {
            let stats = cp.stats().await;
            print_json(&stats)
        }
        Commands::Cleanup => {
            let removed = cp.cleanup().await?;
            output(json, &removed, || format!("Removed {removed} terminal executions"))
        }
    }
}

async fn cmd_register(cp: &ControlPlane, file: &Path, force: bool, json: bool) -> Result<()> {
    let mut request = read_registration(file)?;
    request.force_update |= force;
    let result = cp.register(request).await?;
    output(json, &result, || {
        let mut out = format!(
            "{:?} {}@{}\nHash: {}",
            result.status, result.capability_id, result.version, result.content_hash
        );
        for w in &result.warnings {
            out.push_str(&format!("\nwarning: {w}"));
        }
        out
    })
}

/// Accept either a full registration request (`{"manifest": ...}`) or a bare
/// manifest.
fn read_registration(path: &Path) -> Result<RegistrationRequest> {
    let value: serde_json::Value = read_json_file(path)?;
    if value.get("manifest").is_some() {
        serde_json::from_value(value)
            .with_context(|| format!("Invalid registration request in {}", path.display()))
    } else {
        let manifest: CapabilityManifest = serde_json::from_value(value)
            .with_context(|| format!("Invalid capability manifest in {}", path.display()))?;
        Ok(RegistrationRequest::new(manifest))
    }
}

async fn cmd_query(cp: &ControlPlane, filter: &CapabilityFilter, json: bool) -> Result<()> {
    let result = cp.registry().query(filter).await;
    output(json, &result, || {
        let mut out = format!(
            "{} of {} (offset {})",
            result.items.len(),
            result.total,
            result.offset
        );
        for cap in &result.items {
            out.push_str(&format!(
                "\n{:<24} {:<10} {:<11} {}",
                cap.id(),
                cap.version(),
                cap.status.as_str(),
                cap.manifest.capability_type
            ));
        }
        out
    })
}

async fn cmd_scorecard(cp: &ControlPlane, action: ScorecardAction, json: bool) -> Result<()> {
    let card = match action {
        ScorecardAction::Show { id, version } => {
            let version = match version {
                Some(v) => v,
                None => cp.get_capability(&id, None).await?.version().to_string(),
            };
            cp.scorecards().get(&id, &version).await?
        }
        ScorecardAction::Set {
            id,
            version,
            dimension,
            value,
        } => {
            let dimension: Dimension = dimension.parse()?;
            cp.scorecards()
                .update_dimension(&id, &version, dimension, value)
                .await?
        }
        ScorecardAction::Metrics { id, file, version } => {
            let snapshot: SignalSnapshot = read_json_file(&file)?;
            let cap = cp.get_capability(&id, version.as_deref()).await?;
            cp.scorecards().update_metrics(&cap, &snapshot).await?
        }
        ScorecardAction::Evaluate { id, version } => {
            cp.evaluate_scorecard(&id, version.as_deref()).await?
        }
    };
    output(json, &card, || render_scorecard(&card))
}

async fn cmd_policy(cp: &ControlPlane, action: PolicyAction, json: bool) -> Result<()> {
    match action {
        PolicyAction::List => {
            let policies = cp.policies().list().await;
            output(json, &policies, || {
                policies
                    .iter()
                    .map(|p| {
                        let gates: Vec<&str> = p.gates.iter().map(|g| g.name.as_str()).collect();
                        format!(
                            "{:<10} {:<9} overall>={:.2} rollout={} gates=[{}]",
                            p.id,
                            p.tier.as_str(),
                            p.criteria.min_overall,
                            p.rollout.strategy,
                            gates.join(", ")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        PolicyAction::Show { id } => {
            let policy = cp.policies().get(&id).await?;
            print_json(&policy)
        }
        PolicyAction::Check { file } => {
            let set = load_policy_file(&file)
                .with_context(|| format!("Policy document {} is invalid", file.display()))?;
            let ids: Vec<String> = set.iter().map(|p| p.id.clone()).collect();
            output(json, &ids, || format!("OK: {} policies ({})", ids.len(), ids.join(", ")))
        }
    }
}

async fn cmd_budget(cp: &ControlPlane, action: BudgetAction, json: bool) -> Result<()> {
    let budgets = match action {
        BudgetAction::Set { cost_center, total } => {
            vec![cp.budgets().set_budget(&cost_center, total).await?]
        }
        BudgetAction::Show { cost_center } => vec![cp.budgets().get(&cost_center).await?],
        BudgetAction::List => cp.budgets().list().await,
    };
    output(json, &budgets, || {
        if budgets.is_empty() {
            return "No budgets".to_string();
        }
        budgets
            .iter()
            .map(|b| {
                format!(
                    "{:<16} {}  used {:.2} / {:.2}  remaining {:.2}",
                    b.cost_center,
                    b.period,
                    b.used,
                    b.total,
                    b.remaining()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}

async fn cmd_promote(
    cp: &ControlPlane,
    request: PromotionRequest,
    no_run: bool,
    json: bool,
) -> Result<()> {
    let exec = cp.request_promotion(request).await?;
    if !no_run {
        cp.run_pending().await;
    }
    let exec = cp.execution(&exec.id).await?;
    output(json, &exec, || render_execution(&exec))
}

fn open_gate(exec: &PromotionExecution) -> Result<String> {
    if exec.status != ExecutionStatus::AwaitingApproval {
        bail!("execution {} is {} and not awaiting approval", exec.id, exec.status);
    }
    match exec.current_gate_spec() {
        Some(spec) => Ok(spec.name.clone()),
        None => bail!("execution {} has no open gate", exec.id),
    }
}

fn render_execution(exec: &PromotionExecution) -> String {
    let mut out = format!(
        "Execution: {}\nCapability: {}@{}\nPolicy:    {}\nStatus:    {}\nRisk:      {:.2}",
        exec.id,
        exec.request.capability_id,
        exec.request.version,
        exec.policy.id,
        exec.status,
        exec.risk_score
    );
    for g in &exec.gate_results {
        out.push_str(&format!("\n  gate {:<20} {}", g.gate, g.status));
    }
    if let Some(spec) = exec.current_gate_spec() {
        if exec.status == ExecutionStatus::AwaitingApproval {
            out.push_str(&format!("\n  waiting on {} ({} approvals)", spec.name, spec.min_approvals));
        }
    }
    if let Some(r) = &exec.rollout {
        out.push_str(&format!(
            "\nRollout:   {} {} at {}% ({}/{} phases)",
            r.strategy,
            serde_json::to_value(r.state)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            r.traffic_percent,
            r.phases.len(),
            r.planned_phases.len()
        ));
    }
    if let Some(e) = &exec.error {
        out.push_str(&format!("\nError:     {e}"));
    }
    out
}

fn render_scorecard(card: &CapabilityScorecard) -> String {
    let mut out = format!(
        "{}@{}  overall {:.2}  grade {}  trend {:?}",
        card.capability_id, card.version, card.overall, card.grade, card.trend
    );
    for d in Dimension::ALL {
        out.push_str(&format!("\n  {:<15} {:.2}", d.as_str(), card.scores.get(d)));
    }
    for a in &card.alerts {
        out.push_str(&format!("\nalert: {a}"));
    }
    for r in &card.recommendations {
        out.push_str(&format!("\nrecommendation: {r}"));
    }
    out
}

fn lines(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        empty.to_string()
    } else {
        items.join("\n")
    }
}

fn output<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    if json {
        print_json(value)
    } else {
        println!("{}", text());
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn manifest_file(dir: &Path, id: &str) -> PathBuf {
        let path = dir.join(format!("{id}.json"));
        let manifest = CapabilityManifest::new(id, id, "1.0.0");
        std::fs::write(&path, serde_json::to_string(&manifest).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_promote_flags() {
        let cli = Cli::try_parse_from([
            "capctl", "--json", "promote", "svc-a", "1.0.0", "--policy", "low", "--no-run",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Promote {
                id, policy, no_run, ..
            } => {
                assert_eq!(id, "svc-a");
                assert_eq!(policy, "low");
                assert!(no_run);
            }
            _ => panic!("expected promote"),
        }
    }

    #[test]
    fn test_store_dir_overrides_backend() {
        let c = resolve_config(None, Some(Path::new("/tmp/capctl-test"))).unwrap();
        assert_eq!(c.store.backend, StoreBackend::Fs);
        assert_eq!(c.store.path, Some(PathBuf::from("/tmp/capctl-test")));

        let c = resolve_config(None, None).unwrap();
        assert_eq!(c.store.path, Some(PathBuf::from(DEFAULT_STORE_DIR)));
    }

    #[test]
    fn test_read_registration_accepts_bare_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = manifest_file(dir.path(), "svc-a");
        let req = read_registration(&path).unwrap();
        assert_eq!(req.manifest.id, "svc-a");
        assert!(!req.force_update);

        let wrapped = dir.path().join("wrapped.json");
        let full = RegistrationRequest::new(CapabilityManifest::new("svc-b", "svc-b", "2.0.0")).forced();
        std::fs::write(&wrapped, serde_json::to_string(&full).unwrap()).unwrap();
        let req = read_registration(&wrapped).unwrap();
        assert_eq!(req.manifest.version, "2.0.0");
        assert!(req.force_update);
    }

    #[tokio::test]
    async fn test_register_then_promote_against_store_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("store");
        let config = resolve_config(None, Some(&store)).unwrap();

        let cp = open_plane(config.clone()).await.unwrap();
        let file = manifest_file(dir.path(), "svc-a");
        run(&cp, Commands::Register { file, force: false }, true)
            .await
            .unwrap();
        let cap = cp.get_capability("svc-a", None).await.unwrap();
        cp.scorecards()
            .update_metrics(
                &cap,
                &SignalSnapshot {
                    test_coverage: Some(0.9),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        for d in Dimension::ALL {
            cp.scorecards()
                .update_dimension("svc-a", "1.0.0", d, 0.9)
                .await
                .unwrap();
        }

        // A second invocation sees the same store.
        let cp = open_plane(config).await.unwrap();
        let promote = Commands::Promote {
            id: "svc-a".into(),
            version: "1.0.0".into(),
            policy: "low".into(),
            from: "staging".into(),
            to: "production".into(),
            cost_center: None,
            requested_by: "test".into(),
            reason: None,
            no_run: true,
        };
        run(&cp, promote, true).await.unwrap();
        let execs = cp.executions(&ExecutionFilter::default()).await;
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].status, ExecutionStatus::Pending);

        assert!(open_gate(&execs[0]).is_err());
    }
}
