//! `plinth` command line: plan, apply, verify and destroy the ingest stack
//! against the in-memory provider.
//!
//! Configuration comes from `PLINTH_*` environment variables. State is
//! persisted to a JSON file between runs so `apply` resumes where a
//! previous run stopped.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use plinth_engine::{Engine, InMemoryProvider, StackState};
use plinth_stack::{
    Artifact, CallerIdentity, IngestStack, Parameters, PolicyDocument, ResolvedContext,
    StackDocuments,
};
use tracing::info;

mod telemetry;

const DEFAULT_STATE_FILE: &str = "plinth.state.json";
const DEFAULT_LAMBDA_DIR: &str = "lambda";

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();

    let command = env::args().nth(1).unwrap_or_else(|| "plan".to_owned());
    match command.as_str() {
        "plan" => plan().await,
        "apply" => apply().await,
        "verify" => verify().await,
        "destroy" => destroy().await,
        other => bail!("unknown command '{other}' (expected plan, apply, verify or destroy)"),
    }
}

struct LoadedStack {
    engine: Engine,
    ctx: ResolvedContext,
    identity: CallerIdentity,
}

fn load_stack() -> Result<LoadedStack> {
    let ctx = Parameters::from_env()
        .resolve()
        .context("resolving PLINTH_* parameters")?;
    let identity = CallerIdentity::resolve(&ctx.credentials);

    let documents = StackDocuments {
        compute_policy: load_document("PLINTH_COMPUTE_POLICY", "compute", default_compute_policy)?,
        gateway_policy: load_document("PLINTH_GATEWAY_POLICY", "gateway", default_gateway_policy)?,
        request_template: load_document(
            "PLINTH_REQUEST_TEMPLATE",
            "request-template",
            default_request_template,
        )?,
    };

    let lambda_dir =
        env::var("PLINTH_LAMBDA_DIR").unwrap_or_else(|_| DEFAULT_LAMBDA_DIR.to_owned());
    let artifact = Artifact::package(Path::new(&lambda_dir))
        .with_context(|| format!("packaging function sources from {lambda_dir}"))?;
    info!(hash = %artifact.content_hash, dir = %lambda_dir, "function artifact packaged");

    let blueprint = IngestStack::compose(&ctx, &documents, &artifact)?;
    let engine = Engine::new(blueprint)?;
    Ok(LoadedStack {
        engine,
        ctx,
        identity,
    })
}

/// Loads a document from the path in the named variable, falling back to a
/// built-in default when the variable is unset.
fn load_document(
    var: &str,
    name: &str,
    default: fn() -> serde_json::Value,
) -> Result<PolicyDocument> {
    match env::var(var) {
        Ok(path) => PolicyDocument::from_file(Path::new(&path)),
        Err(_) => {
            let bytes = serde_json::to_vec_pretty(&default())?;
            Ok(PolicyDocument::from_bytes(name, bytes)?)
        }
    }
}

fn default_compute_policy() -> serde_json::Value {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": ["dynamodb:PutItem"],
                "Resource": "*"
            },
            {
                "Effect": "Allow",
                "Action": ["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
                "Resource": "*"
            }
        ]
    })
}

fn default_gateway_policy() -> serde_json::Value {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": ["dynamodb:Scan"],
                "Resource": "*"
            }
        ]
    })
}

fn default_request_template() -> serde_json::Value {
    serde_json::json!({ "TableName": "$util.escapeJavaScript($stageVariables.table)" })
}

fn state_file() -> PathBuf {
    env::var("PLINTH_STATE_FILE")
        .unwrap_or_else(|_| DEFAULT_STATE_FILE.to_owned())
        .into()
}

async fn load_state(path: &Path) -> Result<StackState> {
    if !path.exists() {
        return Ok(StackState::new());
    }
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading state file {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing state file {}", path.display()))
}

async fn save_state(path: &Path, state: &StackState) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(state)?;
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("writing state file {}", path.display()))
}

async fn plan() -> Result<()> {
    let stack = load_stack()?;
    let state = load_state(&state_file()).await?;
    let plan = stack.engine.plan(&state);

    println!("account {}", stack.identity.account_id);
    for step in plan.steps() {
        println!("{:8} {:22} {}", format!("{:?}", step.action), step.kind, step.id);
    }
    println!("{} change(s) pending", plan.changes());
    Ok(())
}

async fn apply() -> Result<()> {
    let stack = load_stack()?;
    let path = state_file();
    let mut state = load_state(&path).await?;

    let provider = InMemoryProvider::new(&stack.ctx.region, &stack.identity.account_id);
    let report = stack.engine.apply(&provider, &mut state).await;
    save_state(&path, &state).await?;
    let report = report?;

    println!("account   {}", stack.identity.account_id);
    println!(
        "applied   {} created, {} replaced, {} updated, {} unchanged",
        report.created.len(),
        report.replaced.len(),
        report.updated.len(),
        report.unchanged.len()
    );
    if let Some(url) = report.outputs.invoke_url {
        println!("endpoint  {url}");
    }
    Ok(())
}

async fn verify() -> Result<()> {
    let stack = load_stack()?;
    let state = load_state(&state_file()).await?;
    stack.engine.verify_stage(&state)?;
    println!("stage deployment is current");
    Ok(())
}

async fn destroy() -> Result<()> {
    let stack = load_stack()?;
    let path = state_file();
    let mut state = load_state(&path).await?;

    let provider = InMemoryProvider::new(&stack.ctx.region, &stack.identity.account_id);
    let result = stack.engine.destroy(&provider, &mut state).await;
    save_state(&path, &state).await?;
    result?;

    println!("stack destroyed");
    Ok(())
}
