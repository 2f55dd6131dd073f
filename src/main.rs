//! Cloud-Ops Credentials CLI
//!
//! Operator front-end for the credential provider. Vault address and
//! credentials come from flags or the environment.
//!
//! # Usage
//! ```bash
//! # Create a project (admin credentials)
//! cloudops-credentials --role-id admin --secret-id x create-project payments
//!
//! # Register a target under it
//! cloudops-credentials create-target payments prod-aws \
//!   --role-arn arn:aws:iam::123456789012:role/deploy \
//!   --policy-arn arn:aws:iam::aws:policy/ReadOnlyAccess
//!
//! # Mint a token with the project's credentials
//! cloudops-credentials --role-id $ROLE_ID --secret-id $SECRET_ID get-token
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cloudops_credentials::naming::DEFAULT_PROJECT_PREFIX;
use cloudops_credentials::{
    CreateTargetRequest, CredentialProvider, ProviderConfig, TargetProperties,
    VaultCredentialProvider,
};

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser)]
#[command(name = "cloudops-credentials")]
#[command(about = "Project and target credential management on Vault", long_about = None)]
#[command(version)]
struct Cli {
    /// Vault server address
    #[arg(long, env = "VAULT_ADDR")]
    vault_addr: String,

    /// Vault token for policy and role management
    #[arg(long, env = "VAULT_TOKEN", default_value = "", hide_env_values = true)]
    vault_token: String,

    /// AppRole role ID, or `admin`
    #[arg(long, env = "ARGO_CLOUDOPS_VAULT_ROLE")]
    role_id: String,

    /// AppRole secret ID
    #[arg(long, env = "ARGO_CLOUDOPS_VAULT_SECRET", hide_env_values = true)]
    secret_id: String,

    /// Project the role ID belongs to
    #[arg(long, env = "ARGO_CLOUDOPS_PROJECT")]
    project: Option<String>,

    /// Prefix for project policies and roles
    #[arg(long, env = "ARGO_CLOUDOPS_PROJECT_PREFIX", default_value = DEFAULT_PROJECT_PREFIX)]
    project_prefix: String,

    /// Per-request timeout in seconds
    #[arg(long, env = "ARGO_CLOUDOPS_REQUEST_TIMEOUT_SECS", default_value = "30")]
    timeout: u64,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a project and print its role/secret ID
    CreateProject { name: String },

    /// Delete a project's policy and AppRole
    DeleteProject { name: String },

    /// Show a project
    GetProject { name: String },

    /// Check whether a project exists
    ProjectExists { name: String },

    /// Create a target under a project
    CreateTarget {
        project: String,
        name: String,

        /// Destination role ARN
        #[arg(long)]
        role_arn: String,

        /// Policy ARNs (repeatable)
        #[arg(long = "policy-arn")]
        policy_arns: Vec<String>,

        #[arg(long, default_value = "assumed_role")]
        credential_type: String,

        #[arg(long = "type", default_value = "aws_account")]
        target_type: String,
    },

    /// Delete a target
    DeleteTarget { project: String, name: String },

    /// Show a target
    GetTarget { project: String, name: String },

    /// Check whether a target exists
    TargetExists { project: String, name: String },

    /// List a project's targets
    ListTargets { project: String },

    /// Exchange project credentials for a client token
    GetToken,
}

fn render<T: Serialize>(format: &OutputFormat, value: &T, text: impl FnOnce() -> String) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(text()),
        OutputFormat::Json => serde_json::to_string_pretty(value).context("Failed to serialize result"),
    }
}

fn print<T: Serialize>(format: &OutputFormat, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    println!("{}", render(format, value, text)?);
    Ok(())
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    let config = ProviderConfig {
        vault_address: cli.vault_addr,
        vault_token: cli.vault_token,
        role_id: cli.role_id,
        secret_id: cli.secret_id,
        project: cli.project,
        project_prefix: cli.project_prefix,
        request_timeout: Duration::from_secs(cli.timeout),
    };
    config.validate().context("Invalid configuration")?;

    info!(
        vault = %config.vault_address,
        admin = config.principal().is_administrative(),
        "Credential provider starting"
    );

    let provider = VaultCredentialProvider::connect(&config)?;
    let output = cli.output;

    match cli.command {
        Commands::CreateProject { name } => {
            let credentials = provider.create_project(&name).await?;
            print(&output, &credentials, || {
                format!(
                    "Project: {}\n  Role ID:   {}\n  Secret ID: {}\n\nStore the secret ID now; it cannot be retrieved again.",
                    name, credentials.role_id, credentials.secret_id
                )
            })?;
        }

        Commands::DeleteProject { name } => {
            provider.delete_project(&name).await?;
            let result = json!({ "project": &name, "deleted": true });
            print(&output, &result, || format!("Deleted project: {}", name))?;
        }

        Commands::GetProject { name } => {
            let project = provider.get_project(&name).await?;
            print(&output, &project, || format!("Project: {}", project.name))?;
        }

        Commands::ProjectExists { name } => {
            let exists = provider.project_exists(&name).await?;
            print(&output, &exists, || exists.to_string())?;
        }

        Commands::CreateTarget {
            project,
            name,
            role_arn,
            policy_arns,
            credential_type,
            target_type,
        } => {
            let request = CreateTargetRequest {
                name,
                properties: TargetProperties {
                    credential_type,
                    policy_arns,
                    role_arn,
                },
                target_type,
            };
            provider.create_target(&project, &request).await?;
            print(&output, &request, || {
                format!("Created target: {}/{}", project, request.name)
            })?;
        }

        Commands::DeleteTarget { project, name } => {
            provider.delete_target(&project, &name).await?;
            let result = json!({ "project": &project, "target": &name, "deleted": true });
            print(&output, &result, || {
                format!("Deleted target: {}/{}", project, name)
            })?;
        }

        Commands::GetTarget { project, name } => {
            let target = provider.get_target(&project, &name).await?;
            print(&output, &target, || {
                format!(
                    "Target: {}/{}\n  Credential type: {}\n  Role ARN:        {}\n  Policy ARNs:     {}",
                    project,
                    name,
                    target.credential_type,
                    target.role_arn,
                    target.policy_arns.join(", ")
                )
            })?;
        }

        Commands::TargetExists { project, name } => {
            let exists = provider.target_exists(&project, &name).await?;
            print(&output, &exists, || exists.to_string())?;
        }

        Commands::ListTargets { project } => {
            let targets = provider.list_targets(&project).await?;
            print(&output, &targets, || targets.join("\n"))?;
        }

        Commands::GetToken => {
            let token = provider.get_token().await?;
            print(&output, &token, || token.client_token.clone())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_output_for_delete_project() {
        let cli = Cli::try_parse_from([
            "cloudops-credentials",
            "--vault-addr",
            "http://127.0.0.1:8200",
            "--vault-token",
            "root",
            "--role-id",
            "admin",
            "--secret-id",
            "x",
            "--output",
            "json",
            "delete-project",
            "payments",
        ])
        .unwrap();
        assert!(matches!(cli.output, OutputFormat::Json));

        let result = json!({ "project": "payments", "deleted": true });
        let rendered = render(&cli.output, &result, || unreachable!()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn test_text_output_uses_summary() {
        let rendered = render(&OutputFormat::Text, &json!({}), || "Deleted target: p/t".to_string()).unwrap();
        assert_eq!(rendered, "Deleted target: p/t");
    }
}
