use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::config::{self, ChaliceConfig, StageConfig};
use crate::template::{AppContext, render_app};

/// Always listed first in requirements.txt.
pub const BASE_REQUIREMENTS: &[&str] = &["chalice", "python-telegram-bot==13.11"];
const CHALICE_CONFIG_VERSION: &str = "2.0";
const DEV_TOKEN_PLACEHOLDER: &str = "YOUR_BOT_TOKEN_HERE";

#[derive(Debug, Args)]
pub struct NewArgs {
    /// Name of the project to be generated
    pub project_name: String,
    /// Telegram bot token for local development
    pub bot_token: String,
    /// Additional dependencies to include in requirements.txt (e.g. openai)
    #[arg(long, num_args = 0..)]
    pub dependencies: Vec<String>,
    /// Directory to create the project in (defaults to the current directory)
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

impl NewArgs {
    pub fn execute(&self) -> Result<()> {
        let root = match &self.project_root {
            Some(root) => root.clone(),
            None => std::env::current_dir().context("could not determine current directory")?,
        };
        let project_dir =
            generate_project(&root, &self.project_name, &self.bot_token, &self.dependencies)?;
        tracing::info!(path = %project_dir.display(), "project generated");
        println!("Project {} has been successfully created.", self.project_name);
        Ok(())
    }
}

/// The name becomes a directory and the Chalice app name, so keep it to
/// `[A-Za-z0-9_-]`, 1-64 characters, not starting with '-'.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        anyhow::bail!("project name must be 1-64 characters, got {}", name.len());
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        anyhow::bail!("project name must match [A-Za-z0-9_-], got {name:?}");
    }
    if name.starts_with('-') {
        anyhow::bail!("project name must not start with '-', got {name:?}");
    }
    Ok(())
}

/// Write a new bot project into `root/<name>`, overwriting earlier output.
///
/// Files are written one after another; a failure part-way leaves the ones
/// already written in place.
pub fn generate_project(
    root: &Path,
    name: &str,
    token: &str,
    extra_dependencies: &[String],
) -> Result<PathBuf> {
    validate_name(name)?;

    let project_dir = root.join(name);
    let chalice_dir = project_dir.join(".chalice");
    fs::create_dir_all(&chalice_dir)
        .with_context(|| format!("creating {}", chalice_dir.display()))?;

    write_file(
        &project_dir.join("app.py"),
        &render_app(&AppContext { app_name: name })?,
    )?;
    write_file(
        &chalice_dir.join("config.json"),
        &to_json(&chalice_config(name, token))?,
    )?;
    write_file(&chalice_dir.join("dev-policy.json"), &to_json(&dev_policy())?)?;
    write_file(
        &project_dir.join("requirements.txt"),
        &requirements(extra_dependencies),
    )?;

    Ok(project_dir)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;
    tracing::debug!(path = %path.display(), "wrote file");
    Ok(())
}

fn chalice_config(name: &str, token: &str) -> ChaliceConfig {
    ChaliceConfig {
        version: CHALICE_CONFIG_VERSION.to_string(),
        app_name: name.to_string(),
        stages: BTreeMap::from([
            (
                config::LOCAL_STAGE.to_string(),
                StageConfig::with_token(token),
            ),
            (
                "dev".to_string(),
                StageConfig::with_token(DEV_TOKEN_PLACEHOLDER),
            ),
        ]),
    }
}

fn requirements(extra: &[String]) -> String {
    BASE_REQUIREMENTS
        .iter()
        .copied()
        .chain(extra.iter().map(String::as_str))
        .map(|dep| format!("{dep}\n"))
        .collect()
}

// --- IAM policy ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyDocument {
    version: &'static str,
    statement: Vec<PolicyStatement>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyStatement {
    effect: &'static str,
    action: Vec<&'static str>,
    resource: Resource,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Resource {
    One(&'static str),
    Many(Vec<&'static str>),
}

fn dev_policy() -> PolicyDocument {
    PolicyDocument {
        version: "2012-10-17",
        statement: vec![
            PolicyStatement {
                effect: "Allow",
                action: vec![
                    "logs:CreateLogGroup",
                    "logs:CreateLogStream",
                    "logs:PutLogEvents",
                    "cloudwatch:PutMetricData",
                ],
                resource: Resource::Many(vec!["arn:*:logs:*:*:*", "arn:*:cloudwatch:*:*:*"]),
            },
            PolicyStatement {
                effect: "Allow",
                action: vec![
                    "dynamodb:*",
                    "s3:ListBucket",
                    "s3:GetObject",
                    "s3:PutObject",
                    "s3:DeleteObject",
                ],
                resource: Resource::One("*"),
            },
        ],
    }
}

/// Pretty JSON with four-space indentation.
fn to_json<T: Serialize>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser).context("serializing JSON")?;
    buf.push(b'\n');
    Ok(String::from_utf8(buf)?)
}
