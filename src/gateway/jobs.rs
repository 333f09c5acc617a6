//! Named remote operations invocable by clients.
//!
//! This module provides the built-in jobs:
//!
//! - `show_hostname`: Run `hostname` on the target
//! - `show_uptime`: Run `uptime` on the target
//! - `run_command` / `ha_run_command`: Run the arguments joined by spaces
//! - `send_file` / `ha_send_file`: Upload `(src, dst_dir)`
//! - `download_file` / `ha_download_file`: Download `(src)` into the working directory
//!
//! A job receives an open [`ConnectionHandler`] and the caller's positional
//! arguments and returns any JSON value. Jobs that only run a command return
//! the `[exit_code, [lines...]]` pair.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde_json::{Value, json};

use super::connection::ConnectionHandler;
use super::error::GatewayError;
use super::types::ExecOutput;

pub type JobFuture<'a> = BoxFuture<'a, Result<Value, GatewayError>>;

/// Signature shared by every job.
pub type JobFn = for<'a> fn(&'a ConnectionHandler, Vec<Value>) -> JobFuture<'a>;

/// Enumerable table of jobs keyed by snake_case name.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, JobFn>,
}

impl JobRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in job.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("show_hostname", show_hostname);
        registry.register("show_uptime", show_uptime);
        registry.register("run_command", run_command);
        registry.register("ha_run_command", ha_run_command);
        registry.register("send_file", send_file);
        registry.register("ha_send_file", ha_send_file);
        registry.register("download_file", download_file);
        registry.register("ha_download_file", ha_download_file);
        registry
    }

    /// Add or replace a job.
    pub fn register(&mut self, name: &str, job: JobFn) {
        self.jobs.insert(normalize(name), job);
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    /// Look up a job; `show-hostname` and `show_hostname` are the same job.
    pub fn get(&self, name: &str) -> Option<JobFn> {
        self.jobs.get(&normalize(name)).copied()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn normalize(name: &str) -> String {
    name.trim().replace('-', "_")
}

fn exec_value(out: ExecOutput) -> Result<Value, GatewayError> {
    serde_json::to_value(out).map_err(|e| GatewayError::Transport(format!("encode result: {e}")))
}

fn arg_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn required_arg(args: &[Value], index: usize, job: &str, name: &str) -> Result<String, GatewayError> {
    args.get(index)
        .map(arg_text)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::InvalidParams(format!("{job} requires argument `{name}`")))
}

fn command_line(args: &[Value], job: &str) -> Result<String, GatewayError> {
    let line = args.iter().map(arg_text).collect::<Vec<_>>().join(" ");
    if line.trim().is_empty() {
        return Err(GatewayError::InvalidParams(format!(
            "{job} requires a command"
        )));
    }
    Ok(line)
}

fn show_hostname(conn: &ConnectionHandler, _args: Vec<Value>) -> JobFuture<'_> {
    Box::pin(async move { exec_value(conn.exec("hostname").await?) })
}

fn show_uptime(conn: &ConnectionHandler, _args: Vec<Value>) -> JobFuture<'_> {
    Box::pin(async move { exec_value(conn.exec("uptime").await?) })
}

fn run_command(conn: &ConnectionHandler, args: Vec<Value>) -> JobFuture<'_> {
    Box::pin(async move {
        let line = command_line(&args, "run_command")?;
        exec_value(conn.exec(&line).await?)
    })
}

fn ha_run_command(conn: &ConnectionHandler, args: Vec<Value>) -> JobFuture<'_> {
    Box::pin(async move {
        let line = command_line(&args, "ha_run_command")?;
        exec_value(conn.ha_exec(&line).await?)
    })
}

fn send_file(conn: &ConnectionHandler, args: Vec<Value>) -> JobFuture<'_> {
    Box::pin(async move {
        let src = required_arg(&args, 0, "send_file", "src")?;
        let dst = required_arg(&args, 1, "send_file", "dst_dir")?;
        let remote = conn.send_file(&src, &dst).await?;
        Ok(json!({ "result": true, "path": remote }))
    })
}

fn ha_send_file(conn: &ConnectionHandler, args: Vec<Value>) -> JobFuture<'_> {
    Box::pin(async move {
        let src = required_arg(&args, 0, "ha_send_file", "src")?;
        let dst = required_arg(&args, 1, "ha_send_file", "dst_dir")?;
        let remote = conn.ha_send_file(&src, &dst).await?;
        Ok(json!({ "result": true, "path": remote }))
    })
}

fn download_file(conn: &ConnectionHandler, args: Vec<Value>) -> JobFuture<'_> {
    Box::pin(async move {
        let src = required_arg(&args, 0, "download_file", "src")?;
        let local = conn.download_file(&src).await?;
        Ok(json!({ "result": true, "path": local.display().to_string() }))
    })
}

fn ha_download_file(conn: &ConnectionHandler, args: Vec<Value>) -> JobFuture<'_> {
    Box::pin(async move {
        let src = required_arg(&args, 0, "ha_download_file", "src")?;
        let local = conn.ha_download_file(&src).await?;
        Ok(json!({ "result": true, "path": local.display().to_string() }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::connection::fakes::FakeDialer;
    use crate::gateway::types::Credentials;

    async fn open(dialer: &FakeDialer, dir: &std::path::Path) -> ConnectionHandler {
        ConnectionHandler::open(dialer, &Credentials::new("h1", "u", "p"), dir)
            .await
            .unwrap()
    }

    mod registry {
        use super::*;

        #[test]
        fn test_builtin_names_sorted() {
            let names = JobRegistry::builtin().names();
            assert_eq!(names.len(), 8);
            let mut sorted = names.clone();
            sorted.sort();
            assert_eq!(names, sorted);
            assert!(names.contains(&"show_hostname".to_string()));
        }

        #[test]
        fn test_kebab_case_lookup() {
            let registry = JobRegistry::builtin();
            assert!(registry.get("show-hostname").is_some());
            assert!(registry.get("show_hostname").is_some());
            assert!(registry.get("reboot").is_none());
        }

        #[test]
        fn test_register_custom_job() {
            fn noop(_: &ConnectionHandler, _: Vec<Value>) -> JobFuture<'_> {
                Box::pin(async { Ok(Value::Null) })
            }
            let mut registry = JobRegistry::new();
            assert!(registry.is_empty());
            registry.register("noop-job", noop);
            assert_eq!(registry.names(), vec!["noop_job".to_string()]);
            assert_eq!(registry.len(), 1);
        }
    }

    mod builtin {
        use super::*;

        #[tokio::test]
        async fn test_show_hostname_returns_pair() {
            let dialer = FakeDialer::default();
            let conn = open(&dialer, std::path::Path::new("/tmp")).await;
            let job = JobRegistry::builtin().get("show_hostname").unwrap();
            let value = job(&conn, Vec::new()).await.unwrap();
            assert_eq!(value, json!([0, ["h1"]]));
        }

        #[tokio::test]
        async fn test_run_command_joins_args() {
            let dialer = FakeDialer::default();
            let conn = open(&dialer, std::path::Path::new("/tmp")).await;
            let job = JobRegistry::builtin().get("run_command").unwrap();
            job(&conn, vec![json!("ls"), json!("-l"), json!(2)])
                .await
                .unwrap();
            assert!(
                dialer
                    .journal()
                    .execs
                    .contains(&("h1".to_string(), "ls -l 2".to_string()))
            );
        }

        #[tokio::test]
        async fn test_run_command_without_args() {
            let dialer = FakeDialer::default();
            let conn = open(&dialer, std::path::Path::new("/tmp")).await;
            let job = JobRegistry::builtin().get("run_command").unwrap();
            let err = job(&conn, Vec::new()).await.unwrap_err();
            assert_eq!(err.kind(), "InvalidParams");
        }

        #[tokio::test]
        async fn test_send_file_missing_dst() {
            let dialer = FakeDialer::default();
            let conn = open(&dialer, std::path::Path::new("/tmp")).await;
            let job = JobRegistry::builtin().get("send_file").unwrap();
            let err = job(&conn, vec![json!("a.txt")]).await.unwrap_err();
            assert_eq!(err.kind(), "InvalidParams");
            assert!(err.to_string().contains("dst_dir"));
        }

        #[tokio::test]
        async fn test_download_file_reports_path() {
            let dir = tempfile::tempdir().unwrap();
            let dialer = FakeDialer::default();
            let conn = open(&dialer, dir.path()).await;
            let job = JobRegistry::builtin().get("download_file").unwrap();
            let value = job(&conn, vec![json!("/etc/motd")]).await.unwrap();
            assert_eq!(value["result"], json!(true));
            assert!(dir.path().join("motd").exists());
        }
    }
}
