use anyhow::{Context, Result, bail};
use console::style;
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};

use crate::core::terminal::{
    print_error, print_info, print_started, print_status, print_success, print_warn, status_label,
};

pub(crate) struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.with_context(|| {
            format!("could not reach {}. Is `loadrun serve` running?", self.base_url)
        })?;
        let status = resp.status();
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, body))
    }
}

fn error_of(body: &Value) -> &str {
    body.get("error")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown error")
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(|v| v.as_str()).unwrap_or("-")
}

pub struct TriggerArgs {
    pub team_id: String,
    pub scenario_id: String,
    pub comment: Option<String>,
    pub parallelism: Option<u32>,
    pub creator_id: Option<String>,
}

pub async fn trigger(api: &ApiClient, args: TriggerArgs) -> Result<()> {
    let (path, body) = match &args.creator_id {
        Some(creator) => (
            format!("/api/space/teams/{}/runs", args.team_id),
            json!({
                "scenario_id": args.scenario_id,
                "comment": args.comment,
                "parallelism": args.parallelism,
                "creator_id": creator,
            }),
        ),
        None => (
            format!("/api/dashboard/teams/{}/runs", args.team_id),
            json!({
                "scenario_id": args.scenario_id,
                "comment": args.comment,
                "parallelism": args.parallelism,
            }),
        ),
    };
    let (status, body) = api.call(Method::POST, &path, Some(body)).await?;

    let run = &body["run"];
    match status {
        StatusCode::CREATED => print_started(&format!(
            "Run #{} started with {} execution(s)",
            run["run_number"], body["successful_steps"]
        )),
        StatusCode::MULTI_STATUS => {
            print_warn(&format!(
                "Run #{} partially started: {}/{} step(s)",
                run["run_number"], body["successful_steps"], body["total_steps"]
            ));
            if let Some(failed) = body["failed_steps"].as_array() {
                for name in failed {
                    print_status("Failed", name.as_str().unwrap_or("-"));
                }
            }
        }
        _ => bail!("{} ({})", error_of(&body), status),
    }
    print_status("Run id", str_field(run, "id"));
    if let Some(names) = body["k6_test_names"].as_array() {
        for name in names {
            print_status("Execution", name.as_str().unwrap_or("-"));
        }
    }
    Ok(())
}

pub async fn show_run(api: &ApiClient, run_id: &str) -> Result<()> {
    let (status, body) = api
        .call(Method::GET, &format!("/api/runs/{}", run_id), None)
        .await?;
    if !status.is_success() {
        bail!("{} ({})", error_of(&body), status);
    }

    let run = &body["run"];
    println!(
        "{} #{}  {}",
        style("Run").bold(),
        run["run_number"],
        status_label(str_field(run, "status"))
    );
    print_status("Parallelism", &run["parallelism"].to_string());
    if let Some(comment) = run["comment"].as_str() {
        print_status("Comment", comment);
    }
    print_status("Created", str_field(run, "created_at"));
    if let Some(done) = run["completed_at"].as_str() {
        print_status("Completed", done);
    }

    let steps = body["steps"].as_array().cloned().unwrap_or_default();
    if steps.is_empty() {
        print_info("No steps recorded.");
    }
    for step in &steps {
        println!(
            "  {:>3}. {:<24} {:<10} {}",
            step["step_order"],
            str_field(step, "step_name"),
            status_label(str_field(step, "status")),
            style(str_field(step, "id")).dim()
        );
        if let Some(err) = step["error_message"].as_str() {
            println!("       {}", style(err).red());
        }
    }
    Ok(())
}

pub async fn step_logs(api: &ApiClient, step_id: &str, tail_lines: Option<u32>) -> Result<()> {
    let path = match tail_lines {
        Some(n) => format!("/api/run-steps/{}?tail_lines={}", step_id, n),
        None => format!("/api/run-steps/{}", step_id),
    };
    let (status, body) = api.call(Method::GET, &path, None).await?;
    if !status.is_success() {
        bail!("{} ({})", error_of(&body), status);
    }
    let step = &body["step"];
    print_status(
        str_field(step, "step_name"),
        &status_label(str_field(step, "status")).to_string(),
    );
    match step["container_logs"].as_str() {
        Some(logs) if !logs.is_empty() => println!("{}", logs),
        _ => print_info("No logs collected yet."),
    }
    Ok(())
}

pub async fn cleanup(api: &ApiClient, run_id: &str) -> Result<()> {
    let (status, body) = api
        .call(Method::DELETE, &format!("/api/runs/{}/executions", run_id), None)
        .await?;
    if status != StatusCode::OK && status != StatusCode::MULTI_STATUS {
        bail!("{} ({})", error_of(&body), status);
    }
    let report = &body["cleanup"];
    let deleted = report["deleted"].as_array().cloned().unwrap_or_default();
    print_success(&format!("Removed {} execution(s)", deleted.len()));
    for failure in report["failures"].as_array().into_iter().flatten() {
        print_error(&format!(
            "{}: {}",
            str_field(failure, "name"),
            str_field(failure, "error")
        ));
    }
    Ok(())
}
