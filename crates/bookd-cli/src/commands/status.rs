//! `bookd status` — prints the queue grouped by status (`GET /api/status`).

use anyhow::Result;

use crate::http_client::ApiClient;

pub fn run(client: &ApiClient) -> Result<()> {
    let value = client.get("/status")?;
    let Some(by_status) = value.as_object() else {
        println!("unexpected response: {value}");
        return Ok(());
    };
    if by_status.values().all(|tasks| tasks.as_object().map(|m| m.is_empty()).unwrap_or(true)) {
        println!("Queue is empty.");
        return Ok(());
    }

    for (status, tasks) in by_status {
        let Some(tasks) = tasks.as_object() else { continue };
        if tasks.is_empty() {
            continue;
        }
        println!("{status}:");
        for (task_id, task) in tasks {
            let title = task.get("title").and_then(|v| v.as_str()).unwrap_or("?");
            let progress = task.get("progress").and_then(|v| v.as_f64()).unwrap_or(0.0);
            println!("  {task_id:<24} {progress:>5.1}%  {title}");
        }
    }
    Ok(())
}
