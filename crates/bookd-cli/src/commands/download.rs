//! `bookd download`/`bookd cancel` — enqueue or cancel a release by id.

use anyhow::Result;

use crate::http_client::ApiClient;

pub fn run(client: &ApiClient, id: &str, priority: Option<i64>) -> Result<()> {
    let mut path = format!("/download?id={id}");
    if let Some(p) = priority {
        path.push_str(&format!("&priority={p}"));
    }
    let value = client.get(&path)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

pub fn cancel(client: &ApiClient, id: &str) -> Result<()> {
    let value = client.delete(&format!("/download/{id}/cancel"))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
